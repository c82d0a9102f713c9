//! Stream Phase
//!
//! Everything that runs while a generation streams: decoding the raw
//! payload, guarding against degenerate output, joining continuations, and
//! driving the host's display.
//!
//! # Architecture
//!
//! ```text
//! raw payload ──> Decoder ──> decoded text ──┬──> StreamGuard ──> Host::abort
//!                                            │
//!                                            └──> Reconciler / head hiding ──> Host::apply
//! ```
//!
//! The [`Controller`] owns the per-generation [`Session`] and is the only
//! piece that talks to the [`Host`].

pub mod canon;
pub mod decoder;
pub mod guard;
pub mod reconcile;
pub mod session;

pub use canon::{canon_char, canonicalize, Canonical};
pub use decoder::{extract, DecodeOutcome, Decoder, Layer};
pub use guard::{is_suspicious, GuardTrip, StreamGuard};
pub use reconcile::{
    select_overlap, ContinuationState, JoinKind, PromptPrefix, Reconciled, Reconciler,
};
pub use session::{
    ApplyOutcome, Controller, GenerationRequest, Host, Session, StreamEvent, TurnTarget,
};
