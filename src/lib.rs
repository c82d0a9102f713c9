//! Structured Prefill - constrained reply starts for chat models
//!
//! Providers that accept a JSON schema with a string `pattern` can be forced
//! to open a reply with a given shape. This crate turns a reply template with
//! typed slots into such a pattern, recovers the generated text from the
//! streamed structured payload, and keeps the host's display in sync.
//!
//! # Features
//!
//! - **Slot templates**: literal text with `[[w:2-4]]`, `[[opt:a|b]]`,
//!   `[[re:...]]`, `[[keep]]` and friends
//! - **Two regex dialects**: a default one and a conservative one for
//!   providers with weaker regex engines
//! - **Ban lists**: phrases the continuation may never contain, compiled to a
//!   complement automaton
//! - **Continuations**: anchor a new generation on the tail of an existing
//!   message and join the result exactly once
//! - **Stream guard**: stop generations that stall or degenerate into padding
//!
//! # Example
//!
//! ```rust
//! use structured_prefill::{plan_constraint, PrefillConfig};
//!
//! let config = PrefillConfig::default();
//! let plan = plan_constraint("She said, \"[[w:3-5]]\" [[keep]][[free]]", None, &config);
//!
//! let matcher = plan.constraint.matcher().unwrap();
//! assert!(matcher.is_match("She said, \"not today, thanks\" and walked off into the night."));
//! assert!(plan.wire.to_json().unwrap().contains("\"pattern\""));
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌─────────────────┐
//! │ slot parser  │──>│ TemplateCompiler  │──>│   Assembler     │──> wire constraint
//! └──────────────┘   └───────────────────┘   └────────▲────────┘
//!                                                     │
//!                          ban list automaton ────────┘
//!
//! ┌──────────────┐   ┌───────────────────┐   ┌─────────────────┐
//! │ raw payload  │──>│     Decoder       │──>│   Controller    │──> Host
//! └──────────────┘   └───────────────────┘   └──┬──────────┬───┘
//!                                               │          │
//!                                          StreamGuard  Reconciler
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod pattern;
pub mod slot;
pub mod stream;

pub use config::{
    AssemblyConfig, BanListConfig, CompilerConfig, ConfigError, ConfigResult, GuardConfig,
    PrefillConfig, ReconcileConfig, SessionConfig,
};
pub use pattern::{
    plan_constraint, Assembler, BanList, CompileError, CompileOptions, CompiledConstraint,
    ConstraintPlan, ContinuationToken, Diagnostic, Dialect, Fallback, QuoteMode, Syntax,
    TemplateCompiler, WireConstraint,
};
pub use slot::{
    load_template, validate_template, Slot, SlotKind, Span, Template, TemplateError,
    ValidationResult,
};
pub use stream::{
    ApplyOutcome, Controller, DecodeOutcome, Decoder, GenerationRequest, GuardTrip, Host,
    JoinKind, Reconciler, StreamEvent, StreamGuard, TurnTarget,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
