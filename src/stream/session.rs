//! Runtime coordinator
//!
//! One [`Session`] exists per active generation. The [`Controller`] owns it,
//! feeds it stream events, and talks to the host application through the
//! [`Host`] trait.
//!
//! # Lifecycle
//!
//! ```text
//! begin ──> Chunk* ──> (Stopped ──> grace window ──> tick) | Finalized ──> teardown
//!   │                                                                      │
//!   └── a new begin tears the previous session down first ─────────────────┘
//! ```
//!
//! Chunks are coalesced: only the latest payload is decoded on the next
//! tick. Teardown runs exactly once and performs the final apply.

use std::time::{Duration, Instant};

use regex::Regex;

use super::decoder::{DecodeOutcome, Decoder};
use super::guard::{GuardTrip, StreamGuard};
use super::reconcile::{ContinuationState, PromptPrefix, Reconciler};
use crate::config::PrefillConfig;
use crate::pattern::{plan_constraint, ConstraintPlan, Diagnostic, WireConstraint};

/// Identifies the chat turn and alternative a session writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TurnTarget {
    pub turn: usize,
    pub variant: usize,
}

impl TurnTarget {
    pub fn new(turn: usize, variant: usize) -> Self {
        TurnTarget { turn, variant }
    }
}

/// The chat application hosting the generation
pub trait Host {
    /// Turn and variant currently selected
    fn target(&self) -> TurnTarget;

    /// Replace the text of `target`
    fn apply(&mut self, target: TurnTarget, text: &str);

    /// Ask the host to abort the in-flight generation
    fn abort(&mut self, trip: &GuardTrip);
}

/// One generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub template: String,
    pub target: TurnTarget,
    /// Existing message body when continuing a message
    pub continuation: Option<String>,
}

impl GenerationRequest {
    pub fn new(template: impl Into<String>, target: TurnTarget) -> Self {
        GenerationRequest {
            template: template.into(),
            target,
            continuation: None,
        }
    }

    pub fn continuing(mut self, base: impl Into<String>) -> Self {
        self.continuation = Some(base.into());
        self
    }
}

/// Events delivered by the host's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Cumulative raw payload so far
    Chunk(String),
    /// The generation was stopped; drain during the grace window
    Stopped,
    /// The host finalized the message
    Finalized,
}

/// What happened to the display text on a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same text as last time
    Unchanged,
    /// The host's selected turn no longer matches the session
    Discarded,
    /// Work scheduled for a later tick
    Deferred,
    /// No active session
    Idle,
}

/// State of one active generation
#[derive(Debug)]
pub struct Session {
    target: TurnTarget,
    plan: ConstraintPlan,
    decoder: Decoder,
    guard: StreamGuard,
    reconciler: Option<Reconciler>,
    head: Option<Regex>,
    pending: Option<String>,
    decoded: Option<String>,
    last_applied: Option<String>,
    grace_deadline: Option<Instant>,
    trip: Option<GuardTrip>,
}

impl Session {
    fn new(request: &GenerationRequest, config: &PrefillConfig, now: Instant) -> Self {
        let plan = plan_constraint(
            &request.template,
            request.continuation.as_deref(),
            config,
        );
        for diagnostic in &plan.diagnostics {
            log::warn!(target: "structured_prefill::session", "{}", diagnostic);
        }

        let reconciler = request.continuation.as_deref().map(|base| {
            let overlap = plan.overlap.as_ref();
            let mut state = ContinuationState::new(
                base,
                overlap.map(|o| o.text.clone()).unwrap_or_default(),
            );
            if let Some(regex) = overlap.and_then(|o| anchored(&o.pattern)) {
                state = state.with_overlap_regex(regex);
            }
            if let Some(prefix) = prompt_prefix(&plan) {
                state = state.with_prompt_prefix(prefix);
            }
            Reconciler::new(state, config.reconcile.clone())
        });

        let head = if config.session.hide_prefix && reconciler.is_none() {
            anchored_lazy(&plan.runtime_head)
        } else {
            None
        };

        Session {
            target: request.target,
            decoder: Decoder::new(plan.newline_token.clone(), plan.curly_quotes()),
            guard: StreamGuard::new(config.guard.clone(), now),
            plan,
            reconciler,
            head,
            pending: None,
            decoded: None,
            last_applied: None,
            grace_deadline: None,
            trip: None,
        }
    }

    pub fn target(&self) -> TurnTarget {
        self.target
    }

    pub fn plan(&self) -> &ConstraintPlan {
        &self.plan
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.plan.diagnostics
    }

    /// Full decoded text, before joining or hiding
    pub fn decoded(&self) -> Option<&str> {
        self.decoded.as_deref()
    }

    pub fn last_applied(&self) -> Option<&str> {
        self.last_applied.as_deref()
    }

    pub fn trip(&self) -> Option<&GuardTrip> {
        self.trip.as_ref()
    }

    pub fn in_grace(&self) -> bool {
        self.grace_deadline.is_some()
    }

    /// Decode the pending payload and apply the result
    fn pass(&mut self, now: Instant, host: &mut dyn Host, finishing: bool) -> ApplyOutcome {
        if let Some(raw) = self.pending.take() {
            let outcome = self.decoder.decode(&raw);
            let observed = outcome.text().or(self.decoded.as_deref()).unwrap_or("");
            if let Some(trip) = self.guard.observe(raw.len(), observed, now) {
                host.abort(&trip);
                self.trip = Some(trip);
            }
            if let DecodeOutcome::Text(text) = outcome {
                self.decoded = Some(text);
            }
        }

        let Some(display) = self.display(finishing) else {
            return ApplyOutcome::Unchanged;
        };
        self.apply(display, host)
    }

    fn display(&self, finishing: bool) -> Option<String> {
        let decoded = self.decoded.as_deref()?;
        if let Some(reconciler) = &self.reconciler {
            return Some(reconciler.reconcile(decoded).text);
        }
        let Some(head) = &self.head else {
            return Some(decoded.to_string());
        };
        match head.find(decoded) {
            Some(m) => Some(decoded[m.end()..].to_string()),
            None if finishing => Some(decoded.to_string()),
            None => Some(String::new()),
        }
    }

    fn apply(&mut self, display: String, host: &mut dyn Host) -> ApplyOutcome {
        let current = host.target();
        if current != self.target {
            log::debug!(
                target: "structured_prefill::session",
                "target moved from {:?} to {:?}, discarding apply",
                self.target,
                current
            );
            return ApplyOutcome::Discarded;
        }
        if self.last_applied.as_deref() == Some(display.as_str()) {
            return ApplyOutcome::Unchanged;
        }
        host.apply(self.target, &display);
        self.last_applied = Some(display);
        ApplyOutcome::Applied
    }
}

/// Drives at most one session at a time
#[derive(Debug)]
pub struct Controller {
    config: PrefillConfig,
    session: Option<Session>,
}

impl Controller {
    pub fn new(config: PrefillConfig) -> Self {
        Controller {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &PrefillConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Start a generation and return the constraint to send with it.
    ///
    /// Any previous session is torn down first.
    pub fn begin(
        &mut self,
        request: GenerationRequest,
        now: Instant,
        host: &mut dyn Host,
    ) -> WireConstraint {
        if self.session.is_some() {
            log::debug!(
                target: "structured_prefill::session",
                "new generation supersedes active session"
            );
            self.teardown(now, host);
        }
        let session = Session::new(&request, &self.config, now);
        let wire = session.plan.wire.clone();
        log::debug!(
            target: "structured_prefill::session",
            "session started for {:?}{}",
            request.target,
            if request.continuation.is_some() { " (continuation)" } else { "" }
        );
        self.session = Some(session);
        wire
    }

    /// Handle one stream event
    pub fn handle(
        &mut self,
        event: StreamEvent,
        now: Instant,
        host: &mut dyn Host,
    ) -> ApplyOutcome {
        let grace = Duration::from_millis(self.config.session.grace_ms);
        let Some(session) = self.session.as_mut() else {
            return ApplyOutcome::Idle;
        };
        match event {
            StreamEvent::Chunk(raw) => {
                session.pending = Some(raw);
                ApplyOutcome::Deferred
            }
            StreamEvent::Stopped => {
                let renewed = session.grace_deadline.is_some();
                session.grace_deadline = Some(now + grace);
                log::debug!(
                    target: "structured_prefill::session",
                    "stop received, grace window {}",
                    if renewed { "renewed" } else { "opened" }
                );
                ApplyOutcome::Deferred
            }
            StreamEvent::Finalized => self.teardown(now, host),
        }
    }

    /// Run the pending pass, then the teardown if the grace window is over
    pub fn tick(&mut self, now: Instant, host: &mut dyn Host) -> ApplyOutcome {
        let Some(session) = self.session.as_mut() else {
            return ApplyOutcome::Idle;
        };
        if session.grace_deadline.is_some_and(|deadline| now >= deadline) {
            return self.teardown(now, host);
        }
        if session.pending.is_none() {
            return ApplyOutcome::Unchanged;
        }
        session.pass(now, host, false)
    }

    /// Final pass and apply; runs once per session
    fn teardown(&mut self, now: Instant, host: &mut dyn Host) -> ApplyOutcome {
        let Some(mut session) = self.session.take() else {
            return ApplyOutcome::Idle;
        };
        let outcome = session.pass(now, host, true);
        log::debug!(
            target: "structured_prefill::session",
            "session for {:?} finished: {:?}",
            session.target,
            outcome
        );
        outcome
    }
}

/// `^(?:pattern)`, or `None` if it does not compile
fn anchored(pattern: &str) -> Option<Regex> {
    runtime_regex(format!("^(?:{})", pattern))
}

/// Like [`anchored`] but with greediness swapped, so open-ended slots such
/// as `[[free]]` stop at the shortest match instead of eating the body
fn anchored_lazy(pattern: &str) -> Option<Regex> {
    runtime_regex(format!("^(?U:{})", pattern))
}

fn runtime_regex(source: String) -> Option<Regex> {
    match Regex::new(&source) {
        Ok(regex) => Some(regex),
        Err(err) => {
            log::warn!(target: "structured_prefill::session", "runtime matcher dropped: {}", err);
            None
        }
    }
}

/// The echoed template, when continuing with a non-empty template.
///
/// With slots, the prefix is matched together with the overlap that must
/// follow it; group 1 is the prefix, so the cut lands where the overlap
/// starts.
fn prompt_prefix(plan: &ConstraintPlan) -> Option<PromptPrefix> {
    if plan.template.is_empty() {
        return None;
    }
    if !plan.template.has_slots() {
        return Some(PromptPrefix::Literal(plan.template.literal_text()));
    }
    let overlap = plan
        .overlap
        .as_ref()
        .map(|o| o.pattern.as_str())
        .filter(|p| !p.is_empty());
    let regex = match overlap {
        Some(overlap) => runtime_regex(format!(
            "^((?U:{}))(?:{})",
            plan.runtime_pattern, overlap
        )),
        None => anchored_lazy(&plan.runtime_pattern),
    };
    regex.map(|regex| PromptPrefix::Pattern {
        regex,
        literal_head: plan.template.literal_prefix(),
    })
}
