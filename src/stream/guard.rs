//! Stream Guard
//!
//! Watches decoded progress over time and raises a stop request when a
//! generation degenerates. Two conditions trip it:
//!
//! - **Stalled**: the raw payload keeps growing but the decoded text has not
//!   moved for a long time.
//! - **Runaway padding**: several decoded deltas in a row are long runs of
//!   punctuation, backslashes or one repeated character, which is what a
//!   model thrashing against the pattern tends to emit.
//!
//! The guard trips at most once per generation and never stops anything
//! itself; the caller forwards the trip to the host.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::GuardConfig;

/// Why the guard asked for the generation to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTrip {
    Stalled {
        elapsed: Duration,
        idle: Duration,
        raw_len: usize,
    },
    RunawayPadding {
        elapsed: Duration,
        streak: u32,
        raw_len: usize,
    },
}

impl fmt::Display for GuardTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardTrip::Stalled { idle, raw_len, .. } => write!(
                f,
                "Generation stopped: no visible progress for {:.1}s \
                 while the model produced {} characters of output",
                idle.as_secs_f64(),
                raw_len
            ),
            GuardTrip::RunawayPadding { streak, raw_len, .. } => write!(
                f,
                "Generation stopped: the model emitted {} consecutive runs of padding \
                 ({} characters of output)",
                streak, raw_len
            ),
        }
    }
}

/// Per-generation guard state
#[derive(Debug, Clone)]
pub struct StreamGuard {
    config: GuardConfig,
    started_at: Instant,
    last_raw_len: usize,
    last_decoded_len: usize,
    last_progress_at: Instant,
    suspicious_streak: u32,
    stop_requested: bool,
}

impl StreamGuard {
    pub fn new(config: GuardConfig, now: Instant) -> Self {
        StreamGuard {
            config,
            started_at: now,
            last_raw_len: 0,
            last_decoded_len: 0,
            last_progress_at: now,
            suspicious_streak: 0,
            stop_requested: false,
        }
    }

    pub fn suspicious_streak(&self) -> u32 {
        self.suspicious_streak
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn last_raw_len(&self) -> usize {
        self.last_raw_len
    }

    /// Record one observation.
    ///
    /// `decoded` is the full decoded text, before continuation joining or
    /// prefix hiding. Returns a trip the first time a condition holds.
    pub fn observe(&mut self, raw_len: usize, decoded: &str, now: Instant) -> Option<GuardTrip> {
        self.last_raw_len = raw_len;
        let decoded_len = decoded.chars().count();
        if decoded_len > self.last_decoded_len {
            let delta: String = decoded.chars().skip(self.last_decoded_len).collect();
            if is_suspicious(&delta, &self.config) {
                self.suspicious_streak += 1;
                log::debug!(
                    target: "structured_prefill::guard",
                    "suspicious delta of {} chars, streak {}",
                    delta.chars().count(),
                    self.suspicious_streak
                );
            } else {
                self.suspicious_streak = self.suspicious_streak.saturating_sub(1);
            }
            self.last_progress_at = now;
        }
        self.last_decoded_len = decoded_len;

        if self.stop_requested {
            return None;
        }
        let trip = self.check(raw_len, now)?;
        self.stop_requested = true;
        log::warn!(target: "structured_prefill::guard", "{}", trip);
        Some(trip)
    }

    fn check(&self, raw_len: usize, now: Instant) -> Option<GuardTrip> {
        let elapsed = now.saturating_duration_since(self.started_at);
        let idle = now.saturating_duration_since(self.last_progress_at);
        let cfg = &self.config;

        if elapsed > Duration::from_millis(cfg.stall_min_elapsed_ms)
            && idle > Duration::from_millis(cfg.stall_idle_ms)
            && raw_len > cfg.stall_min_raw_len
        {
            return Some(GuardTrip::Stalled {
                elapsed,
                idle,
                raw_len,
            });
        }

        if elapsed > Duration::from_millis(cfg.padding_min_elapsed_ms)
            && self.suspicious_streak >= cfg.padding_streak
            && raw_len > cfg.padding_min_raw_len
        {
            return Some(GuardTrip::RunawayPadding {
                elapsed,
                streak: self.suspicious_streak,
                raw_len,
            });
        }

        None
    }
}

/// Classify one decoded delta as padding
pub fn is_suspicious(delta: &str, cfg: &GuardConfig) -> bool {
    let len = delta.chars().count();
    if len < cfg.padding_min_delta {
        return false;
    }

    let mut backslashes = 0usize;
    let mut commas = 0usize;
    let mut punct = 0usize;
    let mut letters = 0usize;
    let mut whitespace = 0usize;
    let mut longest_run = 0usize;
    let mut run = 0usize;
    let mut prev = None;

    for c in delta.chars() {
        match c {
            '\\' => backslashes += 1,
            ',' => commas += 1,
            _ => {}
        }
        if c.is_ascii_punctuation() {
            punct += 1;
        }
        if c.is_alphabetic() {
            letters += 1;
        }
        if c.is_whitespace() {
            whitespace += 1;
        }
        run = if prev == Some(c) { run + 1 } else { 1 };
        longest_run = longest_run.max(run);
        prev = Some(c);
    }

    let ratio = |n: usize| n as f64 / len as f64;
    ratio(backslashes) > cfg.backslash_ratio
        || (commas > cfg.comma_count && ratio(punct) > cfg.comma_punct_ratio)
        || ratio(punct) > cfg.punct_ratio
        || (whitespace == 0 && commas >= cfg.token_min_commas && letters > 0)
        || longest_run >= cfg.repeat_run
}
