//! Continuation Reconciler
//!
//! When the model continues an existing message it may echo some, all or
//! none of that message before writing new text. The reconciler finds where
//! the genuine continuation starts and joins it onto the base text exactly
//! once, falling back from exact matches to canonicalized fuzzy alignment.

use regex::Regex;

use super::canon::Canonical;
use crate::config::ReconcileConfig;

/// How the decoded text was joined onto the base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Still inside the echoed prompt prefix
    InsidePrefix,
    /// Still inside the echoed overlap
    InsideOverlap,
    /// Overlap matched literally or by pattern
    Overlap,
    /// The whole base was echoed
    FullEcho,
    /// A trailing slice of the base was found approximately
    Fuzzy,
    /// Text is a leading fragment of the base
    LeadingFragment,
    /// Text already contains the base
    AlreadyComplete,
    /// Nothing aligned; text appended
    Appended,
}

/// A prompt prefix the model may echo before the overlap
#[derive(Debug, Clone)]
pub enum PromptPrefix {
    /// Template without slots
    Literal(String),
    /// Template with slots: anchored pattern plus its leading literal text.
    /// When the pattern has a capture group, the prefix ends where group 1
    /// ends, so trailing context (the overlap) can pin the cut.
    Pattern { regex: Regex, literal_head: String },
}

/// Fixed inputs for one continuation
#[derive(Debug, Clone)]
pub struct ContinuationState {
    /// The message body being extended
    pub base_text: String,
    /// Text shown while nothing new has arrived
    pub display_base: String,
    /// Trailing slice of the base the model was asked to repeat
    pub overlap_text: String,
    /// Runtime pattern for the overlap, anchored at the start
    pub overlap_regex: Option<Regex>,
    pub prompt_prefix: Option<PromptPrefix>,
}

impl ContinuationState {
    pub fn new(base_text: impl Into<String>, overlap_text: impl Into<String>) -> Self {
        let base_text = base_text.into();
        ContinuationState {
            display_base: base_text.clone(),
            base_text,
            overlap_text: overlap_text.into(),
            overlap_regex: None,
            prompt_prefix: None,
        }
    }

    pub fn with_overlap_regex(mut self, regex: Regex) -> Self {
        self.overlap_regex = Some(regex);
        self
    }

    pub fn with_prompt_prefix(mut self, prefix: PromptPrefix) -> Self {
        self.prompt_prefix = Some(prefix);
        self
    }
}

/// Result of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub text: String,
    pub join: JoinKind,
}

/// Joins decoded text onto a continuation base
#[derive(Debug, Clone)]
pub struct Reconciler {
    state: ContinuationState,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(state: ContinuationState, config: ReconcileConfig) -> Self {
        Reconciler { state, config }
    }

    pub fn state(&self) -> &ContinuationState {
        &self.state
    }

    /// Join `decoded` onto the base. Pure: the same input gives the same output.
    pub fn reconcile(&self, decoded: &str) -> Reconciled {
        let result = self.join(decoded);
        log::trace!(
            target: "structured_prefill::reconcile",
            "{:?} join, {} -> {} chars",
            result.join,
            decoded.len(),
            result.text.len()
        );
        result
    }

    fn join(&self, decoded: &str) -> Reconciled {
        let state = &self.state;
        let base = state.base_text.as_str();

        let rest = match self.strip_prompt_prefix(decoded) {
            Some(rest) => rest,
            None => return self.display(JoinKind::InsidePrefix),
        };

        let overlap = state.overlap_text.as_str();
        if !overlap.is_empty() {
            if let Some(new) = rest.strip_prefix(overlap) {
                return self.appended(new, JoinKind::Overlap);
            }
            if overlap.starts_with(rest) {
                return self.display(JoinKind::InsideOverlap);
            }
            if let Some(m) = state.overlap_regex.as_ref().and_then(|re| re.find(rest)) {
                if m.start() == 0 {
                    return self.appended(&rest[m.end()..], JoinKind::Overlap);
                }
            }
        }

        if !base.is_empty() {
            if let Some(new) = rest.strip_prefix(base) {
                return self.appended(new, JoinKind::FullEcho);
            }
        }

        let canon_base = Canonical::new(base);
        let canon_rest = Canonical::new(rest);

        if let Some(cut) = self.fuzzy_cut(&canon_base, &canon_rest) {
            return self.appended(&rest[canon_rest.byte_offset(cut)..], JoinKind::Fuzzy);
        }

        if canon_rest.len() < canon_base.len() && canon_base.starts_with(canon_rest.chars()) {
            return self.display(JoinKind::LeadingFragment);
        }

        if !canon_base.is_empty() && canon_rest.len() >= canon_base.len() {
            let need = canon_base
                .len()
                .min(self.config.complete_prefix_min.max(canon_base.len() / 2));
            if canon_rest.starts_with(&canon_base.chars()[..need]) {
                return Reconciled {
                    text: rest.to_string(),
                    join: JoinKind::AlreadyComplete,
                };
            }
        }

        self.appended(rest, JoinKind::Appended)
    }

    /// Text after the echoed prompt prefix; `None` while still inside it
    fn strip_prompt_prefix<'t>(&self, decoded: &'t str) -> Option<&'t str> {
        match &self.state.prompt_prefix {
            None => Some(decoded),
            Some(PromptPrefix::Literal(prefix)) => {
                if let Some(rest) = decoded.strip_prefix(prefix.as_str()) {
                    Some(rest)
                } else if prefix.starts_with(decoded) {
                    None
                } else {
                    Some(decoded)
                }
            }
            Some(PromptPrefix::Pattern {
                regex,
                literal_head,
            }) => match regex
                .captures(decoded)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            {
                Some(m) if m.start() == 0 => Some(&decoded[m.end()..]),
                _ if literal_head.starts_with(decoded)
                    || decoded.starts_with(literal_head.as_str()) =>
                {
                    None
                }
                _ => Some(decoded),
            },
        }
    }

    /// Char index in `rest` just past the best trailing-base match
    fn fuzzy_cut(&self, base: &Canonical, rest: &Canonical) -> Option<usize> {
        let cfg = &self.config;
        let step = cfg.fuzzy_step.max(1);
        let min_len = cfg.fuzzy_min_len.max(1);
        let mut len = cfg.fuzzy_max_len.min(base.len()).min(rest.len());
        let expected = self.state.overlap_text.chars().count();

        while len >= min_len {
            let needle = &base.chars()[base.len() - len..];
            let best = rest
                .find_all(needle)
                .into_iter()
                .map(|start| start + len)
                .min_by_key(|end| end.abs_diff(expected));
            if let Some(end) = best {
                return Some(end);
            }
            if len < min_len + step {
                break;
            }
            len -= step;
        }
        None
    }

    fn display(&self, join: JoinKind) -> Reconciled {
        Reconciled {
            text: self.state.display_base.clone(),
            join,
        }
    }

    fn appended(&self, new: &str, join: JoinKind) -> Reconciled {
        Reconciled {
            text: format!("{}{}", self.state.base_text, new),
            join,
        }
    }
}

/// Trailing slice of `base` of at most `max_chars` characters, starting at a
/// word boundary when one is available
pub fn select_overlap(base: &str, max_chars: usize) -> &str {
    let total = base.chars().count();
    if total <= max_chars {
        return base;
    }
    let start = base
        .char_indices()
        .nth(total - max_chars)
        .map_or(base.len(), |(i, _)| i);
    let slice = &base[start..];
    if base[..start].ends_with(char::is_whitespace) {
        return slice;
    }
    match slice.find(char::is_whitespace) {
        Some(ws) => {
            let snapped = slice[ws..].trim_start();
            if snapped.is_empty() {
                slice
            } else {
                snapped
            }
        }
        None => slice,
    }
}
