//! Slot Grammar Compiler
//!
//! Turns a parsed [`Template`] into a pattern that matches exactly the
//! completions of the template. Literal spans are escaped; each slot kind
//! has its own generator. A slot that cannot be expressed safely under the
//! active dialect degrades to "one or more of any character" instead of
//! failing the whole request.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::dialect::{escape, Dialect, QuoteMode, Syntax, ANY_CHAR, LINE_CHAR};
use crate::slot::{Slot, SlotKind, Span, Template};

/// Option lists longer than this are truncated
pub const MAX_OPTIONS: usize = 50;

/// Integer ranges up to this many values are enumerated literally
pub const MAX_ENUMERATED_NUMBERS: i128 = 30;

/// Built-in vocabulary for `[[emotion]]`
pub const EMOTIONS: &[&str] = &[
    "happy",
    "sad",
    "angry",
    "afraid",
    "surprised",
    "disgusted",
    "calm",
    "anxious",
    "excited",
    "curious",
    "confused",
    "embarrassed",
    "proud",
    "ashamed",
    "jealous",
    "hopeful",
    "lonely",
    "content",
    "frustrated",
    "nervous",
    "amused",
    "tender",
    "bored",
    "determined",
];

static LEADING_FLAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\?[a-zA-Z]+\)").expect("static pattern"));
static DELIMITED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(.*)/[a-zA-Z]*$").expect("static pattern"));
static BOUNDED_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\\])\{\d*,?\d*\}").expect("static pattern"));
static SHORTHAND_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\\])(?:\\\\)*\\[dDwWsSbB]").expect("static pattern"));

/// A slot that could not be compiled as written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("slot {slot}: invalid pattern: {reason}")]
    InvalidPattern { slot: String, reason: String },

    #[error("slot {slot}: {feature} is not available in the {dialect} dialect")]
    Unsupported {
        slot: String,
        feature: &'static str,
        dialect: Dialect,
    },

    #[error("slot {slot}: empty pattern")]
    EmptyPattern { slot: String },
}

/// Result type for slot compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Inputs that shape a compilation
#[derive(Debug, Clone)]
pub struct CompileOptions<'a> {
    pub dialect: Dialect,
    pub quote_mode: QuoteMode,
    pub newline_token: &'a str,
    pub known_names: &'a [String],
}

impl<'a> CompileOptions<'a> {
    pub fn new(dialect: Dialect, newline_token: &'a str) -> Self {
        CompileOptions {
            dialect,
            quote_mode: QuoteMode::Escaped,
            newline_token,
            known_names: &[],
        }
    }

    pub fn with_quotes(mut self, quote_mode: QuoteMode) -> Self {
        self.quote_mode = quote_mode;
        self
    }

    pub fn with_names(mut self, known_names: &'a [String]) -> Self {
        self.known_names = known_names;
        self
    }
}

/// Output of compiling one template
#[derive(Debug, Clone, Default)]
pub struct CompiledTemplate {
    /// Pattern for the whole template (unanchored)
    pub pattern: String,
    /// Pattern for the spans before the first keep marker
    pub head_pattern: String,
    /// Whether literal quotes were compiled as curly quotes
    pub curly_quotes: bool,
    /// Slots that were degraded to the permissive pattern
    pub degraded: Vec<CompileError>,
}

impl CompiledTemplate {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }
}

/// Compiles templates for one dialect and newline token
#[derive(Debug, Clone)]
pub struct TemplateCompiler<'a> {
    syntax: Syntax,
    options: CompileOptions<'a>,
}

impl<'a> TemplateCompiler<'a> {
    pub fn new(options: CompileOptions<'a>) -> Self {
        let syntax = Syntax::new(options.dialect).with_quotes(options.quote_mode);
        TemplateCompiler { syntax, options }
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Compile every span left to right
    pub fn compile(&self, template: &Template) -> CompiledTemplate {
        let mut compiled = CompiledTemplate {
            curly_quotes: self.syntax.quotes() == QuoteMode::Curly,
            ..Default::default()
        };
        let mut head: Option<String> = None;

        for span in &template.spans {
            match span {
                Span::Literal { text } => {
                    let literal = self.syntax.literal(text, self.options.newline_token);
                    compiled.pattern.push_str(&literal);
                }
                Span::Slot(slot) => {
                    if slot.kind == SlotKind::Keep && head.is_none() {
                        head = Some(compiled.pattern.clone());
                    }
                    match self.compile_slot(slot) {
                        Ok(pattern) => compiled.pattern.push_str(&pattern),
                        Err(err) => {
                            log::warn!(
                                target: "structured_prefill::compile",
                                "{}; using permissive pattern", err
                            );
                            compiled.pattern.push_str(&self.permissive());
                            compiled.degraded.push(err);
                        }
                    }
                }
            }
        }

        compiled.head_pattern = head.unwrap_or_else(|| compiled.pattern.clone());
        log::debug!(
            target: "structured_prefill::compile",
            "compiled {} spans into {} pattern bytes ({} degraded)",
            template.spans.len(),
            compiled.pattern.len(),
            compiled.degraded.len()
        );
        compiled
    }

    /// Compile one slot
    pub fn compile_slot(&self, slot: &Slot) -> CompileResult<String> {
        match &slot.kind {
            SlotKind::Words { min, max } => Ok(self.words(*min, *max)),
            SlotKind::Options { options } => Ok(self.options(options, &slot.source)),
            SlotKind::Pattern { raw } => self.user_pattern(raw, &slot.source),
            SlotKind::Free => Ok(self.permissive()),
            SlotKind::Keep => Ok(String::new()),
            SlotKind::Emotion { words } => {
                if words.is_empty() {
                    Ok(self.alternation(EMOTIONS.iter().copied()))
                } else {
                    Ok(self.options(words, &slot.source))
                }
            }
            SlotKind::Action => Ok(r"\*[^*\n]+\*".to_string()),
            SlotKind::Thought => Ok(r"\([^()\n]+\)".to_string()),
            SlotKind::Lines { min, max } => Ok(self.lines(*min, *max)),
            SlotKind::Name => Ok(self.name()),
            SlotKind::Number { min, max } => Ok(self.number(*min, *max)),
            SlotKind::Unknown { .. } => Ok(format!("{}+", self.syntax.non_space())),
        }
    }

    /// One or more of any character, newlines included
    pub fn permissive(&self) -> String {
        self.syntax.repeat(ANY_CHAR, 1, None)
    }

    fn words(&self, min: usize, max: usize) -> String {
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        if max == 0 {
            return String::new();
        }
        let word = format!("{}+", self.syntax.non_space());
        let gap = format!("{}+", self.syntax.space());
        let more = self
            .syntax
            .repeat(&format!("{gap}{word}"), min.saturating_sub(1), Some(max - 1));
        let body = format!("{word}{more}");
        if min == 0 {
            format!("(?:{body})?")
        } else {
            body
        }
    }

    fn options(&self, options: &[String], source: &str) -> String {
        if options.is_empty() {
            return format!("{}+", self.syntax.non_space());
        }
        if options.len() > MAX_OPTIONS {
            log::warn!(
                target: "structured_prefill::compile",
                "slot {}: {} options, keeping the first {}",
                source,
                options.len(),
                MAX_OPTIONS
            );
        }
        self.alternation(options.iter().map(String::as_str).take(MAX_OPTIONS))
    }

    /// Deduplicated literal alternation, longest first
    fn alternation<'s>(&self, items: impl Iterator<Item = &'s str>) -> String {
        let mut seen = HashSet::new();
        let mut items: Vec<&str> = items.filter(|item| seen.insert(*item)).collect();
        items.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let parts: Vec<String> = items
            .iter()
            .map(|item| self.syntax.literal(item, self.options.newline_token))
            .collect();
        format!("(?:{})", parts.join("|"))
    }

    fn user_pattern(&self, raw: &str, source: &str) -> CompileResult<String> {
        let body = strip_pattern_decorations(raw);
        if body.is_empty() {
            return Err(CompileError::EmptyPattern {
                slot: source.to_string(),
            });
        }

        let caps = self.syntax.caps();
        let unsupported = |feature| CompileError::Unsupported {
            slot: source.to_string(),
            feature,
            dialect: self.options.dialect,
        };
        if !caps.bounded_repetition && BOUNDED_RANGE.is_match(body) {
            return Err(unsupported("bounded repetition"));
        }
        if !caps.class_shorthands && SHORTHAND_CLASS.is_match(body) {
            return Err(unsupported("a shorthand character class"));
        }
        if caps.ascii_only && !body.is_ascii() {
            return Err(unsupported("a non-ASCII literal"));
        }

        Regex::new(body).map_err(|e| CompileError::InvalidPattern {
            slot: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(format!("(?:{})", body))
    }

    fn lines(&self, min: usize, max: Option<usize>) -> String {
        let (min, max) = match max {
            Some(max) if max < min => (max, Some(min)),
            other => (min, other),
        };
        if max == Some(0) {
            return String::new();
        }
        let line = format!("{LINE_CHAR}+");
        let sep = escape(self.options.newline_token);
        let more = self.syntax.repeat(
            &format!("{sep}{line}"),
            min.saturating_sub(1),
            max.map(|m| m - 1),
        );
        let body = format!("{line}{more}");
        if min == 0 {
            format!("(?:{body})?")
        } else {
            body
        }
    }

    fn name(&self) -> String {
        let names: Vec<&str> = self
            .options
            .known_names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            "[A-Z][A-Za-z'-]*(?: [A-Z][A-Za-z'-]*)?".to_string()
        } else {
            self.alternation(names.into_iter())
        }
    }

    fn number(&self, min: Option<i64>, max: Option<i64>) -> String {
        let (Some(lo), Some(hi)) = (min, max) else {
            return format!("-?{}", self.syntax.repeat(self.syntax.digit(), 1, None));
        };
        let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };

        if (hi as i128) - (lo as i128) < MAX_ENUMERATED_NUMBERS {
            let values: Vec<String> = (lo..=hi).map(|v| v.to_string()).collect();
            return self.alternation(values.iter().map(String::as_str));
        }

        let min_digits = if lo <= 0 && hi >= 0 {
            1
        } else {
            digit_count(lo.unsigned_abs().min(hi.unsigned_abs()))
        };
        let max_digits = digit_count(lo.unsigned_abs().max(hi.unsigned_abs()));
        let sign = if lo < 0 { "-?" } else { "" };
        format!(
            "{sign}{}",
            self.syntax
                .repeat(self.syntax.digit(), min_digits, Some(max_digits))
        )
    }
}

/// Compile template text in one call
pub fn compile_template(text: &str, options: &CompileOptions<'_>) -> CompiledTemplate {
    TemplateCompiler::new(options.clone()).compile(&Template::parse(text))
}

/// Remove `/.../flags` delimiters, leading inline flags and outer anchors
pub fn strip_pattern_decorations(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(caps) = DELIMITED.captures(body) {
        if let Some(inner) = caps.get(1) {
            body = &body[inner.start()..inner.end()];
        }
    }
    if let Some(m) = LEADING_FLAGS.find(body) {
        body = &body[m.end()..];
    }
    if let Some(stripped) = body.strip_prefix('^') {
        body = stripped;
    }
    if body.ends_with('$') && !ends_with_escape(&body[..body.len() - 1]) {
        body = &body[..body.len() - 1];
    }
    body
}

/// True if `text` ends in an odd run of backslashes
fn ends_with_escape(text: &str) -> bool {
    text.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

fn digit_count(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(template: &str, dialect: Dialect) -> Regex {
        let options = CompileOptions::new(dialect, "<br>");
        let compiled = compile_template(template, &options);
        Regex::new(&format!("^(?:{})$", compiled.pattern)).unwrap()
    }

    #[test]
    fn test_word_count_default() {
        let re = matcher("[[w:2-3]]", Dialect::Default);
        assert!(re.is_match("go now"));
        assert!(re.is_match("go right now"));
        assert!(!re.is_match("go"));
        assert!(!re.is_match("go right now please"));
    }

    #[test]
    fn test_word_count_conservative_has_no_ranges() {
        let options = CompileOptions::new(Dialect::Conservative, "<br>");
        let compiled = compile_template("[[w:2-3]]", &options);
        assert!(!compiled.pattern.contains('{'));
        assert!(!compiled.pattern.contains(r"\s"));
        let re = Regex::new(&format!("^(?:{})$", compiled.pattern)).unwrap();
        assert!(re.is_match("go now"));
        assert!(re.is_match("go right now"));
        assert!(!re.is_match("go"));
    }

    #[test]
    fn test_options_dedup_and_escape() {
        let re = matcher("[[opt:a.b|c|a.b]]", Dialect::Default);
        assert!(re.is_match("a.b"));
        assert!(re.is_match("c"));
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn test_options_capped() {
        let list: Vec<String> = (0..60).map(|i| format!("o{}", i)).collect();
        let re = matcher(&format!("[[opt:{}]]", list.join("|")), Dialect::Default);
        assert!(re.is_match("o49"));
        assert!(!re.is_match("o55"));
    }

    #[test]
    fn test_user_pattern_anchors_and_flags_removed() {
        let re = matcher("id: [[re:/^[a-z]{2}\\d$/i]]", Dialect::Default);
        assert!(re.is_match("id: ab7"));
        assert!(!re.is_match("id: abc"));
    }

    #[test]
    fn test_invalid_user_pattern_degrades() {
        let options = CompileOptions::new(Dialect::Default, "<br>");
        let compiled = compile_template("x [[re:(unclosed]] y", &options);
        assert_eq!(compiled.degraded.len(), 1);
        assert!(matches!(
            compiled.degraded[0],
            CompileError::InvalidPattern { .. }
        ));
        let re = Regex::new(&format!("^(?:{})$", compiled.pattern)).unwrap();
        assert!(re.is_match("x anything at all y"));
    }

    #[test]
    fn test_conservative_rejects_ranges_in_user_pattern() {
        let options = CompileOptions::new(Dialect::Conservative, "<br>");
        let compiled = compile_template("[[re:[a-z]{3}]]", &options);
        assert!(matches!(
            compiled.degraded[0],
            CompileError::Unsupported { feature: "bounded repetition", .. }
        ));
        let compiled = compile_template(r"[[re:\d+]]", &options);
        assert_eq!(compiled.degraded.len(), 1);
        let compiled = compile_template(r"[[re:[0-9]+]]", &options);
        assert!(compiled.degraded.is_empty());
    }

    #[test]
    fn test_free_text_spans_newlines() {
        let options = CompileOptions::new(Dialect::Default, "<br>");
        let compiled = compile_template("[[free]]", &options);
        assert!(!compiled.pattern.contains(r"[\s\S]"));
        let re = Regex::new(&format!("^(?:{})$", compiled.pattern)).unwrap();
        assert!(re.is_match("one\ntwo"));
        assert!(!re.is_match(""));
    }

    #[test]
    fn test_lines_use_newline_token() {
        let re = matcher("[[lines:2-3]]", Dialect::Default);
        assert!(re.is_match("a<br>b"));
        assert!(re.is_match("a<br>b<br>c"));
        assert!(!re.is_match("a"));
    }

    #[test]
    fn test_names() {
        let names = vec!["Ada".to_string(), "Grace Hopper".to_string()];
        let options = CompileOptions::new(Dialect::Default, "<br>").with_names(&names);
        let compiled = compile_template("[[name]]!", &options);
        let re = Regex::new(&format!("^(?:{})$", compiled.pattern)).unwrap();
        assert!(re.is_match("Grace Hopper!"));
        assert!(!re.is_match("Bob!"));

        let re = matcher("[[name]]", Dialect::Default);
        assert!(re.is_match("Bob"));
        assert!(!re.is_match("bob"));
    }

    #[test]
    fn test_small_number_range_enumerates() {
        let re = matcher("[[num:1-12]]", Dialect::Default);
        assert!(re.is_match("1"));
        assert!(re.is_match("12"));
        assert!(!re.is_match("13"));
        assert!(!re.is_match("0"));
    }

    #[test]
    fn test_large_number_range_by_digits() {
        let re = matcher("[[num:-500-2000]]", Dialect::Conservative);
        assert!(re.is_match("-42"));
        assert!(re.is_match("1999"));
        assert!(!re.is_match("12345"));
        let re = matcher("[[num:100-5000]]", Dialect::Default);
        assert!(re.is_match("250"));
        assert!(!re.is_match("7"));
    }

    #[test]
    fn test_word_classes() {
        let re = matcher("[[emotion]] [[action]] [[thought]]", Dialect::Default);
        assert!(re.is_match("curious *leans in* (what now?)"));
        let re = matcher("[[mood:grim|glad]]", Dialect::Default);
        assert!(re.is_match("grim"));
        assert!(!re.is_match("happy"));
    }

    #[test]
    fn test_unknown_kind_matches_token() {
        let re = matcher("[[colour]]", Dialect::Default);
        assert!(re.is_match("teal"));
        assert!(!re.is_match("two words"));
    }

    #[test]
    fn test_empty_template_empty_pattern() {
        let options = CompileOptions::new(Dialect::Default, "<br>");
        assert!(compile_template("", &options).is_empty());
    }

    #[test]
    fn test_head_stops_at_keep() {
        let options = CompileOptions::new(Dialect::Default, "<br>");
        let compiled = compile_template("Hi [[keep]][[free]]", &options);
        assert_eq!(compiled.head_pattern, "Hi ");
        let compiled = compile_template("Hi [[free]]", &options);
        assert_eq!(compiled.head_pattern, compiled.pattern);
    }

    #[test]
    fn test_strip_decorations() {
        assert_eq!(strip_pattern_decorations("/^abc$/gi"), "abc");
        assert_eq!(strip_pattern_decorations("(?i)abc"), "abc");
        assert_eq!(strip_pattern_decorations(r"abc\$"), r"abc\$");
    }
}
