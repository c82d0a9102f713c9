//! Template Parser
//!
//! Splits a reply template into literal spans and `[[...]]` slots.
//! Parsing never fails: an unterminated `[[` is literal text and an
//! unrecognised kind becomes [`SlotKind::Unknown`].

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Slot, SlotKind, Span, Template};

const OPEN: &str = "[[";
const CLOSE: &str = "]]";
const HINT_MARKER: &str = "|hint:";

static INT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(-?\d+)\s*(?:-|\.\.|to)\s*(-?\d+)\s*$").expect("static pattern")
});
static INT_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(-?\d+)\s*$").expect("static pattern"));

impl Template {
    /// Parse template text into spans
    pub fn parse(input: &str) -> Template {
        parse_template(input)
    }
}

/// Parse template text into spans
pub fn parse_template(input: &str) -> Template {
    let mut spans = Vec::new();
    let mut literal = String::new();
    let mut rest = input;

    while let Some(open) = rest.find(OPEN) {
        let after_open = &rest[open + OPEN.len()..];
        let Some(close) = after_open.find(CLOSE) else {
            break;
        };
        literal.push_str(&rest[..open]);
        if !literal.is_empty() {
            spans.push(Span::Literal {
                text: std::mem::take(&mut literal),
            });
        }
        let body = &after_open[..close];
        let source = &rest[open..open + OPEN.len() + close + CLOSE.len()];
        spans.push(Span::Slot(parse_slot(body, source)));
        rest = &after_open[close + CLOSE.len()..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        spans.push(Span::Literal { text: literal });
    }
    Template { spans }
}

/// Parse the text between `[[` and `]]`
pub fn parse_slot(body: &str, source: &str) -> Slot {
    let (body, hint) = split_hint(body);
    let (name, params) = match body.split_once(':') {
        Some((name, params)) => (name.trim().to_ascii_lowercase(), params),
        None => (body.trim().to_ascii_lowercase(), ""),
    };

    let kind = match name.as_str() {
        "w" | "word" | "words" => {
            let (min, max) = parse_count_range(params).unwrap_or((1, 1));
            SlotKind::Words { min, max }
        }
        "opt" | "option" | "options" | "choice" => SlotKind::Options {
            options: split_list(params),
        },
        "re" | "regex" => SlotKind::Pattern {
            raw: params.to_string(),
        },
        "free" | "text" => SlotKind::Free,
        "keep" => SlotKind::Keep,
        "emotion" | "mood" => SlotKind::Emotion {
            words: split_list(params),
        },
        "action" => SlotKind::Action,
        "thought" => SlotKind::Thought,
        "line" => {
            let (min, max) = parse_count_range(params).unwrap_or((1, 1));
            SlotKind::Lines {
                min,
                max: Some(max),
            }
        }
        "lines" => match parse_count_range(params) {
            Some((min, max)) => SlotKind::Lines {
                min,
                max: Some(max),
            },
            None => SlotKind::Lines { min: 1, max: None },
        },
        "name" => SlotKind::Name,
        "num" | "number" => match parse_int_range(params) {
            Some((min, max)) => SlotKind::Number {
                min: Some(min),
                max: Some(max),
            },
            None => SlotKind::Number {
                min: None,
                max: None,
            },
        },
        _ => SlotKind::Unknown { name },
    };

    let mut slot = Slot::new(kind, source).with_params(params);
    if let Some(hint) = hint {
        slot = slot.with_hint(hint);
    }
    slot
}

/// Split a `|hint:` suffix off a slot body (the marker is case-insensitive)
fn split_hint(body: &str) -> (&str, Option<String>) {
    let lowered = body.to_ascii_lowercase();
    match lowered.find(HINT_MARKER) {
        Some(idx) => {
            let hint = body[idx + HINT_MARKER.len()..].trim();
            let hint = (!hint.is_empty()).then(|| hint.to_string());
            (&body[..idx], hint)
        }
        None => (body, None),
    }
}

/// `a|b|c` -> trimmed, non-empty entries
fn split_list(params: &str) -> Vec<String> {
    params
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `N` or `N-M` for non-negative counts. Order is kept as written.
pub fn parse_count_range(params: &str) -> Option<(usize, usize)> {
    let (min, max) = parse_int_range(params)?;
    if min < 0 || max < 0 {
        return None;
    }
    Some((min as usize, max as usize))
}

/// `N`, `N-M`, `N..M` or `N to M`, negatives allowed.
///
/// A single value `N` means `0..=N` (or `N..=0` when negative).
pub fn parse_int_range(params: &str) -> Option<(i64, i64)> {
    if let Some(caps) = INT_RANGE.captures(params) {
        let min = caps[1].parse().ok()?;
        let max = caps[2].parse().ok()?;
        return Some((min, max));
    }
    let caps = INT_SINGLE.captures(params)?;
    let value: i64 = caps[1].parse().ok()?;
    Some(if value < 0 { (value, 0) } else { (0, value) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_slot(input: &str) -> Slot {
        let template = parse_template(input);
        let slot = template.slots().next().cloned().expect("one slot");
        slot
    }

    #[test]
    fn test_literal_only() {
        let template = parse_template("Hello there.");
        assert_eq!(
            template.spans,
            vec![Span::Literal {
                text: "Hello there.".to_string()
            }]
        );
        assert!(!template.has_slots());
    }

    #[test]
    fn test_empty_template() {
        assert!(parse_template("").is_empty());
    }

    #[test]
    fn test_mixed_spans() {
        let template = parse_template("She said, \"[[w:3-5]]\" [[keep]][[free]]");
        assert_eq!(template.spans.len(), 5);
        assert_eq!(template.literal_prefix(), "She said, \"");
        let kinds: Vec<_> = template.slots().map(|s| s.kind.name()).collect();
        assert_eq!(kinds, vec!["words", "keep", "free"]);
    }

    #[test]
    fn test_word_counts() {
        assert_eq!(only_slot("[[w:3]]").kind, SlotKind::Words { min: 3, max: 3 });
        assert_eq!(
            only_slot("[[words:2-4]]").kind,
            SlotKind::Words { min: 2, max: 4 }
        );
        assert_eq!(only_slot("[[w]]").kind, SlotKind::Words { min: 1, max: 1 });
    }

    #[test]
    fn test_options_and_hint() {
        let slot = only_slot("[[opt: yes | no |maybe|hint:pick one]]");
        assert_eq!(
            slot.kind,
            SlotKind::Options {
                options: vec!["yes".into(), "no".into(), "maybe".into()]
            }
        );
        assert_eq!(slot.hint.as_deref(), Some("pick one"));
    }

    #[test]
    fn test_regex_keeps_raw_body() {
        let slot = only_slot("[[re:^[a-z]+: \\d$]]");
        assert_eq!(
            slot.kind,
            SlotKind::Pattern {
                raw: "^[a-z]+: \\d$".to_string()
            }
        );
    }

    #[test]
    fn test_lines_and_numbers() {
        assert_eq!(
            only_slot("[[line]]").kind,
            SlotKind::Lines {
                min: 1,
                max: Some(1)
            }
        );
        assert_eq!(
            only_slot("[[lines]]").kind,
            SlotKind::Lines { min: 1, max: None }
        );
        assert_eq!(
            only_slot("[[num:-5-10]]").kind,
            SlotKind::Number {
                min: Some(-5),
                max: Some(10)
            }
        );
        assert_eq!(
            only_slot("[[number]]").kind,
            SlotKind::Number {
                min: None,
                max: None
            }
        );
    }

    #[test]
    fn test_unknown_kind() {
        assert_eq!(
            only_slot("[[colour:red]]").kind,
            SlotKind::Unknown {
                name: "colour".to_string()
            }
        );
    }

    #[test]
    fn test_unterminated_slot_is_literal() {
        let template = parse_template("a [[w:2 b");
        assert!(!template.has_slots());
        assert_eq!(template.literal_text(), "a [[w:2 b");
    }

    #[test]
    fn test_int_range_forms() {
        assert_eq!(parse_int_range("1-10"), Some((1, 10)));
        assert_eq!(parse_int_range("-10--5"), Some((-10, -5)));
        assert_eq!(parse_int_range("3 to 7"), Some((3, 7)));
        assert_eq!(parse_int_range("7"), Some((0, 7)));
        assert_eq!(parse_int_range("-7"), Some((-7, 0)));
        assert_eq!(parse_int_range("x"), None);
        assert_eq!(parse_count_range("-1-3"), None);
    }
}
