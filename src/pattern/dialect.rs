//! Pattern Dialects
//!
//! Providers accept different subsets of pattern syntax. Each [`Dialect`]
//! maps to a [`Capabilities`] descriptor, and [`Syntax`] is the only place
//! that branches on those capabilities: slot generators ask it for
//! repetition, whitespace classes and literals and never look at the
//! dialect themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unrolled copies emitted before falling back to unbounded repetition
pub const UNROLL_CAP: usize = 40;

/// One character of any kind, newline included, without `[\s\S]`
pub const ANY_CHAR: &str = r"(?:[^\n]|\n)";

/// One character other than a newline
pub const LINE_CHAR: &str = r"[^\n]";

/// Provider pattern dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Full feature set: bounded repetition, shorthand classes, Unicode
    #[default]
    Default,
    /// ASCII-only literals, no `{m,n}`, no `\s`/`\w`/`\d` shorthands
    Conservative,
}

/// What a dialect can express
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub bounded_repetition: bool,
    pub ascii_only: bool,
    pub class_shorthands: bool,
}

impl Dialect {
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Dialect::Default => Capabilities {
                bounded_repetition: true,
                ascii_only: false,
                class_shorthands: true,
            },
            Dialect::Conservative => Capabilities {
                bounded_repetition: false,
                ascii_only: true,
                class_shorthands: false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Default => "default",
            Dialect::Conservative => "conservative",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "strict" => Ok(Dialect::Default),
            "conservative" | "safe" => Ok(Dialect::Conservative),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

/// How literal straight quotes in a template are constrained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteMode {
    /// `"` may be preceded by any number of backslashes
    #[default]
    Escaped,
    /// `"` must be written as a curly quote; reversed by the decoder
    Curly,
}

/// Capability-driven pattern emitter
#[derive(Debug, Clone, Copy)]
pub struct Syntax {
    caps: Capabilities,
    quotes: QuoteMode,
}

impl Syntax {
    pub fn new(dialect: Dialect) -> Self {
        Syntax {
            caps: dialect.capabilities(),
            quotes: QuoteMode::Escaped,
        }
    }

    /// Select the quote mode. Curly quotes are non-ASCII, so ASCII-only
    /// dialects stay on escaped quotes.
    pub fn with_quotes(mut self, quotes: QuoteMode) -> Self {
        self.quotes = if self.caps.ascii_only {
            QuoteMode::Escaped
        } else {
            quotes
        };
        self
    }

    pub fn caps(&self) -> Capabilities {
        self.caps
    }

    pub fn quotes(&self) -> QuoteMode {
        self.quotes
    }

    /// One whitespace character
    pub fn space(&self) -> &'static str {
        if self.caps.class_shorthands {
            r"\s"
        } else {
            r"[ \t\r\n]"
        }
    }

    /// One non-whitespace character
    pub fn non_space(&self) -> &'static str {
        if self.caps.class_shorthands {
            r"\S"
        } else {
            r"[^ \t\r\n]"
        }
    }

    pub fn digit(&self) -> &'static str {
        "[0-9]"
    }

    /// Pattern for a literal straight quote
    pub fn quote(&self) -> &'static str {
        match self.quotes {
            QuoteMode::Escaped => r#"\\*""#,
            QuoteMode::Curly => "[\u{201C}\u{201D}]",
        }
    }

    /// `atom` repeated between `min` and `max` times (`None` = unbounded).
    ///
    /// Without bounded repetition the atom is unrolled: `min` required
    /// copies, then nested optionals, up to [`UNROLL_CAP`] copies in total;
    /// anything past the cap becomes `*`.
    pub fn repeat(&self, atom: &str, min: usize, max: Option<usize>) -> String {
        let (min, max) = match max {
            Some(max) if max < min => (max, Some(min)),
            other => (min, other),
        };
        if max == Some(0) || atom.is_empty() {
            return String::new();
        }
        let atom = group(atom);

        if self.caps.bounded_repetition {
            return match (min, max) {
                (0, None) => format!("{atom}*"),
                (1, None) => format!("{atom}+"),
                (n, None) => format!("{atom}{{{n},}}"),
                (0, Some(1)) => format!("{atom}?"),
                (1, Some(1)) => atom,
                (n, Some(m)) if n == m => format!("{atom}{{{n}}}"),
                (n, Some(m)) => format!("{atom}{{{n},{m}}}"),
            };
        }

        let required = min.min(UNROLL_CAP);
        match max {
            None => {
                if required == 0 {
                    format!("{atom}*")
                } else {
                    format!("{}{atom}+", atom.repeat(required - 1))
                }
            }
            Some(_) if min > UNROLL_CAP => format!("{}{atom}*", atom.repeat(required)),
            Some(m) => {
                let extra = m - min;
                let budget = UNROLL_CAP - required;
                let tail = if extra <= budget {
                    nested_optional(&atom, extra, String::new())
                } else {
                    nested_optional(&atom, budget, format!("{atom}*"))
                };
                format!("{}{}", atom.repeat(required), tail)
            }
        }
    }

    /// Pattern for literal template text.
    ///
    /// Newlines become the escaped newline token, straight quotes follow the
    /// quote mode, `\r` is dropped, and non-ASCII characters widen to any
    /// single non-newline character when the dialect is ASCII-only.
    pub fn literal(&self, text: &str, newline_token: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            match c {
                '\n' => out.push_str(&escape(newline_token)),
                '\r' => {}
                '"' => out.push_str(self.quote()),
                c if !c.is_ascii() && self.caps.ascii_only => out.push_str(LINE_CHAR),
                c => push_escaped(&mut out, c),
            }
        }
        out
    }
}

/// Escape pattern metacharacters in `text`
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
    ) {
        out.push('\\');
    }
    out.push(c);
}

/// Escape one character for use inside `[...]`
pub fn escape_class_char(c: char) -> String {
    match c {
        '\\' | ']' | '[' | '^' | '-' | '&' | '~' => format!("\\{}", c),
        '\n' => r"\n".to_string(),
        '\t' => r"\t".to_string(),
        '\r' => r"\r".to_string(),
        c => c.to_string(),
    }
}

/// Wrap `atom` in a non-capturing group unless it already is one unit
pub fn group(atom: &str) -> String {
    if is_single_unit(atom) {
        atom.to_string()
    } else {
        format!("(?:{})", atom)
    }
}

/// `(?:` + levels of `atom(?:atom(...)?)?` around `innermost`
fn nested_optional(atom: &str, levels: usize, innermost: String) -> String {
    let mut tail = innermost;
    for _ in 0..levels {
        tail = format!("(?:{atom}{tail})?");
    }
    tail
}

/// True for a single character, a single escape, one class, or one group
fn is_single_unit(p: &str) -> bool {
    let chars: Vec<char> = p.chars().collect();
    match chars.as_slice() {
        [] => false,
        [c] => !matches!(c, '|' | '(' | ')' | '[' | ']' | '{' | '}' | '?' | '*' | '+'),
        ['\\', _] => true,
        ['[', ..] => closing_bracket(&chars) == Some(chars.len() - 1),
        ['(', ..] => closing_paren(&chars) == Some(chars.len() - 1),
        _ => false,
    }
}

fn closing_bracket(chars: &[char]) -> Option<usize> {
    let mut i = 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn closing_paren(chars: &[char]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_class = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '(' if !in_class => depth += 1,
            ')' if !in_class => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn full(p: &str) -> Regex {
        Regex::new(&format!("^(?:{})$", p)).unwrap()
    }

    #[test]
    fn test_dialect_parse() {
        assert_eq!("Conservative".parse::<Dialect>(), Ok(Dialect::Conservative));
        assert_eq!("default".parse::<Dialect>(), Ok(Dialect::Default));
        assert!("weird".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_bounded_repeat() {
        let syntax = Syntax::new(Dialect::Default);
        assert_eq!(syntax.repeat("a", 2, Some(3)), "a{2,3}");
        assert_eq!(syntax.repeat("ab", 1, None), "(?:ab)+");
        assert_eq!(syntax.repeat("[0-9]", 4, Some(4)), "[0-9]{4}");
        assert_eq!(syntax.repeat("a", 0, Some(0)), "");
    }

    #[test]
    fn test_unrolled_repeat_matches_same_language() {
        let syntax = Syntax::new(Dialect::Conservative);
        let p = syntax.repeat("a", 2, Some(4));
        assert!(!p.contains('{'));
        let re = full(&p);
        assert!(!re.is_match("a"));
        assert!(re.is_match("aa"));
        assert!(re.is_match("aaaa"));
        assert!(!re.is_match("aaaaa"));
    }

    #[test]
    fn test_unrolled_repeat_caps_then_opens_up() {
        let syntax = Syntax::new(Dialect::Conservative);
        let p = syntax.repeat("a", 1, Some(100));
        let re = full(&p);
        assert!(re.is_match(&"a".repeat(100)));
        // past the cap the count is no longer enforced
        assert!(re.is_match(&"a".repeat(150)));
        assert!(!re.is_match(""));
    }

    #[test]
    fn test_unrolled_unbounded() {
        let syntax = Syntax::new(Dialect::Conservative);
        let re = full(&syntax.repeat("b", 3, None));
        assert!(!re.is_match("bb"));
        assert!(re.is_match("bbb"));
        assert!(re.is_match("bbbbbbbb"));
    }

    #[test]
    fn test_literal_escapes_and_quotes() {
        let syntax = Syntax::new(Dialect::Default);
        let p = syntax.literal("Is it (1+1)? \"yes\"", "<br>");
        let re = full(&p);
        assert!(re.is_match("Is it (1+1)? \"yes\""));
        assert!(re.is_match("Is it (1+1)? \\\"yes\\\""));
    }

    #[test]
    fn test_literal_newline_uses_token() {
        let syntax = Syntax::new(Dialect::Default);
        let re = full(&syntax.literal("a\nb", "<br>"));
        assert!(re.is_match("a<br>b"));
    }

    #[test]
    fn test_conservative_widens_non_ascii() {
        let syntax = Syntax::new(Dialect::Conservative);
        let p = syntax.literal("café", "<br>");
        assert!(p.is_ascii());
        assert!(full(&p).is_match("café"));
        assert!(full(&p).is_match("cafe"));
    }

    #[test]
    fn test_curly_quotes_need_unicode() {
        let curly = Syntax::new(Dialect::Default).with_quotes(QuoteMode::Curly);
        assert_eq!(curly.quotes(), QuoteMode::Curly);
        assert!(full(&curly.literal("\"", "<br>")).is_match("\u{201C}"));
        let ascii = Syntax::new(Dialect::Conservative).with_quotes(QuoteMode::Curly);
        assert_eq!(ascii.quotes(), QuoteMode::Escaped);
    }

    #[test]
    fn test_group_detection() {
        assert_eq!(group("a"), "a");
        assert_eq!(group(r"\S"), r"\S");
        assert_eq!(group("[^\\n]"), "[^\\n]");
        assert_eq!(group("(?:a|b)"), "(?:a|b)");
        assert_eq!(group("(?:a)|(?:b)"), "(?:(?:a)|(?:b))");
        assert_eq!(group("ab"), "(?:ab)");
    }
}
