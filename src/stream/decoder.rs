//! Streaming Decoder
//!
//! Recovers the generated text from the cumulative raw payload. The payload
//! is usually an incomplete JSON object, sometimes invalid JSON (models
//! forget to escape quotes), and occasionally an older two-field shape.
//!
//! Extraction layers, first hit wins:
//!
//! | Layer | Input shape | Notes |
//! |-------|-------------|-------|
//! | Structured | `{"value": "..."}` | full JSON parse |
//! | Legacy pair | `{"prefix": "...", "content": "..."}` | full JSON parse |
//! | Tolerant | `{"value": "... "quoted" ...` | partial, bare quotes kept |
//! | Legacy scan | `{"prefix": "...", "content": "...` | partial, strict quotes |

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::pattern::assembler::VALUE_FIELD;
use crate::pattern::newline::decode_newlines;

static ESCAPED_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\\+""#).expect("static pattern"));

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Best-known text so far
    Text(String),
    /// Nothing extractable yet
    Pending,
}

impl DecodeOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            DecodeOutcome::Text(text) => Some(text),
            DecodeOutcome::Pending => None,
        }
    }
}

/// Which extraction layer produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Structured,
    LegacyPair,
    Tolerant,
    LegacyScan,
}

type Extractor = fn(&str) -> Option<String>;

const LAYERS: &[(Layer, Extractor)] = &[
    (Layer::Structured, structured),
    (Layer::LegacyPair, legacy_pair),
    (Layer::Tolerant, tolerant),
    (Layer::LegacyScan, legacy_scan),
];

/// Run the extraction layers in order
pub fn extract(raw: &str) -> Option<(Layer, String)> {
    LAYERS
        .iter()
        .find_map(|(layer, extractor)| extractor(raw).map(|text| (*layer, text)))
}

/// True if the payload starts like a JSON document or a fenced block
pub fn looks_structured(raw: &str) -> bool {
    let trimmed = raw.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with("```")
}

/// Per-generation decoder
#[derive(Debug, Clone)]
pub struct Decoder {
    newline_token: String,
    curly_quotes: bool,
    last: Option<String>,
}

impl Decoder {
    pub fn new(newline_token: impl Into<String>, curly_quotes: bool) -> Self {
        Decoder {
            newline_token: newline_token.into(),
            curly_quotes,
            last: None,
        }
    }

    pub fn newline_token(&self) -> &str {
        &self.newline_token
    }

    /// Last text returned, if any
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Decode the full payload received so far
    pub fn decode(&mut self, raw: &str) -> DecodeOutcome {
        let text = match extract(raw) {
            Some((layer, text)) => {
                log::trace!(target: "structured_prefill::decode", "{:?} layer hit", layer);
                self.finish(&text)
            }
            None if looks_structured(raw) => {
                log::trace!(
                    target: "structured_prefill::decode",
                    "no field in {} byte payload yet",
                    raw.len()
                );
                return match &self.last {
                    Some(last) => DecodeOutcome::Text(last.clone()),
                    None => DecodeOutcome::Pending,
                };
            }
            None if raw.is_empty() => return DecodeOutcome::Pending,
            None => self.finish(raw),
        };
        self.last = Some(text.clone());
        DecodeOutcome::Text(text)
    }

    /// Newline tokens, curly quotes, and escaped quotes back to plain text
    fn finish(&self, text: &str) -> String {
        let mut text = decode_newlines(text, &self.newline_token);
        if self.curly_quotes {
            text = text.replace(['\u{201C}', '\u{201D}'], "\"");
        }
        if text.contains("\\\"") {
            text = ESCAPED_QUOTE.replace_all(&text, "\"").into_owned();
        }
        text
    }
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.find('\n').map_or("", |nl| &rest[nl + 1..]);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_object(raw: &str) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(strip_fence(raw)).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn structured(raw: &str) -> Option<String> {
    let map = parse_object(raw)?;
    map.get(VALUE_FIELD)?.as_str().map(str::to_string)
}

fn legacy_pair(raw: &str) -> Option<String> {
    let map = parse_object(raw)?;
    let prefix = map.get("prefix").and_then(Value::as_str);
    let content = map.get("content").and_then(Value::as_str);
    if prefix.is_none() && content.is_none() {
        return None;
    }
    Some(format!("{}{}", prefix.unwrap_or(""), content.unwrap_or("")))
}

fn tolerant(raw: &str) -> Option<String> {
    let start = field_start(raw, VALUE_FIELD)?;
    Some(scan_string(&raw[start..], true).0)
}

fn legacy_scan(raw: &str) -> Option<String> {
    let content = field_start(raw, "content")?;
    let (content, _) = scan_string(&raw[content..], false);
    let prefix = match field_start(raw, "prefix") {
        Some(start) => match scan_string(&raw[start..], false) {
            (prefix, true) => prefix,
            (_, false) => String::new(),
        },
        None => String::new(),
    };
    Some(prefix + &content)
}

/// Byte offset just past the opening quote of `"field": "`
fn field_start(raw: &str, field: &str) -> Option<usize> {
    let key = format!("\"{}\"", field);
    let mut from = 0;
    while let Some(found) = raw[from..].find(&key) {
        let after_key = from + found + key.len();
        let rest = &raw[after_key..];
        let colon = rest.len() - rest.trim_start().len();
        if rest[colon..].starts_with(':') {
            let value = &rest[colon + 1..];
            let ws = value.len() - value.trim_start().len();
            if value[ws..].starts_with('"') {
                return Some(after_key + colon + 1 + ws + 1);
            }
        }
        from = after_key;
    }
    None
}

/// Scan a JSON string body. Returns the text and whether it was closed.
///
/// In tolerant mode a bare `"` only closes the string when the next
/// non-whitespace character is `}` or `,`. A trailing `"` with nothing
/// after it yet is held back and the string stays open, so the quote
/// shows up once later content proves it was part of the text.
fn scan_string(body: &str, tolerant: bool) -> (String, bool) {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                if !tolerant {
                    return (out, true);
                }
                let next = body[i + 1..].trim_start().chars().next();
                match next {
                    Some('}') | Some(',') => return (out, true),
                    None => return (out, false),
                    Some(_) => out.push('"'),
                }
            }
            '\\' => {
                let Some((_, esc)) = chars.next() else {
                    break;
                };
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{0008}'),
                    'f' => out.push('\u{000C}'),
                    'u' => {
                        let start = i + 2;
                        let Some(unit) = hex4(body, start) else {
                            let partial = &body[start..];
                            if partial.len() < 4 && partial.chars().all(|c| c.is_ascii_hexdigit()) {
                                break;
                            }
                            out.push('u');
                            continue;
                        };
                        for _ in 0..4 {
                            chars.next();
                        }
                        match decode_unit(body, start + 4, unit) {
                            UnitDecode::Char(c, extra) => {
                                out.push(c);
                                for _ in 0..extra {
                                    chars.next();
                                }
                            }
                            UnitDecode::Incomplete => break,
                        }
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
    (out, false)
}

enum UnitDecode {
    /// Decoded char and how many more bytes of input it consumed
    Char(char, usize),
    /// Input ends inside a surrogate pair
    Incomplete,
}

/// `\`, `\u`, or `\u` plus up to three hex digits
fn is_partial_escape(rest: &str) -> bool {
    let bytes = rest.as_bytes();
    match bytes {
        [] => true,
        [b'\\'] => true,
        [b'\\', b'u', hex @ ..] => hex.len() < 4 && hex.iter().all(u8::is_ascii_hexdigit),
        _ => false,
    }
}

fn hex4(body: &str, start: usize) -> Option<u16> {
    let digits = body.get(start..start + 4)?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

fn decode_unit(body: &str, after: usize, unit: u16) -> UnitDecode {
    if !(0xD800..0xDC00).contains(&unit) {
        return UnitDecode::Char(
            char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
            0,
        );
    }
    let rest = &body[after..];
    if rest.len() < 6 && is_partial_escape(rest) {
        return UnitDecode::Incomplete;
    }
    if let Some(low) = rest.strip_prefix("\\u").and_then(|_| hex4(body, after + 2)) {
        if (0xDC00..0xE000).contains(&low) {
            let code = 0x10000 + (((unit as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
            return UnitDecode::Char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER), 6);
        }
    }
    UnitDecode::Char(char::REPLACEMENT_CHARACTER, 0)
}
