//! Schema Assembler
//!
//! Joins the compiled template prefix, an optional raw suffix fragment and
//! the continuation token into one anchored pattern, validates it, and
//! wraps it in the wire-level constraint object.
//!
//! ```text
//! default:       ^(?:prefix)(?:suffix)(?:step){min,}tail$
//! conservative:  ^(?:prefix)(?:suffix)(?:step)+tail$
//! ```
//!
//! If the pattern does not validate, assembly retries without the ban-list
//! step and length floor, then with a pattern that accepts anything.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dialect::{escape, group, Dialect, ANY_CHAR};

/// Schema name sent with every request
pub const SCHEMA_NAME: &str = "structured_prefill";

/// The single string field the model writes into
pub const VALUE_FIELD: &str = "value";

/// Pattern used when nothing else validates
pub const MINIMAL_PATTERN: &str = r"^(?:[^\n]|\n)*$";

/// Assembled pattern failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("assembled pattern does not compile: {0}")]
    Invalid(String),
}

/// Result type for assembly
pub type AssemblyResult<T> = Result<T, AssemblyError>;

/// One advancing step of continuation text, plus what may end the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    /// Consumes at least one character
    pub step: String,
    /// Matches a partial step at end of text; may be empty
    pub tail: String,
}

impl ContinuationToken {
    /// Any single character
    pub fn any() -> Self {
        ContinuationToken {
            step: ANY_CHAR.to_string(),
            tail: String::new(),
        }
    }

    pub fn is_any(&self) -> bool {
        self.step == ANY_CHAR && self.tail.is_empty()
    }
}

impl Default for ContinuationToken {
    fn default() -> Self {
        Self::any()
    }
}

/// Which fallback produced the final pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Prefix kept, continuation unconstrained
    Unconstrained,
    /// Anything at all
    Minimal,
}

/// Assembly settings
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub dialect: Dialect,
    pub min_continuation_chars: usize,
    pub newline_token: String,
}

/// Final constraint for one generation
#[derive(Debug, Clone)]
pub struct CompiledConstraint {
    /// Anchored pattern for the whole field
    pub pattern: String,
    pub newline_token: String,
    pub min_continuation_chars: usize,
    pub dialect: Dialect,
    /// Set when a fallback replaced the requested pattern
    pub fallback: Option<Fallback>,
    /// Why earlier attempts were rejected
    pub rejected: Vec<AssemblyError>,
}

impl CompiledConstraint {
    /// Compile the pattern for local matching
    pub fn matcher(&self) -> AssemblyResult<Regex> {
        Regex::new(&self.pattern).map_err(|e| AssemblyError::Invalid(e.to_string()))
    }

    /// Wire object carrying this pattern
    pub fn to_wire(&self, description: &str) -> WireConstraint {
        WireConstraint::new(description, &self.pattern)
    }
}

/// Builds anchored patterns for one dialect and length floor
#[derive(Debug, Clone)]
pub struct Assembler {
    options: AssemblyOptions,
}

impl Assembler {
    pub fn new(options: AssemblyOptions) -> Self {
        Assembler { options }
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    /// Assemble, falling back until something validates
    pub fn assemble(
        &self,
        prefix: &str,
        suffix: Option<&str>,
        token: &ContinuationToken,
    ) -> CompiledConstraint {
        let mut rejected = Vec::new();
        let head = self.head(prefix, suffix);

        let requested = self.anchored(&head, token, self.options.min_continuation_chars);
        let attempts = [
            (requested, None),
            (
                self.anchored(&head, &ContinuationToken::any(), 0),
                Some(Fallback::Unconstrained),
            ),
            (MINIMAL_PATTERN.to_string(), Some(Fallback::Minimal)),
        ];

        for (pattern, fallback) in attempts {
            match validate(&pattern) {
                Ok(()) => {
                    if let Some(level) = fallback {
                        log::warn!(
                            target: "structured_prefill::assemble",
                            "using {:?} fallback pattern after {} rejected attempts",
                            level,
                            rejected.len()
                        );
                    }
                    log::debug!(
                        target: "structured_prefill::assemble",
                        "assembled {} byte pattern ({} dialect, min {})",
                        pattern.len(),
                        self.options.dialect,
                        self.options.min_continuation_chars
                    );
                    return self.constraint(pattern, fallback, rejected);
                }
                Err(err) => {
                    log::warn!(target: "structured_prefill::assemble", "{}", err);
                    rejected.push(err);
                }
            }
        }

        self.constraint(MINIMAL_PATTERN.to_string(), Some(Fallback::Minimal), rejected)
    }

    fn constraint(
        &self,
        pattern: String,
        fallback: Option<Fallback>,
        rejected: Vec<AssemblyError>,
    ) -> CompiledConstraint {
        CompiledConstraint {
            pattern,
            newline_token: self.options.newline_token.clone(),
            min_continuation_chars: self.options.min_continuation_chars,
            dialect: self.options.dialect,
            fallback,
            rejected,
        }
    }

    /// `(?:prefix)(?:suffix)` with newline tokens widened
    fn head(&self, prefix: &str, suffix: Option<&str>) -> String {
        let mut head = String::new();
        if !prefix.is_empty() {
            head.push_str(&format!(
                "(?:{})",
                widen_newlines(prefix, &self.options.newline_token)
            ));
        }
        if let Some(suffix) = suffix.filter(|s| !s.is_empty()) {
            head.push_str(&format!("(?:{})", suffix));
        }
        head
    }

    fn anchored(&self, head: &str, token: &ContinuationToken, min: usize) -> String {
        let step = group(&token.step);
        let repeat = if !self.options.dialect.capabilities().bounded_repetition {
            "+".to_string()
        } else {
            match min {
                0 => "*".to_string(),
                1 => "+".to_string(),
                n => format!("{{{},}}", n),
            }
        };
        format!("^{}{}{}{}$", head, step, repeat, token.tail)
    }
}

/// Accept a real newline wherever the escaped newline token appears
pub fn widen_newlines(pattern: &str, newline_token: &str) -> String {
    if newline_token.is_empty() {
        return pattern.to_string();
    }
    let escaped = escape(newline_token);
    pattern.replace(&escaped, &format!("(?:{}|\\n)", escaped))
}

/// Check that `pattern` compiles as a matching expression
pub fn validate(pattern: &str) -> AssemblyResult<()> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| AssemblyError::Invalid(e.to_string()))
}

/// Wire-level constraint object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConstraint {
    pub name: String,
    pub description: String,
    pub strict: bool,
    pub value: ObjectSchema,
}

/// Object with one required string field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: ValueProperties,
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties")]
    pub additional_properties: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueProperties {
    pub value: StringSchema,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: String,
}

impl WireConstraint {
    pub fn new(description: &str, pattern: &str) -> Self {
        WireConstraint {
            name: SCHEMA_NAME.to_string(),
            description: description.to_string(),
            strict: true,
            value: ObjectSchema {
                kind: "object".to_string(),
                properties: ValueProperties {
                    value: StringSchema {
                        kind: "string".to_string(),
                        pattern: pattern.to_string(),
                    },
                },
                required: vec![VALUE_FIELD.to_string()],
                additional_properties: false,
            },
        }
    }

    pub fn pattern(&self) -> &str {
        &self.value.properties.value.pattern
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(dialect: Dialect, min: usize) -> Assembler {
        Assembler::new(AssemblyOptions {
            dialect,
            min_continuation_chars: min,
            newline_token: "<br>".to_string(),
        })
    }

    #[test]
    fn test_default_enforces_min_length() {
        let constraint =
            assembler(Dialect::Default, 5).assemble("Hi ", None, &ContinuationToken::any());
        assert!(constraint.fallback.is_none());
        assert!(constraint.pattern.starts_with('^'));
        assert!(constraint.pattern.ends_with('$'));
        let re = constraint.matcher().unwrap();
        assert!(re.is_match("Hi there"));
        assert!(!re.is_match("Hi th"));
        assert!(!re.is_match("Yo there you"));
    }

    #[test]
    fn test_conservative_uses_plus() {
        let constraint =
            assembler(Dialect::Conservative, 20).assemble("Hi ", None, &ContinuationToken::any());
        assert!(!constraint.pattern.contains('{'));
        let re = constraint.matcher().unwrap();
        assert!(re.is_match("Hi x"));
        assert!(!re.is_match("Hi "));
    }

    #[test]
    fn test_prefix_newlines_widened() {
        let constraint =
            assembler(Dialect::Default, 1).assemble("a<br>b", None, &ContinuationToken::any());
        let re = constraint.matcher().unwrap();
        assert!(re.is_match("a<br>b!"));
        assert!(re.is_match("a\nb!"));
    }

    #[test]
    fn test_suffix_is_raw() {
        let constraint = assembler(Dialect::Default, 1).assemble(
            "",
            Some("[xy]z"),
            &ContinuationToken::any(),
        );
        let re = constraint.matcher().unwrap();
        assert!(re.is_match("yz more"));
        assert!(!re.is_match("[xy]z more"));
    }

    #[test]
    fn test_invalid_step_falls_back() {
        let token = ContinuationToken {
            step: "(?:[".to_string(),
            tail: String::new(),
        };
        let constraint = assembler(Dialect::Default, 3).assemble("Hi", None, &token);
        assert_eq!(constraint.fallback, Some(Fallback::Unconstrained));
        assert_eq!(constraint.rejected.len(), 1);
        assert!(constraint.matcher().unwrap().is_match("Hi"));
    }

    #[test]
    fn test_invalid_prefix_falls_back_to_minimal() {
        let constraint =
            assembler(Dialect::Default, 3).assemble("(", None, &ContinuationToken::any());
        assert_eq!(constraint.fallback, Some(Fallback::Minimal));
        assert_eq!(constraint.pattern, MINIMAL_PATTERN);
        assert_eq!(constraint.rejected.len(), 2);
    }

    #[test]
    fn test_wire_shape() {
        let wire = WireConstraint::new("Reply text", "^a$");
        let json: serde_json::Value = serde_json::from_str(&wire.to_json().unwrap()).unwrap();
        assert_eq!(json["name"], "structured_prefill");
        assert_eq!(json["strict"], true);
        assert_eq!(json["value"]["type"], "object");
        assert_eq!(json["value"]["properties"]["value"]["type"], "string");
        assert_eq!(json["value"]["properties"]["value"]["pattern"], "^a$");
        assert_eq!(json["value"]["required"][0], "value");
        assert_eq!(json["value"]["additionalProperties"], false);
    }
}
