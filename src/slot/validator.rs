//! Template Validator
//!
//! Checks a reply template before it is used for generation.
//! Users run: `prefill validate "She said, \"[[w:3-5]]\" [[free]]"`
//!
//! Compilation itself never fails; the validator reports what compilation
//! would silently repair or degrade.

use std::collections::HashSet;
use std::path::Path;

use super::types::{SlotKind, Span, Template};
use super::{load_template, TemplateResult};
use crate::pattern::compiler::{CompileError, CompileOptions, TemplateCompiler, MAX_OPTIONS};
use crate::pattern::dialect::Dialect;
use crate::pattern::newline::DEFAULT_NEWLINE_TOKENS;

/// Validation result
#[derive(Debug)]
pub struct ValidationResult {
    /// Dialect the template was checked against
    pub dialect: Dialect,
    /// Whether validation passed
    pub valid: bool,
    /// Errors found (template is invalid)
    pub errors: Vec<ValidationError>,
    /// Warnings (template compiles but may not do what was meant)
    pub warnings: Vec<ValidationWarning>,
    /// Statistics about the template
    pub stats: TemplateStats,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut s = format!("Template ({}): ", self.dialect);
        if self.is_valid() {
            s.push_str("VALID");
        } else {
            s.push_str("INVALID");
        }
        s.push_str(&format!(
            " ({} slots, {} literal chars, {} pattern bytes)",
            self.stats.slot_count, self.stats.literal_chars, self.stats.pattern_len
        ));
        if !self.errors.is_empty() {
            s.push_str(&format!(", {} errors", self.errors.len()));
        }
        if !self.warnings.is_empty() {
            s.push_str(&format!(", {} warnings", self.warnings.len()));
        }
        s
    }
}

/// Validation error (template is invalid)
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Range written high-to-low
    InvertedRange { slot: String, min: i64, max: i64 },
    /// Option slot with nothing to choose from
    EmptyOptions { slot: String },
    /// User pattern that does not parse
    InvalidPattern { slot: String, error: String },
    /// User pattern slot with no pattern
    EmptyPattern { slot: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvertedRange { slot, min, max } => {
                write!(f, "Range in '{}' is inverted ({} > {})", slot, min, max)
            }
            ValidationError::EmptyOptions { slot } => {
                write!(f, "Option slot '{}' has no options", slot)
            }
            ValidationError::InvalidPattern { slot, error } => {
                write!(f, "Invalid pattern in '{}': {}", slot, error)
            }
            ValidationError::EmptyPattern { slot } => {
                write!(f, "Pattern slot '{}' is empty", slot)
            }
        }
    }
}

/// Validation warning (template compiles but may not do what was meant)
#[derive(Debug, Clone)]
pub enum ValidationWarning {
    /// Kind not recognised; matches a single token
    UnknownKind { slot: String, kind: String },
    /// User pattern uses a feature the dialect lacks; matches anything
    DegradedPattern { slot: String, reason: String },
    /// Options past the cap are ignored
    TruncatedOptions { slot: String, count: usize },
    /// Only the first keep marker matters
    RepeatedKeep(usize),
    /// Text that looks like a slot but is never closed
    UnterminatedSlot,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::UnknownKind { slot, kind } => {
                write!(
                    f,
                    "Unknown slot kind '{}' in '{}' (matches one token)",
                    kind, slot
                )
            }
            ValidationWarning::DegradedPattern { slot, reason } => {
                write!(f, "Pattern in '{}' matches anything: {}", slot, reason)
            }
            ValidationWarning::TruncatedOptions { slot, count } => {
                write!(
                    f,
                    "Slot '{}' lists {} options, only the first {} are used",
                    slot, count, MAX_OPTIONS
                )
            }
            ValidationWarning::RepeatedKeep(count) => {
                write!(
                    f,
                    "{} keep markers found, only the first one is used",
                    count
                )
            }
            ValidationWarning::UnterminatedSlot => {
                write!(f, "Unterminated '[[' is treated as literal text")
            }
        }
    }
}

/// Statistics about the template
#[derive(Debug, Default)]
pub struct TemplateStats {
    pub span_count: usize,
    pub slot_count: usize,
    pub literal_chars: usize,
    pub keep_count: usize,
    pub hint_count: usize,
    pub distinct_kinds: usize,
    pub pattern_len: usize,
}

/// Template validator
pub struct TemplateValidator {
    dialect: Dialect,
    errors: Vec<ValidationError>,
    warnings: Vec<ValidationWarning>,
    stats: TemplateStats,
}

impl TemplateValidator {
    pub fn new(dialect: Dialect) -> Self {
        TemplateValidator {
            dialect,
            errors: Vec::new(),
            warnings: Vec::new(),
            stats: TemplateStats::default(),
        }
    }

    /// Validate a template file
    pub fn validate_file(&mut self, path: &Path) -> TemplateResult<ValidationResult> {
        let text = load_template(path)?;
        Ok(self.validate(&text))
    }

    /// Validate template text
    pub fn validate(&mut self, text: &str) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();
        self.stats = TemplateStats::default();

        let template = Template::parse(text);
        self.collect_stats(&template);
        self.check_slots(&template);

        if template.keep_count() > 1 {
            self.warnings
                .push(ValidationWarning::RepeatedKeep(template.keep_count()));
        }
        if template.literal_text().contains("[[") {
            self.warnings.push(ValidationWarning::UnterminatedSlot);
        }

        ValidationResult {
            dialect: self.dialect,
            valid: self.errors.is_empty(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            stats: std::mem::take(&mut self.stats),
        }
    }

    fn collect_stats(&mut self, template: &Template) {
        let options = CompileOptions::new(self.dialect, DEFAULT_NEWLINE_TOKENS[0]);
        let compiled = TemplateCompiler::new(options).compile(template);

        let kinds: HashSet<&str> = template.slots().map(|s| s.kind.name()).collect();
        self.stats.span_count = template.spans.len();
        self.stats.slot_count = template.slots().count();
        self.stats.literal_chars = template.literal_text().chars().count();
        self.stats.keep_count = template.keep_count();
        self.stats.hint_count = template.hints().len();
        self.stats.distinct_kinds = kinds.len();
        self.stats.pattern_len = compiled.pattern.len();
    }

    fn check_slots(&mut self, template: &Template) {
        let options = CompileOptions::new(self.dialect, DEFAULT_NEWLINE_TOKENS[0]);
        let compiler = TemplateCompiler::new(options);

        for span in &template.spans {
            let Span::Slot(slot) = span else {
                continue;
            };
            let name = slot.source.clone();
            match &slot.kind {
                SlotKind::Words { min, max } if min > max => {
                    self.inverted(&name, *min as i64, *max as i64);
                }
                SlotKind::Lines {
                    min,
                    max: Some(max),
                } if min > max => {
                    self.inverted(&name, *min as i64, *max as i64);
                }
                SlotKind::Number {
                    min: Some(min),
                    max: Some(max),
                } if min > max => {
                    self.inverted(&name, *min, *max);
                }
                SlotKind::Options { options } if options.is_empty() => {
                    self.errors
                        .push(ValidationError::EmptyOptions { slot: name });
                }
                SlotKind::Options { options } | SlotKind::Emotion { words: options }
                    if options.len() > MAX_OPTIONS =>
                {
                    self.warnings.push(ValidationWarning::TruncatedOptions {
                        slot: name,
                        count: options.len(),
                    });
                }
                SlotKind::Pattern { .. } => match compiler.compile_slot(slot) {
                    Ok(_) => {}
                    Err(CompileError::InvalidPattern { reason, .. }) => {
                        self.errors.push(ValidationError::InvalidPattern {
                            slot: name,
                            error: reason,
                        });
                    }
                    Err(CompileError::EmptyPattern { .. }) => {
                        self.errors
                            .push(ValidationError::EmptyPattern { slot: name });
                    }
                    Err(err @ CompileError::Unsupported { .. }) => {
                        self.warnings.push(ValidationWarning::DegradedPattern {
                            slot: name,
                            reason: err.to_string(),
                        });
                    }
                },
                SlotKind::Unknown { name: kind } => {
                    self.warnings.push(ValidationWarning::UnknownKind {
                        slot: name,
                        kind: kind.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    fn inverted(&mut self, slot: &str, min: i64, max: i64) {
        self.errors.push(ValidationError::InvertedRange {
            slot: slot.to_string(),
            min,
            max,
        });
    }
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new(Dialect::Default)
    }
}

/// Quick validation function
pub fn validate_template(text: &str, dialect: Dialect) -> ValidationResult {
    let mut validator = TemplateValidator::new(dialect);
    validator.validate(text)
}

/// Validate template file
pub fn validate_template_file(path: &Path, dialect: Dialect) -> TemplateResult<ValidationResult> {
    let mut validator = TemplateValidator::new(dialect);
    validator.validate_file(path)
}
