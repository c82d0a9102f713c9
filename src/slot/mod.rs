//! Reply Template Mini-Language
//!
//! A reply template is literal text with typed `[[...]]` slots. The model's
//! reply must begin with a completion of the template, so every slot is a
//! constrained hole the model fills in.
//!
//! # Syntax
//!
//! ```text
//! She said, "[[w:3-5]]" [[keep]][[free|hint:anything goes]]
//!            ^^^^^^^^^  ^^^^^^^^  ^^^^^^^^^^^^^^^^^^^^^^^^^^
//!            3-5 words  display   free text, hint shown to the user only
//!                       marker
//! ```
//!
//! # Usage
//!
//! ```
//! use structured_prefill::slot::{Template, validate_template};
//! use structured_prefill::Dialect;
//!
//! let template = Template::parse("Hello [[name]], [[w:2-4]].");
//! assert_eq!(template.slots().count(), 2);
//!
//! let report = validate_template("[[w:5-2]]", Dialect::Default);
//! assert!(!report.is_valid());
//! ```

pub mod parser;
pub mod types;
pub mod validator;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use parser::{parse_int_range, parse_slot, parse_template};
pub use types::{Slot, SlotKind, Span, Template};
pub use validator::{
    validate_template, validate_template_file, TemplateStats, TemplateValidator,
    ValidationError, ValidationResult, ValidationWarning,
};

/// Errors loading template text
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template file {0} is empty")]
    Empty(PathBuf),
}

/// Result type for template loading
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Read a template file, dropping one trailing newline left by editors
pub fn load_template(path: &Path) -> TemplateResult<String> {
    let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(&text)
        .to_string();
    if text.is_empty() {
        return Err(TemplateError::Empty(path.to_path_buf()));
    }
    Ok(text)
}
