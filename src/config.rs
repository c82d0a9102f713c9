//! Prefill Configuration
//!
//! Handles parsing and management of prefill.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::pattern::banlist::BanList;
use crate::pattern::dialect::{Dialect, QuoteMode};
use crate::pattern::newline::DEFAULT_NEWLINE_TOKENS;

/// File name searched for by [`PrefillConfig::find_and_load`]
pub const CONFIG_FILE: &str = "prefill.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching prefill.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrefillConfig {
    /// Template compilation
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// Banned phrases
    #[serde(default)]
    pub ban_list: BanListConfig,

    /// Pattern assembly
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// Stream guard thresholds
    #[serde(default)]
    pub guard: GuardConfig,

    /// Continuation reconciliation
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Runtime session behaviour
    #[serde(default)]
    pub session: SessionConfig,
}

impl PrefillConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: PrefillConfig = toml::from_str(&content)?;
        log::debug!(target: "structured_prefill::config", "loaded {}", path.display());
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Every configured banned phrase, merged and deduplicated.
    pub fn ban_list(&self) -> BanList {
        let mut list = BanList::from_phrases(&self.ban_list.phrases);
        list.extend(&BanList::parse(&self.ban_list.text));
        list
    }
}

/// Template compilation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Provider pattern dialect
    #[serde(default)]
    pub dialect: Dialect,

    /// How literal `"` in templates is constrained
    #[serde(default)]
    pub quote_mode: QuoteMode,

    /// Names accepted by `[[name]]`
    #[serde(default)]
    pub known_names: Vec<String>,

    /// Newline token candidates, in order of preference
    #[serde(default = "default_newline_tokens")]
    pub newline_tokens: Vec<String>,
}

fn default_newline_tokens() -> Vec<String> {
    DEFAULT_NEWLINE_TOKENS.iter().map(|t| t.to_string()).collect()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Default,
            quote_mode: QuoteMode::Escaped,
            known_names: Vec::new(),
            newline_tokens: default_newline_tokens(),
        }
    }
}

/// Banned phrases, as a list and/or newline-separated text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanListConfig {
    #[serde(default)]
    pub phrases: Vec<String>,

    #[serde(default)]
    pub text: String,
}

/// Pattern assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Characters the model must write after the template
    #[serde(default = "default_min_continuation_chars")]
    pub min_continuation_chars: usize,

    /// Description attached to the wire schema
    #[serde(default = "default_schema_description")]
    pub schema_description: String,
}

fn default_min_continuation_chars() -> usize {
    20
}

fn default_schema_description() -> String {
    "The reply text. It must begin with the given prefix and continue naturally.".to_string()
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            min_continuation_chars: default_min_continuation_chars(),
            schema_description: default_schema_description(),
        }
    }
}

/// Stream guard thresholds.
///
/// All values are empirically tuned starting points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Stall trip: minimum time since the session started
    #[serde(default = "default_stall_min_elapsed_ms")]
    pub stall_min_elapsed_ms: u64,

    /// Stall trip: minimum time without decoded progress
    #[serde(default = "default_stall_idle_ms")]
    pub stall_idle_ms: u64,

    /// Stall trip: minimum raw payload length
    #[serde(default = "default_stall_min_raw_len")]
    pub stall_min_raw_len: usize,

    /// Padding trip: minimum time since the session started
    #[serde(default = "default_padding_min_elapsed_ms")]
    pub padding_min_elapsed_ms: u64,

    /// Padding trip: suspicious streak needed
    #[serde(default = "default_padding_streak")]
    pub padding_streak: u32,

    /// Padding trip: minimum raw payload length
    #[serde(default = "default_padding_min_raw_len")]
    pub padding_min_raw_len: usize,

    /// Deltas shorter than this are never suspicious
    #[serde(default = "default_padding_min_delta")]
    pub padding_min_delta: usize,

    #[serde(default = "default_backslash_ratio")]
    pub backslash_ratio: f64,

    #[serde(default = "default_comma_count")]
    pub comma_count: usize,

    #[serde(default = "default_comma_punct_ratio")]
    pub comma_punct_ratio: f64,

    #[serde(default = "default_punct_ratio")]
    pub punct_ratio: f64,

    /// Commas needed before a space-free token counts as padding
    #[serde(default = "default_token_min_commas")]
    pub token_min_commas: usize,

    /// Length of a single-character run that counts as padding
    #[serde(default = "default_repeat_run")]
    pub repeat_run: usize,
}

fn default_stall_min_elapsed_ms() -> u64 {
    5000
}

fn default_stall_idle_ms() -> u64 {
    15000
}

fn default_stall_min_raw_len() -> usize {
    5000
}

fn default_padding_min_elapsed_ms() -> u64 {
    1500
}

fn default_padding_streak() -> u32 {
    4
}

fn default_padding_min_raw_len() -> usize {
    1500
}

fn default_padding_min_delta() -> usize {
    120
}

fn default_backslash_ratio() -> f64 {
    0.25
}

fn default_comma_count() -> usize {
    80
}

fn default_comma_punct_ratio() -> f64 {
    0.45
}

fn default_punct_ratio() -> f64 {
    0.60
}

fn default_token_min_commas() -> usize {
    12
}

fn default_repeat_run() -> usize {
    80
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            stall_min_elapsed_ms: default_stall_min_elapsed_ms(),
            stall_idle_ms: default_stall_idle_ms(),
            stall_min_raw_len: default_stall_min_raw_len(),
            padding_min_elapsed_ms: default_padding_min_elapsed_ms(),
            padding_streak: default_padding_streak(),
            padding_min_raw_len: default_padding_min_raw_len(),
            padding_min_delta: default_padding_min_delta(),
            backslash_ratio: default_backslash_ratio(),
            comma_count: default_comma_count(),
            comma_punct_ratio: default_comma_punct_ratio(),
            punct_ratio: default_punct_ratio(),
            token_min_commas: default_token_min_commas(),
            repeat_run: default_repeat_run(),
        }
    }
}

/// Continuation reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Longest trailing slice of the base used as the join anchor
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    /// Fuzzy search starts with this many trailing base characters
    #[serde(default = "default_fuzzy_max_len")]
    pub fuzzy_max_len: usize,

    /// ...and gives up below this many
    #[serde(default = "default_fuzzy_min_len")]
    pub fuzzy_min_len: usize,

    #[serde(default = "default_fuzzy_step")]
    pub fuzzy_step: usize,

    /// Shared prefix needed to treat a long candidate as already complete
    #[serde(default = "default_complete_prefix_min")]
    pub complete_prefix_min: usize,
}

fn default_overlap_chars() -> usize {
    48
}

fn default_fuzzy_max_len() -> usize {
    96
}

fn default_fuzzy_min_len() -> usize {
    12
}

fn default_fuzzy_step() -> usize {
    4
}

fn default_complete_prefix_min() -> usize {
    24
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            overlap_chars: default_overlap_chars(),
            fuzzy_max_len: default_fuzzy_max_len(),
            fuzzy_min_len: default_fuzzy_min_len(),
            fuzzy_step: default_fuzzy_step(),
            complete_prefix_min: default_complete_prefix_min(),
        }
    }
}

/// Runtime session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long decoding continues after a stop signal
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    /// Hide the template head from the displayed text
    #[serde(default)]
    pub hide_prefix: bool,
}

fn default_grace_ms() -> u64 {
    750
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            hide_prefix: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PrefillConfig::default();
        assert_eq!(config.compiler.dialect, Dialect::Default);
        assert_eq!(config.compiler.newline_tokens[0], "<br>");
        assert_eq!(config.assembly.min_continuation_chars, 20);
        assert_eq!(config.guard.padding_streak, 4);
        assert_eq!(config.reconcile.overlap_chars, 48);
        assert_eq!(config.session.grace_ms, 750);
        assert!(config.ban_list().is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[compiler]
dialect = "conservative"
quote_mode = "curly"
known_names = ["Ada", "Grace"]

[ban_list]
phrases = ["Gaze"]
text = """
shivers down
gaze
"""

[assembly]
min_continuation_chars = 40

[guard]
padding_streak = 6
punct_ratio = 0.7

[session]
hide_prefix = true
"#;
        let config: PrefillConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.compiler.dialect, Dialect::Conservative);
        assert_eq!(config.compiler.quote_mode, QuoteMode::Curly);
        assert_eq!(config.compiler.known_names.len(), 2);
        assert_eq!(config.compiler.newline_tokens.len(), 4);
        assert_eq!(config.ban_list().phrases(), &["gaze", "shivers down"]);
        assert_eq!(config.assembly.min_continuation_chars, 40);
        assert_eq!(config.guard.padding_streak, 6);
        assert_eq!(config.guard.comma_count, 80);
        assert!(config.session.hide_prefix);
        assert_eq!(config.session.grace_ms, 750);
    }

    #[test]
    fn test_malformed_config() {
        let err = toml::from_str::<PrefillConfig>("[compiler]\ndialect = \"fancy\"").unwrap_err();
        let err: ConfigError = err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_and_find() {
        let dir = std::env::temp_dir().join(format!("prefill-config-{}", std::process::id()));
        let nested = dir.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = PrefillConfig::default();
        config.assembly.min_continuation_chars = 7;
        config.save(&dir.join(CONFIG_FILE)).unwrap();

        let found = PrefillConfig::find_and_load(&nested).unwrap();
        assert_eq!(found.assembly.min_continuation_chars, 7);
        assert!(matches!(
            PrefillConfig::load(&nested.join(CONFIG_FILE)),
            Err(ConfigError::NotFound(_))
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
