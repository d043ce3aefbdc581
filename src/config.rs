//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILSTRIP_CONFIG` (environment variable)
//! 2. `~/.config/mailstrip/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailstrip\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags override anything set here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StripError};
use crate::mailbox::DeleteMode;
use crate::parser::mime::MAX_DEPTH;
use crate::rebuild::PlaceholderPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Which mailbox to work on and how to change it.
    pub mailbox: MailboxConfig,
    /// Attachment detection.
    pub classify: ClassifyConfig,
    /// Rebuild behavior.
    pub rebuild: RebuildConfig,
    /// Parser limits.
    pub limits: LimitsConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for message backups and logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Mailbox directory, used when `--mailbox` is not given.
    pub path: Option<PathBuf>,
    /// What happens to originals after upload: "trash" or "delete".
    pub delete_mode: DeleteMode,
    /// Refuse uploads past this many stored bytes.
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Non-body parts larger than this are attachments even without a
    /// filename. Unset means any size.
    pub min_attachment_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildConfig {
    /// "stub" (default) or "omit".
    pub placeholder: PlaceholderPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum multipart nesting depth.
    pub max_depth: usize,
}

impl Config {
    /// Reject values that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_depth == 0 {
            return Err(StripError::Config("limits.max_depth must be at least 1".into()));
        }
        Ok(())
    }
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILSTRIP_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailstrip").join("config.toml"))
}

/// Return the cache directory for message backups and logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailstrip")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mailstrip.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.mailbox.delete_mode, DeleteMode::Trash);
        assert_eq!(cfg.classify.min_attachment_size, None);
        assert_eq!(cfg.rebuild.placeholder, PlaceholderPolicy::TextStub);
        assert_eq!(cfg.limits.max_depth, MAX_DEPTH);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut cfg = Config::default();
        cfg.mailbox.quota_bytes = Some(1 << 30);
        cfg.rebuild.placeholder = PlaceholderPolicy::Omit;
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.mailbox.quota_bytes, Some(1 << 30));
        assert_eq!(parsed.rebuild.placeholder, PlaceholderPolicy::Omit);
        assert_eq!(parsed.general.log_level, cfg.general.log_level);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[mailbox]
path = "/var/mail/me"
delete_mode = "delete"

[classify]
min_attachment_size = 65536

[rebuild]
placeholder = "omit"
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.mailbox.path, Some(PathBuf::from("/var/mail/me")));
        assert_eq!(cfg.mailbox.delete_mode, DeleteMode::Delete);
        assert_eq!(cfg.classify.min_attachment_size, Some(65536));
        assert_eq!(cfg.rebuild.placeholder, PlaceholderPolicy::Omit);
        // Other fields use defaults
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.limits.max_depth, MAX_DEPTH);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        cfg.limits.max_depth = 0;
        assert!(matches!(cfg.validate(), Err(StripError::Config(_))));
    }

    #[test]
    fn test_log_file_lives_in_cache_dir() {
        let mut cfg = Config::default();
        cfg.general.cache_dir = Some(PathBuf::from("/tmp/ms-cache"));
        assert_eq!(log_file_path(&cfg), PathBuf::from("/tmp/ms-cache/mailstrip.log"));
    }
}
