//! Plugin configuration.
//!
//! The editor hands `init` a single string. It is either a JSON object whose
//! fields map onto [`BridgeConfig`], or the short form `library[,flags]`
//! where `library` is the plugin's own path and `flags` is a V8 flag string.

use super::error::{BridgeError, BridgeResult};
use super::host_value::MAX_DEPTH;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable overriding the log level.
pub const LOG_ENV: &str = "VIM_V8_LOG";
/// Environment variable overriding the log file.
pub const LOG_FILE_ENV: &str = "VIM_V8_LOG_FILE";

/// Configuration for one plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Path of the plugin library, re-opened to keep it mapped.
    pub library: Option<PathBuf>,

    /// V8 flags, space separated (`--harmony --stack-size=2000`).
    pub flags: Option<String>,

    /// Maximum heap size in bytes (None = V8 default)
    pub max_heap_size: Option<usize>,

    /// Initial heap size in bytes (None = V8 default)
    pub initial_heap_size: Option<usize>,

    /// Script source run after the prelude.
    pub bootstrap: Option<String>,

    /// Nesting ceiling for value conversion.
    pub max_depth: usize,

    /// `tracing` filter directive; logging stays off when unset.
    pub log_level: Option<String>,

    /// Log destination; standard error when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library: None,
            flags: None,
            max_heap_size: None,
            initial_heap_size: None,
            bootstrap: None,
            max_depth: MAX_DEPTH,
            log_level: None,
            log_file: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the argument string of `init`.
    pub fn parse_init_args(args: &str) -> BridgeResult<Self> {
        let trimmed = args.trim();
        let config = if trimmed.starts_with('{') {
            serde_json::from_str::<Self>(trimmed)?
        } else {
            let (library, flags) = match trimmed.split_once(',') {
                Some((library, flags)) => (library.trim(), Some(flags.trim())),
                None => (trimmed, None),
            };
            Self {
                library: (!library.is_empty()).then(|| PathBuf::from(library)),
                flags: flags.filter(|f| !f.is_empty()).map(str::to_string),
                ..Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply the logging overrides found through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            self.log_level = Some(level);
        }
        if let Some(file) = lookup(LOG_FILE_ENV).filter(|v| !v.is_empty()) {
            self.log_file = Some(PathBuf::from(file));
        }
        self
    }

    /// Apply the logging overrides from the process environment.
    pub fn with_process_env(self) -> Self {
        self.with_env(|name| std::env::var(name).ok())
    }

    pub fn with_max_heap_size(mut self, bytes: usize) -> Self {
        self.max_heap_size = Some(bytes);
        self
    }

    pub fn with_initial_heap_size(mut self, bytes: usize) -> Self {
        self.initial_heap_size = Some(bytes);
        self
    }

    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap = Some(source.into());
        self
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Check limits that cannot be expressed in the type.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.initial_heap_size.is_some() && self.max_heap_size.is_none() {
            return Err(BridgeError::Config(
                "initial_heap_size requires max_heap_size to be set as well".to_string(),
            ));
        }

        if let (Some(initial), Some(max)) = (self.initial_heap_size, self.max_heap_size) {
            if initial > max {
                return Err(BridgeError::Config(format!(
                    "initial_heap_size ({}) cannot exceed max_heap_size ({})",
                    initial, max
                )));
            }
        }

        if self.max_depth == 0 {
            return Err(BridgeError::Config("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// V8 flags split into individual arguments.
    pub fn flag_list(&self) -> Vec<String> {
        self.flags
            .as_deref()
            .map(|flags| flags.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.library.is_none());
        assert!(config.flags.is_none());
        assert!(config.max_heap_size.is_none());
        assert!(config.bootstrap.is_none());
        assert_eq!(config.max_depth, 100);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_short_form() {
        let config = BridgeConfig::parse_init_args("/opt/vim/if_v8.so").unwrap();
        assert_eq!(config.library, Some(PathBuf::from("/opt/vim/if_v8.so")));
        assert!(config.flags.is_none());

        let config =
            BridgeConfig::parse_init_args("/opt/vim/if_v8.so,--harmony --stack-size=900").unwrap();
        assert_eq!(config.flags.as_deref(), Some("--harmony --stack-size=900"));
        assert_eq!(config.flag_list(), vec!["--harmony", "--stack-size=900"]);

        let config = BridgeConfig::parse_init_args("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_json_form() {
        let config = BridgeConfig::parse_init_args(
            r#"{"library": "/tmp/if_v8.so", "max_depth": 8, "log_level": "debug"}"#,
        )
        .unwrap();
        assert_eq!(config.library, Some(PathBuf::from("/tmp/if_v8.so")));
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.log_level.as_deref(), Some("debug"));

        let err = BridgeConfig::parse_init_args(r#"{"heap": 1}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Json(_)));
    }

    #[test]
    fn test_heap_limit_validation() {
        let err = BridgeConfig::new()
            .with_initial_heap_size(1024)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("requires max_heap_size"));

        let err = BridgeConfig::new()
            .with_max_heap_size(1024)
            .with_initial_heap_size(4096)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));

        assert!(BridgeConfig::new()
            .with_max_heap_size(10 * 1024 * 1024)
            .with_initial_heap_size(1024 * 1024)
            .validate()
            .is_ok());
        assert!(BridgeConfig::new().with_max_depth(0).validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = BridgeConfig::default().with_env(|name| match name {
            LOG_ENV => Some("vim_v8=trace".to_string()),
            LOG_FILE_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.log_level.as_deref(), Some("vim_v8=trace"));
        assert!(config.log_file.is_none());
    }
}
