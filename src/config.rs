//! Runtime configuration (spec §6).
//!
//! Discovery mirrors `tasker-ctl::cli_config::loader`: walk upward from the
//! current directory looking for a dependency-directory marker (here,
//! `Cargo.lock` or a `.taskdefer.toml`), load TOML if found, and fall back
//! to defaults on any read/parse failure rather than panicking.

use std::path::{Path, PathBuf};

use serde::Deserialize;

const CONFIG_FILENAME: &str = ".taskdefer.toml";
const PROJECT_MARKER: &str = "Cargo.lock";

/// Recognized configuration keys, spec §6.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub temp_directory: PathBuf,
    pub logging: LoggingConfig,
    pub process: ProcessConfig,
    pub bootstrap_framework: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProcessConfig {
    /// e.g. "512M"; parsed to bytes by [`ProcessConfig::memory_limit_bytes`].
    pub memory_limit: String,
    /// 0 = unlimited.
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            temp_directory: tmp.join("defer_tasks"),
            logging: LoggingConfig::default(),
            process: ProcessConfig::default(),
            bootstrap_framework: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: std::env::temp_dir().join("defer_logs"),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            memory_limit: "512M".to_string(),
            timeout_seconds: 0,
        }
    }
}

impl ProcessConfig {
    /// Parse `memory_limit` (e.g. `"512M"`, `"1G"`, `"900K"`, plain bytes)
    /// into a byte count. Returns `None` for an unparsable unit instead of
    /// panicking; callers should fall back to the default in that case.
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        parse_memory(&self.memory_limit)
    }
}

fn parse_memory(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, mult) = match raw.chars().last()? {
        'K' | 'k' => (&raw[..raw.len() - 1], 1024u64),
        'M' | 'm' => (&raw[..raw.len() - 1], 1024 * 1024),
        'G' | 'g' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
        _ => (raw, 1),
    };
    digits.trim().parse::<u64>().ok().map(|n| n * mult)
}

impl Config {
    /// Discover and load config from the first location found, falling
    /// back to [`Config::default`] on any failure. Never panics.
    pub fn load() -> Self {
        if let Some(path) = find_config_file() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::debug!(?path, "loaded taskdefer config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(?path, error = %e, "failed to parse taskdefer config, using defaults");
                    }
                },
                Err(e) => {
                    tracing::warn!(?path, error = %e, "failed to read taskdefer config, using defaults");
                }
            }
        }
        Config::default()
    }

    /// Load from an explicit path, propagating parse errors. Used by
    /// callers (e.g. tests) that want to assert on malformed config
    /// instead of silently falling back.
    pub fn load_from(path: &Path) -> Result<Self, crate::error::ConfigError> {
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        toml::from_str(&contents).map_err(|source| crate::error::ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Walk upward from the current directory looking for `.taskdefer.toml`,
/// stopping (without a match) once we pass a directory containing
/// `Cargo.lock` — the "dependency directory marker" spec §6 refers to as
/// the project root.
fn find_config_file() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(CONFIG_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join(PROJECT_MARKER).is_file() {
            return None;
        }
        if !dir.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.logging.enabled);
        assert_eq!(cfg.process.timeout_seconds, 0);
        assert_eq!(cfg.process.memory_limit, "512M");
    }

    #[test]
    fn parses_memory_limit_suffixes() {
        assert_eq!(parse_memory("512M"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory("900K"), Some(900 * 1024));
        assert_eq!(parse_memory("100"), Some(100));
        assert_eq!(parse_memory(""), None);
        assert_eq!(parse_memory("nope"), None);
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
temp-directory = "/tmp/custom_tasks"
bootstrap-framework = false

[logging]
enabled = false

[process]
memory-limit = "1G"
timeout-seconds = 30
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.temp_directory, PathBuf::from("/tmp/custom_tasks"));
        assert!(!cfg.bootstrap_framework);
        assert!(!cfg.logging.enabled);
        assert_eq!(cfg.process.timeout_seconds, 30);
    }

    #[test]
    fn load_from_malformed_path_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".taskdefer.toml");
        std::fs::write(&path, "not valid toml :::").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, crate::error::ConfigError::Parse { .. }));
    }
}
