//! Node configuration.
//!
//! Keys are kebab-case so the same JSON document works for Rust callers and
//! for `codex_new` on the C surface.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const DEFAULT_STORAGE_QUOTA: u64 = 20 * 1024 * 1024 * 1024;
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Notice,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Notice => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase()))
            .map_err(|_| StoreError::invalid_parameter("log-level", format!("unknown level '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Auto,
    Colors,
    NoColors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    #[default]
    Fs,
    Memory,
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoKind::Fs => f.write_str("fs"),
            RepoKind::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NodeConfig {
    /// Where blocks, the manifest index and the node id live. Falls back to
    /// the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub repo_kind: RepoKind,
    pub storage_quota: u64,
    pub block_size: usize,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Runtime worker threads, 0 for one per core.
    pub num_threads: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            repo_kind: RepoKind::Fs,
            storage_quota: DEFAULT_STORAGE_QUOTA,
            block_size: DEFAULT_BLOCK_SIZE,
            log_level: LogLevel::Info,
            log_format: LogFormat::Auto,
            log_file: None,
            num_threads: 0,
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn repo_kind(mut self, kind: RepoKind) -> Self {
        self.repo_kind = kind;
        self
    }

    pub fn storage_quota(mut self, quota: u64) -> Self {
        self.storage_quota = quota;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| StoreError::config(format!("invalid config JSON: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(StoreError::invalid_parameter(
                "block-size",
                format!("must be between 1 and {MAX_BLOCK_SIZE} bytes"),
            ));
        }
        if self.storage_quota == 0 {
            return Err(StoreError::invalid_parameter(
                "storage-quota",
                "must be greater than 0",
            ));
        }
        if self.repo_kind == RepoKind::Fs && self.resolved_data_dir().is_none() {
            return Err(StoreError::config(
                "no data-dir given and no platform data directory available",
            ));
        }
        Ok(())
    }

    /// Data directory in effect: the configured one, else
    /// `<platform data dir>/codex` for the fs repo. The memory repo only
    /// uses an explicitly configured directory.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        match (&self.data_dir, self.repo_kind) {
            (Some(dir), _) => Some(dir.clone()),
            (None, RepoKind::Fs) => dirs::data_local_dir().map(|d| d.join("codex")),
            (None, RepoKind::Memory) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.storage_quota, 20 * 1024 * 1024 * 1024);
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.repo_kind, RepoKind::Fs);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn parses_kebab_case_json() {
        let config = NodeConfig::from_json(
            r#"{"data-dir":"/tmp/codex","repo-kind":"memory","storage-quota":1048576,"block-size":1024,"log-level":"debug"}"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/codex")));
        assert_eq!(config.repo_kind, RepoKind::Memory);
        assert_eq!(config.storage_quota, 1_048_576);
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.log_level, LogLevel::Debug);
        // unspecified keys keep their defaults
        assert_eq!(config.log_format, LogFormat::Auto);
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(NodeConfig::from_json("  ").unwrap(), NodeConfig::default());
        assert!(NodeConfig::from_json("{not json").is_err());
    }

    #[test]
    fn json_survives_a_trip() {
        let config = NodeConfig::new()
            .data_dir("/var/lib/codex")
            .block_size(4096)
            .log_format(LogFormat::NoColors);
        let parsed = NodeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn validation_rejects_bad_sizes() {
        assert!(NodeConfig::new().repo_kind(RepoKind::Memory).block_size(0).validate().is_err());
        assert!(NodeConfig::new().repo_kind(RepoKind::Memory).storage_quota(0).validate().is_err());
        assert!(NodeConfig::new().repo_kind(RepoKind::Memory).validate().is_ok());
    }

    #[test]
    fn log_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Notice.as_filter(), "info");
        assert_eq!(LogLevel::Fatal.to_string(), "fatal");
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
