use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

const DEFAULT_COMMIT_LOG_PATH: &str = "memkv.log";
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
const DEFAULT_HTTP_BIND: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 11212;

/// The daemon's YAML configuration document (`--config`, default
/// `memkv.yaml`). Every field is optional so that a missing or partial
/// document falls back to sane defaults rather than refusing to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the append-only commit log. Relative to the current directory.
    pub commit_log_path: PathBuf,

    /// Seconds between periodic flushes of the pending set into the checkpoint.
    pub flush_interval_secs: u64,

    /// Bind address for the HTTP inspection endpoints.
    pub http_bind: String,

    /// Port for the HTTP inspection endpoints.
    pub http_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            commit_log_path: PathBuf::from(DEFAULT_COMMIT_LOG_PATH),
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            http_bind: DEFAULT_HTTP_BIND.to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults if the
    /// file does not exist. A present-but-malformed file is an error:
    /// unlike a missing file, it signals the operator asked for something
    /// specific and got it wrong.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Config> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/memkv.yaml")).unwrap();
        assert_eq!(cfg.flush_interval_secs, DEFAULT_FLUSH_INTERVAL_SECS);
    }

    #[test]
    fn partial_document_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memkv.yaml");
        std::fs::write(&path, "flush_interval_secs: 30\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.flush_interval_secs, 30);
        assert_eq!(cfg.http_port, DEFAULT_HTTP_PORT);
    }
}
