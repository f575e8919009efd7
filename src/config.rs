use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub page_size: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Gzip snapshots, one per form type.
    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_dir: PathBuf::from("database"),
            poll_interval_secs: 15,
            access_ttl_secs: 24 * 60 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            page_size: 25,
            log_level: "info".to_string(),
        }
    }
}

/// Defaults, then `Valuation.toml` (or `path`), then `VALUATION_*` variables.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let file = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Valuation").required(false),
    };

    let builder = Config::builder()
        .set_default("bind_addr", defaults.bind_addr)?
        .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
        .set_default("poll_interval_secs", defaults.poll_interval_secs)?
        .set_default("access_ttl_secs", defaults.access_ttl_secs)?
        .set_default("refresh_ttl_secs", defaults.refresh_ttl_secs)?
        .set_default("page_size", defaults.page_size as u64)?
        .set_default("log_level", defaults.log_level)?
        .add_source(file)
        .add_source(Environment::with_prefix("VALUATION").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Valuation.toml");
        fs::write(&path, "bind_addr = \"0.0.0.0:8080\"\npage_size = 50\n").unwrap();

        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.data_dir, PathBuf::from("database"));
        assert_eq!(config.records_dir(), PathBuf::from("database").join("records"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_configuration(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn poll_interval_is_never_zero() {
        let config = AppConfig {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
