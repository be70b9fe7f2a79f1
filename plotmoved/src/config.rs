use crate::engine::{EngineOptions, DEFAULT_CHUNK_SIZE};
use crate::error::{PlotMoveError, PlotMoveResult};
use anyhow::{Context, Result};
use plotmove_protocol::TransferMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "PLOTMOVE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plotter output directories to watch.
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub method: TransferMethod,
    /// Bytes per read/write, chunked copy only.
    pub chunk_size: usize,
    /// Pause after every chunk, chunked copy only.
    pub chunk_delay_ms: u64,
    pub scan_interval_secs: u64,
    pub progress_bar: bool,
    pub metrics_bind_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            destination: PathBuf::new(),
            method: TransferMethod::Rename,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay_ms: 0,
            scan_interval_secs: 5,
            progress_bar: false,
            metrics_bind_addr: None,
        }
    }
}

impl Config {
    /// `$PLOTMOVE_CONFIG_PATH`, else `<config dir>/plotmove/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .map(|dir| dir.join("plotmove").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("/etc/plotmove/config.toml"))
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()).await
    }

    /// A missing file yields the defaults; an unreadable or invalid one is an error.
    pub async fn load_from(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let config: Config = toml::from_str(&content)
                    .map_err(PlotMoveError::from)
                    .with_context(|| format!("Failed to parse configuration {:?}", path))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file not found at {:?}. Using default settings.",
                    path
                );
                Ok(Config::default())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read configuration {:?}", path))
            }
        }
    }

    /// Checks the values the scan loop relies on. A zero chunk size falls back
    /// to the default instead of failing.
    pub fn validate(&mut self) -> PlotMoveResult<()> {
        if self.sources.is_empty() {
            return Err(PlotMoveError::InvalidConfiguration {
                field: "sources".to_string(),
                reason: "at least one source directory is required".to_string(),
            });
        }
        if self.destination.as_os_str().is_empty() {
            return Err(PlotMoveError::InvalidConfiguration {
                field: "destination".to_string(),
                reason: "a destination directory is required".to_string(),
            });
        }
        if self.sources.iter().any(|source| source == &self.destination) {
            return Err(PlotMoveError::InvalidConfiguration {
                field: "destination".to_string(),
                reason: "destination must differ from every source".to_string(),
            });
        }
        if self.chunk_size == 0 {
            warn!("Chunk size 0 is not usable, using {} bytes", DEFAULT_CHUNK_SIZE);
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.scan_interval_secs == 0 {
            return Err(PlotMoveError::InvalidConfiguration {
                field: "scan_interval_secs".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.method != TransferMethod::ChunkedCopy
            && (self.chunk_size != DEFAULT_CHUNK_SIZE || self.chunk_delay_ms > 0)
        {
            warn!("Chunk size and delay only apply to method 3, ignored for {}", self.method);
        }
        for source in &self.sources {
            if !source.is_dir() {
                warn!("Source directory {:?} does not exist (yet)", source);
            }
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            chunk_size: self.chunk_size,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> Config {
        Config {
            sources: vec![PathBuf::from("/plots/tmp")],
            destination: PathBuf::from("/plots/farm"),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.method, TransferMethod::Rename);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.chunk_delay_ms, 0);
        assert_eq!(config.scan_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            sources = ["/plots/tmp1", "/plots/tmp2"]
            destination = "/plots/farm"
            method = 3
            chunk_size = 1048576
            chunk_delay_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.method, TransferMethod::ChunkedCopy);
        assert_eq!(
            config.engine_options(),
            EngineOptions {
                chunk_size: 1_048_576,
                chunk_delay: Duration::from_millis(10),
            }
        );
        assert_eq!(config.scan_interval_secs, 5);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let result: Result<Config, _> = toml::from_str("method = 4");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = valid();
        config.chunk_size = 0;
        config.validate().unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);

        let mut no_sources = Config {
            sources: Vec::new(),
            ..valid()
        };
        assert!(matches!(
            no_sources.validate(),
            Err(PlotMoveError::InvalidConfiguration { .. })
        ));

        let mut same = Config {
            destination: PathBuf::from("/plots/tmp"),
            ..valid()
        };
        assert!(same.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config, Config::default());
    }

    #[tokio::test]
    async fn test_load_invalid_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "sources = 12").await.unwrap();
        assert!(Config::load_from(&path).await.is_err());
    }
}
