//! Layered configuration: compiled-in defaults, optionally overridden by a YAML file (§6).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub storage_path: PathBuf,
    pub data_ttl: u64,
    pub chart_ttl: u64,
    pub analysis_ttl: u64,
    pub max_memory_entries: usize,
    pub max_disk_size_mb: u64,
    pub cleanup_interval: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_path: PathBuf::from("./cache_data"),
            data_ttl: 300,
            chart_ttl: 600,
            analysis_ttl: 1800,
            max_memory_entries: 1000,
            max_disk_size_mb: 500,
            cleanup_interval: 3600,
        }
    }
}

impl CacheConfig {
    /// The sweeper wakes at most this often so a short bucket TTL doesn't sit
    /// stale for a full `cleanup_interval` (§9, Open Question 2 resolution).
    pub fn sweeper_interval(&self) -> u64 {
        self.cleanup_interval
            .min(self.data_ttl)
            .min(self.chart_ttl)
            .min(self.analysis_ttl)
            .max(1)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.data_ttl == 0 || self.chart_ttl == 0 || self.analysis_ttl == 0 {
            return Err(AppError::ConfigInvalid {
                reason: "cache TTLs must be positive".into(),
            });
        }
        if self.max_memory_entries == 0 {
            return Err(AppError::ConfigInvalid {
                reason: "max_memory_entries must be positive".into(),
            });
        }
        if self.cleanup_interval == 0 {
            return Err(AppError::ConfigInvalid {
                reason: "cleanup_interval must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub timezone: String,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            timezone: "UTC".into(),
            output_dir: PathBuf::from("./reports"),
        }
    }
}

impl Config {
    /// Parses `path` as YAML over the compiled-in defaults. A missing file is not
    /// an error — callers typically fall back to [`Config::from_env_or_default`].
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AppError::ConfigInvalid {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|e| AppError::ConfigInvalid {
            reason: format!("invalid YAML in {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `CHART_PIPELINE_CONFIG` if set; otherwise returns compiled-in defaults.
    /// A configured-but-unreadable-or-invalid file is fatal, per §7.
    pub fn from_env_or_default() -> Result<Self, AppError> {
        match std::env::var("CHART_PIPELINE_CONFIG") {
            Ok(path) => Self::load_from_file(Path::new(&path)),
            Err(_) => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        self.cache.validate()?;
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(AppError::ConfigInvalid {
                reason: format!("unknown timezone {:?}", self.timezone),
            });
        }
        Ok(())
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cache = CacheConfig::default();
        assert_eq!(cache.data_ttl, 300);
        assert_eq!(cache.chart_ttl, 600);
        assert_eq!(cache.analysis_ttl, 1800);
        assert_eq!(cache.max_memory_entries, 1000);
    }

    #[test]
    fn sweeper_interval_is_bounded_by_shortest_ttl() {
        let mut cache = CacheConfig::default();
        cache.data_ttl = 30;
        cache.cleanup_interval = 3600;
        assert_eq!(cache.sweeper_interval(), 30);
    }

    #[test]
    fn zero_ttl_is_invalid() {
        let mut cache = CacheConfig::default();
        cache.data_ttl = 0;
        assert!(cache.validate().is_err());
    }

    #[test]
    fn missing_config_file_path_is_invalid_not_panicking() {
        let err = Config::load_from_file(Path::new("/nonexistent/path.yaml")).unwrap_err();
        assert_eq!(err.tag(), "ConfigInvalid");
    }

    #[test]
    fn unknown_timezone_is_invalid() {
        let config = Config {
            timezone: "Not/AZone".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
