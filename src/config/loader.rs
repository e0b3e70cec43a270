//! Configuration Loader
//!
//! Environment-aware configuration loading. Merges built-in defaults, TOML
//! files and `VITALS__`-prefixed environment variables with the `config`
//! crate, then validates the result before anything starts.

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::MonitorConfig;

/// Environment variable selecting the configuration environment
pub const ENVIRONMENT_VAR: &str = "VITALS_ENV";

/// Prefix for per-key environment overrides (`VITALS__CACHE__VITALS_CAPACITY`)
pub const ENV_OVERRIDE_PREFIX: &str = "VITALS";

const BASE_CONFIG_FILE: &str = "vitals.toml";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: MonitorConfig,
    environment: String,
    config_directory: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment,
            directory = %config_directory.display(),
            "Loading monitor configuration"
        );

        let base_file = config_directory.join(BASE_CONFIG_FILE);
        let env_file = config_directory.join(format!("{environment}.toml"));
        for path in [&base_file, &env_file] {
            Self::check_readable(path)?;
        }

        let merged = Config::builder()
            .add_source(Config::try_from(&MonitorConfig::default())?)
            .add_source(File::from(base_file).format(FileFormat::Toml).required(false))
            .add_source(File::from(env_file).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_OVERRIDE_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MonitorConfig = merged.try_deserialize()?;
        config.validate()?;

        info!(
            environment,
            device_id = %config.device.device_id,
            vitals_capacity = config.cache.vitals_capacity,
            storage_backend = ?config.storage.backend,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Some(config_directory),
        }))
    }

    /// Load configuration from an in-memory TOML document layered over the
    /// defaults. Environment variables are not consulted.
    pub fn load_from_toml_str(toml: &str, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        let merged = Config::builder()
            .add_source(Config::try_from(&MonitorConfig::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        let config: MonitorConfig = merged.try_deserialize()?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: None,
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: MonitorConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> Option<&Path> {
        self.config_directory.as_deref()
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Detect the configuration environment from `VITALS_ENV`
    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_VAR)
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Surface unreadable files as read errors instead of silently skipping them
    fn check_readable(path: &Path) -> ConfigResult<()> {
        match std::fs::metadata(path) {
            Ok(metadata) if !metadata.is_file() => Err(ConfigurationError::invalid_value(
                "file_type",
                path.display().to_string(),
                "configuration path must point to a regular file",
            )),
            Ok(_) => std::fs::File::open(path)
                .map(|_| ())
                .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigurationError::file_read_error(
                path.display().to_string(),
                e,
            )),
        }
    }
}
