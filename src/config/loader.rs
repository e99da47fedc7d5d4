//! Configuration Loader
//!
//! Environment-aware configuration loading. Layers a base file, an optional
//! environment-specific file and `UPDATE_ORCHESTRATOR__*` environment variables on
//! top of the built-in defaults, then validates the result.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "UPDATE_ORCHESTRATOR";
const BASE_FILE_STEM: &str = "orchestrator";
const SUPPORTED_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

/// Loaded and validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from `./config`
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(Some(Self::default_config_directory()), &environment)
    }

    /// Load configuration from a directory containing `orchestrator.<ext>` and,
    /// optionally, `orchestrator.<environment>.<ext>`.
    ///
    /// Both files are optional; missing files leave the defaults in place.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let mut builder = Config::builder();

        if let Some(dir) = &config_dir {
            debug!(
                "Loading configuration for environment '{}' from directory: {}",
                environment,
                dir.display()
            );
            let stems = [
                BASE_FILE_STEM.to_string(),
                format!("{BASE_FILE_STEM}.{environment}"),
            ];
            for stem in &stems {
                if let Some(path) = Self::find_config_file(dir, stem) {
                    debug!("Adding configuration source: {}", path.display());
                    builder = builder.add_source(File::from(path).required(true));
                }
            }
        }

        let config = Self::finish(builder, environment)?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: config_dir,
        }))
    }

    /// Load configuration from one explicit file; the file must exist.
    pub fn load_from_path(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        if !path.is_file() {
            return Err(ConfigurationError::config_file_not_found(path));
        }
        let environment = Self::detect_environment();
        let builder = Config::builder().add_source(File::from(path.to_path_buf()).required(true));
        let config = Self::finish(builder, &environment)?;
        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory: path.parent().map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration (tests, embedding applications)
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        let environment = config.environment.clone();
        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_directory: None,
        }))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        environment: &str,
    ) -> ConfigResult<OrchestratorConfig> {
        let merged = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error("configuration sources", e))?;

        let mut config: OrchestratorConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialization_error)?;

        config.environment = environment.to_string();

        config.validate()?;

        info!(
            environment = %config.environment,
            upstreams = config.upstreams.len(),
            data_kinds = config.data_kinds.len(),
            tasks = config.tasks.len(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> Option<&Path> {
        self.config_directory.as_deref()
    }

    /// JSON view of the effective configuration
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var(format!("{ENV_PREFIX}_ENV"))
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// First `<stem>.<ext>` in `dir` with a supported extension
    fn find_config_file(dir: &Path, stem: &str) -> Option<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{stem}.{ext}")))
            .find(|candidate| candidate.is_file())
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DataKind;
    use std::io::Write;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().scheduler.tick_interval_seconds, 30);
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join("orchestrator.toml")).unwrap();
        writeln!(base, "[scheduler]\ntick_interval_seconds = 60\nworker_concurrency = 3").unwrap();
        let mut overlay = std::fs::File::create(dir.path().join("orchestrator.test.toml")).unwrap();
        writeln!(overlay, "[scheduler]\ntick_interval_seconds = 5").unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().scheduler.tick_interval_seconds, 5);
        assert_eq!(manager.config().scheduler.worker_concurrency, 3);
    }

    #[test]
    fn test_load_from_path_reads_upstreams_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[upstreams.exchange]
requests_per_minute = 30
burst_capacity = 5
failure_threshold = 3

[data_kinds.price]
update_interval_seconds = 3600
priority = 1

[[tasks]]
name = "prices"
data_kind = "price"
upstream = "exchange"
batch_size = 20
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_from_path(&path).unwrap();
        let config = manager.config();
        assert_eq!(config.upstream("exchange").burst_capacity, Some(5));
        assert_eq!(config.upstream("exchange").failure_threshold, 3);
        assert_eq!(
            config.data_kind(DataKind::Price).unwrap().update_interval_seconds,
            3600
        );
        assert_eq!(config.tasks.len(), 1);
        assert_eq!(config.tasks[0].batch_size, 20);
        assert!(config.tasks[0].enabled);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let err = ConfigManager::load_from_path(Path::new("/definitely/not/here.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scheduler]\ntick_interval_seconds = 0\n").unwrap();
        let err = ConfigManager::load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
