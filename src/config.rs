use crate::{
    error::MapperError,
    matcher::{DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_CONCURRENCY},
    nodekey::KeyStrategy,
    orchestrator::DEFAULT_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

/// Tunables for a mapping run. Every field has a default, so a partial (or absent) config file
/// is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub batch_size: usize,
    pub fuzzy_threshold: f64,
    pub max_concurrency: usize,
    pub include_parents: bool,
    pub include_community_variations: bool,
    pub key_strategy: KeyStrategy,
    /// SQLite reference store, when one is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            include_parents: false,
            include_community_variations: false,
            key_strategy: KeyStrategy::default(),
            database: None,
        }
    }
}

impl MapperConfig {
    pub fn validate(&self) -> Result<(), MapperError> {
        if self.batch_size == 0 {
            return Err(MapperError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(MapperError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(MapperError::InvalidConfig(format!(
                "fuzzy_threshold must lie in [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<MapperConfig, MapperError>;
    fn set_config(&self, config: &MapperConfig) -> Result<(), MapperError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<MapperConfig, MapperError> {
        tracing::debug!("Attempting to read mapper config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(MapperConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: MapperConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn set_config(&self, config: &MapperConfig) -> Result<(), MapperError> {
        config.validate()?;
        tracing::debug!("Attempting to write mapper config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("lgd.toml"));
        assert_eq!(provider.get_config().unwrap(), MapperConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgd.toml");
        std::fs::write(
            &path,
            "batch_size = 25\nkey_strategy = \"name_only\"\ninclude_parents = true\n",
        )
        .unwrap();
        let provider = TomlConfigProvider::new(path);
        let config = provider.get_config().unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.key_strategy, KeyStrategy::NameOnly);
        assert!(config.include_parents);
        assert_eq!(config.fuzzy_threshold, DEFAULT_FUZZY_THRESHOLD);

        let changed = MapperConfig {
            database: Some(PathBuf::from("lgd.sqlite")),
            ..config
        };
        provider.set_config(&changed).unwrap();
        assert_eq!(provider.get_config().unwrap(), changed);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_batch = MapperConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_batch.validate(),
            Err(MapperError::InvalidConfig(_))
        ));
        let wild_threshold = MapperConfig {
            fuzzy_threshold: 1.5,
            ..Default::default()
        };
        assert!(wild_threshold.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lgd.toml");
        std::fs::write(&path, "max_concurrency = 0\n").unwrap();
        assert!(TomlConfigProvider::new(path).get_config().is_err());
    }
}
