//! engine configuration, loaded from/saved to TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};
use crate::zlib::Strategy;

/// top-level engine configuration; every field carries a documented default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tiering: TieringConfig,
    pub eviction: EvictionConfig,
    pub hash_cache: HashCacheConfig,
    pub pattern_cache: PatternCacheConfig,
    pub compression: CompressionConfig,
    pub watch: WatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tiering: TieringConfig::default(),
            eviction: EvictionConfig::default(),
            hash_cache: HashCacheConfig::default(),
            pattern_cache: PatternCacheConfig::default(),
            compression: CompressionConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

/// placement and migration thresholds for the blob tier engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TieringConfig {
    pub hot_max_size: u64,
    pub hot_max_age_days: u32,
    pub warm_max_age_days: u32,
    pub auto_promote: bool,
    pub auto_demote: bool,
}

impl Default for TieringConfig {
    fn default() -> Self {
        TieringConfig {
            hot_max_size: 1024 * 1024,
            hot_max_age_days: 1,
            warm_max_age_days: 30,
            auto_promote: true,
            auto_demote: true,
        }
    }
}

/// hot-tier page cap and eviction run thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub max_hot_pages: usize,
    pub eviction_threshold: f64,
    pub eviction_target: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        EvictionConfig {
            max_hot_pages: 256,
            eviction_threshold: 0.9,
            eviction_target: 0.7,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HashCacheConfig {
    pub max_size: usize,
    pub enabled: bool,
}

impl Default for HashCacheConfig {
    fn default() -> Self {
        HashCacheConfig {
            max_size: crate::hash::HashCache::DEFAULT_CAPACITY,
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCacheConfig {
    pub capacity: usize,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        PatternCacheConfig { capacity: 256 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub level: i32,
    pub strategy: StrategyConfig,
    pub mem_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            level: 6,
            strategy: StrategyConfig::Default,
            mem_level: 8,
        }
    }
}

/// serde-friendly mirror of [`crate::zlib::Strategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyConfig {
    Default,
    Filtered,
    HuffmanOnly,
    Rle,
    Fixed,
}

impl From<StrategyConfig> for Strategy {
    fn from(value: StrategyConfig) -> Self {
        match value {
            StrategyConfig::Default => Strategy::Default,
            StrategyConfig::Filtered => Strategy::Filtered,
            StrategyConfig::HuffmanOnly => Strategy::HuffmanOnly,
            StrategyConfig::Rle => Strategy::Rle,
            StrategyConfig::Fixed => Strategy::Fixed,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// `None` means unbounded, the default.
    pub max_subscriptions_per_connection: Option<usize>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            max_subscriptions_per_connection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.tiering.hot_max_size, 1024 * 1024);
        assert_eq!(config.tiering.hot_max_age_days, 1);
        assert_eq!(config.tiering.warm_max_age_days, 30);
        assert!(config.tiering.auto_promote);
        assert!(config.tiering.auto_demote);
        assert_eq!(config.eviction.max_hot_pages, 256);
        assert_eq!(config.eviction.eviction_threshold, 0.9);
        assert_eq!(config.eviction.eviction_target, 0.7);
        assert_eq!(config.hash_cache.max_size, 1000);
        assert!(config.hash_cache.enabled);
        assert_eq!(config.compression.level, 6);
        assert_eq!(config.compression.mem_level, 8);
        assert_eq!(config.watch.max_subscriptions_per_connection, None);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.tiering.hot_max_size, config.tiering.hot_max_size);
        assert_eq!(parsed.compression.level, config.compression.level);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
[tiering]
hot_max_size = 2097152
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tiering.hot_max_size, 2097152);
        // untouched fields still take their defaults.
        assert_eq!(config.tiering.hot_max_age_days, 1);
        assert_eq!(config.eviction.max_hot_pages, 256);
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.tiering.hot_max_size = 4096;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.tiering.hot_max_size, 4096);
    }
}
