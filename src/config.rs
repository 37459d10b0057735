use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{HashKind, HashKinds};

/// default shard depth for depot paths
pub const DEFAULT_DEPTH: usize = 4;

/// what a bulk operation reports when some entries fail
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkPolicy {
    /// any failed entry fails the whole operation
    #[default]
    FailOnAny,
    /// one successful entry is enough for the operation to succeed
    SucceedIfAny,
}

impl BulkPolicy {
    /// overall result for a bulk operation over `total` entries
    pub fn check(self, failed: usize, total: usize) -> Result<()> {
        let failing = match self {
            BulkPolicy::FailOnAny => failed > 0,
            BulkPolicy::SucceedIfAny => failed > 0 && failed == total,
        };
        if failing {
            return Err(Error::BulkFailure { failed, total });
        }
        Ok(())
    }
}

/// depot configuration stored in config.toml
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// number of two-hex-char shard directories
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// stamp canonical entries with their catalog dates instead of the fixed default
    #[serde(default)]
    pub real_dates: bool,
    /// digests computed when analyzing containers
    #[serde(default = "default_hashes")]
    pub hashes: Vec<HashKind>,
    #[serde(default)]
    pub on_entry_error: BulkPolicy,
}

fn default_depth() -> usize {
    DEFAULT_DEPTH
}

fn default_hashes() -> Vec<HashKind> {
    HashKinds::STANDARD.iter().collect()
}

impl Config {
    /// create a new config with the given depth
    pub fn new(depth: usize) -> Result<Self> {
        validate_depth(depth)?;
        Ok(Self {
            depth,
            ..Self::default()
        })
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        validate_depth(config.depth)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// configured hash selection as a set
    pub fn hash_kinds(&self) -> HashKinds {
        self.hashes.iter().copied().collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            real_dates: false,
            hashes: default_hashes(),
            on_entry_error: BulkPolicy::default(),
        }
    }
}

/// a sha1 has 20 byte pairs to shard on
pub fn validate_depth(depth: usize) -> Result<()> {
    if depth > 20 {
        return Err(Error::InvalidDepth(depth));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config {
            depth: 2,
            real_dates: true,
            hashes: vec![HashKind::Crc32, HashKind::Sha256],
            on_entry_error: BulkPolicy::SucceedIfAny,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
        assert!(toml_str.contains("succeed_if_any"));
        assert!(toml_str.contains("\"sha256\""));
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.depth, DEFAULT_DEPTH);
        assert!(!config.real_dates);
        assert_eq!(config.hash_kinds(), HashKinds::STANDARD);
        assert_eq!(config.on_entry_error, BulkPolicy::FailOnAny);
    }

    #[test]
    fn test_config_rejects_deep_depth() {
        assert!(matches!(Config::new(21), Err(Error::InvalidDepth(21))));
        assert!(Config::new(20).is_ok());
    }

    #[test]
    fn test_bulk_policy() {
        assert!(BulkPolicy::FailOnAny.check(0, 3).is_ok());
        assert!(matches!(
            BulkPolicy::FailOnAny.check(1, 3),
            Err(Error::BulkFailure { failed: 1, total: 3 })
        ));
        assert!(BulkPolicy::SucceedIfAny.check(2, 3).is_ok());
        assert!(BulkPolicy::SucceedIfAny.check(3, 3).is_err());
        assert!(BulkPolicy::SucceedIfAny.check(0, 0).is_ok());
    }

    #[test]
    fn test_config_load_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "depth = 40\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::InvalidDepth(40))));
    }
}
