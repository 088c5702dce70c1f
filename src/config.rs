use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::pack::{CacheLimits, DecodeOptions};

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-pack-store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackStoreConfig {
    /// Root of the loose-object store
    #[serde(default = "defaults::store_dir")]
    pub store_dir: PathBuf,
    /// Most materialized delta bases kept while resolving
    #[serde(default = "defaults::cache_entries")]
    pub cache_entries: usize,
    /// Byte bound for materialized delta bases
    #[serde(default = "defaults::cache_bytes")]
    pub cache_bytes: u64,
    /// Resolve REF deltas against the store when their base is not in the pack
    #[serde(default)]
    pub thin_packs: bool,
    /// zlib level (0-9) for written packs and loose objects
    #[serde(default = "defaults::compression_level")]
    pub compression_level: u32,
}

impl Default for PackStoreConfig {
    fn default() -> Self {
        Self {
            store_dir: defaults::store_dir(),
            cache_entries: defaults::cache_entries(),
            cache_bytes: defaults::cache_bytes(),
            thin_packs: false,
            compression_level: defaults::compression_level(),
        }
    }
}

impl PackStoreConfig {
    /// Load configuration from the config file, if any, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        tracing::debug!("loading git-pack-store config from {:?}", config_path);
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Apply `GIT_PACK_STORE_*` environment variables.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(path) = env::var("GIT_PACK_STORE_DIR") {
            self.store_dir = expand_tilde(&PathBuf::from(path));
        }

        if let Ok(entries) = env::var("GIT_PACK_STORE_CACHE_ENTRIES") {
            self.cache_entries = entries
                .parse()
                .context("Failed to parse GIT_PACK_STORE_CACHE_ENTRIES as usize")?;
        }

        if let Ok(bytes) = env::var("GIT_PACK_STORE_CACHE_BYTES") {
            self.cache_bytes = bytes
                .parse()
                .context("Failed to parse GIT_PACK_STORE_CACHE_BYTES as u64")?;
        }

        if let Ok(thin) = env::var("GIT_PACK_STORE_THIN_PACKS") {
            self.thin_packs = parse_flag(&thin)
                .with_context(|| format!("Failed to parse GIT_PACK_STORE_THIN_PACKS={thin:?}"))?;
        }

        if let Ok(level) = env::var("GIT_PACK_STORE_COMPRESSION") {
            self.compression_level = level
                .parse()
                .context("Failed to parse GIT_PACK_STORE_COMPRESSION as u32")?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: PackStoreConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.store_dir = expand_tilde(&config.store_dir);
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get default config file path
    pub fn config_file_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".config/git-pack-store/config.yaml"))
            .context("Could not determine home directory for config file")
    }

    fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            anyhow::bail!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            );
        }
        Ok(())
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            cache: CacheLimits {
                max_entries: self.cache_entries,
                max_bytes: self.cache_bytes,
            },
            ..DecodeOptions::default()
        }
    }

    pub fn compression(&self) -> Compression {
        Compression::new(self.compression_level)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("expected a boolean, got {other:?}"),
    }
}

mod defaults {
    use std::path::PathBuf;

    use crate::pack::CacheLimits;

    pub(crate) fn store_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("git-pack-store"))
            .unwrap_or_else(|| PathBuf::from(".git-pack-store"))
    }

    pub(crate) fn cache_entries() -> usize {
        CacheLimits::default().max_entries
    }

    pub(crate) fn cache_bytes() -> u64 {
        CacheLimits::default().max_bytes
    }

    pub(crate) fn compression_level() -> u32 {
        6
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        let config = PackStoreConfig {
            store_dir: dir.path().join("store"),
            cache_entries: 12,
            cache_bytes: 4096,
            thin_packs: true,
            compression_level: 1,
        };
        config.save(&config_path).unwrap();

        let loaded = PackStoreConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "thin_packs: true\n").unwrap();

        let loaded = PackStoreConfig::load_from_file(&config_path).unwrap();
        assert!(loaded.thin_packs);
        assert_eq!(loaded.cache_entries, CacheLimits::default().max_entries);
        assert_eq!(loaded.compression_level, 6);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "cache_dir: /tmp\n").unwrap();

        assert!(PackStoreConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_invalid_compression_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "compression_level: 12\n").unwrap();

        assert!(PackStoreConfig::load_from_file(&config_path).is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "store_dir: ~/packs\n").unwrap();

        let loaded = PackStoreConfig::load_from_file(&config_path).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(loaded.store_dir, home.join("packs"));
        }
    }

    // Env vars are process-wide, so every override is checked in one test.
    #[test]
    fn test_env_overrides() {
        env::set_var("GIT_PACK_STORE_CACHE_ENTRIES", "3");
        env::set_var("GIT_PACK_STORE_CACHE_BYTES", "1024");
        env::set_var("GIT_PACK_STORE_THIN_PACKS", "yes");
        env::set_var("GIT_PACK_STORE_COMPRESSION", "9");
        env::set_var("GIT_PACK_STORE_DIR", "~/elsewhere");

        let config = PackStoreConfig::default().with_env_overrides().unwrap();

        env::remove_var("GIT_PACK_STORE_CACHE_ENTRIES");
        env::remove_var("GIT_PACK_STORE_CACHE_BYTES");
        env::remove_var("GIT_PACK_STORE_THIN_PACKS");
        env::remove_var("GIT_PACK_STORE_COMPRESSION");
        env::remove_var("GIT_PACK_STORE_DIR");

        assert_eq!(config.cache_entries, 3);
        assert_eq!(config.cache_bytes, 1024);
        assert!(config.thin_packs);
        assert_eq!(config.compression_level, 9);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.store_dir, home.join("elsewhere"));
        }

        let options = config.decode_options();
        assert_eq!(options.cache.max_entries, 3);
        assert_eq!(options.cache.max_bytes, 1024);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE").unwrap());
        assert!(!parse_flag("0").unwrap());
        assert!(parse_flag("maybe").is_err());
    }
}
