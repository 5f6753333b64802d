//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Who takes part and for how long.
    pub session: SessionConfig,
    /// Frame-loop network settings.
    pub network: NetworkConfig,
    /// Collectable spawner settings.
    pub spawner: SpawnerConfig,
    /// Logging and diagnostics.
    pub debug: DebugConfig,
}

/// Session shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of client peers besides the host.
    pub clients: u32,
    /// Frames to simulate before shutting down.
    pub frames: u64,
    /// Frame rate of every peer's update loop (Hz).
    pub frame_rate: u32,
    /// Whether the host also controls a player.
    pub host_plays: bool,
}

/// Network settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Datagrams a peer takes from its transport per frame (0 = unlimited).
    pub inbound_budget: usize,
}

/// Spawner settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Seed of the template selection and placement stream.
    pub seed: u64,
    /// Frames between spawn attempts.
    pub interval_frames: u32,
    /// Collectables alive at once before the spawner pauses.
    pub max_live: usize,
    /// Collectables are placed in `[-half_extent, half_extent]` on both axes.
    pub arena_half_extent: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g., "debug", "info,keystone_sync=trace").
    pub log_level: String,
    /// Also write JSON logs to `keystone.log`.
    pub file_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            frames: 600,
            frame_rate: 60,
            host_plays: true,
        }
    }
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            interval_frames: 30,
            max_live: 8,
            arena_half_extent: 20.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
        }
    }
}

/// `<platform config dir>/keystone`, or `./keystone` when the platform has
/// none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keystone")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load `config.ron` from `config_dir`, writing the defaults there first
    /// if it does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save to `config_dir/config.ron`, creating the directory if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        let config_path = config_dir.join(CONFIG_FILE);
        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path,
            source,
        })
    }

    /// Re-read the file. `Some` only if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &fresh == self {
            return Ok(None);
        }
        log::info!("Config reloaded with changes");
        Ok(Some(fresh))
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_serialize_readably() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new()).unwrap();
        assert!(ron_str.contains("clients: 3"));
        assert!(ron_str.contains("inbound_budget: 0"));
        assert!(ron_str.contains("seed: 42"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(session: (clients: 7))").unwrap();
        assert_eq!(config.session.clients, 7);
        assert_eq!(config.session.frame_rate, 60);
        assert_eq!(config.spawner, SpawnerConfig::default());
    }

    #[test]
    fn test_unknown_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(replay: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_ron_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(session: [").unwrap();
        let err = Config::load_or_create(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.session.clients = 5;
        config.network.inbound_budget = 4;
        config.debug.file_logging = true;

        config.save(dir.path()).unwrap();
        assert_eq!(Config::load_or_create(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_reload_reports_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.spawner.seed = 7;
        modified.save(dir.path()).unwrap();
        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.spawner.seed, 7);
    }

    #[test]
    fn test_reload_without_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::default().reload(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_default_dir_ends_in_keystone() {
        assert!(default_config_dir().ends_with("keystone"));
    }
}
