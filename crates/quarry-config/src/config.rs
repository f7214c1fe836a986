//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Frame scheduler and worker pool settings.
    pub scheduler: SchedulerConfig,
    /// Server connection settings.
    pub network: NetworkConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Frame scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of section-build worker threads, which is also the maximum
    /// number of builds in flight. `0` selects twice the hardware thread count.
    pub pool_capacity: usize,
    /// Fixed simulation rate in ticks per second.
    pub tick_rate_hz: u32,
    /// Lower clamp for the 60 Hz-normalized frame delta.
    pub min_delta: f64,
    /// Upper clamp for the 60 Hz-normalized frame delta.
    pub max_delta: f64,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or address.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 0,
            tick_rate_hz: 20,
            min_delta: 0.3,
            max_delta: 1.6,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 25565,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Worker count with the `0 = 2 × hardware threads` rule applied.
    /// Never returns zero.
    pub fn resolved_pool_capacity(&self) -> usize {
        if self.pool_capacity > 0 {
            self.pool_capacity
        } else {
            (num_cpus::get() * 2).max(1)
        }
    }

    /// Delta clamp bounds ordered so that `min <= max` even if the file
    /// swapped them.
    pub fn delta_bounds(&self) -> (f64, f64) {
        if self.min_delta <= self.max_delta {
            (self.min_delta, self.max_delta)
        } else {
            (self.max_delta, self.min_delta)
        }
    }
}

/// Default OS config directory for the client (`<config>/quarry`).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("quarry"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load `config.ron` from `config_dir`, writing the defaults there first
    /// if the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read_file(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Write this config to `config_dir/config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let write_err = |source| ConfigError::Write {
            path: config_path.clone(),
            source,
        };

        std::fs::create_dir_all(config_dir).map_err(write_err)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty)?;
        std::fs::write(&config_path, serialized).map_err(write_err)
    }

    /// Re-read the file. `Some` only when its content differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read_file(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        for (field, value) in [
            ("min_delta", scheduler.min_delta),
            ("max_delta", scheduler.max_delta),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is not a positive number"),
                });
            }
        }
        if scheduler.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_rate_hz",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}
