use crate::errors::{AppError, AppResult, ErrorContextExt};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: Option<PathBuf>,
    pub log_level: String,
    pub log_path: Option<String>,
    pub poll_interval_ms: u64,
    pub max_frame_size: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            socket_path: None,
            log_level: "info".to_string(),
            log_path: None,
            poll_interval_ms: 1000,
            max_frame_size: 1024 * 1024,
        }
    }
}

/// What to do automatically when media shows up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub automount_drives: bool,
    pub autoopen_filesystem: bool,
    pub autoplay_audio_cds: bool,
    pub autoplay_dvds: bool,
    pub autoopen_fs_service: String,
    pub autoplay_cda_service: String,
    pub autoplay_dvd_service: String,
    pub unmount_on_exit: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            automount_drives: true,
            autoopen_filesystem: false,
            autoplay_audio_cds: false,
            autoplay_dvds: false,
            autoopen_fs_service: String::new(),
            autoplay_cda_service: String::new(),
            autoplay_dvd_service: String::new(),
            unmount_on_exit: false,
        }
    }
}

/// argv prefixes for the system tools; the device path is appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mount_command: Vec<String>,
    pub unmount_command: Vec<String>,
    pub eject_command: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect();
        ExecutorConfig {
            mount_command: argv(&["udisksctl", "mount", "--no-user-interaction", "--block-device"]),
            unmount_command: argv(&["udisksctl", "unmount", "--no-user-interaction", "--block-device"]),
            eject_command: argv(&["eject"]),
        }
    }
}

/// Keys accepted by `config get` / `config set`
pub const VALID_CONFIG_KEYS: &[&str] = &[
    "daemon.socket_path",
    "daemon.log_level",
    "daemon.log_path",
    "daemon.poll_interval_ms",
    "policy.automount_drives",
    "policy.autoopen_filesystem",
    "policy.autoplay_audio_cds",
    "policy.autoplay_dvds",
    "policy.autoopen_fs_service",
    "policy.autoplay_cda_service",
    "policy.autoplay_dvd_service",
    "policy.unmount_on_exit",
];

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e: T::Err| AppError::InvalidConfigValue {
        key: key.to_string(),
        value: value.to_string(),
        source: Some(Box::new(e)),
    })
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "None" {
        None
    } else {
        Some(value.to_string())
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load the configuration from `config_dir`, or from the per-user
    /// configuration directory, creating a default file when missing
    pub fn new(config_dir: Option<PathBuf>) -> AppResult<Self> {
        let config_path = Self::get_config_path(config_dir)?;
        let config = Self::load_or_create(&config_path)?;

        Ok(ConfigManager {
            config_path,
            config,
        })
    }

    /// Like [`ConfigManager::new`] but a missing file yields the defaults
    /// without writing anything
    pub fn load(config_dir: Option<PathBuf>) -> AppResult<Self> {
        let config_path = Self::get_config_path(config_dir)?;
        let config = if config_path.exists() {
            Self::load_or_create(&config_path)?
        } else {
            Config::default()
        };

        Ok(ConfigManager {
            config_path,
            config,
        })
    }

    pub fn get_config_path(config_dir: Option<PathBuf>) -> AppResult<PathBuf> {
        let base_path = match config_dir {
            Some(path) => path,
            None => {
                let base_dirs = BaseDirs::new()
                    .ok_or_else(|| AppError::config("Failed to get base directories"))?;
                base_dirs.config_dir().join("volume-manager")
            }
        };

        fs::create_dir_all(&base_path).in_file_operation(&base_path, "create config directory")?;

        Ok(base_path.join("config.toml"))
    }

    fn load_or_create(path: &Path) -> AppResult<Config> {
        if path.exists() {
            let content = fs::read_to_string(path).in_file_operation(path, "read config file")?;
            toml::from_str(&content)
                .map_err(|e| AppError::config_with_source("Failed to parse config file", e))
        } else {
            let config = Config::default();
            let content = toml::to_string_pretty(&config)
                .map_err(|e| AppError::config_with_source("Failed to serialize default config", e))?;
            fs::write(path, content).in_file_operation(path, "write default config")?;
            Ok(config)
        }
    }

    pub fn save(&self) -> AppResult<()> {
        let content = toml::to_string_pretty(&self.config)
            .map_err(|e| AppError::config_with_source("Failed to serialize config", e))?;
        fs::write(&self.config_path, content)
            .in_file_operation(&self.config_path, "write config file")?;
        Ok(())
    }

    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_or_create(&self.config_path)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Read a dotted key as a string
    pub fn get(&self, key: &str) -> AppResult<String> {
        let daemon = &self.config.daemon;
        let policy = &self.config.policy;
        let value = match key {
            "daemon.socket_path" => daemon
                .socket_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "None".to_string()),
            "daemon.log_level" => daemon.log_level.clone(),
            "daemon.log_path" => daemon.log_path.clone().unwrap_or_else(|| "None".to_string()),
            "daemon.poll_interval_ms" => daemon.poll_interval_ms.to_string(),
            "policy.automount_drives" => policy.automount_drives.to_string(),
            "policy.autoopen_filesystem" => policy.autoopen_filesystem.to_string(),
            "policy.autoplay_audio_cds" => policy.autoplay_audio_cds.to_string(),
            "policy.autoplay_dvds" => policy.autoplay_dvds.to_string(),
            "policy.autoopen_fs_service" => policy.autoopen_fs_service.clone(),
            "policy.autoplay_cda_service" => policy.autoplay_cda_service.clone(),
            "policy.autoplay_dvd_service" => policy.autoplay_dvd_service.clone(),
            "policy.unmount_on_exit" => policy.unmount_on_exit.to_string(),
            _ => return Err(AppError::UnknownConfigKey { key: key.to_string() }),
        };
        Ok(value)
    }

    /// Update a dotted key in memory; call [`ConfigManager::save`] to persist
    pub fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        let config = &mut self.config;
        match key {
            "daemon.socket_path" => config.daemon.socket_path = optional(value).map(PathBuf::from),
            "daemon.log_level" => {
                value
                    .parse::<tracing_subscriber::filter::LevelFilter>()
                    .map_err(|e| AppError::InvalidConfigValue {
                        key: key.to_string(),
                        value: value.to_string(),
                        source: Some(Box::new(e)),
                    })?;
                config.daemon.log_level = value.to_string();
            }
            "daemon.log_path" => config.daemon.log_path = optional(value),
            "daemon.poll_interval_ms" => {
                let interval: u64 = parse_value(key, value)?;
                if interval == 0 {
                    return Err(AppError::InvalidConfigValue {
                        key: key.to_string(),
                        value: value.to_string(),
                        source: None,
                    });
                }
                config.daemon.poll_interval_ms = interval;
            }
            "policy.automount_drives" => config.policy.automount_drives = parse_value(key, value)?,
            "policy.autoopen_filesystem" => config.policy.autoopen_filesystem = parse_value(key, value)?,
            "policy.autoplay_audio_cds" => config.policy.autoplay_audio_cds = parse_value(key, value)?,
            "policy.autoplay_dvds" => config.policy.autoplay_dvds = parse_value(key, value)?,
            "policy.autoopen_fs_service" => config.policy.autoopen_fs_service = value.to_string(),
            "policy.autoplay_cda_service" => config.policy.autoplay_cda_service = value.to_string(),
            "policy.autoplay_dvd_service" => config.policy.autoplay_dvd_service = value.to_string(),
            "policy.unmount_on_exit" => config.policy.unmount_on_exit = parse_value(key, value)?,
            _ => return Err(AppError::UnknownConfigKey { key: key.to_string() }),
        }
        Ok(())
    }
}
