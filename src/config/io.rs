use std::env::current_exe;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{debug, info};

use crate::config::types::Config;
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "tremor-ble.json";

/// `<exe>.json` beside the executable when such a file exists, so a copy on a usb stick keeps its
/// own settings. Otherwise `tremor-ble.json` in the per-user config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let portable = current_exe()
        .ok()
        .map(|exe| exe.with_extension("json"))
        .filter(|path| path.is_file());

    if let Some(path) = portable {
        return Ok(path);
    }

    let dirs = ProjectDirs::from("org", "tremorble", "tremor-ble").ok_or(ConfigError::NoConfigPath)?;
    let path = dirs.config_dir().join(CONFIG_FILE_NAME);
    debug!("No portable config, using {}", path.display());
    Ok(path)
}

/// Exclusive advisory lock on the config file. Only one process at a time may own the sensor.
pub struct InstanceLock {
    lock: RwLock<File>,
}

impl InstanceLock {
    /// Fails with [`ConfigError::CanNotLock`] while another instance holds the lock.
    pub fn acquire(&mut self) -> Result<RwLockWriteGuard<'_, File>, ConfigError> {
        self.lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

/// The config file in use. Opening creates it (and its directory) when missing.
pub struct ConfigIO {
    path: PathBuf,
    file: File,
}

impl ConfigIO {
    pub fn open(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        info!("Using config file {}", path.display());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        Ok(ConfigIO { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instance_lock(&self) -> Result<InstanceLock, ConfigError> {
        Ok(InstanceLock { lock: RwLock::new(self.file.try_clone()?) })
    }

    /// An empty file reads as the default config.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let content = tokio::fs::read(&self.path).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Config::default());
        }

        let content = std::str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut content = serde_json::to_string_pretty(config)?;
        content.push('\n');
        tokio::fs::write(&self.path, content).await?;
        info!("Saved config to {}", self.path.display());
        Ok(())
    }
}
