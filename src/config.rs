use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

pub const APP_NAME: &str = "upkeep";

/// Per-user configuration directory holding small named JSON files
/// (`<name>.json`). The directory is created on first use.
#[derive(Debug, Clone)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Resolves the platform config directory, honoring the
    /// UPKEEP_CONFIG_DIR override.
    pub fn resolve() -> Result<ConfigDir> {
        let root = match std::env::var("UPKEEP_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
                .join(APP_NAME),
        };
        tracing::debug!("Config directory: {}", root.display());
        Ok(ConfigDir::at(root))
    }

    pub fn at(root: PathBuf) -> ConfigDir {
        ConfigDir { root }
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Loads a named config file. A missing or unreadable file yields the
    /// type's defaults; only malformed JSON is an error.
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.file_path(name);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Ok(T::default()),
        };

        serde_json::from_str(&content)
            .with_context(|| format!("Could not parse config file at {}", path.display()))
    }

    pub fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Could not create config directory {}", self.root.display()))?;

        let path = self.file_path(name);
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&path, content)
            .with_context(|| format!("Could not write config file at {}", path.display()))?;

        Ok(())
    }
}
