use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Importer configuration, loaded from `forgedb.toml`.
///
/// Every field has a default so a missing config file just means the
/// defaults; an explicitly named config file that cannot be read or parsed
/// is a hard error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Username recorded for older result files missing the field, unless
    /// overridden on the command line.
    #[serde(default)]
    pub default_username: Option<String>,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("forgedb").join("forge.db"))
        .unwrap_or_else(|| PathBuf::from("forge.db"))
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            default_username: None,
        }
    }
}

impl ImporterConfig {
    /// Load config from an explicit path, falling back to `./forgedb.toml`,
    /// then the platform config directory, then pure defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            return toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {:?}", path));
        }

        for path in Self::candidate_paths() {
            if let Ok(contents) = fs::read_to_string(&path) {
                match toml::from_str::<ImporterConfig>(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse {:?}: {}", path, e);
                    }
                }
            }
        }

        Ok(Self::default())
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("forgedb.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("forgedb").join("config.toml"));
        }
        paths
    }
}
