use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::types::*;

const CONFIG_FILE: &str = "config.toml";
const BOTS_FILE: &str = "bots.json";
const HOME_ENV: &str = "BOTDASH_HOME";

/// Owns the on-disk layout: config.toml for settings, bots.json for the
/// registry record. Only the registry writes bots.json.
#[derive(Debug, Clone)]
pub struct BotStore {
    config_dir: PathBuf,
    config_path: PathBuf,
    bots_path: PathBuf,
}

impl BotStore {
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os(HOME_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("botdash"),
        };

        Self::at(config_dir)
    }

    pub fn at(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir).with_context(|| {
            format!("Could not create config directory {}", config_dir.display())
        })?;

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            bots_path: config_dir.join(BOTS_FILE),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    // -- Settings (no secrets) ------------------------------------------------

    pub fn load_settings(&self) -> Result<Settings> {
        if !self.config_path.exists() {
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&self.config_path)?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", self.config_path.display()))?;
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let contents = toml::to_string_pretty(settings)?;
        fs::write(&self.config_path, contents)?;
        Ok(())
    }

    // -- Bot record (secrets, 0600) -------------------------------------------

    /// Reads the persisted bot list. Absent, unreadable, or corrupt records
    /// all hydrate as an empty list. Later entries reusing an id are dropped.
    pub fn load_bots(&self) -> Vec<BotConfig> {
        let contents = match fs::read_to_string(&self.bots_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.bots_path.display(), error = %e, "bot record unreadable, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<BotConfig>>(&contents) {
            Ok(bots) => {
                let mut seen = HashSet::new();
                bots.into_iter()
                    .filter(|bot| {
                        let fresh = seen.insert(bot.id.clone());
                        if !fresh {
                            tracing::warn!(
                                id = %bot.id,
                                name = %bot.name,
                                "duplicate bot id in record, dropping entry"
                            );
                        }
                        fresh
                    })
                    .collect()
            }
            Err(e) => {
                tracing::warn!(path = %self.bots_path.display(), error = %e, "bot record corrupt, starting empty");
                Vec::new()
            }
        }
    }

    pub fn save_bots(&self, bots: &[BotConfig]) -> Result<()> {
        let contents = serde_json::to_string_pretty(bots)?;
        fs::write(&self.bots_path, &contents)
            .with_context(|| format!("Could not write {}", self.bots_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.bots_path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
