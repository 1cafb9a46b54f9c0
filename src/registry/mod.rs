//! The set of configured bots plus the session's selection cursor.
//!
//! Every mutation of the bot list is written to the [`BotStore`] before it is
//! committed in memory, so a failed write leaves the registry untouched.
//! Selection is session state and is never persisted.

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;
use url::Url;

use crate::storage::{BotConfig, BotStore};

const ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("'{0}' is not a valid absolute URL")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not persist bot list: {0:#}")]
    Storage(anyhow::Error),
}

pub struct BotRegistry {
    store: BotStore,
    bots: Vec<BotConfig>,
    selected_bot_id: Option<String>,
}

impl BotRegistry {
    /// Loads the persisted bot list. Never fails; a missing or corrupt record
    /// starts an empty registry, and entries that `add_bot` would have
    /// rejected are dropped. Nothing is selected after hydration.
    pub fn hydrate(store: BotStore) -> Self {
        let bots: Vec<BotConfig> = store
            .load_bots()
            .into_iter()
            .filter(|bot| {
                let checked = if bot.id.is_empty() {
                    Err(ValidationError::MissingField("id"))
                } else {
                    validate(&bot.name, &bot.url, &bot.secret_key).map(|_| ())
                };
                match checked {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            id = %bot.id,
                            error = %e,
                            "invalid bot in record, dropping entry"
                        );
                        false
                    }
                }
            })
            .collect();
        tracing::debug!(count = bots.len(), "registry hydrated");
        Self {
            store,
            bots,
            selected_bot_id: None,
        }
    }

    pub fn bots(&self) -> &[BotConfig] {
        &self.bots
    }

    pub fn selected_bot_id(&self) -> Option<&str> {
        self.selected_bot_id.as_deref()
    }

    /// The selected entry, if the selection points at a known bot.
    pub fn selected_bot(&self) -> Option<&BotConfig> {
        let id = self.selected_bot_id.as_deref()?;
        self.bots.iter().find(|b| b.id == id)
    }

    /// Looks a bot up by exact id, falling back to exact name.
    pub fn find(&self, id_or_name: &str) -> Option<&BotConfig> {
        self.bots
            .iter()
            .find(|b| b.id == id_or_name)
            .or_else(|| self.bots.iter().find(|b| b.name == id_or_name))
    }

    pub fn add_bot(
        &mut self,
        name: &str,
        url: &str,
        secret_key: &str,
    ) -> Result<&BotConfig, RegistryError> {
        let (name, url, secret_key) = validate(name, url, secret_key)?;
        let bot = BotConfig {
            id: self.fresh_id(),
            name,
            url,
            secret_key,
        };

        let mut bots = self.bots.clone();
        bots.push(bot);
        self.commit(bots)?;

        let added = self.bots.len() - 1;
        if self.selected_bot_id.is_none() {
            self.selected_bot_id = Some(self.bots[added].id.clone());
        }
        let bot = &self.bots[added];
        tracing::info!(id = %bot.id, name = %bot.name, "bot added");
        Ok(bot)
    }

    /// Returns whether an entry was removed. Unknown ids are a no-op.
    pub fn remove_bot(&mut self, id: &str) -> Result<bool, RegistryError> {
        if !self.bots.iter().any(|b| b.id == id) {
            return Ok(false);
        }

        let bots: Vec<BotConfig> = self.bots.iter().filter(|b| b.id != id).cloned().collect();
        self.commit(bots)?;

        if self.selected_bot_id.as_deref() == Some(id) {
            self.selected_bot_id = self.bots.first().map(|b| b.id.clone());
        }
        tracing::info!(id, "bot removed");
        Ok(true)
    }

    /// Sets the selection without checking that `id` is registered.
    pub fn select_bot(&mut self, id: &str) {
        self.selected_bot_id = Some(id.to_string());
    }

    /// Replaces the entry with the same id. Returns whether one was found.
    pub fn update_bot(&mut self, config: BotConfig) -> Result<bool, RegistryError> {
        let Some(index) = self.bots.iter().position(|b| b.id == config.id) else {
            return Ok(false);
        };

        let (name, url, secret_key) = validate(&config.name, &config.url, &config.secret_key)?;
        let mut bots = self.bots.clone();
        bots[index] = BotConfig {
            id: config.id,
            name,
            url,
            secret_key,
        };
        self.commit(bots)?;

        tracing::info!(id = %self.bots[index].id, "bot updated");
        Ok(true)
    }

    fn commit(&mut self, bots: Vec<BotConfig>) -> Result<(), RegistryError> {
        self.store.save_bots(&bots).map_err(RegistryError::Storage)?;
        self.bots = bots;
        Ok(())
    }

    fn fresh_id(&self) -> String {
        loop {
            let id: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if !self.bots.iter().any(|b| b.id == id) {
                return id;
            }
        }
    }
}

/// Trims all three fields and checks them. Returns the trimmed values.
fn validate(
    name: &str,
    url: &str,
    secret_key: &str,
) -> Result<(String, String, String), ValidationError> {
    let name = name.trim();
    let url = url.trim();
    let secret_key = secret_key.trim();

    if name.is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if url.is_empty() {
        return Err(ValidationError::MissingField("url"));
    }
    if secret_key.is_empty() {
        return Err(ValidationError::MissingField("secret key"));
    }

    // "localhost:8080" parses with scheme "localhost"; reject such non-base URLs.
    match Url::parse(url) {
        Ok(parsed) if !parsed.cannot_be_a_base() => {}
        _ => return Err(ValidationError::InvalidUrl(url.to_string())),
    }

    Ok((name.to_string(), url.to_string(), secret_key.to_string()))
}
