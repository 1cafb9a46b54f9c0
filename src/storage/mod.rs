mod store;
mod types;

pub use store::BotStore;
pub use types::{BotConfig, Settings};
