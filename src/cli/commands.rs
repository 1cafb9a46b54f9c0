use anyhow::{Context, Result};
use tokio::sync::mpsc;

use crate::fetcher::{FetchStatus, MetricsFetcher};
use crate::metrics::DashboardSummary;
use crate::registry::BotRegistry;
use crate::storage::{BotConfig, BotStore, Settings};

use super::render;

fn open_registry() -> Result<(BotRegistry, Settings)> {
    let store = BotStore::new()?;
    let settings = store.load_settings()?;
    Ok((BotRegistry::hydrate(store), settings))
}

/// Resolves `bot` (id or name) and makes it the selected bot.
fn select(registry: &mut BotRegistry, bot: &str) -> Result<BotConfig> {
    let id = registry
        .find(bot)
        .map(|b| b.id.clone())
        .with_context(|| format!("No bot with id or name '{}'. Run `botdash list`.", bot))?;
    registry.select_bot(&id);
    registry
        .selected_bot()
        .cloned()
        .context("Selected bot disappeared")
}

pub fn cmd_list() -> Result<()> {
    let (registry, _) = open_registry()?;

    if registry.bots().is_empty() {
        eprintln!("No bots configured. Run `botdash add <name> <url> <secret-key>` to get started.");
        return Ok(());
    }

    for bot in registry.bots() {
        println!("{}  {}  {}", bot.id, bot.name, bot.url);
    }
    Ok(())
}

pub fn cmd_add(name: &str, url: &str, secret_key: &str) -> Result<()> {
    let (mut registry, _) = open_registry()?;
    let bot = registry.add_bot(name, url, secret_key)?;

    eprintln!("Bot saved: {} ({})", bot.name, bot.url);
    println!("{}", bot.id);
    Ok(())
}

pub fn cmd_remove(bot: &str) -> Result<()> {
    let (mut registry, _) = open_registry()?;
    let Some(found) = registry.find(bot).cloned() else {
        eprintln!("No bot with id or name '{}', nothing removed.", bot);
        return Ok(());
    };

    registry.remove_bot(&found.id)?;
    eprintln!("Removed {} ({}).", found.name, found.id);
    Ok(())
}

pub fn cmd_update(
    bot: &str,
    name: Option<&str>,
    url: Option<&str>,
    secret_key: Option<&str>,
) -> Result<()> {
    let (mut registry, _) = open_registry()?;
    let mut config = registry
        .find(bot)
        .cloned()
        .with_context(|| format!("No bot with id or name '{}'", bot))?;

    if name.is_none() && url.is_none() && secret_key.is_none() {
        anyhow::bail!("Nothing to update; pass --name, --url or --key");
    }
    if let Some(name) = name {
        config.name = name.to_string();
    }
    if let Some(url) = url {
        config.url = url.to_string();
    }
    if let Some(key) = secret_key {
        config.secret_key = key.to_string();
    }

    let id = config.id.clone();
    registry.update_bot(config)?;
    eprintln!("Updated {}.", id);
    Ok(())
}

pub fn cmd_config() -> Result<()> {
    let store = BotStore::new()?;
    let settings = store.load_settings()?;
    if !store.config_path().exists() {
        store.save_settings(&settings)?;
        eprintln!("Wrote default settings.");
    }

    eprintln!("Config directory: {}", store.config_dir().display());
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

/// One fetch for `bot`, printed as a dashboard or as raw JSON.
pub async fn cmd_fetch(bot: &str, json: bool) -> Result<()> {
    let (mut registry, settings) = open_registry()?;
    let bot = select(&mut registry, bot)?;

    let mut fetcher = MetricsFetcher::new(&settings)?;
    let mut rx = fetcher.subscribe();
    fetcher.start(&bot.url, &bot.secret_key);

    rx.wait_for(|s| matches!(s.status, FetchStatus::Success | FetchStatus::Error))
        .await
        .context("Fetcher stopped unexpectedly")?;
    let state = fetcher.state();
    fetcher.stop();

    match (state.data, state.error) {
        (Some(snapshot), _) if json => {
            println!("{}", serde_json::to_string_pretty(snapshot.raw())?);
        }
        (Some(snapshot), _) => {
            let summary = DashboardSummary::from_snapshot(
                &snapshot,
                settings.usage_window_days,
                settings.payments_window_days,
            );
            render::print_summary(&bot.name, &summary);
        }
        (None, Some(e)) => {
            anyhow::bail!("Could not load metrics for '{}' [{}]: {}", bot.name, e.kind(), e)
        }
        (None, None) => anyhow::bail!("No metrics received for '{}'", bot.name),
    }
    Ok(())
}

/// Polls `bot` until quit, re-rendering whenever the outcome changes.
pub async fn cmd_watch(bot: &str, interval_secs: Option<u64>) -> Result<()> {
    let (mut registry, mut settings) = open_registry()?;
    if let Some(secs) = interval_secs {
        settings.poll_interval_secs = secs;
    }
    let bot = select(&mut registry, bot)?;

    let mut fetcher = MetricsFetcher::new(&settings)?;
    let mut rx = fetcher.subscribe();
    let mut commands = spawn_stdin_reader();

    eprintln!(
        "Watching {} every {}s. Enter `r` to refresh now, `q` to quit.",
        bot.name,
        settings.poll_interval_secs.max(1)
    );
    fetcher.start(&bot.url, &bot.secret_key);

    let mut last_rendered = None;
    let mut stdin_open = true;
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                let key = (state.status, state.last_success, state.error.clone());
                if last_rendered.as_ref() != Some(&key) {
                    render::print_state(&bot.name, &state, &settings);
                    last_rendered = Some(key);
                }
            }
            line = commands.recv(), if stdin_open => match line.as_deref().map(str::trim) {
                Some("r") => {
                    eprintln!("Refreshing...");
                    fetcher.refetch();
                }
                Some("q") => break,
                Some("") => {}
                Some(other) => eprintln!("Unknown command '{}'. Use `r` or `q`.", other),
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    fetcher.stop();
    Ok(())
}

// A plain thread so a pending read never holds up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
