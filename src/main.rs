use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;
mod fetcher;
mod metrics;
mod registry;
mod storage;

#[derive(Parser)]
#[command(name = "botdash", about = "Metrics dashboard for remote bots")]
struct Cli {
    /// Log fetch activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered bots in the order they were added
    List,

    /// Register a bot by name, base URL and secret key
    Add {
        /// Display name
        name: String,
        /// Base URL, e.g. https://bot.example.com
        url: String,
        /// Admin secret key (sent as the `key` query parameter)
        secret_key: String,
    },

    /// Forget a bot
    Remove {
        /// Bot id or name
        bot: String,
    },

    /// Change a bot's name, URL or secret key
    Update {
        /// Bot id or name
        bot: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        key: Option<String>,
    },

    /// Fetch metrics once and print the dashboard
    Fetch {
        /// Bot id or name
        bot: String,
        /// Print the raw metrics JSON instead
        #[arg(long)]
        json: bool,
    },

    /// Poll a bot's metrics and redraw on every change
    Watch {
        /// Bot id or name
        bot: String,
        /// Poll interval in seconds (default from config.toml, 30)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Show the settings file, writing defaults if it is missing
    Config,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "botdash=debug" } else { "botdash=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::List => cli::commands::cmd_list(),
        Commands::Add {
            name,
            url,
            secret_key,
        } => cli::commands::cmd_add(name, url, secret_key),
        Commands::Remove { bot } => cli::commands::cmd_remove(bot),
        Commands::Update {
            bot,
            name,
            url,
            key,
        } => cli::commands::cmd_update(bot, name.as_deref(), url.as_deref(), key.as_deref()),
        Commands::Fetch { bot, json } => cli::commands::cmd_fetch(bot, *json).await,
        Commands::Watch { bot, interval } => cli::commands::cmd_watch(bot, *interval).await,
        Commands::Config => cli::commands::cmd_config(),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
