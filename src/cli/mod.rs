use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::DailySession;
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::notify::NotificationGate;
use crate::state::StateStore;
use crate::storage;

pub mod commands;

use self::commands::{DateArgs, OpenArgs, ResetArgs, SettingsArgs, WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "dailymsg",
    version,
    about = "One message a day, unlocked at your chosen time"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over DAILYMSG_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DAILYMSG_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show today's message, the countdown and recent favorites (default)
    Today,
    /// Open today's message, or a past message by date
    Open(OpenArgs),
    /// Display a released message again without marking it opened
    Show(DateArgs),
    /// Print the last message shown
    Last,
    /// List past messages that were never opened
    Missed,
    /// List every opened message
    Discovered,
    /// List favorite messages
    Favorites,
    /// Add or remove a message from favorites
    Favorite(DateArgs),
    /// Show or change the notification time
    Settings(SettingsArgs),
    /// Keep checking and announce each new message as it unlocks
    Watch(WatchArgs),
    /// Erase opened messages, favorites and notification history
    Reset(ResetArgs),
    /// Print the raw saved state
    Dump,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;
    let catalog = Arc::new(load_catalog(&config)?);
    let state = StateStore::new(Arc::new(storage), config.notifications.default_time);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let open_session = || {
        DailySession::new(
            catalog.clone(),
            state.clone(),
            clock.clone(),
            config.home.clone(),
        )
        .context("loading saved state")
    };
    match cli.command.unwrap_or(Commands::Today) {
        Commands::Today => commands::today(&open_session()?),
        Commands::Open(args) => commands::open(&mut open_session()?, args),
        Commands::Show(args) => commands::show(&mut open_session()?, args),
        Commands::Last => commands::last(&open_session()?),
        Commands::Missed => commands::missed(&open_session()?),
        Commands::Discovered => commands::discovered(&open_session()?),
        Commands::Favorites => commands::favorites(&open_session()?),
        Commands::Favorite(args) => commands::favorite(&mut open_session()?, args),
        Commands::Settings(args) => commands::settings(&mut open_session()?, args),
        Commands::Reset(args) => commands::reset(&mut open_session()?, args),
        Commands::Watch(args) => {
            let gate = NotificationGate::new(catalog.clone(), state.clone(), clock.clone());
            commands::watch(&config, gate, args)
        }
        Commands::Dump => commands::dump(&state),
    }
}

fn load_catalog(config: &AppConfig) -> Result<Catalog> {
    match &config.catalog.path {
        Some(path) => Catalog::from_path(path)
            .with_context(|| format!("loading catalog {}", path.display())),
        None => Catalog::embedded().context("loading built-in catalog"),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(env_filter)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
