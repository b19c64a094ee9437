mod console;
mod simulate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use horo_relay::{config, db::Database, store::KeyValueStore, theme::ThemeProvider};
use horo_types::config::Platform;

#[derive(Parser)]
#[command(name = "horo", version, about = "Horoscope relay: realtime horoscope notifications")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration
    Status,
    /// Show or toggle the app theme
    Theme {
        #[arg(long)]
        toggle: bool,
    },
    /// Drive the relay from a JSON-lines script (stdin by default)
    Simulate {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Override the configured platform
        #[arg(long)]
        platform: Option<Platform>,
        /// How long to let queued events drain before shutting down
        #[arg(long, default_value_t = 100)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("Horoscope relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Platform: {}", cfg.relay.platform);
            println!("Sound: {}", cfg.relay.sound.as_deref().unwrap_or("none"));
            let prefs = cfg.notifications;
            println!(
                "Notifications: {} (daily: {}, weekly: {}, monthly: {})",
                on_off(prefs.enabled),
                on_off(prefs.daily),
                on_off(prefs.weekly),
                on_off(prefs.monthly)
            );
            println!("Config: {}", config::config_path()?.display());
            println!("Database: {}", config::db_path()?.display());
            Ok(())
        }
        Commands::Theme { toggle } => {
            let theme = open_theme()?;
            if toggle {
                theme.toggle().context("Failed to save theme")?;
            }
            println!("Theme: {}", theme.current());
            Ok(())
        }
        Commands::Simulate {
            file,
            platform,
            settle_ms,
        } => {
            let theme = Arc::new(open_theme()?);
            let options = simulate::Options {
                platform: platform.unwrap_or(cfg.relay.platform),
                settle: Duration::from_millis(settle_ms),
            };
            match file {
                Some(path) => {
                    let f = tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    simulate::run(&cfg, theme, options, BufReader::new(f)).await
                }
                None => simulate::run(&cfg, theme, options, BufReader::new(tokio::io::stdin())).await,
            }
        }
    }
}

fn open_theme() -> Result<ThemeProvider> {
    let path = config::db_path()?;
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(db);
    Ok(ThemeProvider::load(store))
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}
