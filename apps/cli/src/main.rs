//! dlstate CLI - drive the lifecycle delegate from the command line
//!
//! Replays scripted engine event streams through the delegate and inspects
//! the records it leaves in the store.

mod commands;
mod output;
mod progress;
mod replay;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// dlstate - download lifecycle delegate
#[derive(Parser)]
#[command(name = "dlstate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory holding the database and settings
    #[arg(long, env = "DLSTATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Override the stored retry-on-network-gain setting
    #[arg(long, env = "DLSTATE_RETRY_ON_NETWORK_GAIN")]
    retry_on_network_gain: Option<bool>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a scripted engine event stream through the delegate
    Replay {
        /// Path to the JSON script
        script: PathBuf,
    },

    /// List stored downloads
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show a stored download
    #[command(alias = "show")]
    Info {
        /// Download ID
        id: String,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("dlstate"))
            .unwrap_or_else(|| PathBuf::from(".dlstate"))
    });

    match cli.command {
        Commands::Replay { script } => {
            let app = commands::App::open(data_dir, cli.retry_on_network_gain).await?;
            replay::run(&app, &script, cli.output).await?
        }

        Commands::List { status, all } => {
            let app = commands::App::open(data_dir, cli.retry_on_network_gain).await?;
            commands::list_downloads(&app, status, all, cli.output).await?
        }

        Commands::Info { id } => {
            let app = commands::App::open(data_dir, cli.retry_on_network_gain).await?;
            commands::show_info(&app, &id, cli.output).await?
        }

        Commands::Config { action } => {
            commands::config_action(&data_dir, action, cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "dlstate", &mut std::io::stdout());
        }
    }

    Ok(())
}
