//! Stemdrop CLI - operator tool for packaged songs and one-time links

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stemdrop_types::Settings;
use tracing_subscriber::EnvFilter;

/// Stemdrop - separated stems behind one-time download links
#[derive(Parser)]
#[command(name = "stemdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for Stemdrop
    #[arg(long, env = "STEMDROP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL used in printed download links
    #[arg(long, env = "STEMDROP_PUBLIC_URL")]
    public_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

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
    /// Zip the stems of a separated song
    Package {
        /// Model the song was separated with
        model: String,

        /// Song name (directory under separated/<model>)
        song: String,

        /// Also issue a one-time download link
        #[arg(short, long)]
        issue: bool,
    },

    /// Issue a one-time download link for an existing archive
    Issue {
        /// Path to the archive
        archive: PathBuf,
    },

    /// List ledger records
    List {
        /// Only show links that have not been used yet
        #[arg(short, long)]
        pending: bool,
    },

    /// Show one ledger record
    Info {
        /// Download token
        token: String,
    },

    /// List songs available for separation
    Songs,

    /// List separated songs
    Separated {
        /// Model to list (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "stemdrop", &mut std::io::stdout());
        return Ok(());
    }

    let mut settings = match cli.data_dir {
        Some(dir) => Settings::from_data_dir(dir),
        None => Settings::default(),
    };
    if let Some(url) = cli.public_url {
        settings.public_url = url;
    }

    let core = stemdrop_core::Stemdrop::new(settings).await?;

    match cli.command {
        Commands::Package { model, song, issue } => {
            commands::package(&core, &model, &song, issue, cli.output).await?
        }

        Commands::Issue { archive } => commands::issue(&core, &archive, cli.output).await?,

        Commands::List { pending } => commands::list_records(&core, pending, cli.output).await?,

        Commands::Info { token } => commands::show_info(&core, &token, cli.output).await?,

        Commands::Songs => commands::list_songs(&core, cli.output).await?,

        Commands::Separated { model } => {
            commands::list_separated(&core, model, cli.output).await?
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}
