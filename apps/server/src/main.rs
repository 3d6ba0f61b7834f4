//! Stemdrop server binary

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use stemdrop_core::Stemdrop;
use stemdrop_server::AppState;
use stemdrop_types::{Device, Settings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Stemdrop - music source separation with one-time download links
#[derive(Parser)]
#[command(name = "stemdrop-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory holding songs, separated stems, downloads and the ledger
    #[arg(long, env = "STEMDROP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "STEMDROP_BIND", default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// Base URL used in issued download links
    #[arg(long, env = "STEMDROP_PUBLIC_URL")]
    public_url: Option<String>,

    /// Default separation model
    #[arg(long, env = "STEMDROP_MODEL", default_value = "demucs")]
    model: String,

    /// Default compute device (cpu, cuda, cuda:N)
    #[arg(long, env = "STEMDROP_DEVICE", default_value = "cpu")]
    device: Device,

    /// Default number of random shifts
    #[arg(long, env = "STEMDROP_SHIFTS", default_value_t = 0)]
    shifts: u32,

    /// Process whole tracks at once instead of in chunks
    #[arg(long)]
    no_split: bool,

    /// Interpreter that runs the demucs module
    #[arg(long, env = "STEMDROP_DEMUCS_PROGRAM")]
    demucs_program: Option<String>,

    /// yt-dlp executable
    #[arg(long, env = "STEMDROP_YTDLP_PROGRAM")]
    ytdlp_program: Option<String>,
}

impl Args {
    fn into_settings(self) -> Settings {
        let mut settings = match self.data_dir {
            Some(dir) => Settings::from_data_dir(dir),
            None => Settings::default(),
        };

        settings.public_url = self
            .public_url
            .unwrap_or_else(|| format!("http://{}", self.bind));
        settings.default_model = self.model.clone();
        settings.separation.model = self.model;
        settings.separation.device = self.device;
        settings.separation.shifts = self.shifts;
        settings.separation.split = !self.no_split;
        if let Some(program) = self.demucs_program {
            settings.demucs_program = program;
        }
        if let Some(program) = self.ytdlp_program {
            settings.ytdlp_program = program;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let bind = args.bind;
    let settings = args.into_settings();

    let core = Stemdrop::new(settings)
        .await
        .context("failed to initialize Stemdrop")?;
    tracing::info!(
        data = %core.settings().database_path.display(),
        "Stemdrop initialized"
    );

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    stemdrop_server::serve(listener, AppState::new(core), async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    })
    .await?;

    Ok(())
}
