//! Audio download from video sites

use crate::error::{Result, StemdropError};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use url::Url;

/// Audio fetch backend
pub trait AudioFetcher: Send + Sync {
    /// Download the audio track behind `url` into `songs_dir`
    fn fetch(&self, url: &Url, songs_dir: &Path) -> Result<PathBuf>;

    /// Name of this backend (for logging)
    fn name(&self) -> &'static str;
}

/// Extracts mp3 audio with `yt-dlp`
#[derive(Clone, Debug)]
pub struct YtDlpCommand {
    program: String,
}

impl YtDlpCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, url: &Url, songs_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--no-playlist", "-x", "--audio-format", "mp3"])
            .arg("-P")
            .arg(songs_dir)
            .args(["-o", "%(title)s.%(ext)s"])
            .args(["--print", "after_move:filepath"])
            .arg(url.as_str());
        cmd
    }
}

impl AudioFetcher for YtDlpCommand {
    fn fetch(&self, url: &Url, songs_dir: &Path) -> Result<PathBuf> {
        let output = self
            .command(url, songs_dir)
            .output()
            .map_err(|e| StemdropError::Fetch(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StemdropError::Fetch(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| StemdropError::Fetch("yt-dlp did not report an output file".into()))
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Validates links and stores fetched audio in the song library
#[derive(Clone)]
pub struct Fetcher {
    backend: Arc<dyn AudioFetcher>,
    songs_dir: PathBuf,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn AudioFetcher>, songs_dir: PathBuf) -> Self {
        Self { backend, songs_dir }
    }

    /// Download the audio of a video, returning the local file
    pub async fn music_from_video(&self, url: &str) -> Result<PathBuf> {
        let url = parse_video_url(url)?;
        tokio::fs::create_dir_all(&self.songs_dir).await?;

        tracing::info!(backend = self.backend.name(), url = %url, "Fetching audio");

        let backend = self.backend.clone();
        let songs_dir = self.songs_dir.clone();
        let path = tokio::task::spawn_blocking(move || backend.fetch(&url, &songs_dir))
            .await
            .map_err(|e| StemdropError::Fetch(e.to_string()))??;

        tracing::info!(path = %path.display(), "Audio fetched");
        Ok(path)
    }
}

fn parse_video_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|_| StemdropError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(StemdropError::InvalidUrl(url.to_string())),
    }
}
