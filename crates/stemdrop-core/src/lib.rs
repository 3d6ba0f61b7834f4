//! Stemdrop Core - separation results delivered through one-time links
//!
//! This crate owns the download ledger, packaging of separated stems,
//! token issuance and single-use dispatch, plus the seams to the external
//! separation model and audio fetcher.

mod dispatch;
mod error;
mod fetch;
mod issuer;
mod ledger;
mod library;
mod packager;
mod separation;

pub use dispatch::*;
pub use error::*;
pub use fetch::*;
pub use issuer::*;
pub use ledger::Ledger;
pub use library::*;
pub use packager::*;
pub use separation::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemdrop_types::{archive_file_name, IssuedDownload, SeparatedSong, SeparationOptions, Settings};

/// The main Stemdrop instance. Cheap to clone; clones share the ledger.
#[derive(Clone)]
pub struct Stemdrop {
    settings: Arc<Settings>,
    ledger: Ledger,
    library: Library,
    packager: Packager,
    issuer: Issuer,
    dispatcher: Dispatcher,
    separator: Separator,
    fetcher: Fetcher,
}

impl Stemdrop {
    /// Open the ledger and wire the demucs and yt-dlp backends
    pub async fn new(settings: Settings) -> Result<Self> {
        let separator = Arc::new(DemucsCommand::new(settings.demucs_program.clone()));
        let fetcher = Arc::new(YtDlpCommand::new(settings.ytdlp_program.clone()));
        Self::with_backends(settings, separator, fetcher).await
    }

    pub async fn with_backends(
        settings: Settings,
        separator: Arc<dyn StemSeparator>,
        fetcher: Arc<dyn AudioFetcher>,
    ) -> Result<Self> {
        let ledger = Ledger::open(&settings.database_path).await?;

        Ok(Self {
            library: Library::new(settings.songs_dir.clone(), settings.separated_dir.clone()),
            packager: Packager::new(settings.separated_dir.clone(), settings.downloads_dir.clone()),
            issuer: Issuer::new(ledger.clone()),
            dispatcher: Dispatcher::new(ledger.clone()),
            separator: Separator::new(separator, settings.separated_dir.clone()),
            fetcher: Fetcher::new(fetcher, settings.songs_dir.clone()),
            settings: Arc::new(settings),
            ledger,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    // ========================================================================
    // Separation
    // ========================================================================

    /// Separate a song from the library
    pub async fn split_song(&self, song: &str, options: &SeparationOptions) -> Result<SeparatedSong> {
        let track = self.library.song_path(song)?;
        self.separator.split_song(&track, options).await
    }

    /// Download the audio of a video into the library
    pub async fn music_from_video(&self, url: &str) -> Result<PathBuf> {
        self.fetcher.music_from_video(url).await
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Zip the stems of a separated song
    pub async fn package(&self, model: &str, song: &str) -> Result<PathBuf> {
        self.packager.package(model, song).await
    }

    /// Issue a one-time link for an existing archive
    pub async fn issue(&self, archive: &Path) -> Result<IssuedDownload> {
        let token = self.issuer.issue(archive).await?;
        Ok(IssuedDownload {
            url: self.settings.download_url(&token),
            file_name: archive_file_name(archive),
            token,
        })
    }

    /// Package a separated song and issue a link for it.
    ///
    /// An archive that could not be registered is removed again.
    pub async fn prepare_download(&self, model: &str, song: &str) -> Result<IssuedDownload> {
        let archive = self.package(model, song).await?;

        match self.issue(&archive).await {
            Ok(issued) => Ok(issued),
            Err(e) => {
                if let Err(cleanup) = remove_archive(&archive) {
                    tracing::warn!("{}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Claim a token for delivery
    pub async fn dispatch(&self, token: &str) -> Result<Dispatch> {
        self.dispatcher.dispatch(token).await
    }
}
