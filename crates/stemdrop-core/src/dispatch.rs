//! One-time download dispatch
//!
//! A token moves through `lookup -> mark_consumed -> open -> stream`. The
//! consumed flag is written before any byte leaves the server, so a token
//! can be lost to a crash but never delivered twice.

use crate::error::{Result, StemdropError};
use crate::issuer::is_well_formed;
use crate::ledger::Ledger;
use crate::packager::package_dir;
use bytes::Bytes;
use futures::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use stemdrop_types::{archive_file_name, Consumption};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Outcome of a download request that did not fault
#[derive(Debug)]
pub enum Dispatch {
    /// Unknown, malformed or already consumed token
    Absent,
    /// Token claimed; the archive is ready to stream
    Ready(Delivery),
}

/// Validates and consumes tokens on behalf of the HTTP layer
#[derive(Clone, Debug)]
pub struct Dispatcher {
    ledger: Ledger,
}

impl Dispatcher {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Claim a token and open its archive.
    ///
    /// Errors are only returned after the ledger confirmed the token, so a
    /// caller can always answer 404 for `Absent` and 500 for `Err`.
    pub async fn dispatch(&self, token: &str) -> Result<Dispatch> {
        if !is_well_formed(token) {
            return Ok(Dispatch::Absent);
        }

        let Some(song_path) = self.ledger.lookup(token).await? else {
            return Ok(Dispatch::Absent);
        };

        match self.ledger.mark_consumed(token).await? {
            Consumption::Claimed => {}
            Consumption::AlreadyConsumed => {
                tracing::debug!("Token consumed by a concurrent request");
                return Ok(Dispatch::Absent);
            }
        }

        let file = match File::open(&song_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StemdropError::ArchiveMissing(song_path));
            }
            Err(e) => return Err(StemdropError::DeliveryFailure(e.to_string())),
        };

        let content_length = file
            .metadata()
            .await
            .map_err(|e| StemdropError::DeliveryFailure(e.to_string()))?
            .len();

        Ok(Dispatch::Ready(Delivery {
            file_name: archive_file_name(&song_path),
            content_length,
            file,
            cleanup: ArchiveCleanup {
                path: song_path,
                armed: true,
            },
        }))
    }
}

/// A claimed archive. Once turned into a stream, the archive is removed when
/// the stream is dropped, whether or not the transfer completed.
#[derive(Debug)]
pub struct Delivery {
    pub file_name: String,
    pub content_length: u64,
    file: File,
    cleanup: ArchiveCleanup,
}

impl Delivery {
    pub fn path(&self) -> &Path {
        &self.cleanup.path
    }

    /// Hand the archive bytes to the transport
    pub fn into_stream(self) -> DeliveryStream {
        DeliveryStream {
            inner: ReaderStream::new(self.file),
            _cleanup: self.cleanup,
        }
    }

    /// Give up on the transfer without deleting the archive
    pub fn retain(mut self) -> PathBuf {
        self.cleanup.armed = false;
        self.cleanup.path.clone()
    }
}

/// Archive bytes; deletes the archive on drop
pub struct DeliveryStream {
    inner: ReaderStream<File>,
    _cleanup: ArchiveCleanup,
}

impl Stream for DeliveryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[derive(Debug)]
struct ArchiveCleanup {
    path: PathBuf,
    armed: bool,
}

impl Drop for ArchiveCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || log_cleanup(remove_archive(&path)));
            }
            Err(_) => log_cleanup(remove_archive(&path)),
        }
    }
}

/// Delete a delivered archive, and its package directory if it had one
pub fn remove_archive(path: &Path) -> Result<()> {
    std::fs::remove_file(path).map_err(|e| cleanup_failure(path, e))?;

    if let Some(dir) = package_dir(path) {
        std::fs::remove_dir(dir).map_err(|e| cleanup_failure(dir, e))?;
    }
    Ok(())
}

fn cleanup_failure(path: &Path, e: io::Error) -> StemdropError {
    StemdropError::CleanupFailure {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn log_cleanup(result: Result<()>) {
    match result {
        Ok(()) => tracing::debug!("Removed delivered archive"),
        Err(e) => tracing::warn!("{}", e),
    }
}
