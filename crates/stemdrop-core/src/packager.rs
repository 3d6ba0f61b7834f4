//! Zip packaging of separated stems
//!
//! Every package gets its own directory under the downloads directory, so two
//! links for the same song never share a file. Archives are written to a
//! temporary file inside that directory and persisted only once complete.

use crate::error::{Result, StemdropError};
use crate::library::path_component;
use rand::Rng;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const PACKAGE_DIR_PREFIX: &str = "pkg-";
const PACKAGE_ID_BYTES: usize = 8;

/// Builds `<downloads_dir>/pkg-<id>/<song>.zip` from `<separated_dir>/<model>/<song>/`
#[derive(Clone, Debug)]
pub struct Packager {
    separated_dir: PathBuf,
    downloads_dir: PathBuf,
}

impl Packager {
    pub fn new(separated_dir: PathBuf, downloads_dir: PathBuf) -> Self {
        Self {
            separated_dir,
            downloads_dir,
        }
    }

    /// Package a separated song, returning the path of the finished archive
    pub async fn package(&self, model: &str, song: &str) -> Result<PathBuf> {
        let packager = self.clone();
        let model = model.to_string();
        let song = song.to_string();

        tokio::task::spawn_blocking(move || packager.package_blocking(&model, &song))
            .await
            .map_err(|e| StemdropError::PackagingFailure(e.to_string()))?
    }

    pub fn package_blocking(&self, model: &str, song: &str) -> Result<PathBuf> {
        let source = self
            .separated_dir
            .join(path_component(model)?)
            .join(path_component(song)?);

        if !source.is_dir() {
            return Err(StemdropError::SourceNotFound(source));
        }

        fs::create_dir_all(&self.downloads_dir).map_err(packaging)?;

        let package_dir = self.downloads_dir.join(package_dir_name());
        fs::create_dir(&package_dir).map_err(packaging)?;

        match build_archive(&source, song, &package_dir) {
            Ok((archive, count)) => {
                tracing::info!(
                    archive = %archive.display(),
                    entries = count,
                    "Packaged separated tracks"
                );
                Ok(archive)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&package_dir) {
                    tracing::warn!(
                        path = %package_dir.display(),
                        "Failed to remove incomplete package: {}",
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }
}

fn package_dir_name() -> String {
    let mut id = [0u8; PACKAGE_ID_BYTES];
    rand::rng().fill(&mut id);
    format!("{}{}", PACKAGE_DIR_PREFIX, hex::encode(id))
}

/// The per-package directory holding `archive`, if it was made by a [`Packager`]
pub(crate) fn package_dir(archive: &Path) -> Option<&Path> {
    let dir = archive.parent()?;
    let id = dir.file_name()?.to_str()?.strip_prefix(PACKAGE_DIR_PREFIX)?;
    let generated =
        id.len() == PACKAGE_ID_BYTES * 2 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    generated.then_some(dir)
}

/// Write `<package_dir>/<song>.zip`; returns its path and entry count
fn build_archive(source: &Path, song: &str, package_dir: &Path) -> Result<(PathBuf, usize)> {
    let archive = package_dir.join(format!("{}.zip", song));
    let partial = tempfile::Builder::new()
        .prefix(".")
        .suffix(".zip.partial")
        .tempfile_in(package_dir)
        .map_err(packaging)?;

    let count = write_archive(source, song, partial.as_file())?;
    partial.persist(&archive).map_err(packaging)?;

    Ok((archive, count))
}

/// Write every regular file in `source` as `<prefix>/<name>`; returns the entry count
fn write_archive(source: &Path, prefix: &str, target: &File) -> Result<usize> {
    let mut files = Vec::new();
    for entry in fs::read_dir(source).map_err(packaging)? {
        let entry = entry.map_err(packaging)?;
        if entry.file_type().map_err(packaging)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(BufWriter::new(target));

    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        writer
            .start_file(format!("{}/{}", prefix, name), options)
            .map_err(packaging)?;
        let mut input = BufReader::new(File::open(path).map_err(packaging)?);
        io::copy(&mut input, &mut writer).map_err(packaging)?;
    }

    let buffered = writer.finish().map_err(packaging)?;
    let file = buffered
        .into_inner()
        .map_err(|e| StemdropError::PackagingFailure(e.to_string()))?;
    file.sync_all().map_err(packaging)?;

    Ok(files.len())
}

fn packaging(e: impl std::fmt::Display) -> StemdropError {
    StemdropError::PackagingFailure(e.to_string())
}
