//! Song library: source tracks and separated stems on disk

use crate::error::{Result, StemdropError};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Read-only view over the songs and separated directories
#[derive(Clone, Debug)]
pub struct Library {
    songs_dir: PathBuf,
    separated_dir: PathBuf,
}

impl Library {
    pub fn new(songs_dir: PathBuf, separated_dir: PathBuf) -> Self {
        Self {
            songs_dir,
            separated_dir,
        }
    }

    /// Resolve a song name to a file inside the songs directory
    pub fn song_path(&self, song: &str) -> Result<PathBuf> {
        Ok(self.songs_dir.join(path_component(song)?))
    }

    /// Source tracks available for separation
    pub async fn list_songs(&self) -> Result<Vec<String>> {
        list_entries(&self.songs_dir, EntryKind::File).await
    }

    /// Songs already separated by a model
    pub async fn list_separated(&self, model: &str) -> Result<Vec<String>> {
        let dir = self.separated_dir.join(path_component(model)?);
        list_entries(&dir, EntryKind::Dir).await
    }

    /// Stem files produced for one song
    pub async fn separated_stems(&self, model: &str, song: &str) -> Result<Vec<PathBuf>> {
        let dir = self
            .separated_dir
            .join(path_component(model)?)
            .join(path_component(song)?);

        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(StemdropError::SourceNotFound(dir));
        }

        Ok(list_entries(&dir, EntryKind::File)
            .await?
            .into_iter()
            .map(|name| dir.join(name))
            .collect())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
}

/// Sorted entry names of one kind; a missing directory is empty
async fn list_entries(dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
    let mut names = Vec::new();

    if !fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(names);
    }

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let matches = match kind {
            EntryKind::File => file_type.is_file(),
            EntryKind::Dir => file_type.is_dir(),
        };
        let name = entry.file_name().to_string_lossy().to_string();
        if matches && !name.starts_with('.') {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// Reject names that would escape their parent directory
pub(crate) fn path_component(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(StemdropError::InvalidInput(format!(
            "'{}' is not a plain file or directory name",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_component() {
        assert!(path_component("song one").is_ok());
        assert!(path_component("song.mp3").is_ok());
        assert!(path_component("").is_err());
        assert!(path_component("..").is_err());
        assert!(path_component("a/b").is_err());
        assert!(path_component("/etc").is_err());
    }

    #[tokio::test]
    async fn test_listing() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(dir.path().join("songs"), dir.path().join("separated"));

        assert!(library.list_songs().await.unwrap().is_empty());
        assert!(library.list_separated("demucs").await.unwrap().is_empty());

        std::fs::create_dir_all(dir.path().join("songs")).unwrap();
        std::fs::write(dir.path().join("songs/b.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("songs/a.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("songs/.partial"), b"").unwrap();
        assert_eq!(library.list_songs().await.unwrap(), vec!["a.mp3", "b.mp3"]);

        let song_dir = dir.path().join("separated/demucs/a");
        std::fs::create_dir_all(&song_dir).unwrap();
        std::fs::write(song_dir.join("vocals.wav"), b"").unwrap();
        std::fs::write(song_dir.join("bass.wav"), b"").unwrap();
        assert_eq!(library.list_separated("demucs").await.unwrap(), vec!["a"]);
        assert_eq!(
            library.separated_stems("demucs", "a").await.unwrap(),
            vec![song_dir.join("bass.wav"), song_dir.join("vocals.wav")]
        );
        assert!(matches!(
            library.separated_stems("demucs", "nope").await,
            Err(StemdropError::SourceNotFound(_))
        ));
        assert!(matches!(
            library.list_separated("../etc").await,
            Err(StemdropError::InvalidInput(_))
        ));
    }
}
