//! Source separation
//!
//! The model itself runs out of process. [`StemSeparator`] is the seam;
//! [`DemucsCommand`] drives the demucs CLI.

use crate::error::{Result, StemdropError};
use crate::library::path_component;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use stemdrop_types::{SeparatedSong, SeparationOptions};

/// Stem separation backend
pub trait StemSeparator: Send + Sync {
    /// Source names in the order the model emits them
    fn sources(&self) -> &[String];

    /// Separate `track`, writing `<out_root>/<model>/<track stem>/<source>.wav`.
    ///
    /// Returns one path per source, in [`sources`](Self::sources) order.
    fn separate(
        &self,
        track: &Path,
        out_root: &Path,
        options: &SeparationOptions,
    ) -> Result<Vec<PathBuf>>;

    /// Name of this backend (for logging)
    fn name(&self) -> &'static str;
}

/// Runs `python3 -m demucs` as a child process
#[derive(Clone, Debug)]
pub struct DemucsCommand {
    program: String,
    sources: Vec<String>,
}

impl DemucsCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            sources: ["drums", "bass", "other", "vocals"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn command(&self, track: &Path, out_root: &Path, options: &SeparationOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-m", "demucs"])
            .arg("-n")
            .arg(&options.model)
            .arg("-d")
            .arg(options.device.to_string())
            .arg("--shifts")
            .arg(options.shifts.to_string());
        if !options.split {
            cmd.arg("--no-split");
        }
        cmd.arg("-o").arg(out_root).arg(track);
        cmd
    }
}

impl StemSeparator for DemucsCommand {
    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn separate(
        &self,
        track: &Path,
        out_root: &Path,
        options: &SeparationOptions,
    ) -> Result<Vec<PathBuf>> {
        let output = self
            .command(track, out_root, options)
            .output()
            .map_err(|e| StemdropError::Separation(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StemdropError::Separation(format!(
                "demucs exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        let song_dir = out_root.join(&options.model).join(song_name(track)?);
        self.sources
            .iter()
            .map(|source| {
                let path = song_dir.join(format!("{}.wav", source));
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(StemdropError::Separation(format!(
                        "model did not produce {}",
                        path.display()
                    )))
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "demucs"
    }
}

/// Drives a separator over tracks from the song library
#[derive(Clone)]
pub struct Separator {
    backend: Arc<dyn StemSeparator>,
    separated_dir: PathBuf,
}

impl Separator {
    pub fn new(backend: Arc<dyn StemSeparator>, separated_dir: PathBuf) -> Self {
        Self {
            backend,
            separated_dir,
        }
    }

    /// Separate one track. Runs to completion inside the caller's request.
    pub async fn split_song(
        &self,
        track: &Path,
        options: &SeparationOptions,
    ) -> Result<SeparatedSong> {
        if !tokio::fs::try_exists(track).await.unwrap_or(false) {
            return Err(StemdropError::SourceNotFound(track.to_path_buf()));
        }
        path_component(&options.model)?;
        let song = song_name(track)?.to_string();

        tokio::fs::create_dir_all(&self.separated_dir).await?;

        tracing::info!(
            backend = self.backend.name(),
            model = %options.model,
            device = %options.device,
            shifts = options.shifts,
            split = options.split,
            song = %song,
            "Running separation"
        );

        let backend = self.backend.clone();
        let track = track.to_path_buf();
        let out_root = self.separated_dir.clone();
        let run_options = options.clone();
        let stems = tokio::task::spawn_blocking(move || {
            backend.separate(&track, &out_root, &run_options)
        })
        .await
        .map_err(|e| StemdropError::Separation(e.to_string()))??;

        let expected = self.backend.sources().len();
        if stems.len() != expected {
            return Err(StemdropError::Separation(format!(
                "expected {} stems, model returned {}",
                expected,
                stems.len()
            )));
        }

        tracing::info!(song = %song, stems = stems.len(), "Separation completed");

        Ok(SeparatedSong {
            model: options.model.clone(),
            song,
            stems,
        })
    }
}

/// Song name of a track: its file name without extension
pub fn song_name(track: &Path) -> Result<&str> {
    track
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StemdropError::InvalidInput(format!("no song name in {}", track.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemdrop_types::Device;

    struct FakeSeparator {
        sources: Vec<String>,
        emit: usize,
    }

    impl StemSeparator for FakeSeparator {
        fn sources(&self) -> &[String] {
            &self.sources
        }

        fn separate(
            &self,
            track: &Path,
            out_root: &Path,
            options: &SeparationOptions,
        ) -> Result<Vec<PathBuf>> {
            let dir = out_root.join(&options.model).join(song_name(track)?);
            std::fs::create_dir_all(&dir)?;
            self.sources
                .iter()
                .take(self.emit)
                .map(|s| {
                    let path = dir.join(format!("{}.wav", s));
                    std::fs::write(&path, b"RIFF")?;
                    Ok(path)
                })
                .collect()
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn four_stems(emit: usize) -> Arc<dyn StemSeparator> {
        Arc::new(FakeSeparator {
            sources: ["drums", "bass", "other", "vocals"]
                .into_iter()
                .map(String::from)
                .collect(),
            emit,
        })
    }

    #[tokio::test]
    async fn test_split_song() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("song1.mp3");
        std::fs::write(&track, b"ID3").unwrap();
        let separator = Separator::new(four_stems(4), dir.path().join("separated"));

        let result = separator
            .split_song(&track, &SeparationOptions::default())
            .await
            .unwrap();

        assert_eq!(result.song, "song1");
        assert_eq!(result.model, "demucs");
        assert_eq!(result.stems.len(), 4);
        assert!(dir.path().join("separated/demucs/song1/vocals.wav").is_file());
    }

    #[tokio::test]
    async fn test_split_missing_track() {
        let dir = tempfile::tempdir().unwrap();
        let separator = Separator::new(four_stems(4), dir.path().join("separated"));

        let err = separator
            .split_song(&dir.path().join("nope.mp3"), &SeparationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StemdropError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_split_short_output() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("song1.mp3");
        std::fs::write(&track, b"ID3").unwrap();
        let separator = Separator::new(four_stems(3), dir.path().join("separated"));

        let err = separator
            .split_song(&track, &SeparationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StemdropError::Separation(_)));
    }

    #[test]
    fn test_demucs_arguments() {
        let demucs = DemucsCommand::new("python3");
        let options = SeparationOptions {
            model: "htdemucs".to_string(),
            device: Device::Cuda(1),
            shifts: 10,
            split: false,
        };
        let cmd = demucs.command(Path::new("songs/a.mp3"), Path::new("separated"), &options);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();

        assert_eq!(cmd.get_program(), "python3");
        assert_eq!(
            args,
            vec![
                "-m", "demucs", "-n", "htdemucs", "-d", "cuda:1", "--shifts", "10",
                "--no-split", "-o", "separated", "songs/a.mp3"
            ]
        );
    }

    #[test]
    fn test_demucs_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let demucs = DemucsCommand::new("/nonexistent/python");
        let err = demucs
            .separate(
                &dir.path().join("a.mp3"),
                dir.path(),
                &SeparationOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StemdropError::Separation(_)));
    }
}
