//! Shared types for Stemdrop
//!
//! This crate contains the data structures shared by the core library,
//! the HTTP server and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Download Ledger Types
// ============================================================================

/// One row of the download ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub token: String,
    pub song_path: PathBuf,
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl DownloadRecord {
    /// File name presented to the client, e.g. `song1.zip`
    pub fn file_name(&self) -> String {
        archive_file_name(&self.song_path)
    }
}

/// Result of an attempt to flip a token's consumed flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consumption {
    /// This caller performed the false -> true transition
    Claimed,
    /// The token was already consumed (or never existed)
    AlreadyConsumed,
}

impl Consumption {
    pub fn is_claimed(self) -> bool {
        matches!(self, Consumption::Claimed)
    }
}

/// Returned to clients after an archive has been packaged and registered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedDownload {
    pub token: String,
    pub url: String,
    pub file_name: String,
}

/// Name used for the attachment of an archive path
pub fn archive_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download.zip".to_string())
}

// ============================================================================
// Separation Types
// ============================================================================

/// Compute device handed to the separation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA accelerator by ordinal
    Cuda(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => return Ok(Device::Cpu),
            "cuda" | "gpu" => return Ok(Device::Cuda(0)),
            _ => {}
        }

        let id = s
            .strip_prefix("cuda:")
            .or_else(|| s.strip_prefix("gpu:"))
            .ok_or_else(|| format!("unknown device '{}', expected cpu or cuda[:N]", s))?;

        id.parse::<u32>()
            .map(Device::Cuda)
            .map_err(|_| format!("invalid accelerator id '{}'", id))
    }
}

impl Serialize for Device {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parameters for one separation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparationOptions {
    /// Name of the pretrained model, also the output sub-directory
    pub model: String,
    #[serde(default)]
    pub device: Device,
    /// Random shifts for equivariant stabilization; 0 disables
    #[serde(default)]
    pub shifts: u32,
    /// Process the input in chunks instead of all at once
    #[serde(default = "default_split")]
    pub split: bool,
}

fn default_split() -> bool {
    true
}

impl Default for SeparationOptions {
    fn default() -> Self {
        Self {
            model: "demucs".to_string(),
            device: Device::Cpu,
            shifts: 0,
            split: true,
        }
    }
}

/// Stems produced for one song
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparatedSong {
    pub model: String,
    pub song: String,
    pub stems: Vec<PathBuf>,
}

// ============================================================================
// Settings Types
// ============================================================================

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Source audio files
    pub songs_dir: PathBuf,
    /// `<separated_dir>/<model>/<song>/<source>.wav`
    pub separated_dir: PathBuf,
    /// Packaged archives waiting to be downloaded
    pub downloads_dir: PathBuf,
    pub database_path: PathBuf,
    /// Base URL used when building download links
    pub public_url: String,
    pub default_model: String,
    #[serde(default)]
    pub separation: SeparationOptions,
    /// Interpreter that runs the demucs module
    #[serde(default = "default_demucs_program")]
    pub demucs_program: String,
    #[serde(default = "default_ytdlp_program")]
    pub ytdlp_program: String,
}

fn default_demucs_program() -> String {
    "python3".to_string()
}

fn default_ytdlp_program() -> String {
    "yt-dlp".to_string()
}

impl Settings {
    /// Lay out every directory under a single data root
    pub fn from_data_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            songs_dir: root.join("songs"),
            separated_dir: root.join("separated"),
            downloads_dir: root.join("downloads"),
            database_path: root.join("stemdrop.db"),
            public_url: "http://127.0.0.1:5000".to_string(),
            default_model: "demucs".to_string(),
            separation: SeparationOptions::default(),
            demucs_program: default_demucs_program(),
            ytdlp_program: default_ytdlp_program(),
        }
    }

    /// Download link for a token
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/download/{}", self.public_url.trim_end_matches('/'), token)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let root = dirs::data_dir()
            .map(|d| d.join("stemdrop"))
            .unwrap_or_else(|| PathBuf::from(".stemdrop"));
        Self::from_data_dir(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda(2));
        assert_eq!("gpu:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn test_separation_options_defaults_from_json() {
        let options: SeparationOptions = serde_json::from_str(r#"{"model":"mdx"}"#).unwrap();
        assert_eq!(options.model, "mdx");
        assert_eq!(options.device, Device::Cpu);
        assert_eq!(options.shifts, 0);
        assert!(options.split);

        let json = serde_json::to_string(&SeparationOptions {
            device: Device::Cuda(1),
            ..Default::default()
        })
        .unwrap();
        assert!(json.contains(r#""device":"cuda:1""#));
    }

    #[test]
    fn test_settings_layout() {
        let settings = Settings::from_data_dir("/srv/stemdrop");
        assert_eq!(settings.downloads_dir, PathBuf::from("/srv/stemdrop/downloads"));
        assert_eq!(
            settings.download_url("abc"),
            "http://127.0.0.1:5000/download/abc"
        );

        let settings = Settings {
            public_url: "https://stems.example/".to_string(),
            ..settings
        };
        assert_eq!(settings.download_url("abc"), "https://stems.example/download/abc");
    }

    #[test]
    fn test_record_file_name() {
        let record = DownloadRecord {
            token: "t".to_string(),
            song_path: PathBuf::from("downloads/song1.zip"),
            consumed: false,
            created_at: Utc::now(),
            consumed_at: None,
        };
        assert_eq!(record.file_name(), "song1.zip");
    }
}
