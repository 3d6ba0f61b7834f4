//! One-time download token issuance

use crate::error::{Result, StemdropError};
use crate::ledger::Ledger;
use rand::Rng;
use std::io;
use std::path::Path;

/// Random bytes per token
const TOKEN_BYTES: usize = 32;

/// Issues tokens for packaged archives and records them in the ledger
#[derive(Clone, Debug)]
pub struct Issuer {
    ledger: Ledger,
}

impl Issuer {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Register an existing archive and return its download token.
    ///
    /// The ledger stores the canonical path, so the token resolves to the
    /// same file regardless of the dispatcher's working directory.
    pub async fn issue(&self, song_path: &Path) -> Result<String> {
        let metadata = match tokio::fs::metadata(song_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StemdropError::SourceNotFound(song_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(StemdropError::InvalidInput(format!(
                "{} is not a regular file",
                song_path.display()
            )));
        }

        let archive = tokio::fs::canonicalize(song_path).await?;
        let token = generate_token();
        self.ledger.create(&archive, &token).await?;

        tracing::info!(archive = %archive.display(), "Issued download token");
        Ok(token)
    }
}

/// 256 bits from the thread-local CSPRNG, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Whether a string could have been produced by [`generate_token`]
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_well_formed_and_distinct() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 1000);
        assert!(tokens.iter().all(|t| is_well_formed(t)));
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("ThisHashDoesntExist"));
        assert!(!is_well_formed(&"A".repeat(64)));
        assert!(!is_well_formed(&"0".repeat(63)));
        assert!(is_well_formed(&"0f".repeat(32)));
    }

    #[tokio::test]
    async fn test_issue_registers_token() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("stemdrop.db")).await.unwrap();
        let archive = dir.path().join("song1.zip");
        std::fs::write(&archive, b"PK").unwrap();

        let issuer = Issuer::new(ledger.clone());
        let token = issuer.issue(&archive).await.unwrap();

        assert_eq!(
            ledger.lookup(&token).await.unwrap(),
            Some(archive.canonicalize().unwrap())
        );
    }

    #[tokio::test]
    async fn test_issue_stores_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("stemdrop.db")).await.unwrap();
        let issuer = Issuer::new(ledger.clone());

        let token = issuer.issue(Path::new("Cargo.toml")).await.unwrap();

        let stored = ledger.lookup(&token).await.unwrap().unwrap();
        assert!(stored.is_absolute());
        let expected = std::env::current_dir().unwrap().join("Cargo.toml");
        assert_eq!(stored, expected.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_issue_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("stemdrop.db")).await.unwrap();
        let folder = dir.path().join("song1.zip");
        std::fs::create_dir(&folder).unwrap();
        let issuer = Issuer::new(ledger.clone());

        let err = issuer.issue(&folder).await.unwrap_err();
        assert!(matches!(err, StemdropError::InvalidInput(_)));
        assert!(ledger.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_issue_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("stemdrop.db")).await.unwrap();
        let issuer = Issuer::new(ledger.clone());

        let err = issuer.issue(&dir.path().join("ghost.zip")).await.unwrap_err();
        assert!(matches!(err, StemdropError::SourceNotFound(_)));
        assert!(ledger.records().await.unwrap().is_empty());
    }
}
