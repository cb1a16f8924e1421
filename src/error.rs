//! Error types, one enum per failure domain.
//!
//! Components return these instead of null sentinels so every caller has to
//! branch on the failure explicitly. None of them abort a crawl cycle on
//! their own; the loop logs and moves to the next unit of work.

use std::path::PathBuf;
use thiserror::Error;

/// A store operation could not be completed (QueryFailure).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Write verification failed: expected {expected}, store returned {actual}")]
    Verification { expected: i64, actual: i64 },
    #[error("Origin not found: {0}")]
    NotFound(i64),
    #[error("Invalid snapshot payload: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// The channel-protocol collaborator failed.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel client unavailable: credentials not configured")]
    Unavailable,
    #[error("Origin unreachable: {0}")]
    Unreachable(String),
    #[error("Channel transport error: {0}")]
    Transport(String),
    #[error("Unexpected channel payload: {0}")]
    Decode(String),
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<reqwest::Error> for ChannelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChannelError::Decode(e.to_string())
        } else {
            ChannelError::Transport(e.to_string())
        }
    }
}

/// The two-step Source + SourceDetail write was rolled back (PersistenceFailure).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Could not open transaction: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("Source insert failed: {0}")]
    Source(#[source] sqlx::Error),
    #[error("Source detail insert failed: {0}")]
    Detail(#[source] sqlx::Error),
    #[error("Source detail insert returned native id {actual}, expected {expected}")]
    DetailMismatch { expected: i64, actual: i64 },
    #[error("Commit failed: {0}")]
    Commit(#[source] sqlx::Error),
}

/// The external analyzer did not succeed (AnalysisFailure).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Failed to start analyzer '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Analyzer timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Analyzer exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
}
