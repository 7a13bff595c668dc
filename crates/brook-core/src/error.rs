//! Error types shared by the engine and its collaborators.
use thiserror::Error;

/// Failures talking to the blockchain data provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport: {0}")] Transport(String),
    #[error("unexpected status {status}: {body}")] Status { status: u16, body: String },
    #[error("malformed response: {0}")] Decode(String),
    #[error("provider rejected request for {subject}: {message}")] Rejected { subject: String, message: String },
}

/// Failures reading or writing the persistent key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O: {0}")] Io(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corrupted entry {key}: {reason}")] Corrupted { key: String, reason: String },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
