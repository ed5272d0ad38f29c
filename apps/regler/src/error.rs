use heating_protocol::PayloadError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("settings file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RegelError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("mqtt connection: {0}")]
    Transport(#[from] rumqttc::ConnectionError),
    #[error("mqtt client: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RegelError {
    /// Settings that cannot be made durable stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RegelError::Persistence(_))
    }
}
