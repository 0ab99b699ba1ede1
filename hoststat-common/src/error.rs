use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the platform-independent half of hoststat.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),

    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR serialization error: {0}")]
    Cbor(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
