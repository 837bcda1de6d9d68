use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to the catalog or writing songs to disk.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP {status} from {url}")]
    Remote { url: String, status: StatusCode },

    #[error("API error {code} from {url}: {msg}")]
    Api { url: String, code: i64, msg: String },

    #[error("unexpected response shape from {url}: {source}")]
    Schema {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("song {cid} has a music video ({what}), which is not supported")]
    UnsupportedInput { cid: String, what: &'static str },

    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid source URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to write body of {url}: {source}")]
    Write {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Error::Network {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn write(url: &str, source: std::io::Error) -> Self {
        Error::Write {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the remote side rejected the request, either by HTTP status
    /// or by a non-zero API code.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Remote { .. } | Error::Api { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
