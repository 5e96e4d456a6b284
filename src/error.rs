//! Error taxonomy for the scrape pipeline.
//!
//! Item-level failures (downloads, transfers, missing fields) are logged
//! and absorbed by the run loop. Only configuration problems and an
//! explicit interrupt end a run early.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the scrape pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unresolved placeholder `{placeholder}` in template `{template}`")]
    Template {
        template: String,
        placeholder: String,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("download failed: {0}")]
    Download(String),

    #[error("share transfer failed: {0}")]
    Transfer(String),

    #[error("run aborted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error should end the whole run rather than just the
    /// current item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigIo { .. }
                | Error::ConfigParse { .. }
                | Error::Config(_)
                | Error::Interrupted
        )
    }
}
