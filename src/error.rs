use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no instance matching prefix `{prefix}`")]
    NoInstanceFound { prefix: String },

    #[error("failed to list {what}: {message}")]
    Listing { what: &'static str, message: String },

    #[error("instance `{instance}` not found")]
    InstanceNotFound { instance: String },

    #[error("failed to download `{file}`: {message}")]
    Download { file: String, message: String },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("{0}")]
    Config(String),
}

impl Error {
    pub fn listing(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Listing {
            what,
            message: err.to_string(),
        }
    }

    pub fn download(file: &str, err: impl std::fmt::Display) -> Self {
        Self::Download {
            file: file.to_string(),
            message: err.to_string(),
        }
    }
}
