use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{file}:{line}: bad rule: {message}")]
    BadRule {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    BadConfig(String),

    #[error("Snapshot written by newer version {found} (this build reads up to {supported})")]
    BadVersion { found: u32, supported: u32 },

    #[error("Snapshot corrupt: {0}")]
    BadSnapshot(String),

    #[error("Missing source image: {0}")]
    MissingSource(PathBuf),

    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, PalError>;

impl PalError {
    /// True for error kinds that name bad user input rather than an
    /// internal inconsistency.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, PalError::Invariant(_))
    }
}
