use thiserror::Error;

use crate::backend::Unsupported;

pub type FsResult<T> = Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("a file at path '{0}' already exists")]
    AlreadyExists(String),

    #[error("a directory at path '{0}' is not empty")]
    DirectoryNotEmpty(String),

    /// The caller's content stream failed while being read.
    #[error("content stream error: {0}")]
    Content(#[from] std::io::Error),

    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Transport, auth or service-side failure. Never retried here.
    #[error("backend error: {0:#}")]
    Backend(anyhow::Error),
}

impl From<anyhow::Error> for FsError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<Unsupported>() {
            Some(unsupported) => FsError::Unsupported(unsupported.to_string()),
            None => FsError::Backend(err),
        }
    }
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}
