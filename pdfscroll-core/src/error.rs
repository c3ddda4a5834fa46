use std::path::PathBuf;

use thiserror::Error;

/// Failures that end a viewer session. Extraction, navigation and search
/// problems are logged and absorbed instead of being reported here.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("failed to open document {path:?}")]
    DocumentOpen {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to render page {page} of {path:?}")]
    Render {
        path: PathBuf,
        page: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid configuration in {path:?}")]
    Config {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

pub type ViewerResult<T> = Result<T, ViewerError>;
