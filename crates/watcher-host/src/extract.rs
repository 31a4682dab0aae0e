//! Turning plugin artefacts into runnable executables.
//!
//! The discovery scanner hands each candidate artefact to an
//! [`ArtifactExtractor`] and launches whatever path it returns. The default
//! [`DirectExtractor`] treats the artefact itself as the executable; archive
//! formats can supply their own extractor.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while preparing a runnable path.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The artefact is not a regular file.
    #[error("'{}' is not a regular file", path.display())]
    NotAFile {
        /// Artefact path.
        path: PathBuf,
    },

    /// Reading the artefact failed.
    #[error("failed to inspect '{}': {source}", path.display())]
    Io {
        /// Artefact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A custom extractor rejected the artefact.
    #[error("{message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },
}

/// Produces the executable used to run a plugin artefact.
pub trait ArtifactExtractor: Send + Sync {
    /// Returns the path to execute for `artifact`.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] if no runnable path can be produced.
    fn runtime_path(&self, artifact: &Path) -> Result<PathBuf, ExtractError>;
}

/// Runs artefacts in place.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use watcher_host::{ArtifactExtractor, DirectExtractor};
///
/// let runtime = DirectExtractor.runtime_path(Path::new("plugins/disk.watcher"));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExtractor;

impl ArtifactExtractor for DirectExtractor {
    fn runtime_path(&self, artifact: &Path) -> Result<PathBuf, ExtractError> {
        let metadata = std::fs::metadata(artifact).map_err(|source| ExtractError::Io {
            path: artifact.to_path_buf(),
            source: Arc::new(source),
        })?;
        if !metadata.is_file() {
            return Err(ExtractError::NotAFile {
                path: artifact.to_path_buf(),
            });
        }
        Ok(artifact.to_path_buf())
    }
}
