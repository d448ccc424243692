use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefgetError {
    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("No sequence named '{name}' in collection {collection}")]
    NameNotFound { collection: String, name: String },

    #[error("Invalid range [{start}, {end}) for sequence {digest} of length {length}")]
    Range {
        digest: String,
        start: usize,
        end: usize,
        length: usize,
    },

    #[error("Duplicate sequence name '{name}' at line {line}; record skipped")]
    DuplicateIdentifier { name: String, line: usize },

    #[error("Corrupt index {path}, line {line}: {reason}")]
    CorruptIndex {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Corrupt payload for sequence {digest}: expected {expected} bytes, found {found}")]
    CorruptPayload {
        digest: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid store manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    BackingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch {url}: {message}")]
    Remote { url: String, message: String },

    #[error("Inconsistent store: {0}")]
    Consistency(String),

    #[error("Sequence {0} is not loaded and the store has no backing to load it from")]
    NoBacking(String),

    #[error("Persistence is not enabled for this store")]
    PersistenceDisabled,

    #[error("{0}")]
    InvalidOperation(String),

    #[error("Sequence data is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Core(#[from] refstore_core::errors::CoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RefgetError {
    /// True for the lookup-miss variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RefgetError::SequenceNotFound(_)
                | RefgetError::CollectionNotFound(_)
                | RefgetError::NameNotFound { .. }
        )
    }

    /// Wraps an I/O error with the path it happened on.
    pub(crate) fn backing_io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| RefgetError::BackingIo { path, source }
    }
}

pub type Result<T> = std::result::Result<T, RefgetError>;
