use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SightError>;

#[derive(Debug, Error)]
pub enum SightError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Client fault: the bytes handed in are not a decodable raster.
    #[error("malformed image: {0}")]
    MalformedImage(String),

    #[error("reference index not found at {0}")]
    MissingArtifact(PathBuf),

    #[error("reference index at {path} is corrupt: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("reference index version {found} is not supported (expected {expected})")]
    ArtifactVersion { found: u32, expected: u32 },

    #[error("reference index has an empty descriptor pool")]
    EmptyDescriptorPool,

    #[error("descriptor {descriptor} points at entry {owner}, but the index has {entries} entries")]
    InvalidBackReference {
        descriptor: usize,
        owner: u32,
        entries: usize,
    },

    #[error("descriptor pool has {descriptors} descriptors but {owners} back-references")]
    OwnerTable { descriptors: usize, owners: usize },

    #[error("entry {id} is inconsistent: {reason}")]
    InconsistentEntry { id: u32, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("failed to fetch reference index from {url}: {reason}")]
    Fetch { url: String, reason: String },
}

impl SightError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SightError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by the caller's input rather than by this process.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, SightError::MalformedImage(_))
    }
}
