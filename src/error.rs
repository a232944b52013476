use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("time ranges are not sorted at index {index}")]
    UnsortedInput { index: usize },

    #[error("invalid time range at index {index}")]
    InvalidTimeRange { index: usize },

    #[error("missing description")]
    MissingDescription,

    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: String,
        found: String,
        context: String,
    },

    #[error("shard count mismatch: {data} data shards, {label} label shards")]
    ShardCountMismatch { data: usize, label: usize },

    #[error("position {position} out of range (timeline length {len})")]
    OutOfRange { position: usize, len: usize },

    #[error("label filter requested but no label shards configured")]
    LabelUnavailable,

    #[error("store opened read-only")]
    ReadOnly,

    #[error("corrupt data: {0}")]
    Corrupt(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("shard {shard} ({}): {source}", path.display())]
    Shard {
        shard: usize,
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn in_shard(self, shard: usize, path: impl Into<PathBuf>) -> Self {
        Error::Shard {
            shard,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through `Shard` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shard { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_wrapper_names_path() {
        let err = Error::OutOfRange { position: 7, len: 3 }.in_shard(2, "/data/b.tls");
        let msg = err.to_string();
        assert!(msg.contains("shard 2"));
        assert!(msg.contains("/data/b.tls"));
        assert!(matches!(err.root(), Error::OutOfRange { position: 7, len: 3 }));
    }
}
