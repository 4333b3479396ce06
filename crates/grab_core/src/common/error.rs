use grab_utils::io::NpzError;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type GrabResult<T> = Result<T, GrabError>;

/// How far an error reaches when it happens during a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// No sequence can succeed, the run stops
    Run,
    /// The sequence is abandoned, all its pending kinds are failed
    Sequence,
    /// Only the current (sequence, kind) pair is failed
    Kind,
}

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("corrupt record {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("unknown landmark `{name}` in the {table} table")]
    UnknownLandmark { name: String, table: &'static str },

    #[error("failed to persist {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("model asset {}: {reason}", path.display())]
    ModelAsset { path: PathBuf, reason: String },

    #[error("invalid template {}: {reason}", path.display())]
    Template { path: PathBuf, reason: String },

    #[error("invalid parameters for the {model} model: {reason}")]
    InvalidParams { model: &'static str, reason: String },

    #[error("cannot sample {requested} vertices from a template with {available}")]
    InvalidSampleCount { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GrabError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            GrabError::UnknownLandmark { .. } | GrabError::Config(_) => ErrorScope::Run,
            GrabError::CorruptRecord { .. } => ErrorScope::Sequence,
            _ => ErrorScope::Kind,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Run
    }

    pub fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        GrabError::CorruptRecord {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn invalid_params(model: &'static str, reason: impl Into<String>) -> Self {
        GrabError::InvalidParams { model, reason: reason.into() }
    }

    /// Maps an archive error of a sequence record
    pub fn from_record(path: &Path, err: NpzError) -> Self {
        match err {
            NpzError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound => GrabError::NotFound { path: path.to_path_buf() },
            other => GrabError::corrupt(path, other.to_string()),
        }
    }

    /// Maps an archive error of a model file
    pub fn from_model(path: &Path, err: NpzError) -> Self {
        match err {
            NpzError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound => GrabError::NotFound { path: path.to_path_buf() },
            other => GrabError::ModelAsset {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        }
    }
}
