use crate::model::{Field, RecordKind};

#[derive(Debug, thiserror::Error)]
pub enum LinkageError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("field weights sum to {sum}, expected 1.0")]
    InvalidWeights { sum: f64 },

    #[error("field {field} cannot be addressed on a {kind:?} record")]
    FieldKindMismatch { field: Field, kind: RecordKind },

    #[error("search structure construction failed: {0}")]
    SearchStructure(String),

    #[error("resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("sweep worker for field count {field_count} failed: {reason}")]
    Worker { field_count: usize, reason: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkageError>;
