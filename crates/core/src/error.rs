use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConceptError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to read configuration {path}: {source}", path = path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}: {source}", path = path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to read storage entry: {0}")]
    StorageRead(std::io::Error),
    #[error("failed to write storage entry: {0}")]
    StorageWrite(std::io::Error),
    #[error("failed to serialize test patients: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize test patients: {0}")]
    Deserialization(serde_json::Error),
    #[error("expression error: {0}")]
    Expression(#[from] crate::expression::ExpressionError),
}

pub type ConceptResult<T> = std::result::Result<T, ConceptError>;
