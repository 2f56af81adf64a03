use thiserror::Error;

#[derive(Debug, Error)]
pub enum NNError {
    // Layer and pipeline configuration
    #[error("Invalid layer configuration: {0}")]
    InvalidLayerConfiguration(String),
    #[error("Layer shape mismatch: {0}")]
    LayerShapeMismatch(String),

    // Training inputs
    #[error("Invalid input shape: {0}")]
    InvalidInputShape(String),
    #[error("Invalid label: {0}")]
    InvalidLabel(String),
    #[error("Invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),

    // Collaborators
    #[error("Dataset error: {0}")]
    DatasetError(String),
    #[error("No checkpoint available for '{0}'")]
    NoCheckpoint(String),
    #[error("Failed to save parameters: {0}")]
    ModelSaveError(String),
    #[error("Invalid config: {0}")]
    ConfigError(String),
    #[error("Plot error: {0}")]
    PlotError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] Box<bincode::ErrorKind>),
    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NNError>;
