use thiserror::Error;

/// Main error type for GeoMap Agent
#[derive(Error, Debug)]
pub enum GeoMapError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding / encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON (de)serialization errors for cached documents
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inference service returned no usable answer
    #[error("Inference error: {0}")]
    Inference(String),

    /// Region / legend detector errors
    #[error("Detector error: {0}")]
    Detector(String),

    /// Structured output did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Knowledge provider / dataset errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using GeoMapError
pub type Result<T> = std::result::Result<T, GeoMapError>;
