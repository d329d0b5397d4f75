//! Common types shared by every stage of the blur/deblur engine

use std::path::PathBuf;
use thiserror::Error;

/// Error types for code generation, PSF construction, blur, deblur and geometry
#[derive(Debug, Error)]
pub enum ExposureError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("Invalid image: {0}")]
    Image(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExposureError {
    /// Shorthand for a size mismatch between two `width x height` extents
    pub fn size_mismatch(expected: (usize, usize), actual: (usize, usize)) -> Self {
        ExposureError::DimensionMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }
}

impl From<image::ImageError> for ExposureError {
    fn from(e: image::ImageError) -> Self {
        ExposureError::Image(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExposureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message() {
        let err = ExposureError::size_mismatch((4, 3), (5, 3));
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4x3, got 5x3");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ExposureError = io.into();
        assert!(matches!(err, ExposureError::IoError(_)));
    }
}
