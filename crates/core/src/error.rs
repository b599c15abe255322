//! Error types for Fluvia

use thiserror::Error;

/// Main error type for Fluvia operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid raster dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Index out of bounds: ({row}, {col}) in raster of size ({rows}, {cols})")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Raster size mismatch: expected ({er}, {ec}), got ({ar}, {ac})")]
    SizeMismatch { er: usize, ec: usize, ar: usize, ac: usize },

    #[error("Flow direction cycle through pixel {pixel}: the drainage network is not a tree")]
    CycleDetected { pixel: usize },

    #[error("Field length mismatch: expected {expected} channel pixels, got {actual}")]
    FieldLength { expected: usize, actual: usize },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Fluvia operations
pub type Result<T> = std::result::Result<T, Error>;
