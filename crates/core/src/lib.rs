//! # Fluvia Core
//!
//! Core types for the Fluvia river routing library.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type backing the model's input maps
//! - `RasterElement`: trait bounding raster cell value types
//! - The shared error type for network construction and map validation

pub mod error;
pub mod raster;

pub use error::{Error, Result};
pub use raster::{Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::raster::{Raster, RasterElement};
}
