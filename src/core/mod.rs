/// Core Module for DBX
///
/// Error handling, canonical values and the database handle.

pub mod db;
pub mod error;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{DbxError, Result};
