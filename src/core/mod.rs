//! Core engine types and utilities

pub mod config;
pub mod error;
pub mod logging;

pub use config::ResidencyConfig;
pub use error::{Error, GenerationFailure, GeneratorError, NibbleError, StorageError};
