//! Utility layer - error types and shared helpers

pub mod errors;

pub use errors::*;
