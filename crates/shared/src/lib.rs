//! Shared types for the fablink messaging client.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;
