//! Configuration surface for the depot package server.

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result};
pub use settings::Settings;
