//! manual-core - Core types and traits for the manual retrieval engine
//!
//! This crate provides the record types, provider traits, configuration,
//! error handling and vector math shared by every other crate.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod vector;

pub use config::*;
pub use error::{ManualError, Result};
pub use traits::*;
pub use types::*;
