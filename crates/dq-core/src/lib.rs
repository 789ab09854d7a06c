//! dq-core - Core types and traits for the retrieval engine
//!
//! This crate provides the foundational types, collaborator traits, error
//! handling and configuration shared by the docuquery crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{RagError, Result};
pub use traits::*;
pub use types::*;
