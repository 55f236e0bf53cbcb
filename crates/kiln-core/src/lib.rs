//! Kiln Core - Foundational types for the kiln 3D generation pipeline
//!
//! This crate provides the types that the other kiln crates depend on:
//! - `KilnError` - Classified error taxonomy and Result alias
//! - `ContentHash` - SHA-256 based content hashing for generated artifacts

mod error;
mod hash;

pub use error::{KilnError, Result};
pub use hash::ContentHash;
