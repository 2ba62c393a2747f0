//! services/api/src/adapters/mod.rs
//!
//! Concrete implementations of the ports defined in `sprachwelt_core`.

pub mod content;
pub mod db;
pub mod ollama;
pub mod piper;

pub use content::{load_content, ContentError};
pub use db::DbAdapter;
pub use ollama::OllamaAdapter;
pub use piper::PiperTtsAdapter;
