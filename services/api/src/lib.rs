//! services/api/src/lib.rs
//!
//! The HTTP service around `sprachwelt_core`: adapters for the LLM, TTS, database and
//! content files, plus the axum web layer. Shared by the `api`, `openapi` and `play`
//! binaries.

pub mod achievements;
pub mod adapters;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod web;
