//! Connectors for heterogeneous vector databases behind one interface, along with
//! a document ingestion pipeline and normalized similarity search.

/// Concrete implementations of the [core] module.
pub mod app;

/// Application starting arguments and configuration.
pub mod config;

/// Core business logic.
pub mod core;

/// Error types.
pub mod error;
