//! The core module defines the connector contract and the ingestion pipeline.
//! It provides the traits and models the backend adapters need to implement.

pub mod cache;
pub mod connector;
pub mod embedder;
pub mod model;
pub mod provider;
pub mod repo;
pub mod service;
pub mod vector;
