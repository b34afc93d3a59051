//! HTTP clients for the external embedding providers vectorhub ingests with.

pub mod error;

#[cfg(feature = "fe-remote")]
pub mod fastembed;

#[cfg(feature = "openai")]
pub mod openai;
