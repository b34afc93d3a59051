/// Embedder implementation for running fastembed on a remote
/// machine. Uses a reqwest client to connect to a machine running
/// a fastembed server exposing `/embed` and `/list`.
pub mod remote;

/// Default model used when none is configured.
pub const DEFAULT_MODEL: &str = "Xenova/bge-base-en-v1.5";
