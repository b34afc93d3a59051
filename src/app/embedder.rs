//! Adapters of the `vectorhub-embedders` clients to [Embedder][crate::core::embedder::Embedder].

#[cfg(not(any(feature = "fe-remote", feature = "openai")))]
compile_error!("one of `fe-remote` or `openai` features must be enabled");

#[cfg(feature = "fe-remote")]
pub mod fastembed;

#[cfg(feature = "openai")]
pub mod openai;

/// Convert the double precision vectors of the providers to what backends store.
pub(crate) fn to_f32(embeddings: Vec<Vec<f64>>) -> Vec<Vec<f32>> {
    embeddings
        .into_iter()
        .map(|e| e.into_iter().map(|v| v as f32).collect())
        .collect()
}
