//! Backend implementations of [VectorDb][crate::core::vector::VectorDb].
//!
//! Every backend owns its client handle and opens it lazily on first use;
//! dropping the backend releases it.

use crate::{err, error::HubError, map_err};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use validify::Validify;

pub mod chroma;
pub mod clickhouse;
pub mod milvus;
pub mod pinecone;

#[cfg(feature = "qdrant")]
pub mod qdrant;

#[cfg(feature = "weaviate")]
pub mod weaviate;

/// Deserialize and validate backend settings.
pub fn parse_settings<T>(settings: &Value) -> Result<T, HubError>
where
    T: DeserializeOwned + Validify,
{
    let mut parsed: T = map_err!(serde_json::from_value(settings.clone()));
    map_err!(parsed.validify());
    Ok(parsed)
}

/// Read a JSON body from a response, turning unsuccessful statuses into transport errors.
pub(crate) async fn read_json<T>(response: reqwest::Response) -> Result<T, HubError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        return err!(Transport, "{url} responded with {status}: {body}");
    }
    Ok(map_err!(response.json::<T>().await))
}

/// Read a body and discard it, turning unsuccessful statuses into transport errors.
pub(crate) async fn read_empty(response: reqwest::Response) -> Result<(), HubError> {
    let status = response.status();
    if !status.is_success() {
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        return err!(Transport, "{url} responded with {status}: {body}");
    }
    Ok(())
}

/// Some backends only accept flat metadata with scalar values.
/// Nested values are stored as their JSON string and nulls are dropped.
pub(crate) fn flatten_metadata(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| match v {
            Value::Object(_) | Value::Array(_) => (k.clone(), Value::String(v.to_string())),
            v => (k.clone(), v.clone()),
        })
        .collect()
}

/// Amount of items a backend has to read to serve a page, i.e. `offset + limit`.
pub(crate) fn page_end(limit: usize, offset: usize) -> Result<usize, HubError> {
    match offset.checked_add(limit) {
        Some(end) => Ok(end),
        None => err!(
            InvalidArgument,
            "page out of range (limit: {limit}, offset: {offset})"
        ),
    }
}

/// Narrow a size for clients that only take 32 bit integers.
#[cfg(any(feature = "qdrant", feature = "weaviate"))]
pub(crate) fn to_u32(value: usize, name: &str) -> Result<u32, HubError> {
    match u32::try_from(value) {
        Ok(value) => Ok(value),
        Err(_) => err!(InvalidArgument, "{name} out of range: {value}"),
    }
}

/// Trim the trailing slash off an endpoint.
pub(crate) fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
