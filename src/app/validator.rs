//! Pre-registration checks of connector settings.

use super::factory::backend;
use crate::core::model::connection::{ConnectorType, Validation};
use serde_json::Value;
use tracing::{debug, warn};

/// Check the settings of a connector and probe its backend once.
///
/// Unsupported types and settings failing their cross-validation are rejected
/// without a connection attempt. Otherwise the backend's liveness probe runs
/// once and any error is reported as the validation message. Persists nothing.
///
/// * `ty`: Connector type tag.
/// * `settings`: Backend specific settings.
pub async fn validate(ty: &str, settings: &Value) -> Validation {
    let connector_type = match ty.parse::<ConnectorType>() {
        Ok(ty) => ty,
        Err(e) => return Validation::invalid(e.error),
    };

    let db = match backend(connector_type, settings) {
        Ok(db) => db,
        Err(e) => {
            debug!("{ty} | invalid settings: {e}");
            return Validation::invalid(e.error);
        }
    };

    match db.heartbeat().await {
        Ok(()) => Validation::valid(),
        Err(e) => {
            warn!("{ty} | probe failed: {e}");
            Validation::invalid(e.error)
        }
    }
}
