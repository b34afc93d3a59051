use crate::{
    core::{cache::VectorCache, model::VectorEntry},
    err,
    error::{HubErr, HubError},
    map_err,
};
use std::{io::ErrorKind, path::PathBuf};
use tracing::{debug, info};

/// Filesystem implementation of a [VectorCache]. Every document gets a single
/// JSON file in the base directory.
#[derive(Debug, Clone)]
pub struct FsVectorCache {
    /// The directory to store the snapshots in.
    base: PathBuf,
}

impl FsVectorCache {
    /// Create the cache, creating its directory if necessary.
    pub async fn new(path: &str) -> Result<Self, HubError> {
        let base = PathBuf::from(path);

        map_err!(tokio::fs::create_dir_all(&base).await);

        let base = map_err!(tokio::fs::canonicalize(&base).await);

        if !base.is_dir() {
            return err!(InvalidArgument, "not a directory: {}", base.display());
        }

        info!("Initialising vector cache at {}", base.display());

        Ok(Self { base })
    }

    /// Keys are file names, anything resembling a path is rejected.
    fn path(&self, key: &str) -> Result<PathBuf, HubError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return err!(InvalidArgument, "invalid cache key '{key}'");
        }
        Ok(self.base.join(key))
    }
}

#[async_trait::async_trait]
impl VectorCache for FsVectorCache {
    fn id(&self) -> &'static str {
        "fs"
    }

    async fn store_vector_result(
        &self,
        entries: &[VectorEntry],
        key: &str,
    ) -> Result<(), HubError> {
        let path = self.path(key)?;
        debug!("Writing {} cached vector(s) to {}", entries.len(), path.display());
        let json = map_err!(serde_json::to_vec(entries));
        map_err!(tokio::fs::write(&path, json).await);
        Ok(())
    }

    async fn read_vector_result(&self, key: &str) -> Result<Option<Vec<VectorEntry>>, HubError> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(map_err!(serde_json::from_slice(&bytes)))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HubError::new(file!(), line!(), column!(), HubErr::IO(e))),
        }
    }
}
