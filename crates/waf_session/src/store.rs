use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, warn};

use crate::types::{Credential, Origin, StoreError};

/// Persists one credential record per origin as `<dir>/<storage key>.json`.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `dir`; the directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for `origin`
    pub fn path_for(&self, origin: &Origin) -> PathBuf {
        self.dir.join(format!("{}.json", origin.storage_key()))
    }

    /// Load the persisted credential for `origin`.
    ///
    /// A missing file is `Ok(None)`. A record that cannot be parsed, or that
    /// belongs to another origin, is removed and also reported as absent.
    pub async fn load(&self, origin: &Origin) -> Result<Option<Credential>, StoreError> {
        let path = self.path_for(origin);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) if &credential.origin == origin => {
                debug!("Loaded persisted credential for {} from {:?}", origin, path);
                Ok(Some(credential))
            }
            Ok(credential) => {
                warn!(
                    "Discarding credential file {:?}: recorded for {}, expected {}",
                    path, credential.origin, origin
                );
                self.remove(origin).await?;
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable credential file {:?}: {}", path, e);
                self.remove(origin).await?;
                Ok(None)
            }
        }
    }

    /// Write the credential, replacing any previous record atomically.
    pub async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(&credential.origin);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(credential)?;

        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!("Persisted credential for {} to {:?}", credential.origin, path);
        Ok(())
    }

    /// Delete the record for `origin`; a missing file is not an error.
    pub async fn remove(&self, origin: &Origin) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(origin)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
