//! Credential persistence
//!
//! `CredentialStore` calls `save` synchronously after every mutation and
//! `load` once at construction, so implementations must be quick and must not
//! call back into the store.
//!
//! `FileCredentialPersister` keeps a single JSON document. Writes go to a
//! temporary file in the same directory which is then renamed over the target,
//! so a crash mid-write never leaves a truncated credential file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Durable storage for the credential snapshot.
pub trait CredentialPersister: Send + Sync {
    /// Read the stored snapshot. `None` means nothing has been stored yet.
    fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored snapshot.
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// Persists the credential as a JSON file with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileCredentialPersister {
    path: PathBuf,
}

impl FileCredentialPersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialPersister for FileCredentialPersister {
    fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "credential file not found");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Persistence(format!("reading credential file: {e}")))?;
        let credential: Credential = serde_json::from_str(&contents)
            .map_err(|e| Error::Persistence(format!("parsing credential file: {e}")))?;
        info!(path = %self.path.display(), status = %credential.status, "loaded credential file");
        Ok(Some(credential))
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        write_atomic(&self.path, credential)
    }
}

/// Keeps the latest snapshot in memory and counts saves.
#[derive(Debug, Default)]
pub struct MemoryCredentialPersister {
    credential: Mutex<Option<Credential>>,
    saves: AtomicUsize,
}

impl MemoryCredentialPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `credential` already stored, as if saved by an earlier run.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The most recently saved (or seeded) snapshot.
    pub fn saved(&self) -> Option<Credential> {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CredentialPersister for MemoryCredentialPersister {
    fn load(&self) -> Result<Option<Credential>> {
        Ok(self.saved())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Write the credential to `path` atomically with 0600 permissions on unix.
fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(credential)
        .map_err(|e| Error::Persistence(format!("serializing credential: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => return Err(Error::Persistence("credential path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Persistence(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Persistence(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Persistence(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
