/// Temporary source files, one per execution.
///
/// Each artifact gets a name derived from 16 random bytes, so concurrent
/// executions never share a file. The store also tracks which artifacts are
/// currently in use so the reaper can leave them alone regardless of their
/// age.
///
/// All I/O on the request path uses `tokio::fs`. The one exception is the
/// fallback removal in `Drop`, which cannot await.
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::types::Language;
use crate::error::SandboxError;

/// Filename prefix of every artifact
pub const ARTIFACT_PREFIX: &str = "temp_";

/// Random bytes per artifact name (hex-encoded to 32 chars)
const TOKEN_BYTES: usize = 16;

/// Paths of artifacts owned by running executions.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InFlightRegistry {
    /// Returns false if the path was already registered.
    fn insert(&self, path: &Path) -> bool {
        self.lock().insert(path.to_path_buf())
    }

    fn remove(&self, path: &Path) {
        self.lock().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // Critical sections never panic, but recover from poisoning anyway.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The on-disk copy of one submission.
///
/// Consumed by [`ArtifactStore::delete`]. If an artifact is dropped without
/// being deleted (e.g. the owning future was cancelled), `Drop` removes the
/// file synchronously and unregisters it.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    token: String,
    created_at: DateTime<Utc>,
    registry: InFlightRegistry,
    released: bool,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Artifact {} dropped without cleanup, removing it now",
                self.path.display()
            );
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(
                        "Fallback removal of {} failed ({e}), leaving it for the reaper",
                        self.path.display()
                    );
                }
            }
        }
        self.registry.remove(&self.path);
    }
}

/// Creates and deletes artifacts inside a single directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    in_flight: InFlightRegistry,
}

impl ArtifactStore {
    /// Opens the store, creating the directory if needed.
    ///
    /// The directory is resolved to an absolute path, so artifact paths stay
    /// valid for a child running with a different working directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            SandboxError::Storage(format!("cannot create {}: {e}", dir.display()))
        })?;
        let dir = tokio::fs::canonicalize(&dir).await.map_err(|e| {
            SandboxError::Storage(format!("cannot resolve {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            in_flight: InFlightRegistry::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Writes `code` verbatim to a new, uniquely named file.
    ///
    /// The path is registered as in-flight before the file exists, so the
    /// reaper can never observe it unprotected. A name collision is an
    /// error; an existing file is never overwritten.
    pub async fn create(&self, code: &str, language: Language) -> Result<Artifact, SandboxError> {
        let token = hex::encode(rand::random::<[u8; TOKEN_BYTES]>());
        let path = self
            .dir
            .join(format!("{ARTIFACT_PREFIX}{token}.{}", language.extension()));

        if !self.in_flight.insert(&path) {
            return Err(SandboxError::Storage(format!(
                "artifact name collision: {}",
                path.display()
            )));
        }

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) => {
                self.in_flight.remove(&path);
                return Err(SandboxError::Storage(format!(
                    "cannot create {}: {e}",
                    path.display()
                )));
            }
        };

        // From here on a failure drops the artifact, which removes the
        // partially written file.
        let artifact = Artifact {
            path,
            token,
            created_at: Utc::now(),
            registry: self.in_flight.clone(),
            released: false,
        };

        file.write_all(code.as_bytes()).await.map_err(|e| {
            SandboxError::Storage(format!("cannot write {}: {e}", artifact.path.display()))
        })?;
        file.flush().await.map_err(|e| {
            SandboxError::Storage(format!("cannot flush {}: {e}", artifact.path.display()))
        })?;

        debug!(
            "Created artifact {} ({} bytes)",
            artifact.path.display(),
            code.len()
        );
        Ok(artifact)
    }

    /// Deletes the artifact's file. Never fails: a missing file is fine and
    /// any other error is logged, since cleanup must not hold up the result.
    pub async fn delete(&self, mut artifact: Artifact) {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => debug!(
                "Deleted artifact {} (lived {}ms)",
                artifact.path.display(),
                (Utc::now() - artifact.created_at()).num_milliseconds()
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Artifact {} already gone", artifact.path.display());
            }
            Err(e) => {
                warn!(
                    "Failed to delete artifact {} ({e}), leaving it for the reaper",
                    artifact.path.display()
                );
            }
        }
        artifact.released = true;
    }
}
