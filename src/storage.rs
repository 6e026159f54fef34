//! Artifact storage on local disk.
//!
//! A single flat directory holds every artifact, named
//! `{id}_{original|compressed}.{ext}`. The directory listing is the only
//! index, so identifiers coming from outside are validated against
//! [`ArtifactId`] before they get anywhere near a path.

use crate::errors::StorageError;
use crate::formats::Format;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

/// Identifier length in hex characters (128 bits).
pub const ID_HEX_LEN: usize = 32;

static ARTIFACT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-f]{32})_(original|compressed)\.([a-z0-9]{1,8})$")
        .expect("invalid artifact name regex")
});

/// A validated artifact identifier: exactly 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Fresh random identifier with 128 bits of entropy.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::rng().random();
        ArtifactId(hex::encode(bytes))
    }

    /// Validate an untrusted identifier. Anything that is not exactly
    /// 32 lowercase hex characters is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == ID_HEX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| ArtifactId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = crate::errors::ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ArtifactId::parse(&value).ok_or(crate::errors::ValidationError::MalformedIdentifier)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Original,
    Compressed,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Original => "original",
            ArtifactKind::Compressed => "compressed",
        }
    }
}

/// File name for an artifact. `ext` must already be sanitized.
pub fn artifact_file_name(id: &ArtifactId, kind: ArtifactKind, ext: &str) -> String {
    format!("{}_{}.{}", id, kind.as_str(), ext)
}

/// An artifact found by [`StorageManager::locate`], opened for reading.
#[derive(Debug)]
pub struct LocatedArtifact {
    pub file: fs::File,
    pub path: PathBuf,
    pub file_name: String,
    pub mime_type: &'static str,
    pub size: u64,
}

/// One entry of [`StorageManager::list_with_age`].
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub age: Duration,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &ArtifactId, kind: ArtifactKind, ext: &str) -> PathBuf {
        self.root.join(artifact_file_name(id, kind, ext))
    }

    async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))
    }

    /// Stream `reader` into a new artifact and return its path.
    ///
    /// A partially written file is removed before the error is returned.
    pub async fn save<R>(
        &self,
        reader: &mut R,
        id: &ArtifactId,
        kind: ArtifactKind,
        ext: &str,
    ) -> Result<PathBuf, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_root().await?;
        let path = self.path_for(id, kind, ext);

        let result = async {
            let mut file = fs::File::create(&path).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;

        match result {
            Ok(written) => {
                debug!(path = %path.display(), bytes = written, "Artifact saved");
                Ok(path)
            }
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                Err(StorageError::io(path, e))
            }
        }
    }

    /// Find the compressed artifact for an untrusted identifier.
    ///
    /// Returns `Ok(None)` for malformed identifiers, missing artifacts and
    /// candidates that resolve outside the storage root. Only an I/O failure
    /// on an artifact that does exist is an error.
    pub async fn locate(&self, raw_id: &str) -> Result<Option<LocatedArtifact>, StorageError> {
        let Some(id) = ArtifactId::parse(raw_id) else {
            debug!("Rejected malformed artifact identifier");
            return Ok(None);
        };

        let Some(path) = self.find_artifact(&id, ArtifactKind::Compressed).await else {
            return Ok(None);
        };

        let Some(canonical) = self.contained(&path).await else {
            warn!(path = %path.display(), "Artifact resolves outside storage root");
            return Ok(None);
        };

        let file = match fs::File::open(&canonical).await {
            Ok(f) => f,
            // Swept between the listing and the open.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(canonical, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(&canonical, e))?
            .len();

        let file_name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = canonical
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Format::from_extension)
            .map(Format::mime_type)
            .unwrap_or("application/octet-stream");

        Ok(Some(LocatedArtifact {
            file,
            path: canonical,
            file_name,
            mime_type,
            size,
        }))
    }

    /// Scan the root for `{id}_{kind}.*`.
    async fn find_artifact(&self, id: &ArtifactId, kind: ArtifactKind) -> Option<PathBuf> {
        let prefix = format!("{}_{}.", id, kind.as_str());
        let mut entries = fs::read_dir(&self.root).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && ARTIFACT_NAME.is_match(&name) {
                return Some(entry.path());
            }
        }
        None
    }

    /// Canonicalize `path` and confirm it is still inside the root.
    async fn contained(&self, path: &Path) -> Option<PathBuf> {
        let root = fs::canonicalize(&self.root).await.ok()?;
        let canonical = fs::canonicalize(path).await.ok()?;
        canonical.starts_with(&root).then_some(canonical)
    }

    /// Lexical containment check; no filesystem access.
    fn ensure_inside_root(&self, path: &Path) -> Result<(), StorageError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(StorageError::OutsideRoot {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Best-effort delete. Failures are logged, never returned.
    pub async fn delete(&self, path: &Path) -> bool {
        if let Err(e) = self.ensure_inside_root(path) {
            warn!(error = %e, "Refusing to delete");
            return false;
        }
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Artifact deleted");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete artifact");
                false
            }
        }
    }

    /// Delete every artifact belonging to an untrusted identifier.
    /// Malformed identifiers are a no-op.
    pub async fn remove(&self, raw_id: &str) -> usize {
        let Some(id) = ArtifactId::parse(raw_id) else {
            return 0;
        };
        let mut removed = 0;
        for kind in [ArtifactKind::Original, ArtifactKind::Compressed] {
            if let Some(path) = self.find_artifact(&id, kind).await {
                if self.delete(&path).await {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub async fn size_of(&self, path: &Path) -> Result<u64, StorageError> {
        fs::metadata(path)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::io(path, e))
    }

    /// Every well-formed artifact under the root with its age.
    ///
    /// A missing root is an empty listing. Files that do not look like
    /// artifacts are left alone.
    pub async fn list_with_age(&self) -> Result<Vec<ArtifactEntry>, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let now = SystemTime::now();
        let mut listed = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(StorageError::io(&self.root, e)),
            };
            if !ARTIFACT_NAME.is_match(&entry.file_name().to_string_lossy()) {
                continue;
            }
            // Entries can vanish mid-listing; skip them.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(now);
            listed.push(ArtifactEntry {
                path: entry.path(),
                modified,
                age: now.duration_since(modified).unwrap_or_default(),
                size: metadata.len(),
            });
        }

        debug!(count = listed.len(), root = %self.root.display(), "Listed artifacts");
        Ok(listed)
    }
}

/// Extension to store an original under, taken from the uploader's file name
/// only when it is short and plainly alphanumeric.
pub fn sanitize_extension(file_name_hint: &str) -> String {
    Path::new(file_name_hint)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| (1..=8).contains(&e.len()) && e.bytes().all(|b| b.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
