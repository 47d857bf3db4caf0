//! Generated audio artifacts on disk
//!
//! Every synthesis reserves an id of the form `tts_<unix-millis>`, suffixed
//! with `_<n>` when several are reserved in the same millisecond. Files live
//! flat in the output directory until explicitly deleted.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::OutputFormat;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("audio file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reserved identifier of one synthesis artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered artifact
#[derive(Debug, Clone, Serialize)]
pub struct AudioArtifactRecord {
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub format: Option<OutputFormat>,
    /// Unix seconds
    pub created_at: f64,
}

impl AudioArtifactRecord {
    /// Public URL path under which the artifact is served
    pub fn url(&self) -> String {
        format!("/audio/{}", self.file_name)
    }
}

/// Artifact bytes ready to be served
#[derive(Debug, Clone)]
pub struct StoredAudio {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Default)]
struct IdClock {
    last_millis: u128,
    sequence: u32,
}

#[derive(Debug)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    clock: Mutex<IdClock>,
}

impl ArtifactStore {
    /// Open the store, creating the output directory if needed.
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            clock: Mutex::new(IdClock::default()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Reserve a fresh artifact id
    pub fn reserve(&self) -> ArtifactId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let mut clock = match self.clock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Never step backwards if the wall clock does.
        let millis = millis.max(clock.last_millis);
        if millis == clock.last_millis {
            clock.sequence += 1;
        } else {
            clock.last_millis = millis;
            clock.sequence = 0;
        }

        if clock.sequence == 0 {
            ArtifactId(format!("tts_{millis}"))
        } else {
            ArtifactId(format!("tts_{millis}_{}", clock.sequence))
        }
    }

    pub fn path_for(&self, id: &ArtifactId, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{id}.{extension}"))
    }

    /// Record the final file of a synthesis
    pub fn register(&self, id: &ArtifactId, path: &Path) -> AudioArtifactRecord {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        debug!(id = %id, file = %file_name, "registered artifact");
        AudioArtifactRecord {
            id: id.to_string(),
            file_name,
            path: path.to_path_buf(),
            format: OutputFormat::from_path(path),
            created_at,
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        check_name(name)?;
        let path = self.output_dir.join(name);
        if !path.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    pub async fn get(&self, name: &str) -> Result<StoredAudio, StoreError> {
        let path = self.resolve(name)?;
        let bytes = tokio::fs::read(&path).await?;
        let content_type = OutputFormat::from_path(&path)
            .unwrap_or(OutputFormat::Wav)
            .content_type();
        Ok(StoredAudio {
            bytes,
            content_type,
        })
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.resolve(name)?;
        tokio::fs::remove_file(&path).await?;
        info!(file = %name, "deleted audio artifact");
        Ok(())
    }
}

/// Reject anything that is not a bare file name.
pub(crate) fn check_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
