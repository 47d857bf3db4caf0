//! Reference voice library
//!
//! A flat directory of audio clips the engine clones voices from. Requests
//! name a clip by file name; the HTTP surface lists and uploads clips and the
//! `refs` subcommand manages them locally.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;
use tracing::info;

use crate::protocol::ReferenceAudioInfo;
use crate::store::check_name;
use crate::transcode::{inspect, AudioInfo};

/// Extensions accepted as reference audio, lowercase
pub const REFERENCE_EXTENSIONS: [&str; 4] = ["mp3", "wav", "flac", "m4a"];

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("reference audio not found: {0}")]
    NotFound(String),

    #[error("reference audio already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid reference name: {0}")]
    InvalidName(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not inspect {name}: {reason}")]
    Inspect { name: String, reason: String },
}

pub fn is_supported(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| REFERENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct ReferenceLibrary {
    dir: PathBuf,
}

impl ReferenceLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, name: &str) -> Result<PathBuf, ReferenceError> {
        check_name(name).map_err(|_| ReferenceError::InvalidName(name.to_string()))?;
        Ok(self.dir.join(name))
    }

    /// Path of an existing reference clip
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ReferenceError> {
        let path = self
            .path_of(name)
            .map_err(|_| ReferenceError::NotFound(name.to_string()))?;
        if !path.is_file() {
            return Err(ReferenceError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    /// All supported clips, sorted by file name. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<ReferenceAudioInfo>, ReferenceError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        for entry in entries {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if !is_supported(&filename) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            infos.push(ReferenceAudioInfo {
                filename,
                size: meta.len(),
                modified,
            });
        }
        infos.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(infos)
    }

    /// Store uploaded bytes under `name`, replacing any existing clip.
    pub fn save(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ReferenceError> {
        if !is_supported(name) {
            return Err(ReferenceError::UnsupportedFormat(name.to_string()));
        }
        let target = self.path_of(name)?;
        std::fs::create_dir_all(&self.dir)?;

        let partial = self.dir.join(format!(".{}.part", uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&partial, bytes) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&partial, &target) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }

        info!(file = %name, bytes = bytes.len(), "saved reference audio");
        Ok(target)
    }

    /// Copy a local file into the library, named `name` or the source's file name.
    pub fn add(
        &self,
        source: &Path,
        name: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf, ReferenceError> {
        if !source.is_file() {
            return Err(ReferenceError::NotFound(source.display().to_string()));
        }
        let name = match name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ReferenceError::InvalidName(source.display().to_string()))?,
        };
        if !is_supported(&name) {
            return Err(ReferenceError::UnsupportedFormat(name));
        }
        let target = self.path_of(&name)?;
        if target.exists() && !overwrite {
            return Err(ReferenceError::AlreadyExists(name));
        }

        std::fs::create_dir_all(&self.dir)?;
        std::fs::copy(source, &target)?;
        info!(file = %name, source = %source.display(), "added reference audio");
        Ok(target)
    }

    pub fn remove(&self, name: &str) -> Result<(), ReferenceError> {
        let path = self.resolve(name)?;
        std::fs::remove_file(path)?;
        info!(file = %name, "removed reference audio");
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<PathBuf, ReferenceError> {
        let from = self.resolve(old)?;
        let to = self.path_of(new)?;
        if to.exists() {
            return Err(ReferenceError::AlreadyExists(new.to_string()));
        }
        std::fs::rename(from, &to)?;
        info!(from = %old, to = %new, "renamed reference audio");
        Ok(to)
    }

    /// Decode a clip and report its format
    pub fn inspect(&self, name: &str) -> Result<AudioInfo, ReferenceError> {
        let path = self.resolve(name)?;
        inspect(&path).map_err(|e| ReferenceError::Inspect {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
