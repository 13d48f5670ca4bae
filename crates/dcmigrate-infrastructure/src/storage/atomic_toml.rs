//! Crash-safe TOML document storage.
//!
//! A document is either fully the old version or fully the new one on disk:
//! writes go to a sibling temp file, are fsynced, then renamed over the
//! target, and the containing directory is fsynced so the rename itself
//! survives a power loss. A sibling `.lock` file serializes writers across
//! processes.

use fs2::FileExt;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

use dcmigrate_core::DcmError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed TOML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<StoreError> for DcmError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Parse { path, source } => DcmError::Serialization {
                format: "TOML".to_string(),
                message: format!("{}: {}", path.display(), source),
            },
            StoreError::Serialize(source) => DcmError::Serialization {
                format: "TOML".to_string(),
                message: source.to_string(),
            },
            other => DcmError::persistence(other.to_string()),
        }
    }
}

/// Handle to one TOML document on disk.
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _document: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document under a shared lock.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(T))`: The document exists and parsed
    /// - `Ok(None)`: No document yet, or the file is blank
    /// - `Err(_)`: The file could not be read or is not valid TOML for `T`
    pub fn load(&self) -> Result<Option<T>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _lock = FileLock::shared(&self.path)?;
        self.read_unlocked()
    }

    /// Replaces the document under an exclusive lock.
    pub fn save(&self, data: &T) -> Result<(), StoreError> {
        let _lock = FileLock::exclusive(&self.path)?;
        self.write_unlocked(data)
    }

    /// Read-modify-write under one exclusive lock. `f` edits the document in
    /// place and its output is returned once the edit is durable. Nothing is
    /// written when `f` fails.
    pub fn update<F, R, E>(&self, default_value: T, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut T) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _lock = FileLock::exclusive(&self.path)?;
        let mut data = self.read_unlocked()?.unwrap_or(default_value);
        let output = f(&mut data)?;
        self.write_unlocked(&data)?;
        Ok(output)
    }

    fn read_unlocked(&self) -> Result<Option<T>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn write_unlocked(&self, data: &T) -> Result<(), StoreError> {
        let document = toml::to_string_pretty(data)?;
        let tmp_path = self.temp_path()?;

        let mut tmp_file = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp_file
            .write_all(document.as_bytes())
            .and_then(|_| tmp_file.sync_all())
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::io(&self.path, e)
        })?;
        sync_parent_dir(&self.path)
    }

    fn temp_path(&self) -> Result<PathBuf, StoreError> {
        let file_name = self.path.file_name().ok_or_else(|| {
            StoreError::io(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
        let tmp_name = format!(".{}.tmp", file_name.to_string_lossy());
        Ok(self.path.with_file_name(tmp_name))
    }
}

/// Flushes the directory entry of `path` to disk.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| StoreError::io(parent, e))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Advisory lock held on `<file>.lock` until dropped.
///
/// The lock file is left in place; removing it while another process waits
/// on it would let two writers in.
struct FileLock {
    file: File,
}

impl FileLock {
    fn exclusive(path: &Path) -> Result<Self, StoreError> {
        let lock = Self::open(path)?;
        lock.file
            .lock_exclusive()
            .map_err(|source| StoreError::Lock {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(lock)
    }

    fn shared(path: &Path) -> Result<Self, StoreError> {
        let lock = Self::open(path)?;
        lock.file.lock_shared().map_err(|source| StoreError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(lock)
    }

    fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
            }
        }
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        stage: String,
        resets: u32,
    }

    fn checkpoint(stage: &str) -> Checkpoint {
        Checkpoint {
            stage: stage.to_string(),
            resets: 0,
        }
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Checkpoint>::new(temp_dir.path().join("state.toml"));

        file.save(&checkpoint("db_export")).unwrap();

        assert_eq!(file.load().unwrap(), Some(checkpoint("db_export")));
    }

    #[test]
    fn test_missing_and_blank_files_load_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.toml");
        let file = AtomicTomlFile::<Checkpoint>::new(&path);
        assert!(file.load().unwrap().is_none());

        fs::write(&path, "  \n").unwrap();
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.toml");
        fs::write(&path, "stage = [unterminated").unwrap();

        let err = AtomicTomlFile::<Checkpoint>::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));

        let err: DcmError = err.into();
        assert!(matches!(err, DcmError::Serialization { .. }));
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.toml");
        let file = AtomicTomlFile::<Checkpoint>::new(&path);

        file.save(&checkpoint("authentication")).unwrap();

        assert!(path.exists());
        assert!(!path.with_file_name(".state.toml.tmp").exists());
    }

    #[test]
    fn test_save_syncs_containing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.toml");

        sync_parent_dir(&path).unwrap();
        AtomicTomlFile::<Checkpoint>::new(&path)
            .save(&checkpoint("final_sync"))
            .unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_sync_reports_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent").join("state.toml");

        let err = sync_parent_dir(&missing).unwrap_err();
        assert!(matches!(err, StoreError::Io { ref path, .. } if path.ends_with("absent")));
    }

    #[test]
    fn test_update_applies_to_default_then_existing() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Checkpoint>::new(temp_dir.path().join("state.toml"));

        let resets = file
            .update(checkpoint("not_started"), |c| {
                c.resets += 1;
                Ok::<_, StoreError>(c.resets)
            })
            .unwrap();
        assert_eq!(resets, 1);

        let before = file
            .update(checkpoint("not_started"), |c| {
                let before = c.clone();
                c.resets += 1;
                Ok::<_, StoreError>(before)
            })
            .unwrap();
        assert_eq!(before.resets, 1);
        assert_eq!(file.load().unwrap().unwrap().resets, 2);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let file = AtomicTomlFile::<Checkpoint>::new(temp_dir.path().join("state.toml"));
        file.save(&checkpoint("validate")).unwrap();

        let result: Result<(), DcmError> = file.update(checkpoint("not_started"), |c| {
            c.stage = "finished".to_string();
            Err(DcmError::internal("refused"))
        });

        assert!(result.is_err());
        assert_eq!(file.load().unwrap(), Some(checkpoint("validate")));
    }
}
