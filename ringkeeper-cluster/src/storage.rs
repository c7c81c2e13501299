//! Durable ring and builder files.
//!
//! Every commit writes a versioned pair (`{version}-{service}.ring` and
//! `{version}-{service}.builder`) and, once replicated, the canonical pair
//! (`{service}.ring` and `{service}.builder`). Versioned files are never
//! removed.

use crate::error::{ClusterError, ClusterResult};
use ringkeeper_core::RingVersion;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write as IoWrite};
use std::path::{Path, PathBuf};

/// Which pair of files an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The files written for one version.
    Versioned(RingVersion),
    /// The canonical pointer files.
    Canonical,
}

/// Which file of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Serialized ring.
    Ring,
    /// Serialized builder.
    Builder,
}

impl FileKind {
    fn extension(self) -> &'static str {
        match self {
            FileKind::Ring => "ring",
            FileKind::Builder => "builder",
        }
    }
}

/// Ring and builder bytes read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPair {
    /// Serialized ring.
    pub ring: Vec<u8>,
    /// Serialized builder.
    pub builder: Vec<u8>,
}

/// Persistence for ring and builder files.
pub trait RingStorage: Send + Sync {
    /// Durably write one file.
    fn persist(&self, slot: Slot, kind: FileKind, bytes: &[u8]) -> ClusterResult<()>;

    /// Read one file.
    fn read(&self, slot: Slot, kind: FileKind) -> ClusterResult<Vec<u8>>;

    /// Whether both canonical files exist.
    fn has_canonical(&self) -> bool;

    /// Versions with both files present, ascending.
    fn versions(&self) -> ClusterResult<Vec<RingVersion>>;

    /// Read both files of a slot.
    fn load(&self, slot: Slot) -> ClusterResult<StoredPair> {
        Ok(StoredPair {
            ring: self.read(slot, FileKind::Ring)?,
            builder: self.read(slot, FileKind::Builder)?,
        })
    }

    /// The pair to start from: canonical if present, else the newest
    /// versioned pair.
    fn load_latest(&self) -> ClusterResult<Option<(Slot, StoredPair)>> {
        if self.has_canonical() {
            return Ok(Some((Slot::Canonical, self.load(Slot::Canonical)?)));
        }
        match self.versions()?.last() {
            Some(&version) => {
                let slot = Slot::Versioned(version);
                Ok(Some((slot, self.load(slot)?)))
            }
            None => Ok(None),
        }
    }
}

/// File-backed [`RingStorage`] rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileRingStorage {
    dir: PathBuf,
    service: String,
}

impl FileRingStorage {
    /// Open storage for `service` in `dir`. The directory must exist.
    pub fn new(dir: impl Into<PathBuf>, service: impl Into<String>) -> ClusterResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(ClusterError::storage(&dir, "ring directory does not exist"));
        }
        Ok(Self {
            dir,
            service: service.into(),
        })
    }

    /// Directory files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of a file.
    pub fn path(&self, slot: Slot, kind: FileKind) -> PathBuf {
        let name = match slot {
            Slot::Versioned(version) => {
                format!("{version}-{}.{}", self.service, kind.extension())
            }
            Slot::Canonical => format!("{}.{}", self.service, kind.extension()),
        };
        self.dir.join(name)
    }

    fn parse_version(&self, file_name: &str) -> Option<RingVersion> {
        let suffix = format!("-{}.{}", self.service, FileKind::Ring.extension());
        file_name.strip_suffix(suffix.as_str())?.parse().ok()
    }
}

impl RingStorage for FileRingStorage {
    fn persist(&self, slot: Slot, kind: FileKind, bytes: &[u8]) -> ClusterResult<()> {
        let path = self.path(slot, kind);
        let mut temp_path = path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let write = || -> std::io::Result<()> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            fs::rename(&temp_path, &path)
        };

        write().map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            ClusterError::storage(&path, e)
        })?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "persisted ring file");
        Ok(())
    }

    fn read(&self, slot: Slot, kind: FileKind) -> ClusterResult<Vec<u8>> {
        let path = self.path(slot, kind);
        fs::read(&path).map_err(|e| ClusterError::storage(&path, e))
    }

    fn has_canonical(&self) -> bool {
        self.path(Slot::Canonical, FileKind::Ring).is_file()
            && self.path(Slot::Canonical, FileKind::Builder).is_file()
    }

    fn versions(&self) -> ClusterResult<Vec<RingVersion>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| ClusterError::storage(&self.dir, e))?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ClusterError::storage(&self.dir, e))?;
            let name = entry.file_name();
            let Some(version) = name.to_str().and_then(|n| self.parse_version(n)) else {
                continue;
            };
            if self
                .path(Slot::Versioned(version), FileKind::Builder)
                .is_file()
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_dir_is_fatal() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("nope");
        let err = FileRingStorage::new(&missing, "objects").unwrap_err();
        assert!(matches!(err, ClusterError::Storage { .. }));
    }

    #[test]
    fn test_file_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FileRingStorage::new(temp_dir.path(), "objects").unwrap();

        storage.persist(Slot::Versioned(7), FileKind::Ring, b"r7").unwrap();
        storage.persist(Slot::Canonical, FileKind::Builder, b"b").unwrap();

        assert!(temp_dir.path().join("7-objects.ring").is_file());
        assert!(temp_dir.path().join("objects.builder").is_file());
        assert!(!temp_dir.path().join("7-objects.ring.tmp").exists());
        assert_eq!(storage.read(Slot::Versioned(7), FileKind::Ring).unwrap(), b"r7");
    }

    #[test]
    fn test_load_latest_prefers_canonical() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage = FileRingStorage::new(temp_dir.path(), "objects").unwrap();
        assert!(storage.load_latest().unwrap().is_none());

        for version in [2u64, 10, 9] {
            let slot = Slot::Versioned(version);
            storage.persist(slot, FileKind::Ring, format!("r{version}").as_bytes()).unwrap();
            storage.persist(slot, FileKind::Builder, b"b").unwrap();
        }
        // Ring without builder is not a complete pair.
        storage.persist(Slot::Versioned(11), FileKind::Ring, b"r11").unwrap();

        assert_eq!(storage.versions().unwrap(), vec![2, 9, 10]);
        let (slot, pair) = storage.load_latest().unwrap().unwrap();
        assert_eq!(slot, Slot::Versioned(10));
        assert_eq!(pair.ring, b"r10");

        storage.persist(Slot::Canonical, FileKind::Ring, b"rc").unwrap();
        storage.persist(Slot::Canonical, FileKind::Builder, b"bc").unwrap();
        let (slot, pair) = storage.load_latest().unwrap().unwrap();
        assert_eq!(slot, Slot::Canonical);
        assert_eq!(pair.builder, b"bc");
    }

    #[test]
    fn test_services_do_not_collide() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let objects = FileRingStorage::new(temp_dir.path(), "objects").unwrap();
        let accounts = FileRingStorage::new(temp_dir.path(), "accounts").unwrap();

        objects.persist(Slot::Versioned(3), FileKind::Ring, b"r").unwrap();
        objects.persist(Slot::Versioned(3), FileKind::Builder, b"b").unwrap();

        assert_eq!(objects.versions().unwrap(), vec![3]);
        assert!(accounts.versions().unwrap().is_empty());
    }
}
