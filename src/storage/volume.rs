//! Named volume management
//!
//! Named volumes are directory-backed and outlive a single run: `down`
//! leaves them in place and only an explicit purge deletes the data.
//! Bind mirrors (live source trees) are not managed here; they belong to
//! the service descriptor and nothing is created or deleted for them.

use crate::error::{BosunError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// A named persistent volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// Mount point on the host
    pub mountpoint: PathBuf,
    /// Volume labels
    pub labels: HashMap<String, String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Volume {
    fn new(name: &str, base_path: &Path) -> Self {
        Self {
            name: name.to_string(),
            mountpoint: base_path.join(name),
            labels: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Get size in bytes
    pub fn size(&self) -> Result<u64> {
        if !self.mountpoint.exists() {
            return Ok(0);
        }

        let mut total = 0u64;
        for entry in walkdir::WalkDir::new(&self.mountpoint)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if let Ok(metadata) = entry.metadata() {
                total += metadata.len();
            }
        }

        Ok(total)
    }
}

/// Volume manager
///
/// Rediscovers existing volume directories on construction, so data written
/// in a previous run is visible to the next one.
pub struct VolumeManager {
    /// Volumes indexed by name
    volumes: Arc<RwLock<HashMap<String, Volume>>>,
    /// Base path for volume storage
    base_path: PathBuf,
}

impl VolumeManager {
    /// Create a manager rooted at `base_path`, adopting any volume
    /// directories already present.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path)?;

        let mut volumes = HashMap::new();
        for entry in std::fs::read_dir(&base_path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    volumes.insert(name.to_string(), Volume::new(name, &base_path));
                }
            }
        }

        Ok(Self {
            volumes: Arc::new(RwLock::new(volumes)),
            base_path,
        })
    }

    /// Ensure a named volume exists, creating its directory if needed.
    /// Idempotent: an existing volume (and its data) is reused as is.
    pub fn ensure(&self, name: &str) -> Result<Volume> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| BosunError::Lock("Failed to acquire write lock".to_string()))?;

        if let Some(existing) = volumes.get(name) {
            return Ok(existing.clone());
        }

        let volume = Volume::new(name, &self.base_path);
        std::fs::create_dir_all(&volume.mountpoint)?;
        volumes.insert(name.to_string(), volume.clone());

        Ok(volume)
    }

    /// Get a volume by name
    pub fn get(&self, name: &str) -> Result<Volume> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| BosunError::Lock("Failed to acquire read lock".to_string()))?;

        volumes
            .get(name)
            .cloned()
            .ok_or_else(|| BosunError::VolumeNotFound(name.to_string()))
    }

    /// List all volumes
    pub fn list(&self) -> Result<Vec<Volume>> {
        let volumes = self
            .volumes
            .read()
            .map_err(|_| BosunError::Lock("Failed to acquire read lock".to_string()))?;

        let mut list: Vec<Volume> = volumes.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Remove a volume and its data
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut volumes = self
            .volumes
            .write()
            .map_err(|_| BosunError::Lock("Failed to acquire write lock".to_string()))?;

        let volume = volumes
            .get(name)
            .ok_or_else(|| BosunError::VolumeNotFound(name.to_string()))?;

        if volume.mountpoint.exists() {
            std::fs::remove_dir_all(&volume.mountpoint)?;
        }
        volumes.remove(name);

        Ok(())
    }

    /// Purge the given volumes, ignoring ones that never materialized.
    /// Only called on an explicit `down --volumes`.
    pub fn purge(&self, names: &[String]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for name in names {
            match self.remove(name) {
                Ok(()) => removed.push(name.clone()),
                Err(BosunError::VolumeNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_creates_and_reuses() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.ensure("shop_pgdata").unwrap();
        assert!(volume.mountpoint.exists());

        // data written between runs survives ensure()
        std::fs::write(volume.mountpoint.join("marker"), b"data").unwrap();
        let again = manager.ensure("shop_pgdata").unwrap();
        assert!(again.mountpoint.join("marker").exists());
    }

    #[test]
    fn test_rediscovery_across_managers() {
        let temp = tempdir().unwrap();
        {
            let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
            let volume = manager.ensure("shop_pgdata").unwrap();
            std::fs::write(volume.mountpoint.join("marker"), b"data").unwrap();
        }

        // a fresh manager over the same base path adopts the volume
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();
        let volume = manager.get("shop_pgdata").unwrap();
        assert!(volume.mountpoint.join("marker").exists());
    }

    #[test]
    fn test_purge_removes_data() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.ensure("shop_pgdata").unwrap();
        std::fs::write(volume.mountpoint.join("marker"), b"data").unwrap();

        let removed = manager
            .purge(&["shop_pgdata".to_string(), "never_created".to_string()])
            .unwrap();
        assert_eq!(removed, vec!["shop_pgdata".to_string()]);
        assert!(!volume.mountpoint.exists());
        assert!(manager.get("shop_pgdata").is_err());
    }

    #[test]
    fn test_size() {
        let temp = tempdir().unwrap();
        let manager = VolumeManager::new(temp.path().to_path_buf()).unwrap();

        let volume = manager.ensure("data").unwrap();
        std::fs::write(volume.mountpoint.join("f"), vec![0u8; 1024]).unwrap();
        assert!(volume.size().unwrap() >= 1024);
    }
}
