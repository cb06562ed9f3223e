//! Local file-based registry backend.
//!
//! One JSON document per instance under a base directory. Writes go through
//! a temporary file that is synced before it is moved into place, so a crash
//! never leaves a half-written record behind.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

use super::store::{sort_instances, AddonRegistry, RegistryResult};
use super::types::{AddonIdentity, AddonInstance, PartialIdentity};

/// Default registry directory name.
const REGISTRY_DIR: &str = ".atom-addons/registry";

/// Record file extension.
const RECORD_EXT: &str = "json";

/// Local file-based registry.
#[derive(Debug, Clone)]
pub struct LocalAddonRegistry {
    /// Directory holding one file per record.
    base_dir: PathBuf,
}

impl LocalAddonRegistry {
    /// Creates a registry in the default directory under the home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> RegistryResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| RegistryError::unavailable("Cannot determine home directory"))?;
        Ok(Self::with_base_dir(home.join(REGISTRY_DIR)))
    }

    /// Creates a registry in a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the registry directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, identity: &AddonIdentity) -> PathBuf {
        self.base_dir
            .join(format!("{}.{RECORD_EXT}", identity.storage_key()))
    }

    fn temp_path(&self, identity: &AddonIdentity) -> PathBuf {
        self.base_dir.join(format!(
            ".{}.{}.tmp",
            identity.storage_key(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Ensures the registry directory exists.
    async fn ensure_dir(&self) -> RegistryResult<()> {
        if !self.base_dir.exists() {
            debug!("Creating registry directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                RegistryError::unavailable(format!("Failed to create registry directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Writes a record to a synced temporary file and returns its path.
    async fn write_temp(&self, instance: &AddonInstance) -> RegistryResult<PathBuf> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(instance).map_err(|e| {
            RegistryError::serialization(format!("Failed to serialize record: {e}"))
        })?;

        let temp_path = self.temp_path(&instance.identity);
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| RegistryError::unavailable(format!("Failed to create temp file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| RegistryError::unavailable(format!("Failed to write record: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| RegistryError::unavailable(format!("Failed to sync record: {e}")))?;

        Ok(temp_path)
    }

    /// Removes a temporary file that was not moved into place.
    async fn discard_temp(temp_path: &Path) {
        if let Err(e) = fs::remove_file(temp_path).await {
            warn!("Failed to remove temp file {}: {e}", temp_path.display());
        }
    }

    async fn read_record(path: &Path) -> RegistryResult<Option<AddonInstance>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RegistryError::unavailable(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            RegistryError::corrupted(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl AddonRegistry for LocalAddonRegistry {
    async fn exists(&self, identity: &AddonIdentity) -> RegistryResult<bool> {
        fs::try_exists(self.record_path(identity))
            .await
            .map_err(|e| RegistryError::unavailable(format!("Failed to check record: {e}")))
    }

    async fn store(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let path = self.record_path(&instance.identity);
        let temp_path = self.write_temp(instance).await?;

        // Linking fails if the target exists, which makes the store exclusive
        let linked = fs::hard_link(&temp_path, &path).await;
        Self::discard_temp(&temp_path).await;

        match linked {
            Ok(()) => {
                info!("Stored record {} at {}", instance.identity, path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(RegistryError::Conflict {
                identity: instance.identity.to_string(),
            }),
            Err(e) => Err(RegistryError::unavailable(format!("Failed to store record: {e}"))),
        }
    }

    async fn get(&self, identity: &AddonIdentity) -> RegistryResult<AddonInstance> {
        Self::read_record(&self.record_path(identity))
            .await?
            .ok_or_else(|| RegistryError::NotFound {
                identity: identity.to_string(),
            })
    }

    async fn update(&self, instance: &AddonInstance) -> RegistryResult<()> {
        let path = self.record_path(&instance.identity);
        if !self.exists(&instance.identity).await? {
            return Err(RegistryError::NotFound {
                identity: instance.identity.to_string(),
            });
        }

        let temp_path = self.write_temp(instance).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            Self::discard_temp(&temp_path).await;
            return Err(RegistryError::unavailable(format!("Failed to replace record: {e}")));
        }

        debug!("Updated record {}", instance.identity);
        Ok(())
    }

    async fn delete(&self, identity: &AddonIdentity) -> RegistryResult<()> {
        match fs::remove_file(self.record_path(identity)).await {
            Ok(()) => {
                info!("Deleted record {identity}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RegistryError::NotFound {
                identity: identity.to_string(),
            }),
            Err(e) => Err(RegistryError::unavailable(format!("Failed to delete record: {e}"))),
        }
    }

    async fn list(&self, filter: &PartialIdentity) -> RegistryResult<Vec<AddonInstance>> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::unavailable(format!("Failed to list registry: {e}"))),
        };

        let mut instances = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::unavailable(format!("Failed to list registry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(instance)) if filter.matches(&instance.identity) => instances.push(instance),
                Ok(_) => {}
                Err(RegistryError::Corrupted { message }) => warn!("Skipping record: {message}"),
                Err(e) => return Err(e),
            }
        }

        sort_instances(&mut instances);
        Ok(instances)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::instance;
    use crate::registry::{AddonType, InstanceStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_and_get() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path());
        let record = instance(AddonType::MySqlV5, "orders");

        assert!(!registry.exists(&record.identity).await.expect("exists"));
        registry.store(&record).await.expect("store");
        assert!(registry.exists(&record.identity).await.expect("exists"));

        let loaded = registry.get(&record.identity).await.expect("get");
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_store_conflict_leaves_original() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path());
        let record = instance(AddonType::MySqlV5, "orders");
        registry.store(&record).await.expect("store");

        let mut other = record.clone();
        other.status = InstanceStatus::Degraded;
        let result = registry.store(&other).await;
        assert!(matches!(result, Err(RegistryError::Conflict { .. })));

        let loaded = registry.get(&record.identity).await.expect("get");
        assert_eq!(loaded.status, InstanceStatus::Ready);

        // No temp files are left behind
        let count = std::fs::read_dir(temp_dir.path()).expect("read dir").count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path());
        let mut record = instance(AddonType::Redis, "cache");

        assert!(matches!(registry.update(&record).await, Err(RegistryError::NotFound { .. })));

        registry.store(&record).await.expect("store");
        record.status = InstanceStatus::Maintenance;
        registry.update(&record).await.expect("update");
        assert_eq!(
            registry.get(&record.identity).await.expect("get").status,
            InstanceStatus::Maintenance
        );

        registry.delete(&record.identity).await.expect("delete");
        assert!(matches!(
            registry.get(&record.identity).await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.delete(&record.identity).await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_update_removes_temp_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path());
        let record = instance(AddonType::Redis, "cache");

        // A non-empty directory where the record belongs makes the rename fail
        let record_path = registry.record_path(&record.identity);
        std::fs::create_dir_all(record_path.join("blocker")).expect("create dir");

        let result = registry.update(&record).await;
        assert!(matches!(result, Err(RegistryError::Unavailable { .. })));

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .expect("read dir")
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_records() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path());
        registry.store(&instance(AddonType::Redis, "cache")).await.expect("store");
        registry.store(&instance(AddonType::MySqlV5, "orders")).await.expect("store");
        std::fs::write(temp_dir.path().join("garbage.json"), "{not json").expect("write");

        let all = registry.list(&PartialIdentity::new("dev", "shop")).await.expect("list");
        assert_eq!(all.len(), 2);

        let others = registry
            .list_excluding_type(&PartialIdentity::new("dev", "shop"), AddonType::Redis)
            .await
            .expect("list");
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].identity.name, "orders");
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let registry = LocalAddonRegistry::with_base_dir(temp_dir.path().join("absent"));
        let all = registry.list(&PartialIdentity::new("dev", "shop")).await.expect("list");
        assert!(all.is_empty());
    }
}
