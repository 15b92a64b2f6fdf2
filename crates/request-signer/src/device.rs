//! Device identity, resolved once per process.

use crate::{SignError, SignResult};
use async_trait::async_trait;
use client_storage::{KeyValueStore, KeyValueStoreExt, StorageKeys};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity fields folded into every signed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub os_type: String,
    pub device_no: String,
    pub device_type: String,
}

/// Map a host OS name (`std::env::consts::OS`) onto the `os_type` values the
/// API accepts. Desktop and other hosts sign as the `web` client.
pub fn wire_os_type(host_os: &str) -> &'static str {
    match host_os {
        "ios" => "ios",
        "android" => "android",
        _ => "web",
    }
}

/// Platform lookup for the device identifier.
#[async_trait]
pub trait DeviceIdentitySource: Send + Sync {
    /// Value reported as `os_type`: `ios`, `android` or `web`.
    fn os_type(&self) -> String;

    /// Read the platform identity. Failures are recovered by [`DeviceIdentityCache`].
    async fn detect(&self) -> SignResult<DeviceInfo>;
}

/// Reads the OS machine id and host name.
pub struct SystemIdentitySource {
    machine_id_paths: Vec<PathBuf>,
    hostname_path: PathBuf,
}

impl Default for SystemIdentitySource {
    fn default() -> Self {
        Self {
            machine_id_paths: vec![
                PathBuf::from("/etc/machine-id"),
                PathBuf::from("/var/lib/dbus/machine-id"),
            ],
            hostname_path: PathBuf::from("/etc/hostname"),
        }
    }
}

impl SystemIdentitySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read alternative files instead of the system locations.
    pub fn with_paths(machine_id_paths: Vec<PathBuf>, hostname_path: PathBuf) -> Self {
        Self {
            machine_id_paths,
            hostname_path,
        }
    }

    async fn read_trimmed(path: &PathBuf) -> Option<String> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let trimmed = content.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    async fn device_type(&self) -> String {
        if let Some(host) = Self::read_trimmed(&self.hostname_path).await {
            return host;
        }
        match std::env::var("HOSTNAME") {
            Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => format!("{} Device", std::env::consts::OS),
        }
    }
}

#[async_trait]
impl DeviceIdentitySource for SystemIdentitySource {
    fn os_type(&self) -> String {
        wire_os_type(std::env::consts::OS).to_string()
    }

    async fn detect(&self) -> SignResult<DeviceInfo> {
        for path in &self.machine_id_paths {
            if let Some(id) = Self::read_trimmed(path).await {
                return Ok(DeviceInfo {
                    os_type: self.os_type(),
                    device_no: id,
                    device_type: self.device_type().await,
                });
            }
        }
        Err(SignError::DeviceDetection("no machine id found".into()))
    }
}

/// Source that always reports the same identity.
#[derive(Debug, Clone)]
pub struct StaticIdentitySource(pub DeviceInfo);

#[async_trait]
impl DeviceIdentitySource for StaticIdentitySource {
    fn os_type(&self) -> String {
        self.0.os_type.clone()
    }

    async fn detect(&self) -> SignResult<DeviceInfo> {
        Ok(self.0.clone())
    }
}

/// Memoizes the device identity for the lifetime of the process.
///
/// The first successful lookup wins; concurrent first callers share it.
/// When detection fails a random upper-case UUID is used instead, reused
/// from the attached store if an earlier run saved one.
pub struct DeviceIdentityCache {
    source: Arc<dyn DeviceIdentitySource>,
    store: Option<Arc<dyn KeyValueStore>>,
    cell: OnceCell<DeviceInfo>,
}

impl DeviceIdentityCache {
    pub fn new(source: Arc<dyn DeviceIdentitySource>) -> Self {
        Self {
            source,
            store: None,
            cell: OnceCell::new(),
        }
    }

    /// Persist the fallback identifier under `device_id`.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cache pre-filled with a known identity.
    pub fn fixed(info: DeviceInfo) -> Self {
        Self {
            source: Arc::new(StaticIdentitySource(info.clone())),
            store: None,
            cell: OnceCell::new_with(Some(info)),
        }
    }

    /// Never fails.
    pub async fn get_device_info(&self) -> DeviceInfo {
        self.cell.get_or_init(|| self.resolve()).await.clone()
    }

    async fn resolve(&self) -> DeviceInfo {
        match self.source.detect().await {
            Ok(info) => {
                debug!(os_type = %info.os_type, "Device identity resolved");
                info
            }
            Err(e) => {
                warn!(error = %e, "Device detection failed, using fallback identity");
                let os_type = self.source.os_type();
                DeviceInfo {
                    device_no: self.fallback_device_no().await,
                    device_type: format!("{} Device", os_type),
                    os_type,
                }
            }
        }
    }

    async fn fallback_device_no(&self) -> String {
        let Some(store) = &self.store else {
            return generate_device_no();
        };

        match store.get_item::<String>(StorageKeys::DEVICE_ID).await {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to read stored device id"),
        }

        let id = generate_device_no();
        if let Err(e) = store.set_item(StorageKeys::DEVICE_ID, id.as_str()).await {
            warn!(error = %e, "Failed to persist device id");
        }
        id
    }
}

fn generate_device_no() -> String {
    Uuid::new_v4().to_string().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use client_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSource {
        detections: AtomicUsize,
    }

    #[async_trait]
    impl DeviceIdentitySource for FailingSource {
        fn os_type(&self) -> String {
            "linux".into()
        }

        async fn detect(&self) -> SignResult<DeviceInfo> {
            self.detections.fetch_add(1, Ordering::SeqCst);
            Err(SignError::DeviceDetection("unavailable".into()))
        }
    }

    fn failing() -> Arc<FailingSource> {
        Arc::new(FailingSource {
            detections: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn fallback_identity_is_uuid_and_memoized() {
        let source = failing();
        let cache = DeviceIdentityCache::new(source.clone());

        let first = cache.get_device_info().await;
        let second = cache.get_device_info().await;

        assert_eq!(first, second);
        assert_eq!(source.detections.load(Ordering::SeqCst), 1);
        assert_eq!(first.os_type, "linux");
        assert_eq!(first.device_type, "linux Device");
        assert_eq!(first.device_no, first.device_no.to_uppercase());
        assert!(Uuid::parse_str(&first.device_no).is_ok());
    }

    #[tokio::test]
    async fn fallback_id_is_persisted_and_reused() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let first = DeviceIdentityCache::new(failing())
            .with_store(store.clone())
            .get_device_info()
            .await;
        assert_eq!(
            store.get_item::<String>(StorageKeys::DEVICE_ID).await.unwrap(),
            Some(first.device_no.clone())
        );

        let second = DeviceIdentityCache::new(failing())
            .with_store(store)
            .get_device_info()
            .await;
        assert_eq!(first.device_no, second.device_no);
    }

    #[tokio::test]
    async fn concurrent_first_calls_detect_once() {
        let source = failing();
        let cache = Arc::new(DeviceIdentityCache::new(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_device_info().await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().device_no);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(source.detections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn system_source_reads_machine_id_and_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let machine_id = dir.path().join("machine-id");
        let hostname = dir.path().join("hostname");
        std::fs::write(&machine_id, "abc123\n").unwrap();
        std::fs::write(&hostname, "workstation\n").unwrap();

        let source = SystemIdentitySource::with_paths(
            vec![dir.path().join("missing"), machine_id],
            hostname,
        );
        let info = source.detect().await.unwrap();

        assert_eq!(info.device_no, "abc123");
        assert_eq!(info.device_type, "workstation");
        assert_eq!(info.os_type, wire_os_type(std::env::consts::OS));
    }

    #[test]
    fn host_os_maps_onto_api_vocabulary() {
        assert_eq!(wire_os_type("ios"), "ios");
        assert_eq!(wire_os_type("android"), "android");
        assert_eq!(wire_os_type("linux"), "web");
        assert_eq!(wire_os_type("macos"), "web");
        assert_eq!(wire_os_type("windows"), "web");
    }

    #[tokio::test]
    async fn system_source_without_machine_id_fails_detection() {
        let dir = tempfile::tempdir().unwrap();
        let source = SystemIdentitySource::with_paths(
            vec![dir.path().join("missing")],
            dir.path().join("hostname"),
        );
        assert!(matches!(source.detect().await, Err(SignError::DeviceDetection(_))));
    }

    #[tokio::test]
    async fn fixed_cache_returns_given_identity() {
        let info = DeviceInfo {
            os_type: "ios".into(),
            device_no: "ABC".into(),
            device_type: "iPhone".into(),
        };
        let cache = DeviceIdentityCache::fixed(info.clone());
        assert_eq!(cache.get_device_info().await, info);
    }
}
