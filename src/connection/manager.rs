//! Connection manager - verifies and re-establishes device reachability

use crate::command::CommandExecutor;
use crate::device::DeviceRegistry;
use courier_shared::{now_ms, Device, DispatchError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Owns the last observed reachability of every configured device
pub struct ConnectionManager {
    registry: Arc<DeviceRegistry>,
    executor: Arc<CommandExecutor>,
    /// Device records by name; only this manager writes them
    devices: RwLock<HashMap<String, Device>>,
}

impl ConnectionManager {
    /// Create a new connection manager; nothing is checked until first use
    pub fn new(registry: Arc<DeviceRegistry>, executor: Arc<CommandExecutor>) -> Self {
        let devices = registry
            .devices()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        Self {
            registry,
            executor,
            devices: RwLock::new(devices),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// Query the bridge and record the connected set
    ///
    /// A failed listing is treated as "nothing connected".
    pub async fn refresh(&self) -> HashSet<String> {
        let connected = match self.executor.list_connected().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("[CONN] Failed to list connected devices: {}", e);
                HashSet::new()
            }
        };

        let checked_at = now_ms();
        let mut devices = self.devices.write().await;
        for device in devices.values_mut() {
            device.observe(connected.contains(&device.id), checked_at);
        }

        connected
    }

    /// Check whether a configured device is currently reachable
    pub async fn is_connected(&self, name: &str) -> Result<bool, DispatchError> {
        let id = self.registry.resolve(name)?.to_string();
        Ok(self.refresh().await.contains(&id))
    }

    /// Make sure a device is reachable, connecting it if needed
    ///
    /// An already-connected device costs one listing and no connect.
    pub async fn ensure_connected(&self, name: &str) -> Result<bool, DispatchError> {
        if self.is_connected(name).await? {
            return Ok(true);
        }
        self.reconnect(name).await
    }

    /// Issue `connect <id>` for a device and re-check membership
    pub async fn reconnect(&self, name: &str) -> Result<bool, DispatchError> {
        let id = self.registry.resolve(name)?.to_string();
        Ok(self.connect_id(name, &id).await)
    }

    async fn connect_id(&self, name: &str, id: &str) -> bool {
        info!("[CONN] Connecting {} ({})", name, id);

        if let Err(e) = self.executor.connect(id).await {
            error!("[CONN] Connect {} ({}) failed: {}", name, id, e);
            return false;
        }

        // `connect` exits 0 even when the device refuses, so verify
        let connected = self.refresh().await.contains(id);
        if connected {
            info!("[CONN] {} ({}) connected", name, id);
        } else {
            warn!("[CONN] {} ({}) still unreachable after connect", name, id);
        }
        connected
    }

    /// Attempt every configured device independently
    pub async fn connect_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::with_capacity(self.registry.len());

        for entry in self.registry.entries() {
            let connected = self.connect_id(&entry.name, &entry.id).await;
            results.insert(entry.name.clone(), connected);
        }

        results
    }

    /// Names of configured devices that are currently connected
    pub async fn connected_names(&self) -> Vec<String> {
        let connected = self.refresh().await;
        self.registry
            .entries()
            .iter()
            .filter(|e| connected.contains(&e.id))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Run a device command by name
    ///
    /// On failure the connection is re-verified so the log tells an
    /// unreachable device apart from a failing command; the original error
    /// is returned either way.
    pub async fn execute_on(
        &self,
        name: &str,
        args: &[&str],
        retry: bool,
    ) -> Result<String, DispatchError> {
        let id = self.registry.resolve(name)?.to_string();

        match self.executor.run(&id, args, retry).await {
            Ok(output) => Ok(output),
            Err(e) => {
                if !self.refresh().await.contains(&id) {
                    warn!("[CONN] {} ({}) is not connected, command failed", name, id);
                }
                Err(e)
            }
        }
    }

    /// Snapshot of every device record in configuration order
    pub async fn snapshot(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        self.registry
            .names()
            .filter_map(|name| devices.get(name).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::scripted::{device_listing, Reply, ScriptedBridge};
    use crate::command::ExecutorConfig;
    use crate::device::DeviceEntry;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn manager(bridge: &Arc<ScriptedBridge>) -> ConnectionManager {
        let registry = DeviceRegistry::new(
            vec![
                DeviceEntry::new("dev1", "10.0.0.1:5555"),
                DeviceEntry::new("dev2", "10.0.0.2:5555"),
                DeviceEntry::new("dev3", "10.0.0.3:5555"),
            ],
            HashMap::new(),
        );
        let executor = CommandExecutor::new(
            bridge.clone(),
            ExecutorConfig {
                max_retry: 1,
                retry_interval: Duration::from_millis(5),
                command_timeout: Duration::from_millis(500),
            },
        );
        ConnectionManager::new(Arc::new(registry), Arc::new(executor))
    }

    #[tokio::test]
    async fn test_unknown_device_spawns_nothing() {
        let bridge = Arc::new(ScriptedBridge::new(|_| Reply::ok("")));
        let conn = manager(&bridge);

        assert_eq!(
            conn.is_connected("ghost").await,
            Err(DispatchError::UnknownDevice("ghost".into()))
        );
        assert!(conn.execute_on("ghost", &["shell", "ls"], true).await.is_err());
        assert!(bridge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_connected_is_idempotent() {
        let bridge = Arc::new(ScriptedBridge::new(|_| {
            Reply::ok(&device_listing(&["10.0.0.1:5555"]))
        }));
        let conn = manager(&bridge);

        assert!(conn.ensure_connected("dev1").await.unwrap());
        assert!(conn.ensure_connected("dev1").await.unwrap());
        assert_eq!(bridge.count("devices"), 2);
        assert_eq!(bridge.count("connect"), 0);
    }

    #[tokio::test]
    async fn test_ensure_connected_reconnects() {
        let attached = Arc::new(AtomicBool::new(false));
        let state = attached.clone();
        let bridge = Arc::new(ScriptedBridge::new(move |args| match args[0].as_str() {
            "connect" => {
                state.store(true, Ordering::SeqCst);
                Reply::ok("connected to 10.0.0.2:5555")
            }
            _ if state.load(Ordering::SeqCst) => Reply::ok(&device_listing(&["10.0.0.2:5555"])),
            _ => Reply::ok(&device_listing(&[])),
        }));
        let conn = manager(&bridge);

        assert!(!conn.is_connected("dev2").await.unwrap());
        assert!(conn.ensure_connected("dev2").await.unwrap());
        assert_eq!(bridge.count("connect"), 1);

        let snapshot = conn.snapshot().await;
        assert!(snapshot.iter().find(|d| d.name == "dev2").unwrap().connected);
        assert!(snapshot.iter().all(|d| d.last_checked_ms > 0));
    }

    #[tokio::test]
    async fn test_ensure_connected_gives_up() {
        let bridge = Arc::new(ScriptedBridge::new(|args| match args[0].as_str() {
            "connect" => Reply::ok("failed to connect to 10.0.0.3:5555"),
            _ => Reply::ok(&device_listing(&[])),
        }));
        let conn = manager(&bridge);

        assert!(!conn.ensure_connected("dev3").await.unwrap());
        assert_eq!(bridge.count("connect"), 1);
    }

    #[tokio::test]
    async fn test_connect_all_isolates_failures() {
        let bridge = Arc::new(ScriptedBridge::new(|args| match args {
            [cmd, id] if cmd == "connect" && id == "10.0.0.2:5555" => {
                Reply::fail("cannot connect to 10.0.0.2:5555")
            }
            [cmd, _] if cmd == "connect" => Reply::ok("connected"),
            _ => Reply::ok(&device_listing(&["10.0.0.1:5555", "10.0.0.3:5555"])),
        }));
        let conn = manager(&bridge);

        let results = conn.connect_all().await;
        assert_eq!(results.len(), 3);
        assert!(results["dev1"]);
        assert!(!results["dev2"]);
        assert!(results["dev3"]);
    }

    #[tokio::test]
    async fn test_connected_names_maps_ids_back() {
        let bridge = Arc::new(ScriptedBridge::new(|_| {
            Reply::ok(&device_listing(&["10.0.0.3:5555", "stranger:5555"]))
        }));
        let conn = manager(&bridge);

        assert_eq!(conn.connected_names().await, vec!["dev3".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_on_reverifies_after_failure() {
        let bridge = Arc::new(ScriptedBridge::new(|args| match args[0].as_str() {
            "devices" => Reply::ok(&device_listing(&[])),
            _ => Reply::fail("error: device '10.0.0.1:5555' not found"),
        }));
        let conn = manager(&bridge);

        let result = conn.execute_on("dev1", &["shell", "ls"], true).await;
        assert!(matches!(
            result,
            Err(DispatchError::CommandFailed { attempts: 2, .. })
        ));
        assert_eq!(bridge.count("devices"), 1);
    }
}
