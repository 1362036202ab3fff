//! BLE scanning functionality.
//!
//! Provides the scanner for discovering peripherals that advertise the
//! provisioning service. The connector uses it to locate peripherals the
//! adapter has not seen yet.

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::ble::address::DeviceAddress;
use crate::ble::uuids::{is_provisioning_service, PROVISIONING_SERVICE_UUID};
use crate::error::{Error, Result};

/// Get the first Bluetooth adapter on this system.
///
/// # Errors
///
/// Returns [`Error::BluetoothUnavailable`] if there is no usable adapter.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|_e| Error::BluetoothUnavailable)?;

    let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

    let adapter = adapters
        .into_iter()
        .next()
        .ok_or(Error::BluetoothUnavailable)?;

    info!(
        "Using Bluetooth adapter: {:?}",
        adapter.adapter_info().await.ok()
    );

    Ok(adapter)
}

/// A peripheral advertising the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// The peripheral address.
    pub address: DeviceAddress,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Build a device from advertisement properties.
    ///
    /// Returns `None` unless the provisioning service is advertised.
    pub fn from_properties(properties: &PeripheralProperties) -> Option<Self> {
        if !properties.services.iter().any(is_provisioning_service) {
            return None;
        }

        Some(Self {
            address: DeviceAddress::from(properties.address),
            name: properties.local_name.clone(),
            rssi: properties.rssi,
        })
    }
}

/// Peripherals seen so far, keyed by address.
#[derive(Debug, Default)]
struct DiscoveryTable {
    devices: RwLock<HashMap<DeviceAddress, DiscoveredDevice>>,
}

impl DiscoveryTable {
    /// Store the latest sighting of `device`.
    fn record(&self, device: DiscoveredDevice) {
        self.devices.write().insert(device.address, device);
    }

    fn get(&self, address: DeviceAddress) -> Option<DiscoveredDevice> {
        self.devices.read().get(&address).cloned()
    }

    fn sorted(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<DiscoveredDevice> = self.devices.read().values().cloned().collect();
        sort_by_signal(&mut devices);
        devices
    }
}

/// BLE scanner for discovering provisioning peripherals.
pub struct ProvisioningScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Discovered peripherals.
    discovered: Arc<DiscoveryTable>,
    /// Channel for discovery events.
    event_tx: broadcast::Sender<DiscoveredDevice>,
    /// Handle to the scanning task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
    /// Number of [`ProvisioningScanner::find`] calls relying on the scan.
    finders: Mutex<usize>,
}

impl ProvisioningScanner {
    /// Create a scanner on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_adapter(default_adapter().await?))
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(DiscoveryTable::default()),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
            finders: Mutex::new(0),
        }
    }

    /// Start scanning for provisioning peripherals.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for provisioning peripherals");

        self.adapter
            .start_scan(ScanFilter {
                services: vec![PROVISIONING_SERVICE_UUID],
            })
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &discovered, &event_tx).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Scan until `address` advertises the provisioning service or
    /// `timeout` passes.
    ///
    /// Concurrent calls share one scan, which stops when the last of them
    /// returns.
    pub async fn find(
        &self,
        address: DeviceAddress,
        timeout: Duration,
    ) -> Result<Option<DiscoveredDevice>> {
        let mut rx = self.subscribe();
        if let Some(device) = self.discovered.get(address) {
            return Ok(Some(device));
        }

        *self.finders.lock() += 1;
        let found = match self.start_scanning().await {
            Ok(()) => Ok(wait_for_device(&mut rx, address, timeout).await),
            Err(e) => Err(e),
        };

        let last = {
            let mut finders = self.finders.lock();
            *finders -= 1;
            *finders == 0
        };
        if last {
            if let Err(e) = self.stop_scanning().await {
                warn!("Failed to stop scan: {}", e);
            }
        }

        found
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// All discovered peripherals, strongest signal first.
    pub fn discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.discovered.sorted()
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveredDevice> {
        self.event_tx.subscribe()
    }

    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        discovered: &DiscoveryTable,
        event_tx: &broadcast::Sender<DiscoveredDevice>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                Self::process_peripheral(adapter, id, discovered, event_tx).await;
            }
            CentralEvent::ServicesAdvertisement { id, services } => {
                if services.iter().any(is_provisioning_service) {
                    Self::process_peripheral(adapter, id, discovered, event_tx).await;
                }
            }
            _ => {}
        }
    }

    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        discovered: &DiscoveryTable,
        event_tx: &broadcast::Sender<DiscoveredDevice>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let device = match peripheral.properties().await {
            Ok(Some(properties)) => DiscoveredDevice::from_properties(&properties),
            _ => None,
        };

        if let Some(device) = device {
            discovered.record(device.clone());
            let _ = event_tx.send(device);
        }
    }
}

impl Drop for ProvisioningScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

/// Wait on `rx` for a sighting of `address`.
async fn wait_for_device(
    rx: &mut broadcast::Receiver<DiscoveredDevice>,
    address: DeviceAddress,
    timeout: Duration,
) -> Option<DiscoveredDevice> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(device) if device.address == address => return Some(device),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} discovery events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };

    tokio::time::timeout(timeout, wait).await.ok().flatten()
}

/// Order devices strongest signal first; devices without RSSI go last.
pub fn sort_by_signal(devices: &mut [DiscoveredDevice]) {
    devices.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
}
