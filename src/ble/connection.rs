//! BLE connection management.
//!
//! [`GattConnector`] opens links to peripherals by address and [`GattLink`]
//! is the GATT surface the provisioning flow needs from an open link. The
//! btleplug-backed implementations live here as well.

use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, Characteristic, Peripheral as _, Service, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ble::address::DeviceAddress;
use crate::ble::scanner::ProvisioningScanner;
use crate::ble::uuids::characteristic_name;
use crate::config::EngineConfig;
use crate::error::{Error, Result, WriteFailure};

/// Connection state for a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to the peripheral.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the peripheral.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// An open GATT link to one peripheral.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Address of the peripheral.
    fn address(&self) -> DeviceAddress;

    /// Enumerate the peripheral's services and characteristics.
    async fn discover_services(&self) -> Result<()>;

    /// Services found by the last discovery.
    fn services(&self) -> BTreeSet<Service>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>>;

    /// Write a characteristic value and wait for the acknowledgement.
    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()>;

    /// Check if the link is still up.
    async fn is_connected(&self) -> bool;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens GATT links by address.
#[async_trait]
pub trait GattConnector: Send + Sync {
    /// Connect to the peripheral at `address`.
    ///
    /// Returns `Ok(None)` when the peripheral cannot be found or reached.
    async fn connect(&self, address: DeviceAddress) -> Result<Option<Box<dyn GattLink>>>;
}

/// [`GattConnector`] backed by a btleplug adapter.
pub struct BtleplugConnector {
    adapter: Adapter,
    scanner: ProvisioningScanner,
    discovery_timeout: Duration,
    max_connect_attempts: u32,
    reconnect_delay: Duration,
}

impl BtleplugConnector {
    /// Create a connector on `adapter`.
    pub fn new(adapter: Adapter, config: &EngineConfig) -> Self {
        Self {
            scanner: ProvisioningScanner::with_adapter(adapter.clone()),
            adapter,
            discovery_timeout: config.discovery_timeout,
            max_connect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Find a known peripheral, scanning briefly if the adapter has not seen it.
    async fn find_peripheral(&self, address: DeviceAddress) -> Result<Option<Peripheral>> {
        let target = BDAddr::from(address);

        if let Some(peripheral) = self.known_peripheral(target).await? {
            return Ok(Some(peripheral));
        }

        debug!("{} not cached by the adapter, scanning for it", address);
        match self.scanner.find(address, self.discovery_timeout).await? {
            Some(device) => {
                debug!("Discovered {} ({:?})", address, device.name);
                self.known_peripheral(target).await
            }
            None => Ok(None),
        }
    }

    async fn known_peripheral(&self, target: BDAddr) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;
        Ok(peripherals.into_iter().find(|p| p.address() == target))
    }
}

#[async_trait]
impl GattConnector for BtleplugConnector {
    async fn connect(&self, address: DeviceAddress) -> Result<Option<Box<dyn GattLink>>> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(p) => p,
            None => {
                warn!("Peripheral {} not found", address);
                return Ok(None);
            }
        };

        let link = BtleplugLink::new(peripheral, address);
        match link
            .connect(self.max_connect_attempts, self.reconnect_delay)
            .await
        {
            Ok(()) => Ok(Some(Box::new(link))),
            Err(e) => {
                warn!("Peripheral {} unreachable: {}", address, e);
                Ok(None)
            }
        }
    }
}

/// [`GattLink`] over a btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    address: DeviceAddress,
    state: RwLock<ConnectionState>,
}

impl BtleplugLink {
    /// Wrap a peripheral. Call [`BtleplugLink::connect`] before use.
    pub fn new(peripheral: Peripheral, address: DeviceAddress) -> Self {
        Self {
            peripheral,
            address,
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Connect, retrying up to `max_attempts` times.
    pub async fn connect(&self, max_attempts: u32, retry_delay: Duration) -> Result<()> {
        let current_state = self.state();

        if current_state.is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        if current_state.is_transitioning() {
            return Err(Error::Internal("Connection already in progress".to_string()));
        }

        self.set_state(ConnectionState::Connecting);

        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral {} already connected at BLE level", self.address);
            self.set_state(ConnectionState::Connected);
            return Ok(());
        }

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            debug!("Connection attempt {} of {}", attempt, max_attempts);

            match self.peripheral.connect().await {
                Ok(_) => {
                    info!("Connected to {}", self.address);
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(last_error.map(Error::Bluetooth).unwrap_or(Error::NotConnected))
    }

    fn set_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("{} connection state: {} -> {}", self.address, old_state, new_state);
        }
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn address(&self) -> DeviceAddress {
        self.address
    }

    async fn discover_services(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)
    }

    fn services(&self) -> BTreeSet<Service> {
        self.peripheral.services()
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        if !self.state().is_connected() {
            return Err(Error::NotConnected);
        }

        self.peripheral
            .read(characteristic)
            .await
            .map_err(Error::Bluetooth)
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::WriteFailed {
                characteristic: characteristic_name(&characteristic.uuid).to_string(),
                cause: WriteFailure::Unreachable,
            });
        }

        self.peripheral
            .write(characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| Error::WriteFailed {
                characteristic: characteristic_name(&characteristic.uuid).to_string(),
                cause: WriteFailure::from_bluetooth(&e),
            })
    }

    async fn is_connected(&self) -> bool {
        self.state().is_connected() && self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        let current_state = self.state();
        if matches!(
            current_state,
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.set_state(ConnectionState::Disconnecting);

        match self.peripheral.disconnect().await {
            Ok(_) => {
                info!("Disconnected from {}", self.address);
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect: {}", e);
                self.set_state(ConnectionState::Disconnected);
                Err(Error::Bluetooth(e))
            }
        }
    }
}
