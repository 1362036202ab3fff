//! Pairing engine: the entry point used by the UI layer.
//!
//! The engine validates the address, admits pairing and unpairing through
//! the device registry on the caller's thread, and runs the operation
//! itself on a background [`ExecutionContext`](crate::executor::ExecutionContext).
//! Callers get an [`OperationHandle`] back immediately.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ble::address::DeviceAddress;
use crate::ble::connection::GattConnector;
use crate::ble::resolver::ServiceResolver;
use crate::ble::uuids::PROVISIONING_SERVICE_UUID;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::{BackgroundExecutor, OperationHandle};
use crate::pairing::coordinator::PairingCoordinator;
use crate::pairing::stack::PairingStack;
use crate::pin::{PinExchange, PinRequest};
use crate::protocol::PairingResultStatus;
use crate::provisioning::WifiProvisioner;
use crate::registry::DeviceRegistry;

/// Pairs with provisioning peripherals and opens provisioning sessions.
pub struct PairingEngine {
    coordinator: Arc<PairingCoordinator>,
    resolver: ServiceResolver,
    executor: BackgroundExecutor,
}

impl PairingEngine {
    /// Create an engine over a pairing stack and a GATT connector.
    pub fn new(
        stack: Arc<dyn PairingStack>,
        connector: Arc<dyn GattConnector>,
        config: EngineConfig,
    ) -> Self {
        Self::with_registry(stack, connector, DeviceRegistry::new(), PinExchange::new(), config)
    }

    /// Create an engine sharing an existing registry and PIN exchange.
    pub fn with_registry(
        stack: Arc<dyn PairingStack>,
        connector: Arc<dyn GattConnector>,
        registry: Arc<DeviceRegistry>,
        pins: Arc<PinExchange>,
        config: EngineConfig,
    ) -> Self {
        Self {
            coordinator: Arc::new(PairingCoordinator::new(stack, registry, pins, config)),
            resolver: ServiceResolver::new(connector),
            executor: BackgroundExecutor::new(),
        }
    }

    /// Create an engine on bluetoothd and the default btleplug adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    pub async fn with_bluez(config: EngineConfig) -> Result<Self> {
        use crate::ble::connection::BtleplugConnector;
        use crate::ble::scanner::default_adapter;
        use crate::pairing::bluez::BluezStack;

        let stack = BluezStack::new(config.discovery_timeout).await?;
        let connector = BtleplugConnector::new(default_adapter().await?, &config);

        Ok(Self::new(Arc::new(stack), Arc::new(connector), config))
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        self.coordinator.config()
    }

    /// The operation registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        self.coordinator.registry()
    }

    /// The PIN exchange.
    pub fn pins(&self) -> &Arc<PinExchange> {
        self.coordinator.pins()
    }

    /// Start pairing with `address`.
    ///
    /// The address is parsed and the operation admitted before this
    /// returns; a malformed address or a busy device resolves the handle
    /// to an error straight away.
    pub fn pair_device(
        &self,
        address: &str,
        require_authentication: bool,
    ) -> OperationHandle<PairingResultStatus> {
        let guard = match DeviceAddress::parse(address).and_then(|a| self.coordinator.admit(a)) {
            Ok(guard) => guard,
            Err(e) => return OperationHandle::ready("pair", Err(e)),
        };

        info!("Pairing with {} admitted", guard.address());
        let coordinator = Arc::clone(&self.coordinator);
        self.executor.spawn("pair", move || async move {
            let result = coordinator
                .pair_locked(&guard, require_authentication)
                .await;
            drop(guard);
            result
        })
    }

    /// Check if the host is paired with `address`.
    ///
    /// Runs alongside any in-flight operation for the same device.
    pub fn is_device_paired(&self, address: &str) -> OperationHandle<bool> {
        let address = match DeviceAddress::parse(address) {
            Ok(address) => address,
            Err(e) => return OperationHandle::ready("is-paired", Err(e)),
        };

        let coordinator = Arc::clone(&self.coordinator);
        self.executor.spawn("is-paired", move || async move {
            coordinator.is_paired(address).await
        })
    }

    /// Remove the bond with `address`.
    pub fn unpair_device(&self, address: &str) -> OperationHandle<bool> {
        let guard = match DeviceAddress::parse(address).and_then(|a| self.coordinator.admit(a)) {
            Ok(guard) => guard,
            Err(e) => return OperationHandle::ready("unpair", Err(e)),
        };

        let coordinator = Arc::clone(&self.coordinator);
        self.executor.spawn("unpair", move || async move {
            let result = coordinator.unpair_locked(&guard).await;
            drop(guard);
            result
        })
    }

    /// Answer the outstanding PIN request. Returns `false` if none is outstanding.
    pub fn submit_pin(&self, pin: &str) -> bool {
        self.pins().submit_pin(pin)
    }

    /// Subscribe to PIN request notifications.
    pub fn subscribe_pin_requests(&self) -> broadcast::Receiver<PinRequest> {
        self.pins().subscribe()
    }

    /// Connect to a paired peripheral and resolve its provisioning service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] when the peripheral is unreachable
    /// or lacks any provisioning characteristic.
    pub async fn open_session(&self, address: &str) -> Result<WifiProvisioner> {
        let address = DeviceAddress::parse(address)?;
        debug!("Opening provisioning session with {}", address);

        let resolved = self
            .resolver
            .resolve(address)
            .await?
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: PROVISIONING_SERVICE_UUID.to_string(),
            })?;

        Ok(WifiProvisioner::from_resolved(resolved, self.config()))
    }

    /// Pair with `address`, then open a provisioning session on it.
    pub async fn connect_and_pair(
        &self,
        address: &str,
        require_authentication: bool,
    ) -> Result<WifiProvisioner> {
        let status = self.pair_device(address, require_authentication).await?;
        info!("Paired with {} ({})", address, status);
        self.open_session(address).await
    }
}
