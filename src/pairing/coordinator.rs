//! Pairing coordination.
//!
//! The coordinator owns the full pairing sequence for one device: resolve
//! it, reset any existing bond, run a custom negotiation offering every
//! ceremony, and classify the stack's result. Pairing and unpairing are
//! admitted through the [`DeviceRegistry`]; status queries are not.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ble::address::DeviceAddress;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::pairing::reset::{native_message, ResetManager};
use crate::pairing::session::PairingSession;
use crate::pairing::stack::PairingStack;
use crate::pairing::{PairingKinds, ProtectionLevel};
use crate::pin::PinExchange;
use crate::protocol::PairingResultStatus;
use crate::registry::{DeviceRegistry, OperationGuard};

/// Runs pairing, unpairing and status checks against a [`PairingStack`].
pub struct PairingCoordinator {
    stack: Arc<dyn PairingStack>,
    registry: Arc<DeviceRegistry>,
    pins: Arc<PinExchange>,
    reset: ResetManager,
    config: EngineConfig,
}

impl PairingCoordinator {
    /// Create a coordinator.
    pub fn new(
        stack: Arc<dyn PairingStack>,
        registry: Arc<DeviceRegistry>,
        pins: Arc<PinExchange>,
        config: EngineConfig,
    ) -> Self {
        let reset = ResetManager::new(Arc::clone(&stack), config.settle_interval);

        Self {
            stack,
            registry,
            pins,
            reset,
            config,
        }
    }

    /// The operation registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The PIN exchange used by pairing sessions.
    pub fn pins(&self) -> &Arc<PinExchange> {
        &self.pins
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Admit a pairing or unpairing operation for `address`.
    pub fn admit(&self, address: DeviceAddress) -> Result<OperationGuard> {
        self.registry
            .try_acquire(address)
            .ok_or_else(|| Error::OperationInProgress {
                address: address.to_string(),
            })
    }

    /// Pair with `address`, admitting the operation first.
    pub async fn pair(
        &self,
        address: DeviceAddress,
        require_authentication: bool,
    ) -> Result<PairingResultStatus> {
        let guard = self.admit(address)?;
        self.pair_locked(&guard, require_authentication).await
    }

    /// Pair with the guarded device.
    ///
    /// Returns the stack's status when it counts as success, and
    /// [`Error::PairingFailed`] carrying the status otherwise.
    pub async fn pair_locked(
        &self,
        guard: &OperationGuard,
        require_authentication: bool,
    ) -> Result<PairingResultStatus> {
        let address = guard.address();
        info!(
            "Starting pairing with {} (authentication required: {})",
            address, require_authentication
        );

        let device = self
            .stack
            .resolve(address)
            .await
            .map_err(pairing_error)?
            .ok_or_else(|| Error::DeviceNotFound {
                address: address.to_string(),
            })?;

        info!(
            "Found {} ({}), currently paired: {}",
            address,
            device.name.as_deref().unwrap_or("unnamed"),
            device.is_paired
        );

        self.reset.reset_before_pairing(guard).await;

        let session = PairingSession::new(address, Arc::clone(&self.pins), self.config.pin_timeout);
        let protection = ProtectionLevel::for_authentication(require_authentication);
        debug!(
            "Negotiating with {} offering {} at {}",
            address,
            PairingKinds::ALL,
            protection
        );

        let status = self
            .stack
            .pair(address, PairingKinds::ALL, protection, session.clone())
            .await
            .map_err(pairing_error)?;

        debug!("{} answered {} pairing prompts", address, session.prompts().len());
        self.classify(status)
    }

    /// Map a native pairing status to the caller-facing result.
    pub fn classify(&self, status: PairingResultStatus) -> Result<PairingResultStatus> {
        if status.is_success() {
            info!("Pairing result: {}", status);
            return Ok(status);
        }

        let retry_after = status
            .needs_cooldown()
            .then_some(self.config.retry_cooldown);

        let mut message = status.message();
        if let Some(cooldown) = retry_after {
            message.push_str(&format!(
                ". Wait at least {} seconds before retrying",
                cooldown.as_secs()
            ));
        }

        warn!("Pairing failed: {}", status);
        Err(Error::PairingFailed {
            status: Some(status),
            message,
            retry_after,
        })
    }

    /// Check if the host holds a bond with `address`.
    ///
    /// Not admitted through the registry; an unknown device reports `false`.
    pub async fn is_paired(&self, address: DeviceAddress) -> Result<bool> {
        let device = self
            .stack
            .resolve(address)
            .await
            .map_err(|e| Error::CheckFailed {
                message: native_message(e),
            })?;

        Ok(device.map(|d| d.is_paired).unwrap_or(false))
    }

    /// Remove the bond with `address`, admitting the operation first.
    pub async fn unpair(&self, address: DeviceAddress) -> Result<bool> {
        let guard = self.admit(address)?;
        self.unpair_locked(&guard).await
    }

    /// Remove the bond with the guarded device.
    pub async fn unpair_locked(&self, guard: &OperationGuard) -> Result<bool> {
        self.reset.unpair(guard).await
    }
}

/// Wrap a stack error as a pairing failure. A device that cannot be found
/// keeps its own error code.
fn pairing_error(error: Error) -> Error {
    match error {
        Error::DeviceNotFound { .. } => error,
        other => Error::PairingFailed {
            status: None,
            message: native_message(other),
            retry_after: None,
        },
    }
}
