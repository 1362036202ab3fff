//! Bond removal, both on request and before every pairing attempt.
//!
//! Stale bonds left behind by an earlier session make the next pairing
//! fail in ways the host reports poorly, so pairing always starts from an
//! unpaired state. Both entry points take an [`OperationGuard`]: the
//! caller must already hold the device in the registry.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pairing::stack::PairingStack;
use crate::registry::OperationGuard;

/// Removes bonds through the host stack.
#[derive(Clone)]
pub struct ResetManager {
    stack: Arc<dyn PairingStack>,
    settle_interval: Duration,
}

impl ResetManager {
    /// Create a reset manager that waits `settle_interval` after a reset.
    pub fn new(stack: Arc<dyn PairingStack>, settle_interval: Duration) -> Self {
        Self {
            stack,
            settle_interval,
        }
    }

    /// How long the stack is given to settle after a reset.
    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    /// Unconditionally unpair the guarded device, then let the stack settle.
    ///
    /// Errors from the stack are logged and swallowed; the settle wait is
    /// skipped in that case. Returns whether the reset went through.
    pub async fn reset_before_pairing(&self, guard: &OperationGuard) -> bool {
        let address = guard.address();
        debug!("Resetting pairing state for {}", address);

        match self.stack.unpair(address).await {
            Ok(status) => {
                info!("Pre-pair unpair of {}: {}", address, status);
                tokio::time::sleep(self.settle_interval).await;
                true
            }
            Err(e) => {
                warn!("Pre-pair unpair of {} failed, continuing: {}", address, e);
                false
            }
        }
    }

    /// Remove the bond with the guarded device.
    ///
    /// The host is asked to unpair whatever bond status it reports.
    /// Returns `Ok(false)` when the stack does not know the device and
    /// `Ok(true)` when it is left unpaired, including when it was never paired.
    pub async fn unpair(&self, guard: &OperationGuard) -> Result<bool> {
        let address = guard.address();

        let device = self
            .stack
            .resolve(address)
            .await
            .map_err(|e| Error::UnpairFailed {
                message: native_message(e),
            })?;

        match device {
            Some(device) => debug!("Unpairing {} (paired: {})", address, device.is_paired),
            None => {
                warn!("Cannot unpair {}: device not found", address);
                return Ok(false);
            }
        }

        let status = self
            .stack
            .unpair(address)
            .await
            .map_err(|e| Error::UnpairFailed {
                message: native_message(e),
            })?;

        info!("Unpair of {}: {}", address, status);
        Ok(status.is_success())
    }
}

/// Message of a stack error, without the crate-level prefix for native errors.
pub(crate) fn native_message(error: Error) -> String {
    match error {
        Error::Native(message) => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::address::DeviceAddress;
    use crate::registry::DeviceRegistry;
    use crate::sim::{SimulatedDevice, SimulatedStack, StackCall};
    use tokio::time::Instant;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    fn manager(stack: &Arc<SimulatedStack>) -> ResetManager {
        ResetManager::new(stack.clone(), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_waits_settle_interval() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node").paired());
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        let start = Instant::now();
        assert!(manager(&stack).reset_before_pairing(&guard).await);

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(!stack.is_paired(addr()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_error_is_swallowed_without_settle() {
        let stack = SimulatedStack::new();
        stack.add_device(
            addr(),
            SimulatedDevice::new("node").failing_unpair("device busy"),
        );
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        let start = Instant::now();
        assert!(!manager(&stack).reset_before_pairing(&guard).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unpair_unknown_device_returns_false() {
        let stack = SimulatedStack::new();
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        assert!(!manager(&stack).unpair(&guard).await.unwrap());
        assert_eq!(stack.calls(), vec![StackCall::Resolve(addr())]);
    }

    #[tokio::test]
    async fn test_unpair_unpaired_device_still_asks_stack() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node"));
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        assert!(manager(&stack).unpair(&guard).await.unwrap());
        assert_eq!(
            stack.calls(),
            vec![StackCall::Resolve(addr()), StackCall::Unpair(addr())]
        );
    }

    #[tokio::test]
    async fn test_unpair_paired_device() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node").paired());
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        assert!(manager(&stack).unpair(&guard).await.unwrap());
        assert!(!stack.is_paired(addr()));
    }

    #[tokio::test]
    async fn test_unpair_stack_error_is_unpair_failed() {
        let stack = SimulatedStack::new();
        stack.add_device(
            addr(),
            SimulatedDevice::new("node").paired().failing_unpair("access denied"),
        );
        let registry = DeviceRegistry::new();
        let guard = registry.try_acquire(addr()).unwrap();

        let err = manager(&stack).unpair(&guard).await.unwrap_err();
        assert_eq!(err.code(), "UNPAIR_FAILED");
        assert!(err.to_string().contains("access denied"));
    }
}
