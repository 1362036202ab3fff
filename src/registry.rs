//! Per-device operation registry.
//!
//! At most one pairing or unpairing operation may be in flight for a given
//! address. Admission never blocks: a busy address is reported back to the
//! caller immediately. Status queries do not go through the registry.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::ble::address::DeviceAddress;

/// Tracks which device addresses have an operation in flight.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    in_flight: Mutex<HashSet<DeviceAddress>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to mark an operation as in flight for `address`.
    ///
    /// Returns `None` when another operation already holds the address.
    /// The returned guard releases the address when dropped.
    pub fn try_acquire(self: &Arc<Self>, address: DeviceAddress) -> Option<OperationGuard> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(address) {
            debug!("Operation already in flight for {}", address);
            return None;
        }
        trace!("Admitted operation for {}", address);

        Some(OperationGuard {
            registry: Arc::clone(self),
            address,
        })
    }

    /// Clear the in-flight flag for `address`. Releasing an idle address is a no-op.
    pub fn release(&self, address: DeviceAddress) {
        if self.in_flight.lock().remove(&address) {
            trace!("Released operation for {}", address);
        }
    }

    /// Check if an operation is in flight for `address`.
    pub fn is_busy(&self, address: DeviceAddress) -> bool {
        self.in_flight.lock().contains(&address)
    }

    /// Number of addresses with an operation in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Scope guard for an admitted operation.
#[derive(Debug)]
#[must_use = "the operation is released as soon as the guard is dropped"]
pub struct OperationGuard {
    registry: Arc<DeviceRegistry>,
    address: DeviceAddress,
}

impl OperationGuard {
    /// The address this guard holds.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.registry.release(self.address);
    }
}
