//! In-memory provisioning peripheral.

use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Service};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::ble::address::DeviceAddress;
use crate::ble::connection::{GattConnector, GattLink};
use crate::ble::uuids::*;
use crate::error::{Error, Result, WriteFailure};
use crate::protocol::ProvisioningStatus;

#[derive(Debug)]
struct PeripheralState {
    address: DeviceAddress,
    reachable: bool,
    characteristics: Vec<Uuid>,
    advertises_service: bool,
    discovered: bool,
    connected: bool,
    status_script: VecDeque<u8>,
    failing_reads: usize,
    write_failures: HashMap<Uuid, WriteFailure>,
    writes: Vec<(Uuid, Vec<u8>)>,
    status_reads: usize,
    connections: usize,
}

/// A provisioning peripheral that answers from a script.
///
/// Each status read consumes the next scripted byte; the last byte is
/// repeated once the script runs out.
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    state: Arc<Mutex<PeripheralState>>,
}

impl SimulatedPeripheral {
    /// A reachable peripheral exposing the complete provisioning service.
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            state: Arc::new(Mutex::new(PeripheralState {
                address,
                reachable: true,
                characteristics: vec![
                    SSID_CHARACTERISTIC_UUID,
                    PSK_CHARACTERISTIC_UUID,
                    CONTROL_CHARACTERISTIC_UUID,
                    STATUS_CHARACTERISTIC_UUID,
                ],
                advertises_service: true,
                discovered: false,
                connected: false,
                status_script: VecDeque::from(vec![ProvisioningStatus::Ready.to_raw()]),
                failing_reads: 0,
                write_failures: HashMap::new(),
                writes: Vec::new(),
                status_reads: 0,
                connections: 0,
            })),
        }
    }

    /// Drop one characteristic from the service table.
    pub fn without_characteristic(self, uuid: Uuid) -> Self {
        self.state.lock().characteristics.retain(|c| *c != uuid);
        self
    }

    /// Expose no provisioning service at all.
    pub fn without_service(self) -> Self {
        self.state.lock().advertises_service = false;
        self
    }

    /// Refuse every connection.
    pub fn unreachable(self) -> Self {
        self.state.lock().reachable = false;
        self
    }

    /// Status bytes returned by successive reads.
    pub fn with_status_sequence(self, sequence: &[u8]) -> Self {
        self.state.lock().status_script = sequence.iter().copied().collect();
        self
    }

    /// Fail the next `count` status reads before serving the script.
    pub fn failing_status_reads(self, count: usize) -> Self {
        self.state.lock().failing_reads = count;
        self
    }

    /// Fail writes to `uuid` with `cause`.
    pub fn failing_write(self, uuid: Uuid, cause: WriteFailure) -> Self {
        self.state.lock().write_failures.insert(uuid, cause);
        self
    }

    /// Every acknowledged write, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    /// Last value written to `uuid`.
    pub fn written(&self, uuid: Uuid) -> Option<Vec<u8>> {
        self.state
            .lock()
            .writes
            .iter()
            .rev()
            .find(|(u, _)| *u == uuid)
            .map(|(_, data)| data.clone())
    }

    /// Number of status reads served.
    pub fn status_reads(&self) -> usize {
        self.state.lock().status_reads
    }

    /// Number of links opened.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Check if a link is currently open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn service_table(state: &PeripheralState) -> BTreeSet<Service> {
        let mut services = BTreeSet::new();
        if !state.discovered || !state.advertises_service {
            return services;
        }

        let characteristics = state
            .characteristics
            .iter()
            .map(|uuid| Characteristic {
                uuid: *uuid,
                service_uuid: PROVISIONING_SERVICE_UUID,
                properties: if *uuid == STATUS_CHARACTERISTIC_UUID {
                    CharPropFlags::READ
                } else {
                    CharPropFlags::WRITE
                },
                descriptors: BTreeSet::new(),
            })
            .collect();

        services.insert(Service {
            uuid: PROVISIONING_SERVICE_UUID,
            primary: true,
            characteristics,
        });
        services
    }
}

#[async_trait]
impl GattConnector for SimulatedPeripheral {
    async fn connect(&self, address: DeviceAddress) -> Result<Option<Box<dyn GattLink>>> {
        let mut state = self.state.lock();
        if state.address != address || !state.reachable {
            return Ok(None);
        }

        state.connected = true;
        state.connections += 1;
        Ok(Some(Box::new(SimulatedLink {
            state: Arc::clone(&self.state),
        })))
    }
}

struct SimulatedLink {
    state: Arc<Mutex<PeripheralState>>,
}

#[async_trait]
impl GattLink for SimulatedLink {
    fn address(&self) -> DeviceAddress {
        self.state.lock().address
    }

    async fn discover_services(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        state.discovered = true;
        Ok(())
    }

    fn services(&self) -> BTreeSet<Service> {
        SimulatedPeripheral::service_table(&self.state.lock())
    }

    async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if characteristic.uuid != STATUS_CHARACTERISTIC_UUID {
            return Err(Error::InvalidData {
                context: format!("{} is not readable", characteristic_name(&characteristic.uuid)),
            });
        }

        state.status_reads += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(Error::Native("status read failed".to_string()));
        }
        let value = if state.status_script.len() > 1 {
            state.status_script.pop_front()
        } else {
            state.status_script.front().copied()
        };
        Ok(value.into_iter().collect())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let name = characteristic_name(&characteristic.uuid).to_string();

        if !state.connected {
            return Err(Error::WriteFailed {
                characteristic: name,
                cause: WriteFailure::Unreachable,
            });
        }
        if let Some(cause) = state.write_failures.get(&characteristic.uuid) {
            return Err(Error::WriteFailed {
                characteristic: name,
                cause: *cause,
            });
        }

        state.writes.push((characteristic.uuid, data.to_vec()));
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().connected = false;
        Ok(())
    }
}
