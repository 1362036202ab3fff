//! BlueZ-backed [`PairingStack`].
//!
//! A single agent is registered with bluetoothd for the lifetime of the
//! stack. Negotiations for different devices may run at the same time; each
//! prompt is routed to the [`PairingHandler`] of the negotiation for its
//! device, and prompts for devices not being paired are rejected.

use async_trait::async_trait;
use bluer::agent::{
    Agent, AgentHandle, DisplayPasskey, DisplayPinCode, ReqError, ReqResult, RequestAuthorization,
    RequestConfirmation, RequestPasskey, RequestPinCode,
};
use bluer::{AdapterEvent, Address, ErrorKind};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::address::DeviceAddress;
use crate::error::{Error, Result};
use crate::pairing::stack::{NativeDevice, PairingHandler, PairingStack};
use crate::pairing::{PairingDecision, PairingKinds, PairingRequest, ProtectionLevel};
use crate::protocol::{PairingResultStatus, UnpairResultStatus};

struct ActiveNegotiation {
    id: u64,
    kinds: PairingKinds,
    handler: Arc<dyn PairingHandler>,
}

#[derive(Default)]
struct TableState {
    next_id: u64,
    negotiations: HashMap<Address, ActiveNegotiation>,
}

/// Negotiations in flight, keyed by device.
#[derive(Clone, Default)]
struct NegotiationTable {
    state: Arc<Mutex<TableState>>,
}

impl NegotiationTable {
    /// Register a negotiation for `device`. It stays routable until the
    /// returned entry is dropped.
    fn begin(
        &self,
        device: Address,
        kinds: PairingKinds,
        handler: Arc<dyn PairingHandler>,
    ) -> NegotiationEntry {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let previous = state.negotiations.insert(
            device,
            ActiveNegotiation { id, kinds, handler },
        );
        if previous.is_some() {
            warn!("Replacing an unfinished negotiation for {}", device);
        }

        NegotiationEntry {
            table: self.clone(),
            device,
            id,
        }
    }

    /// Handler for a prompt from `device`, if that prompt is expected.
    fn route(
        &self,
        device: Address,
        request: &PairingRequest,
    ) -> std::result::Result<Arc<dyn PairingHandler>, ReqError> {
        let state = self.state.lock();
        let negotiation = match state.negotiations.get(&device) {
            Some(negotiation) => negotiation,
            None => {
                warn!("Unsolicited {} prompt from {}; rejecting", request, device);
                return Err(ReqError::Rejected);
            }
        };

        if let Some(kind) = request.kind() {
            if !negotiation.kinds.contains(kind) {
                warn!("{} prompt for {} not offered; rejecting", request, device);
                return Err(ReqError::Rejected);
            }
        }
        Ok(Arc::clone(&negotiation.handler))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().negotiations.len()
    }
}

/// Removes its own negotiation from the table when dropped.
struct NegotiationEntry {
    table: NegotiationTable,
    device: Address,
    id: u64,
}

impl Drop for NegotiationEntry {
    fn drop(&mut self) {
        let mut state = self.table.state.lock();
        if state
            .negotiations
            .get(&self.device)
            .is_some_and(|n| n.id == self.id)
        {
            state.negotiations.remove(&self.device);
        }
    }
}

/// Pairing stack backed by bluetoothd over D-Bus.
pub struct BluezStack {
    adapter: bluer::Adapter,
    negotiations: NegotiationTable,
    discovery_timeout: Duration,
    _session: bluer::Session,
    _agent: AgentHandle,
}

impl BluezStack {
    /// Connect to bluetoothd, power the default adapter and register the agent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if no adapter is present.
    pub async fn new(discovery_timeout: Duration) -> Result<Self> {
        let session = bluer::Session::new().await.map_err(native)?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| Error::BluetoothUnavailable)?;
        adapter.set_powered(true).await.map_err(native)?;
        info!("Using Bluetooth adapter {}", adapter.name());

        let negotiations = NegotiationTable::default();
        let agent = session
            .register_agent(build_agent(&negotiations))
            .await
            .map_err(native)?;

        Ok(Self {
            adapter,
            negotiations,
            discovery_timeout,
            _session: session,
            _agent: agent,
        })
    }

    async fn is_known(&self, address: Address) -> Result<bool> {
        let known = self.adapter.device_addresses().await.map_err(native)?;
        Ok(known.contains(&address))
    }

    /// Make sure bluetoothd has a device object for `address`, discovering if needed.
    async fn ensure_known(&self, address: Address) -> Result<bool> {
        if self.is_known(address).await? {
            return Ok(true);
        }

        debug!("{} not known to bluetoothd, discovering", address);
        let events = self.adapter.discover_devices().await.map_err(native)?;
        pin_mut!(events);

        let found = tokio::time::timeout(self.discovery_timeout, async {
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(added) = event {
                    if added == address {
                        return true;
                    }
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        Ok(found)
    }
}

#[async_trait]
impl PairingStack for BluezStack {
    async fn resolve(&self, address: DeviceAddress) -> Result<Option<NativeDevice>> {
        let target = Address::from(address);
        if !self.ensure_known(target).await? {
            return Ok(None);
        }

        let device = self.adapter.device(target).map_err(native)?;
        let name = device.name().await.map_err(native)?;
        let is_paired = device.is_paired().await.map_err(native)?;

        Ok(Some(NativeDevice {
            address,
            name,
            is_paired,
        }))
    }

    async fn unpair(&self, address: DeviceAddress) -> Result<UnpairResultStatus> {
        let target = Address::from(address);
        let was_paired = match self.adapter.device(target) {
            Ok(device) => device.is_paired().await.unwrap_or(false),
            Err(_) => false,
        };

        // bluetoothd keeps bonding state on the device object even when it
        // reports the device unpaired, so the object is always removed.
        match self.adapter.remove_device(target).await {
            Ok(()) => Ok(removed_status(was_paired)),
            Err(e) => match removal_error_status(&e.kind) {
                Some(status) => Ok(status),
                None => Err(native(e)),
            },
        }
    }

    async fn pair(
        &self,
        address: DeviceAddress,
        kinds: PairingKinds,
        protection: ProtectionLevel,
        handler: Arc<dyn PairingHandler>,
    ) -> Result<PairingResultStatus> {
        let target = Address::from(address);
        if !self.ensure_known(target).await? {
            return Err(Error::DeviceNotFound {
                address: address.to_string(),
            });
        }

        if protection.requires_authentication() && !kinds.contains(PairingKinds::PROVIDE_PIN) {
            warn!("Authenticated pairing requested without PIN entry; bluetoothd may downgrade");
        }

        let device = self.adapter.device(target).map_err(native)?;
        let entry = self.negotiations.begin(target, kinds, handler);
        let outcome = device.pair().await;
        drop(entry);

        match outcome {
            Ok(()) => Ok(PairingResultStatus::Paired),
            Err(e) => {
                debug!("bluetoothd pairing error: {}", e);
                Ok(pairing_status(&e.kind))
            }
        }
    }
}

fn native(error: bluer::Error) -> Error {
    Error::Native(error.to_string())
}

/// Status of a successful device removal.
fn removed_status(was_paired: bool) -> UnpairResultStatus {
    if was_paired {
        UnpairResultStatus::Unpaired
    } else {
        UnpairResultStatus::AlreadyUnpaired
    }
}

/// Map a bluetoothd removal error onto the unpair result table.
///
/// Returns `None` for errors that are not a result status.
fn removal_error_status(kind: &ErrorKind) -> Option<UnpairResultStatus> {
    match kind {
        ErrorKind::DoesNotExist => Some(UnpairResultStatus::AlreadyUnpaired),
        ErrorKind::InProgress => Some(UnpairResultStatus::OperationAlreadyInProgress),
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => Some(UnpairResultStatus::AccessDenied),
        _ => None,
    }
}

/// Map a bluetoothd pairing error onto the native result table.
fn pairing_status(kind: &ErrorKind) -> PairingResultStatus {
    match kind {
        ErrorKind::AlreadyExists => PairingResultStatus::AlreadyPaired,
        ErrorKind::AuthenticationFailed => PairingResultStatus::AuthenticationFailure,
        ErrorKind::AuthenticationTimeout => PairingResultStatus::AuthenticationTimeout,
        ErrorKind::AuthenticationCanceled => PairingResultStatus::PairingCanceled,
        ErrorKind::AuthenticationRejected => PairingResultStatus::RejectedByHandler,
        ErrorKind::ConnectionAttemptFailed => PairingResultStatus::ConnectionRejected,
        ErrorKind::InProgress => PairingResultStatus::OperationAlreadyInProgress,
        ErrorKind::NotReady => PairingResultStatus::NotReadyToPair,
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => PairingResultStatus::AccessDenied,
        _ => PairingResultStatus::Failed,
    }
}

/// Route a prompt to the handler of its device's negotiation.
async fn ask(
    negotiations: NegotiationTable,
    device: Address,
    request: PairingRequest,
) -> ReqResult<PairingDecision> {
    let handler = negotiations.route(device, &request)?;

    match handler.on_pairing_requested(request).await {
        PairingDecision::Decline => Err(ReqError::Rejected),
        decision => Ok(decision),
    }
}

fn build_agent(active: &NegotiationTable) -> Agent {
    let pin_slot = active.clone();
    let passkey_slot = active.clone();
    let confirm_slot = active.clone();
    let display_passkey_slot = active.clone();
    let display_pin_slot = active.clone();
    let authorize_slot = active.clone();

    Agent {
        request_default: true,

        request_pin_code: Some(Box::new(move |req: RequestPinCode| {
            let active = pin_slot.clone();
            Box::pin(async move {
                match ask(active, req.device, PairingRequest::ProvidePin).await? {
                    PairingDecision::AcceptWithPin(pin) => Ok(pin),
                    _ => Err(ReqError::Rejected),
                }
            })
        })),

        request_passkey: Some(Box::new(move |req: RequestPasskey| {
            let active = passkey_slot.clone();
            Box::pin(async move {
                match ask(active, req.device, PairingRequest::ProvidePin).await? {
                    PairingDecision::AcceptWithPin(pin) => {
                        pin.trim().parse::<u32>().map_err(|_| {
                            warn!("PIN for {} is not a numeric passkey", req.device);
                            ReqError::Rejected
                        })
                    }
                    _ => Err(ReqError::Rejected),
                }
            })
        })),

        request_confirmation: Some(Box::new(move |req: RequestConfirmation| {
            let active = confirm_slot.clone();
            Box::pin(async move {
                let request = PairingRequest::ConfirmPinMatch {
                    pin: format!("{:06}", req.passkey),
                };
                ask(active, req.device, request).await.map(|_| ())
            })
        })),

        display_passkey: Some(Box::new(move |req: DisplayPasskey| {
            let active = display_passkey_slot.clone();
            Box::pin(async move {
                let request = PairingRequest::DisplayPin {
                    pin: format!("{:06}", req.passkey),
                };
                ask(active, req.device, request).await.map(|_| ())
            })
        })),

        display_pin_code: Some(Box::new(move |req: DisplayPinCode| {
            let active = display_pin_slot.clone();
            Box::pin(async move {
                let request = PairingRequest::DisplayPin {
                    pin: req.pincode.clone(),
                };
                ask(active, req.device, request).await.map(|_| ())
            })
        })),

        request_authorization: Some(Box::new(move |req: RequestAuthorization| {
            let active = authorize_slot.clone();
            Box::pin(async move {
                ask(active, req.device, PairingRequest::ConfirmOnly)
                    .await
                    .map(|_| ())
            })
        })),

        ..Default::default()
    }
}
