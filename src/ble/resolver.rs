//! Resolution of the provisioning service on a connected peripheral.
//!
//! Resolution is all-or-nothing: a peripheral whose service lacks any of
//! the four provisioning characteristics resolves to nothing, and no
//! write is ever attempted against it.

use btleplug::api::{Characteristic, Service};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::address::DeviceAddress;
use crate::ble::connection::{GattConnector, GattLink};
use crate::ble::uuids::*;
use crate::error::Result;

/// Handles to every characteristic of the provisioning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattHandleSet {
    /// The provisioning service UUID.
    pub service: Uuid,
    /// SSID characteristic.
    pub ssid: Characteristic,
    /// Pre-shared key characteristic.
    pub psk: Characteristic,
    /// Control characteristic.
    pub control: Characteristic,
    /// Status characteristic.
    pub status: Characteristic,
}

impl GattHandleSet {
    /// Pick the provisioning characteristics out of a discovered service table.
    ///
    /// Returns `None` unless the service and all four characteristics are present.
    pub fn from_services(services: &BTreeSet<Service>) -> Option<Self> {
        let service = services
            .iter()
            .find(|s| is_provisioning_service(&s.uuid))?;

        let find = |uuid: Uuid| {
            let found = service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned();
            if found.is_none() {
                debug!("Provisioning service lacks {} characteristic", characteristic_name(&uuid));
            }
            found
        };

        Some(Self {
            service: service.uuid,
            ssid: find(SSID_CHARACTERISTIC_UUID)?,
            psk: find(PSK_CHARACTERISTIC_UUID)?,
            control: find(CONTROL_CHARACTERISTIC_UUID)?,
            status: find(STATUS_CHARACTERISTIC_UUID)?,
        })
    }
}

/// A connected peripheral with a fully resolved provisioning service.
pub struct ResolvedService {
    /// The open link.
    pub link: Box<dyn GattLink>,
    /// The resolved characteristic handles.
    pub handles: GattHandleSet,
}

impl std::fmt::Debug for ResolvedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedService")
            .field("address", &self.link.address())
            .field("handles", &self.handles)
            .finish()
    }
}

/// Connects to peripherals and resolves their provisioning service.
#[derive(Clone)]
pub struct ServiceResolver {
    connector: Arc<dyn GattConnector>,
}

impl ServiceResolver {
    /// Create a resolver on top of `connector`.
    pub fn new(connector: Arc<dyn GattConnector>) -> Self {
        Self { connector }
    }

    /// Connect to `address` and resolve its provisioning service.
    ///
    /// Returns `Ok(None)` when the peripheral is unreachable or does not
    /// expose the complete service. The link is closed in that case.
    pub async fn resolve(&self, address: DeviceAddress) -> Result<Option<ResolvedService>> {
        let link = match self.connector.connect(address).await? {
            Some(link) => link,
            None => {
                warn!("Could not connect to {}", address);
                return Ok(None);
            }
        };

        match Self::resolve_link(link.as_ref()).await {
            Ok(Some(handles)) => {
                info!("Resolved provisioning service on {}", address);
                Ok(Some(ResolvedService { link, handles }))
            }
            Ok(None) => {
                warn!("{} does not expose the provisioning service", address);
                if let Err(e) = link.disconnect().await {
                    debug!("Disconnect after failed resolution: {}", e);
                }
                Ok(None)
            }
            Err(e) => {
                if let Err(disconnect_error) = link.disconnect().await {
                    debug!("Disconnect after failed discovery: {}", disconnect_error);
                }
                Err(e)
            }
        }
    }

    /// Discover services on an open link and pick out the provisioning handles.
    pub async fn resolve_link(link: &dyn GattLink) -> Result<Option<GattHandleSet>> {
        link.discover_services().await?;
        Ok(GattHandleSet::from_services(&link.services()))
    }
}
