//! WiFi credential provisioning over GATT.
//!
//! [`WifiProvisioner`] writes the SSID and pre-shared key, sends the
//! connect command, and polls the status characteristic until the
//! peripheral reports a terminal status or the poll ceiling is reached.
//!
//! ```text
//! Idle -> WritingSsid -> WritingPsk -> CommandSent -> PollingStatus
//!                                                      |-> Success
//!                                                      |-> Failure
//!                                                      '-> TimedOut
//! ```
//!
//! Any write failure moves straight to `Failure` with the write as the
//! cause. A finished provisioner can be run again.

use btleplug::api::Characteristic;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ble::address::DeviceAddress;
use crate::ble::connection::GattLink;
use crate::ble::resolver::{GattHandleSet, ResolvedService};
use crate::ble::uuids::characteristic_name;
use crate::config::EngineConfig;
use crate::error::{Error, Result, WriteFailure};
use crate::protocol::{ControlCommand, ProvisioningStatus};
use crate::utils::{hex_byte, redact};

/// Longest SSID accepted, in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Longest pre-shared key accepted, in bytes.
pub const MAX_PSK_LEN: usize = 63;

/// Stage of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProvisioningState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Writing the SSID.
    WritingSsid,
    /// Writing the pre-shared key.
    WritingPsk,
    /// Connect command written.
    CommandSent,
    /// Waiting for a terminal status.
    PollingStatus,
    /// The peripheral joined the network.
    Success,
    /// A write failed or the peripheral reported a failure.
    Failure,
    /// No terminal status within the poll ceiling.
    TimedOut,
}

impl ProvisioningState {
    /// Check if the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::TimedOut)
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::WritingSsid => write!(f, "Writing SSID"),
            Self::WritingPsk => write!(f, "Writing PSK"),
            Self::CommandSent => write!(f, "Command sent"),
            Self::PollingStatus => write!(f, "Polling status"),
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
            Self::TimedOut => write!(f, "Timed out"),
        }
    }
}

/// Why a provisioning run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningFailure {
    /// A characteristic write was not acknowledged.
    Write {
        /// The characteristic being written.
        characteristic: &'static str,
        /// Why the write failed.
        cause: WriteFailure,
    },
    /// The peripheral reported a failure status.
    Device(ProvisioningStatus),
}

impl std::fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write {
                characteristic,
                cause,
            } => write!(f, "write to {} failed: {}", characteristic, cause),
            Self::Device(status) => write!(f, "device reported {}", status),
        }
    }
}

/// Terminal outcome of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// The peripheral joined the network.
    Success,
    /// The run failed.
    Failure(ProvisioningFailure),
    /// No terminal status within the poll ceiling.
    TimedOut,
}

impl ProvisioningOutcome {
    /// Check if the peripheral joined the network.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The state a run with this outcome ends in.
    pub fn state(&self) -> ProvisioningState {
        match self {
            Self::Success => ProvisioningState::Success,
            Self::Failure(_) => ProvisioningState::Failure,
            Self::TimedOut => ProvisioningState::TimedOut,
        }
    }
}

/// Summary of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    /// How the run ended.
    pub outcome: ProvisioningOutcome,
    /// Status reads performed.
    pub polls: u32,
    /// Last status read successfully.
    pub last_status: Option<ProvisioningStatus>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningReport {
    /// Convert a non-successful outcome into an error.
    pub fn into_result(self) -> Result<Self> {
        match &self.outcome {
            ProvisioningOutcome::Success => Ok(self),
            ProvisioningOutcome::Failure(ProvisioningFailure::Write {
                characteristic,
                cause,
            }) => Err(Error::WriteFailed {
                characteristic: characteristic.to_string(),
                cause: *cause,
            }),
            ProvisioningOutcome::Failure(ProvisioningFailure::Device(status)) => {
                Err(Error::Internal(format!("Provisioning failed: {}", status)))
            }
            ProvisioningOutcome::TimedOut => Err(Error::Internal(format!(
                "Provisioning timed out after {} polls",
                self.polls
            ))),
        }
    }
}

/// Check SSID and pre-shared key lengths.
pub fn validate_credentials(ssid: &str, psk: &str) -> Result<()> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(Error::InvalidArguments {
            reason: format!("SSID must be 1-{} bytes, got {}", MAX_SSID_LEN, ssid.len()),
        });
    }
    if psk.len() > MAX_PSK_LEN {
        return Err(Error::InvalidArguments {
            reason: format!("PSK must be at most {} bytes, got {}", MAX_PSK_LEN, psk.len()),
        });
    }
    Ok(())
}

/// Drives WiFi provisioning on one resolved peripheral.
pub struct WifiProvisioner {
    link: Box<dyn GattLink>,
    handles: GattHandleSet,
    poll_interval: Duration,
    poll_ceiling: u32,
    state_tx: watch::Sender<ProvisioningState>,
}

impl WifiProvisioner {
    /// Create a provisioner over an open link and its resolved handles.
    pub fn new(link: Box<dyn GattLink>, handles: GattHandleSet, config: &EngineConfig) -> Self {
        let (state_tx, _) = watch::channel(ProvisioningState::Idle);

        Self {
            link,
            handles,
            poll_interval: config.effective_poll_interval(),
            poll_ceiling: config.poll_ceiling,
            state_tx,
        }
    }

    /// Create a provisioner from a resolution result.
    pub fn from_resolved(resolved: ResolvedService, config: &EngineConfig) -> Self {
        Self::new(resolved.link, resolved.handles, config)
    }

    /// Address of the peripheral.
    pub fn address(&self) -> DeviceAddress {
        self.link.address()
    }

    /// The resolved characteristic handles.
    pub fn handles(&self) -> &GattHandleSet {
        &self.handles
    }

    /// Get the current state.
    pub fn state(&self) -> ProvisioningState {
        *self.state_tx.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ProvisioningState> {
        self.state_tx.subscribe()
    }

    /// Provision `ssid`/`psk` and wait for the peripheral's verdict.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArguments`] for out-of-range credentials,
    /// before anything is written. Every other failure is reported in the
    /// returned [`ProvisioningReport`].
    pub async fn provision(&mut self, ssid: &str, psk: &str) -> Result<ProvisioningReport> {
        validate_credentials(ssid, psk)?;

        let started_at = Utc::now();
        info!(
            "Provisioning {} with SSID {:?} and PSK {}",
            self.address(),
            ssid,
            redact(psk)
        );

        let (outcome, polls, last_status) = self.run(ssid, psk).await;
        self.set_state(outcome.state());

        match &outcome {
            ProvisioningOutcome::Success => info!("{} joined {:?}", self.address(), ssid),
            ProvisioningOutcome::Failure(cause) => {
                warn!("Provisioning {} failed: {}", self.address(), cause)
            }
            ProvisioningOutcome::TimedOut => warn!(
                "Provisioning {} timed out after {} polls",
                self.address(),
                polls
            ),
        }

        Ok(ProvisioningReport {
            outcome,
            polls,
            last_status,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run(
        &self,
        ssid: &str,
        psk: &str,
    ) -> (ProvisioningOutcome, u32, Option<ProvisioningStatus>) {
        self.set_state(ProvisioningState::WritingSsid);
        if let Err(failure) = self.write(&self.handles.ssid, ssid.as_bytes()).await {
            return (ProvisioningOutcome::Failure(failure), 0, None);
        }

        self.set_state(ProvisioningState::WritingPsk);
        if let Err(failure) = self.write(&self.handles.psk, psk.as_bytes()).await {
            return (ProvisioningOutcome::Failure(failure), 0, None);
        }

        if let Err(failure) = self
            .write(&self.handles.control, &ControlCommand::Connect.to_bytes())
            .await
        {
            return (ProvisioningOutcome::Failure(failure), 0, None);
        }
        self.set_state(ProvisioningState::CommandSent);

        self.set_state(ProvisioningState::PollingStatus);
        self.poll().await
    }

    /// Poll the status characteristic until a terminal status or the end of
    /// the poll window (`poll_interval * poll_ceiling` after the command).
    ///
    /// Reads share the window's deadline, so a read that never completes
    /// ends the run as [`ProvisioningOutcome::TimedOut`] rather than hanging.
    async fn poll(&self) -> (ProvisioningOutcome, u32, Option<ProvisioningStatus>) {
        let start = Instant::now();
        let deadline = start + self.poll_interval * self.poll_ceiling;
        let mut ticker = tokio::time::interval_at(start, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls = 0;
        let mut last_status = None;

        while polls < self.poll_ceiling {
            if timeout_at(deadline, ticker.tick()).await.is_err() {
                break;
            }
            polls += 1;

            let status = match timeout_at(deadline, self.read_status()).await {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    warn!("Status poll {} failed: {}", polls, e);
                    continue;
                }
                Err(_) => {
                    warn!("Status poll {} still pending when the poll window closed", polls);
                    break;
                }
            };

            debug!("Status poll {}: {} ({})", polls, status, hex_byte(status.to_raw()));
            last_status = Some(status);

            if status.is_success() {
                return (ProvisioningOutcome::Success, polls, last_status);
            }
            if status.is_failure() {
                return (
                    ProvisioningOutcome::Failure(ProvisioningFailure::Device(status)),
                    polls,
                    last_status,
                );
            }
        }

        tokio::time::sleep_until(deadline).await;
        (ProvisioningOutcome::TimedOut, polls, last_status)
    }

    /// Read and decode the status characteristic once.
    pub async fn read_status(&self) -> Result<ProvisioningStatus> {
        let data = self.link.read(&self.handles.status).await?;
        ProvisioningStatus::parse(&data)
    }

    /// Tell the peripheral to forget stored credentials.
    pub async fn clear_credentials(&mut self) -> Result<()> {
        self.send_command(ControlCommand::ClearCredentials).await
    }

    /// Restore the peripheral to factory state.
    pub async fn factory_reset(&mut self) -> Result<()> {
        self.send_command(ControlCommand::FactoryReset).await
    }

    async fn send_command(&mut self, command: ControlCommand) -> Result<()> {
        info!("Sending {} to {}", command, self.address());
        self.write(&self.handles.control, &command.to_bytes())
            .await
            .map_err(|failure| match failure {
                ProvisioningFailure::Write {
                    characteristic,
                    cause,
                } => Error::WriteFailed {
                    characteristic: characteristic.to_string(),
                    cause,
                },
                ProvisioningFailure::Device(status) => {
                    Error::Internal(format!("unexpected device status {}", status))
                }
            })?;
        self.set_state(ProvisioningState::Idle);
        Ok(())
    }

    /// Close the link.
    pub async fn disconnect(self) -> Result<()> {
        self.link.disconnect().await
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> std::result::Result<(), ProvisioningFailure> {
        let name = characteristic_name(&characteristic.uuid);
        debug!("Writing {} bytes to {}", data.len(), name);

        self.link
            .write(characteristic, data)
            .await
            .map_err(|e| ProvisioningFailure::Write {
                characteristic: name,
                cause: WriteFailure::from_error(&e),
            })
    }

    fn set_state(&self, state: ProvisioningState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Provisioning state: {} -> {}", previous, state);
        }
    }
}

impl std::fmt::Debug for WifiProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiProvisioner")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::resolver::ServiceResolver;
    use crate::ble::uuids::*;
    use crate::sim::SimulatedPeripheral;
    use pretty_assertions::assert_eq;
    use async_trait::async_trait;
    use btleplug::api::Service;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    async fn provisioner(peripheral: &SimulatedPeripheral) -> WifiProvisioner {
        let resolver = ServiceResolver::new(Arc::new(peripheral.clone()));
        let resolved = resolver.resolve(addr()).await.unwrap().unwrap();
        WifiProvisioner::from_resolved(resolved, &EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_sequence() {
        let peripheral =
            SimulatedPeripheral::new(addr()).with_status_sequence(&[0x03, 0x04, 0x05, 0x06, 0x07]);
        let mut provisioner = provisioner(&peripheral).await;
        let states = provisioner.subscribe_state();

        let start = Instant::now();
        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();

        assert_eq!(report.outcome, ProvisioningOutcome::Success);
        assert_eq!(report.polls, 5);
        assert_eq!(report.last_status, Some(ProvisioningStatus::Success));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
        assert!(report.finished_at >= report.started_at);
        assert_eq!(*states.borrow(), ProvisioningState::Success);

        assert_eq!(
            peripheral.writes(),
            vec![
                (SSID_CHARACTERISTIC_UUID, b"HomeNet".to_vec()),
                (PSK_CHARACTERISTIC_UUID, b"secret123".to_vec()),
                (CONTROL_CHARACTERISTIC_UUID, vec![0x01]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_stops_polling() {
        let peripheral =
            SimulatedPeripheral::new(addr()).with_status_sequence(&[0x03, 0x04, 0xF2]);
        let mut provisioner = provisioner(&peripheral).await;

        let report = provisioner.provision("HomeNet", "wrong").await.unwrap();

        assert_eq!(
            report.outcome,
            ProvisioningOutcome::Failure(ProvisioningFailure::Device(
                ProvisioningStatus::NetworkFailed
            ))
        );
        assert_eq!(report.polls, 3);
        assert_eq!(peripheral.status_reads(), 3);
        assert_eq!(provisioner.state(), ProvisioningState::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_poll_ceiling() {
        let peripheral = SimulatedPeripheral::new(addr()).with_status_sequence(&[0x03]);
        let mut provisioner = provisioner(&peripheral).await;

        let start = Instant::now();
        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();

        assert_eq!(report.outcome, ProvisioningOutcome::TimedOut);
        assert_eq!(report.polls, 30);
        assert_eq!(peripheral.status_reads(), 30);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
        assert!(report.into_result().is_err());
    }

    /// Delegates to a real link but never answers status reads.
    struct StalledStatusLink {
        inner: Box<dyn GattLink>,
    }

    #[async_trait]
    impl GattLink for StalledStatusLink {
        fn address(&self) -> DeviceAddress {
            self.inner.address()
        }

        async fn discover_services(&self) -> Result<()> {
            self.inner.discover_services().await
        }

        fn services(&self) -> BTreeSet<Service> {
            self.inner.services()
        }

        async fn read(&self, _characteristic: &Characteristic) -> Result<Vec<u8>> {
            std::future::pending().await
        }

        async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
            self.inner.write(characteristic, data).await
        }

        async fn is_connected(&self) -> bool {
            self.inner.is_connected().await
        }

        async fn disconnect(&self) -> Result<()> {
            self.inner.disconnect().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_status_read_times_out_at_window() {
        let peripheral = SimulatedPeripheral::new(addr());
        let resolver = ServiceResolver::new(Arc::new(peripheral.clone()));
        let resolved = resolver.resolve(addr()).await.unwrap().unwrap();
        let link = Box::new(StalledStatusLink {
            inner: resolved.link,
        });
        let mut provisioner = WifiProvisioner::new(link, resolved.handles, &EngineConfig::default());

        let start = Instant::now();
        let report = tokio::time::timeout(
            Duration::from_secs(600),
            provisioner.provision("HomeNet", "secret123"),
        )
        .await
        .expect("provisioning must end within its poll window")
        .unwrap();

        let elapsed = start.elapsed();
        assert_eq!(report.outcome, ProvisioningOutcome::TimedOut);
        assert_eq!(report.polls, 1);
        assert_eq!(report.last_status, None);
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
        assert_eq!(provisioner.state(), ProvisioningState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_reads_keep_polling() {
        let peripheral = SimulatedPeripheral::new(addr())
            .failing_status_reads(2)
            .with_status_sequence(&[0x05, 0x07]);
        let mut provisioner = provisioner(&peripheral).await;

        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();

        assert_eq!(report.outcome, ProvisioningOutcome::Success);
        assert_eq!(report.polls, 4);
        assert_eq!(peripheral.status_reads(), 4);
        assert_eq!(report.last_status, Some(ProvisioningStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_status_read_failing_times_out() {
        let peripheral = SimulatedPeripheral::new(addr()).failing_status_reads(usize::MAX);
        let mut provisioner = provisioner(&peripheral).await;

        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();

        assert_eq!(report.outcome, ProvisioningOutcome::TimedOut);
        assert_eq!(report.polls, 30);
        assert_eq!(peripheral.status_reads(), 30);
        assert_eq!(report.last_status, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_does_not_panic() {
        let peripheral = SimulatedPeripheral::new(addr()).with_status_sequence(&[0x03]);
        let resolver = ServiceResolver::new(Arc::new(peripheral.clone()));
        let resolved = resolver.resolve(addr()).await.unwrap().unwrap();
        let config = EngineConfig {
            poll_interval: Duration::ZERO,
            poll_ceiling: 3,
            ..EngineConfig::default()
        };
        let mut provisioner = WifiProvisioner::from_resolved(resolved, &config);

        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();
        assert_eq!(report.outcome, ProvisioningOutcome::TimedOut);
        assert_eq!(report.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_aborts_before_command() {
        let peripheral = SimulatedPeripheral::new(addr())
            .failing_write(PSK_CHARACTERISTIC_UUID, WriteFailure::AccessDenied);
        let mut provisioner = provisioner(&peripheral).await;

        let report = provisioner.provision("HomeNet", "secret123").await.unwrap();

        assert_eq!(
            report.outcome,
            ProvisioningOutcome::Failure(ProvisioningFailure::Write {
                characteristic: "psk",
                cause: WriteFailure::AccessDenied,
            })
        );
        assert_eq!(report.polls, 0);
        assert_eq!(peripheral.written(CONTROL_CHARACTERISTIC_UUID), None);
        assert_eq!(peripheral.status_reads(), 0);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.code(), "WRITE_FAILED");
    }

    #[tokio::test]
    async fn test_invalid_credentials_write_nothing() {
        let peripheral = SimulatedPeripheral::new(addr());
        let mut provisioner = provisioner(&peripheral).await;

        let err = provisioner.provision("", "secret123").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");

        let long_ssid = "x".repeat(33);
        assert!(provisioner.provision(&long_ssid, "").await.is_err());

        let long_psk = "k".repeat(64);
        assert!(provisioner.provision("HomeNet", &long_psk).await.is_err());

        assert!(peripheral.writes().is_empty());
        assert_eq!(provisioner.state(), ProvisioningState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provisioner_can_rerun() {
        let peripheral = SimulatedPeripheral::new(addr()).with_status_sequence(&[0xF2, 0x07]);
        let mut provisioner = provisioner(&peripheral).await;

        let first = provisioner.provision("HomeNet", "wrong").await.unwrap();
        assert!(!first.outcome.is_success());

        let second = provisioner.provision("HomeNet", "secret123").await.unwrap();
        assert!(second.outcome.is_success());
        assert_eq!(
            peripheral.written(PSK_CHARACTERISTIC_UUID),
            Some(b"secret123".to_vec())
        );
    }

    #[tokio::test]
    async fn test_control_commands() {
        let peripheral = SimulatedPeripheral::new(addr());
        let mut provisioner = provisioner(&peripheral).await;

        provisioner.clear_credentials().await.unwrap();
        assert_eq!(peripheral.written(CONTROL_CHARACTERISTIC_UUID), Some(vec![0x02]));

        provisioner.factory_reset().await.unwrap();
        assert_eq!(peripheral.written(CONTROL_CHARACTERISTIC_UUID), Some(vec![0x03]));

        assert_eq!(provisioner.read_status().await.unwrap(), ProvisioningStatus::Ready);

        provisioner.disconnect().await.unwrap();
        assert!(!peripheral.is_connected());
    }

    #[test]
    fn test_validate_credentials_boundaries() {
        assert!(validate_credentials(&"s".repeat(32), &"p".repeat(63)).is_ok());
        assert!(validate_credentials("open-network", "").is_ok());
        assert!(validate_credentials(&"s".repeat(33), "").is_err());
    }
}
