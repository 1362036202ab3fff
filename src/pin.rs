//! PIN exchange between the pairing negotiation and the UI layer.
//!
//! The negotiation side calls [`PinExchange::request_pin`] and suspends
//! until the UI answers through [`PinExchange::submit_pin`] or the timeout
//! expires. The UI side learns that a PIN is needed by subscribing to
//! [`PinRequest`] notifications.
//!
//! Only one request can be outstanding at a time. Each request gets its own
//! single-use reply slot, so a PIN typed for an earlier failed attempt can
//! never satisfy a new request.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::ble::address::DeviceAddress;
use crate::utils::redact;

/// Notification that the negotiation needs a PIN from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRequest {
    /// Sequence number of this request.
    pub id: u64,
    /// The device being paired.
    pub address: DeviceAddress,
    /// When the request was raised.
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PinState {
    /// Reply slot of the outstanding request; `Some` means a request is pending.
    pending: Option<oneshot::Sender<String>>,
    /// The outstanding request, as announced to the UI.
    request: Option<PinRequest>,
    /// Id of the last request raised.
    last_id: u64,
}

impl PinState {
    fn has_live_request(&self) -> bool {
        self.pending.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Cross-task PIN request/response channel.
#[derive(Debug)]
pub struct PinExchange {
    state: Mutex<PinState>,
    request_tx: broadcast::Sender<PinRequest>,
}

impl PinExchange {
    /// Create a new exchange.
    pub fn new() -> Arc<Self> {
        let (request_tx, _) = broadcast::channel(16);

        Arc::new(Self {
            state: Mutex::new(PinState::default()),
            request_tx,
        })
    }

    /// Subscribe to PIN request notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PinRequest> {
        self.request_tx.subscribe()
    }

    /// Check if a PIN request is waiting for an answer.
    pub fn is_pending(&self) -> bool {
        self.state.lock().has_live_request()
    }

    /// Answer the outstanding PIN request.
    ///
    /// Returns `false`, without touching any state, when no request is
    /// outstanding.
    pub fn submit_pin(&self, pin: &str) -> bool {
        let mut state = self.state.lock();

        if !state.has_live_request() {
            state.pending = None;
            warn!(
                "PIN submitted ({}) but no PIN request is outstanding; ignoring",
                redact(pin)
            );
            return false;
        }

        state.request = None;

        let delivered = state
            .pending
            .take()
            .map(|tx| tx.send(pin.to_string()).is_ok())
            .unwrap_or(false);

        if delivered {
            info!("Received PIN from UI ({})", redact(pin));
        } else {
            warn!("PIN request was abandoned before the PIN arrived");
        }

        delivered
    }

    /// Ask the UI for a PIN and wait up to `timeout` for the answer.
    ///
    /// Returns `None` on timeout, or immediately if another request is
    /// already outstanding.
    pub async fn request_pin(&self, address: DeviceAddress, timeout: Duration) -> Option<String> {
        let (tx, rx) = oneshot::channel();

        let request = {
            let mut state = self.state.lock();
            if state.has_live_request() {
                warn!(
                    "PIN request for {} refused: another request is outstanding",
                    address
                );
                return None;
            }

            state.pending = Some(tx);
            state.last_id += 1;

            let request = PinRequest {
                id: state.last_id,
                address,
                requested_at: Utc::now(),
            };
            state.request = Some(request.clone());
            request
        };

        debug!("Notifying UI of PIN request #{} for {}", request.id, address);
        if self.request_tx.send(request).is_err() {
            warn!("No UI subscriber is listening for PIN requests");
        }

        let outcome = tokio::time::timeout(timeout, rx).await;

        let mut state = self.state.lock();
        state.pending = None;
        state.request = None;

        match outcome {
            Ok(Ok(pin)) => Some(pin),
            Ok(Err(_)) => {
                warn!("PIN reply channel closed without an answer");
                None
            }
            Err(_) => {
                warn!(
                    "Timed out after {:?} waiting for PIN input for {}",
                    timeout, address
                );
                None
            }
        }
    }

    /// The request currently waiting for a PIN, if any.
    pub fn outstanding_request(&self) -> Option<PinRequest> {
        let state = self.state.lock();
        if state.has_live_request() {
            state.request.clone()
        } else {
            None
        }
    }

    /// Wait for a PIN request.
    ///
    /// Returns the outstanding request straight away if there is one, so a
    /// request raised before this call is not missed. Requests that were
    /// answered or timed out before the call are not reported; callers that
    /// need every notification should keep a receiver from
    /// [`PinExchange::subscribe`]. Returns `None` if the exchange is dropped.
    pub async fn wait_for_request(&self) -> Option<PinRequest> {
        let mut rx = self.subscribe();
        if let Some(request) = self.outstanding_request() {
            return Some(request);
        }
        loop {
            match rx.recv().await {
                Ok(request) => return Some(request),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} stale PIN notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_round_trip() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let waiter = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });

        let request = requests.recv().await.unwrap();
        assert_eq!(request.address, addr());
        assert!(exchange.is_pending());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(exchange.submit_pin("748506"));

        assert_eq!(waiter.await.unwrap(), Some("748506".to_string()));
        assert!(!exchange.is_pending());
    }

    #[tokio::test]
    async fn test_submit_without_request_is_noop() {
        let exchange = PinExchange::new();
        assert!(!exchange.submit_pin("1234"));
        assert!(!exchange.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_none_after_sixty_seconds() {
        let exchange = PinExchange::new();
        let _requests = exchange.subscribe();

        let start = Instant::now();
        let pin = exchange
            .request_pin(addr(), Duration::from_secs(60))
            .await;

        assert_eq!(pin, None);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(!exchange.is_pending());
        assert!(!exchange.submit_pin("too late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_pin_is_not_reused() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let first = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        requests.recv().await.unwrap();
        assert!(exchange.submit_pin("111111"));
        assert_eq!(first.await.unwrap(), Some("111111".to_string()));

        let second = exchange.request_pin(addr(), Duration::from_secs(5)).await;
        assert_eq!(second, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_concurrent_request_is_refused() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let first = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        let first_request = requests.recv().await.unwrap();

        let other = DeviceAddress::parse("11:22:33:44:55:66").unwrap();
        assert_eq!(exchange.request_pin(other, Duration::from_secs(60)).await, None);

        assert!(exchange.submit_pin("2468"));
        assert_eq!(first.await.unwrap(), Some("2468".to_string()));
        assert_eq!(first_request.id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_does_not_block_next_one() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let abandoned = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        requests.recv().await.unwrap();
        abandoned.abort();
        let _ = abandoned.await;

        assert!(!exchange.is_pending());

        let next = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        let request = requests.recv().await.unwrap();
        assert_eq!(request.id, 2);
        assert!(exchange.submit_pin("1357"));
        assert_eq!(next.await.unwrap(), Some("1357".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_request() {
        let exchange = PinExchange::new();

        let listener = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.wait_for_request().await }
        });
        while exchange.request_tx.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }

        let requester = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(1)).await }
        });

        let request = listener.await.unwrap().expect("request notification");
        assert_eq!(request.address, addr());
        assert_eq!(requester.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_request_returns_request_raised_earlier() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let requester = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        let announced = requests.recv().await.unwrap();

        let request = exchange.wait_for_request().await.expect("outstanding request");
        assert_eq!(request, announced);
        assert_eq!(exchange.outstanding_request(), Some(announced));

        assert!(exchange.submit_pin("9999"));
        assert_eq!(requester.await.unwrap(), Some("9999".to_string()));
        assert_eq!(exchange.outstanding_request(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_request_skips_expired_request() {
        let exchange = PinExchange::new();

        assert_eq!(
            exchange.request_pin(addr(), Duration::from_secs(1)).await,
            None
        );
        assert_eq!(exchange.outstanding_request(), None);

        let waited =
            tokio::time::timeout(Duration::from_secs(5), exchange.wait_for_request()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_is_not_outstanding() {
        let exchange = PinExchange::new();
        let mut requests = exchange.subscribe();

        let abandoned = tokio::spawn({
            let exchange = exchange.clone();
            async move { exchange.request_pin(addr(), Duration::from_secs(60)).await }
        });
        requests.recv().await.unwrap();
        abandoned.abort();
        let _ = abandoned.await;

        assert_eq!(exchange.outstanding_request(), None);
    }
}
