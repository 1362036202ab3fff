//! Method-call dispatch for the UI layer.
//!
//! The UI talks to the engine over two named channels carrying
//! [`MethodCall`]s with a map of [`Value`] arguments. Replies are a
//! [`Value`] on success and a crate [`Error`] (whose [`Error::code`] is the
//! reported error code) on failure.
//!
//! | Channel              | Method           | Arguments                                   | Reply   |
//! |----------------------|------------------|---------------------------------------------|---------|
//! | [`PAIRING_CHANNEL`]  | `pairDevice`     | `deviceAddress`, `requireAuthentication`?   | `true`  |
//! | [`PAIRING_CHANNEL`]  | `isDevicePaired` | `deviceAddress`                             | bool    |
//! | [`PAIRING_CHANNEL`]  | `unpairDevice`   | `deviceAddress`                             | bool    |
//! | [`PIN_CHANNEL`]      | `submitPin`      | `pin`                                       | bool    |
//!
//! When a pairing needs a PIN, an `onPinRequest` call is sent the other way
//! on [`PIN_CHANNEL`]; see [`pin_request_call`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::PairingEngine;
use crate::error::{Error, Result};
use crate::pin::PinRequest;

/// Channel carrying pairing operations.
pub const PAIRING_CHANNEL: &str = "ble_provisioner/pairing";
/// Channel carrying PIN traffic.
pub const PIN_CHANNEL: &str = "ble_provisioner/pairing/pin";

/// Method name of the UI-bound PIN notification.
pub const ON_PIN_REQUEST: &str = "onPinRequest";

/// A value crossing the channel boundary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// No value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    Str(String),
    /// A string-keyed map.
    Map(HashMap<String, Value>),
}

impl Value {
    /// Get the value as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the value as a map.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A named method invocation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodCall {
    /// Method name.
    pub method: String,
    /// Arguments, normally a [`Value::Map`].
    pub arguments: Value,
}

impl MethodCall {
    /// Create a call with explicit arguments.
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }

    /// Create a call with map arguments.
    pub fn with_args<I, K, V>(method: &str, args: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map = args
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(method, Value::Map(map))
    }

    fn arguments(&self) -> Result<&HashMap<String, Value>> {
        self.arguments.as_map().ok_or_else(|| Error::InvalidArguments {
            reason: format!("{} expects a map of arguments", self.method),
        })
    }

    fn required_str(&self, key: &str) -> Result<&str> {
        match self.arguments()?.get(key) {
            Some(Value::Str(s)) => Ok(s),
            Some(Value::Null) | None => Err(Error::MissingArgument {
                name: key.to_string(),
            }),
            Some(other) => Err(Error::InvalidArguments {
                reason: format!("{} must be a string, got {:?}", key, other),
            }),
        }
    }

    fn optional_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.arguments()?.get(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Null) | None => Ok(default),
            Some(other) => Err(Error::InvalidArguments {
                reason: format!("{} must be a boolean, got {:?}", key, other),
            }),
        }
    }
}

/// The UI-bound call announcing that a PIN is needed.
pub fn pin_request_call(request: &PinRequest) -> MethodCall {
    MethodCall::with_args(
        ON_PIN_REQUEST,
        [
            ("deviceAddress", Value::from(request.address.to_string())),
            ("requestId", Value::Int(request.id as i64)),
        ],
    )
}

/// Dispatches channel calls onto a [`PairingEngine`].
pub struct MethodChannel {
    engine: Arc<PairingEngine>,
}

impl MethodChannel {
    /// Create a dispatcher for `engine`.
    pub fn new(engine: Arc<PairingEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this channel.
    pub fn engine(&self) -> &Arc<PairingEngine> {
        &self.engine
    }

    /// Handle a call arriving on `channel`.
    pub async fn dispatch(&self, channel: &str, call: MethodCall) -> Result<Value> {
        match channel {
            PAIRING_CHANNEL => self.handle(call).await,
            PIN_CHANNEL => self.handle_pin(call),
            other => {
                warn!("Call {} on unknown channel {}", call.method, other);
                Err(Error::NotImplemented {
                    method: format!("{}#{}", other, call.method),
                })
            }
        }
    }

    /// Handle a call on [`PAIRING_CHANNEL`].
    pub async fn handle(&self, call: MethodCall) -> Result<Value> {
        debug!("Pairing channel call: {}", call.method);

        match call.method.as_str() {
            "pairDevice" => {
                let address = call.required_str("deviceAddress")?;
                let require_authentication = call.optional_bool(
                    "requireAuthentication",
                    self.engine.config().require_authentication,
                )?;
                self.engine
                    .pair_device(address, require_authentication)
                    .await?;
                Ok(Value::Bool(true))
            }
            "isDevicePaired" => {
                let address = call.required_str("deviceAddress")?;
                Ok(Value::Bool(self.engine.is_device_paired(address).await?))
            }
            "unpairDevice" => {
                let address = call.required_str("deviceAddress")?;
                Ok(Value::Bool(self.engine.unpair_device(address).await?))
            }
            _ => Err(Error::NotImplemented {
                method: call.method.clone(),
            }),
        }
    }

    /// Handle a call on [`PIN_CHANNEL`].
    pub fn handle_pin(&self, call: MethodCall) -> Result<Value> {
        match call.method.as_str() {
            "submitPin" => {
                let pin = call.required_str("pin")?;
                Ok(Value::Bool(self.engine.submit_pin(pin)))
            }
            _ => Err(Error::NotImplemented {
                method: call.method.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::address::DeviceAddress;
    use crate::config::EngineConfig;
    use crate::sim::{SimulatedDevice, SimulatedPeripheral, SimulatedStack, StackCall};
    use crate::pairing::{PairingKinds, ProtectionLevel};
    use std::time::Duration;

    const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

    fn addr() -> DeviceAddress {
        DeviceAddress::parse(DEVICE).unwrap()
    }

    fn channel(stack: &Arc<SimulatedStack>) -> MethodChannel {
        let engine = PairingEngine::new(
            stack.clone(),
            Arc::new(SimulatedPeripheral::new(addr())),
            EngineConfig::default().with_settle_interval(Duration::ZERO),
        );
        MethodChannel::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_pair_defaults_to_authenticated() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node"));
        let channel = channel(&stack);

        let reply = channel
            .dispatch(
                PAIRING_CHANNEL,
                MethodCall::with_args("pairDevice", [("deviceAddress", DEVICE)]),
            )
            .await
            .unwrap();

        assert_eq!(reply, Value::Bool(true));
        assert!(stack.calls().contains(&StackCall::Pair {
            address: addr(),
            kinds: PairingKinds::ALL,
            protection: ProtectionLevel::EncryptionAndAuthentication,
        }));
    }

    #[tokio::test]
    async fn test_pair_without_authentication() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node"));
        let channel = channel(&stack);

        let call = MethodCall::with_args(
            "pairDevice",
            [
                ("deviceAddress", Value::from(DEVICE)),
                ("requireAuthentication", Value::from(false)),
            ],
        );
        channel.handle(call).await.unwrap();

        assert!(stack.calls().contains(&StackCall::Pair {
            address: addr(),
            kinds: PairingKinds::ALL,
            protection: ProtectionLevel::Encryption,
        }));
    }

    #[tokio::test]
    async fn test_argument_errors() {
        let stack = SimulatedStack::new();
        let channel = channel(&stack);

        let no_map = MethodCall::new("pairDevice", Value::Null);
        assert_eq!(
            channel.handle(no_map).await.unwrap_err().code(),
            "INVALID_ARGUMENTS"
        );

        let missing = MethodCall::with_args("isDevicePaired", Vec::<(String, Value)>::new());
        assert_eq!(
            channel.handle(missing).await.unwrap_err().code(),
            "MISSING_ARGUMENT"
        );

        let wrong_type = MethodCall::with_args("unpairDevice", [("deviceAddress", 42i64)]);
        assert_eq!(
            channel.handle(wrong_type).await.unwrap_err().code(),
            "INVALID_ARGUMENTS"
        );

        let bad_address = MethodCall::with_args("pairDevice", [("deviceAddress", "xyz")]);
        assert_eq!(
            channel.handle(bad_address).await.unwrap_err().code(),
            "INVALID_ADDRESS"
        );

        let unknown = MethodCall::with_args("frobnicate", [("deviceAddress", DEVICE)]);
        assert_eq!(
            channel.handle(unknown).await.unwrap_err().code(),
            "NOT_IMPLEMENTED"
        );
    }

    #[tokio::test]
    async fn test_status_queries() {
        let stack = SimulatedStack::new();
        let channel = channel(&stack);
        let query = || MethodCall::with_args("isDevicePaired", [("deviceAddress", DEVICE)]);

        assert_eq!(channel.handle(query()).await.unwrap(), Value::Bool(false));

        stack.add_device(addr(), SimulatedDevice::new("node").paired());
        assert_eq!(channel.handle(query()).await.unwrap(), Value::Bool(true));

        let unpair = MethodCall::with_args("unpairDevice", [("deviceAddress", DEVICE)]);
        assert_eq!(channel.handle(unpair).await.unwrap(), Value::Bool(true));
        assert_eq!(channel.handle(query()).await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn test_submit_pin_channel() {
        let stack = SimulatedStack::new();
        let channel = channel(&stack);

        let reply = channel
            .dispatch(
                PIN_CHANNEL,
                MethodCall::with_args("submitPin", [("pin", "1234")]),
            )
            .await
            .unwrap();
        assert_eq!(reply, Value::Bool(false));

        let missing = MethodCall::with_args("submitPin", Vec::<(String, Value)>::new());
        assert_eq!(
            channel.handle_pin(missing).unwrap_err().code(),
            "MISSING_ARGUMENT"
        );

        let err = channel
            .dispatch("elsewhere", MethodCall::new("submitPin", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_IMPLEMENTED");
    }

    #[test]
    fn test_pin_request_call() {
        let request = PinRequest {
            id: 3,
            address: addr(),
            requested_at: chrono::Utc::now(),
        };
        let call = pin_request_call(&request);

        assert_eq!(call.method, ON_PIN_REQUEST);
        let args = call.arguments.as_map().unwrap();
        assert_eq!(args["deviceAddress"].as_str(), Some(DEVICE));
        assert_eq!(args["requestId"], Value::Int(3));
    }
}
