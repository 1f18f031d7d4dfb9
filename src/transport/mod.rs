// SPDX-License-Identifier: GPL-3.0-only
//! Transport adapters
//!
//! A [`Transport`] reaches the real device-control mechanism and hands back
//! raw [`WireValue`] replies for the decoder. Two adapters ship with the
//! crate: ddcutil-service over D-Bus and the `ddcutil` command line tool.

#[cfg(feature = "cli-transport")]
pub mod cli;
#[cfg(feature = "dbus-transport")]
pub mod dbus;
#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::TransportError;
use crate::model::DeviceAddress;
use crate::wire::WireValue;

/// Change notifications pushed by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A display was connected or disconnected
    DevicesChanged,
    /// A feature changed outside this client
    FeatureChanged {
        id: String,
        edid: String,
        code: u8,
        value: i64,
        /// Name of the client that made the change, when known
        source: String,
    },
    ServiceAvailable,
    ServiceUnavailable,
}

/// Common interface for all device-control transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Enumerate attached displays
    async fn discover(&self) -> Result<WireValue, TransportError>;

    /// Fetch the capability record of one display
    async fn get_capabilities(&self, device: &DeviceAddress) -> Result<WireValue, TransportError>;

    async fn get_value(
        &self,
        device: &DeviceAddress,
        code: u8,
    ) -> Result<WireValue, TransportError>;

    async fn get_multiple_values(
        &self,
        device: &DeviceAddress,
        codes: &[u8],
    ) -> Result<WireValue, TransportError>;

    async fn set_value(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
    ) -> Result<WireValue, TransportError>;

    /// Write with a client context string for cross-client attribution
    async fn set_value_with_context(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
        _context: &str,
    ) -> Result<WireValue, TransportError> {
        self.set_value(device, code, value).await
    }

    /// Whether [`Transport::set_value_with_context`] attributes writes
    fn supports_context(&self) -> bool {
        false
    }

    /// Stream of change notifications; transports without events return an
    /// empty stream
    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError>;
}

/// Ordered method names for one operation; the first is the current name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodChain {
    pub operation: &'static str,
    pub names: &'static [&'static str],
}

impl MethodChain {
    pub fn primary(&self) -> &'static str {
        self.names.first().copied().unwrap_or(self.operation)
    }
}

/// Method names used by the control service across its releases
pub mod methods {
    use super::MethodChain;

    pub const DISCOVER: MethodChain = MethodChain {
        operation: "discover",
        names: &["Detect", "ListDetected", "ListMonitors", "EnumerateDisplays"],
    };

    pub const CAPABILITIES: MethodChain = MethodChain {
        operation: "capabilities",
        names: &[
            "GetCapabilitiesMetadata",
            "GetCapabilities",
            "ListVcpFeatures",
            "ListFeatures",
            "EnumerateFeatures",
        ],
    };

    pub const GET_VALUE: MethodChain = MethodChain {
        operation: "get value",
        names: &["GetVcp", "GetVcpFeature", "GetVcpValue", "GetFeature", "Get"],
    };

    pub const GET_MULTIPLE: MethodChain = MethodChain {
        operation: "get multiple values",
        names: &["GetMultipleVcp", "GetMultipleValues"],
    };

    pub const SET_VALUE: MethodChain = MethodChain {
        operation: "set value",
        names: &[
            "SetVcp",
            "SetFeatureValue",
            "SetVcpValue",
            "SetVcpFeature",
            "SetFeature",
            "SetValue",
            "Set",
        ],
    };

    pub const SET_WITH_CONTEXT: MethodChain = MethodChain {
        operation: "set value with context",
        names: &["SetVcpWithContext", "SetFeatureValueWithContext"],
    };
}

/// Try each method name of `chain` in order
///
/// The first success wins. [`TransportError::Unavailable`] ends the walk at
/// once, as does [`TransportError::ServiceStatus`]: the method exists and the
/// device itself refused. When every name fails, the primary name's error is
/// returned.
pub async fn call_with_fallback<T, F, Fut>(
    chain: &MethodChain,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut(&'static str) -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut primary_error = None;
    for (attempt, name) in chain.names.iter().copied().enumerate() {
        match call(name).await {
            Ok(reply) => {
                if attempt > 0 {
                    debug!(operation = chain.operation, method = name, "Fallback method succeeded");
                }
                return Ok(reply);
            }
            Err(err) if err.is_unavailable() => return Err(err),
            Err(err @ TransportError::ServiceStatus { .. }) => return Err(err),
            Err(err) => {
                debug!(operation = chain.operation, method = name, "Method failed: {err}");
                primary_error.get_or_insert(err);
            }
        }
    }
    Err(primary_error.unwrap_or_else(|| TransportError::MethodFailed {
        method: chain.primary().to_string(),
        reason: "no method names to try".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn failed(method: &str) -> TransportError {
        TransportError::MethodFailed {
            method: method.to_string(),
            reason: "unknown method".to_string(),
        }
    }

    #[tokio::test]
    async fn first_success_wins_in_order() {
        let tried = Mutex::new(Vec::new());
        let reply = call_with_fallback(&methods::SET_VALUE, |name| {
            tried.lock().unwrap().push(name);
            async move {
                if name == "SetVcpValue" {
                    Ok(name)
                } else {
                    Err(failed(name))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply, "SetVcpValue");
        assert_eq!(
            *tried.lock().unwrap(),
            vec!["SetVcp", "SetFeatureValue", "SetVcpValue"]
        );
    }

    #[tokio::test]
    async fn set_feature_is_tried_after_set_vcp_feature() {
        let tried = Mutex::new(Vec::new());
        let reply = call_with_fallback(&methods::SET_VALUE, |name| {
            tried.lock().unwrap().push(name);
            async move {
                if name == "SetFeature" {
                    Ok(name)
                } else {
                    Err(failed(name))
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply, "SetFeature");
        assert_eq!(
            *tried.lock().unwrap(),
            vec!["SetVcp", "SetFeatureValue", "SetVcpValue", "SetVcpFeature", "SetFeature"]
        );
    }

    #[tokio::test]
    async fn exhausted_chain_reports_primary_error() {
        let err = call_with_fallback(&methods::DISCOVER, |name| async move {
            Err::<(), _>(failed(name))
        })
        .await
        .unwrap_err();
        assert_eq!(err, failed("Detect"));
    }

    #[tokio::test]
    async fn unavailable_stops_the_walk() {
        let tried = Mutex::new(0);
        let err = call_with_fallback(&methods::GET_VALUE, |_| {
            *tried.lock().unwrap() += 1;
            async { Err::<(), _>(TransportError::Unavailable("no bus".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(*tried.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn device_status_is_not_retried_under_other_names() {
        let tried = Mutex::new(0);
        let err = call_with_fallback(&methods::SET_VALUE, |_| {
            *tried.lock().unwrap() += 1;
            async {
                Err::<(), _>(TransportError::ServiceStatus {
                    status: -3020,
                    message: "busy".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, TransportError::ServiceStatus { status: -3020, .. }));
        assert_eq!(*tried.lock().unwrap(), 1);
    }

    #[test]
    fn chains_lead_with_current_names() {
        assert_eq!(methods::DISCOVER.primary(), "Detect");
        assert_eq!(methods::CAPABILITIES.primary(), "GetCapabilitiesMetadata");
        assert_eq!(methods::GET_MULTIPLE.primary(), "GetMultipleVcp");
        assert_eq!(methods::SET_WITH_CONTEXT.primary(), "SetVcpWithContext");
    }
}
