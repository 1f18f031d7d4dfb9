// SPDX-License-Identifier: GPL-3.0-only
//! ddcutil-service transport over D-Bus
//!
//! Calls are made dynamically by method name so that the names used by older
//! service releases can be tried in turn. Reply bodies are read as a
//! `zvariant::Structure`, converted to [`WireValue`] and reshaped into the
//! record forms the decoder expects.
//!
//! Service replies end in an `(i status, s message)` pair; a non-zero status
//! becomes [`TransportError::ServiceStatus`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio::sync::Mutex;
use zbus::Connection;
use zbus::zvariant::{DynamicType, Structure, Value};

use super::{Transport, TransportEvent, call_with_fallback, methods};
use crate::config::{BusKind, Config};
use crate::error::TransportError;
use crate::model::DeviceAddress;
use crate::wire::WireValue;

/// Current well-known name first, then names used by earlier releases
pub const SERVICE_NAMES: &[&str] = &[
    "com.ddcutil.DdcutilService",
    "io.github.ddcutil.Service",
    "org.ddcutilservice.DdcutilService",
];

const FLAG_RETURN_RAW_VALUES: u32 = 2;
const FLAG_NO_VERIFY: u32 = 4;

/// D-Bus errors that mean the service cannot be reached at all
const UNREACHABLE_ERRORS: &[&str] = &[
    "org.freedesktop.DBus.Error.ServiceUnknown",
    "org.freedesktop.DBus.Error.NameHasNoOwner",
    "org.freedesktop.DBus.Error.AccessDenied",
    "org.freedesktop.DBus.Error.NoServer",
    "org.freedesktop.DBus.Error.Disconnected",
    "org.freedesktop.DBus.Error.Spawn.ServiceNotFound",
];

const DETECT_FIELDS: &[&str] = &[
    "display_number",
    "usb_bus",
    "usb_device",
    "manufacturer",
    "model",
    "serial",
    "product_code",
    "edid_txt",
    "binary_serial",
];

#[derive(Clone)]
struct Endpoint {
    connection: Connection,
    service: String,
}

pub struct DbusTransport {
    bus: BusKind,
    service_names: Vec<String>,
    object_path: String,
    interface: String,
    raw_values: bool,
    no_verify: bool,
    timeout: Duration,
    endpoint: Mutex<Option<Endpoint>>,
}

impl DbusTransport {
    /// Nothing is connected until the first call
    pub fn new(config: &Config) -> Self {
        let service_names = match &config.service_name {
            Some(name) => vec![name.clone()],
            None => SERVICE_NAMES.iter().map(|s| s.to_string()).collect(),
        };
        Self {
            bus: config.bus,
            service_names,
            object_path: config.object_path.clone(),
            interface: config.interface.clone(),
            raw_values: config.raw_values,
            no_verify: config.no_verify,
            timeout: config.call_timeout(),
            endpoint: Mutex::new(None),
        }
    }

    fn read_flags(&self) -> u32 {
        if self.raw_values { FLAG_RETURN_RAW_VALUES } else { 0 }
    }

    fn write_flags(&self) -> u32 {
        let mut flags = 0;
        if self.no_verify {
            flags |= FLAG_NO_VERIFY;
        }
        flags
    }

    async fn endpoint(&self) -> Result<Endpoint, TransportError> {
        let mut endpoint = self.endpoint.lock().await;
        if let Some(existing) = endpoint.as_ref() {
            return Ok(existing.clone());
        }
        let found = self.locate().await?;
        info!(service = %found.service, "Connected to display control service");
        *endpoint = Some(found.clone());
        Ok(found)
    }

    /// Find a bus that has (or can activate) one of the service names
    async fn locate(&self) -> Result<Endpoint, TransportError> {
        let buses: &[BusKind] = match self.bus {
            BusKind::System => &[BusKind::System],
            BusKind::Session => &[BusKind::Session],
            BusKind::Auto => &[BusKind::System, BusKind::Session],
        };

        let mut reasons = Vec::new();
        for bus in buses {
            let connected = match bus {
                BusKind::Session => Connection::session().await,
                _ => Connection::system().await,
            };
            let connection = match connected {
                Ok(connection) => connection,
                Err(err) => {
                    debug!(?bus, "Cannot connect to bus: {err}");
                    reasons.push(format!("{bus:?} bus: {err}"));
                    continue;
                }
            };
            let dbus = match zbus::fdo::DBusProxy::new(&connection).await {
                Ok(proxy) => proxy,
                Err(err) => {
                    reasons.push(format!("{bus:?} bus: {err}"));
                    continue;
                }
            };
            let activatable = dbus.list_activatable_names().await.unwrap_or_default();
            for name in &self.service_names {
                let Ok(bus_name) = zbus::names::BusName::try_from(name.as_str()) else {
                    warn!(service = %name, "Ignoring invalid service name");
                    continue;
                };
                let owned = dbus.name_has_owner(bus_name).await.unwrap_or(false);
                if owned || activatable.iter().any(|a| a.as_str() == name) {
                    return Ok(Endpoint {
                        connection,
                        service: name.clone(),
                    });
                }
            }
            reasons.push(format!("{bus:?} bus: no display control service"));
        }
        Err(TransportError::Unavailable(reasons.join("; ")))
    }

    async fn reset(&self) {
        self.endpoint.lock().await.take();
    }

    /// Call one method and return the reply fields minus the status pair
    async fn call<B>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<Vec<WireValue>, TransportError>
    where
        B: Serialize + DynamicType + Sync,
    {
        let endpoint = self.endpoint().await?;
        let reply = tokio::time::timeout(
            self.timeout,
            endpoint.connection.call_method(
                Some(endpoint.service.as_str()),
                self.object_path.as_str(),
                Some(self.interface.as_str()),
                method,
                body,
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout(method.to_string()))?;

        let message = match reply {
            Ok(message) => message,
            Err(err) => {
                let err = classify(method, err);
                if err.is_unavailable() {
                    self.reset().await;
                }
                return Err(err);
            }
        };

        let body = message.body();
        let fields = match body.deserialize::<Structure<'_>>() {
            Ok(structure) => structure.fields().iter().map(wire_from_value).collect(),
            Err(err) if body.signature().to_string().is_empty() => {
                debug!(method, "Empty reply body: {err}");
                Vec::new()
            }
            Err(err) => {
                return Err(TransportError::Protocol(format!(
                    "{method} reply could not be read: {err}"
                )));
            }
        };
        split_status(fields)
    }

    async fn proxy(&self) -> Result<zbus::Proxy<'static>, TransportError> {
        let endpoint = self.endpoint().await?;
        zbus::Proxy::new(
            &endpoint.connection,
            endpoint.service.clone(),
            self.object_path.clone(),
            self.interface.clone(),
        )
        .await
        .map_err(|err| classify("proxy", err))
    }
}

fn display_number(device: &DeviceAddress) -> i32 {
    device.id.parse().unwrap_or(-1)
}

fn classify(method: &str, err: zbus::Error) -> TransportError {
    let unreachable = match &err {
        zbus::Error::InputOutput(_) | zbus::Error::Address(_) | zbus::Error::Handshake(_) => true,
        zbus::Error::MethodError(name, _, _) => UNREACHABLE_ERRORS.contains(&name.as_str()),
        zbus::Error::FDO(fdo) => matches!(
            **fdo,
            zbus::fdo::Error::ServiceUnknown(_)
                | zbus::fdo::Error::NameHasNoOwner(_)
                | zbus::fdo::Error::AccessDenied(_)
                | zbus::fdo::Error::NoServer(_)
                | zbus::fdo::Error::Disconnected(_)
        ),
        _ => false,
    };
    if unreachable {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::MethodFailed {
            method: method.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Convert a D-Bus value, unwrapping nested variants
pub(crate) fn wire_from_value(value: &Value<'_>) -> WireValue {
    match value {
        Value::U8(v) => WireValue::U8(*v),
        Value::Bool(v) => WireValue::Bool(*v),
        Value::I16(v) => WireValue::I16(*v),
        Value::U16(v) => WireValue::U16(*v),
        Value::I32(v) => WireValue::I32(*v),
        Value::U32(v) => WireValue::U32(*v),
        Value::I64(v) => WireValue::I64(*v),
        Value::U64(v) => WireValue::U64(*v),
        Value::F64(v) => WireValue::F64(*v),
        Value::Str(s) => WireValue::Str(s.as_str().to_string()),
        Value::Signature(s) => WireValue::Str(s.to_string()),
        Value::ObjectPath(p) => WireValue::Str(p.as_str().to_string()),
        Value::Value(inner) => wire_from_value(inner),
        Value::Array(array) => WireValue::List(array.iter().map(wire_from_value).collect()),
        Value::Dict(dict) => WireValue::Map(
            dict.iter()
                .map(|(k, v)| {
                    let key = wire_from_value(k).to_text().unwrap_or_default();
                    (key, wire_from_value(v))
                })
                .collect(),
        ),
        Value::Structure(structure) => {
            WireValue::Tuple(structure.fields().iter().map(wire_from_value).collect())
        }
        #[allow(unreachable_patterns)]
        _ => WireValue::Tuple(Vec::new()),
    }
}

/// Strip a trailing `(i status, s message)` pair, failing on non-zero status
fn split_status(mut fields: Vec<WireValue>) -> Result<Vec<WireValue>, TransportError> {
    let len = fields.len();
    if len < 2 {
        return Ok(fields);
    }
    let (WireValue::I32(status), WireValue::Str(message)) = (&fields[len - 2], &fields[len - 1])
    else {
        return Ok(fields);
    };
    if *status != 0 {
        return Err(TransportError::ServiceStatus {
            status: *status,
            message: message.clone(),
        });
    }
    fields.truncate(len - 2);
    Ok(fields)
}

/// `(n, a(iiisssqsu))` into a list of device records
fn normalize_detect(fields: Vec<WireValue>) -> WireValue {
    let Some(WireValue::List(entries)) = fields
        .iter()
        .find(|f| matches!(f, WireValue::List(_)))
        .cloned()
    else {
        return WireValue::Tuple(fields);
    };
    WireValue::List(
        entries
            .into_iter()
            .map(|entry| match entry {
                WireValue::Tuple(values) if values.len() >= DETECT_FIELDS.len() => WireValue::map(
                    DETECT_FIELDS
                        .iter()
                        .copied()
                        .zip(values),
                ),
                other => other,
            })
            .collect(),
    )
}

/// `(s model, y major, y minor, a{ys} commands, a{y(ssa{ys})} features)`
/// into a capabilities record
fn normalize_capabilities(fields: Vec<WireValue>) -> WireValue {
    let [
        WireValue::Str(model),
        WireValue::U8(major),
        WireValue::U8(minor),
        WireValue::Map(_commands),
        WireValue::Map(features),
    ] = fields.as_slice()
    else {
        return WireValue::Tuple(fields);
    };

    let mut inputs: Vec<WireValue> = Vec::new();
    let records: Vec<WireValue> = features
        .iter()
        .filter_map(|(code, info)| {
            let WireValue::Tuple(parts) = info else {
                return None;
            };
            let name = parts.first().cloned().unwrap_or(WireValue::from(""));
            let description = parts.get(1).cloned().unwrap_or(WireValue::from(""));
            let values = parts
                .get(2)
                .and_then(WireValue::as_map)
                .map(<[_]>::to_vec)
                .unwrap_or_default();
            let code = crate::wire::parse_int(code)?;
            if code == i64::from(crate::catalog::INPUT_SOURCE_CODE) {
                inputs = values
                    .iter()
                    .filter_map(|(value, label)| {
                        Some(WireValue::map([
                            ("value", WireValue::I64(crate::wire::parse_int(value)?)),
                            ("label", label.clone()),
                        ]))
                    })
                    .collect();
            }
            let kind = if values.is_empty() { "slider" } else { "choice" };
            Some(WireValue::map([
                ("code", WireValue::I64(code)),
                ("name", name),
                ("description", description),
                ("kind", WireValue::from(kind)),
                ("choices", WireValue::Map(values)),
            ]))
        })
        .collect();

    WireValue::map([
        ("model", WireValue::Str(model.clone())),
        ("mccs_version", WireValue::Str(format!("{major}.{minor}"))),
        ("features", WireValue::List(records)),
        ("inputs", WireValue::List(inputs)),
    ])
}

#[async_trait]
impl Transport for DbusTransport {
    fn name(&self) -> &'static str {
        "ddcutil-service"
    }

    async fn discover(&self) -> Result<WireValue, TransportError> {
        let flags = 0i32;
        call_with_fallback(&methods::DISCOVER, |name| async move {
            self.call(name, &(flags,)).await
        })
        .await
        .map(normalize_detect)
    }

    async fn get_capabilities(&self, device: &DeviceAddress) -> Result<WireValue, TransportError> {
        let flags = self.read_flags();
        call_with_fallback(&methods::CAPABILITIES, |name| async move {
            self.call(name, &(display_number(device), device.edid.as_str(), flags))
                .await
        })
        .await
        .map(normalize_capabilities)
    }

    async fn get_value(
        &self,
        device: &DeviceAddress,
        code: u8,
    ) -> Result<WireValue, TransportError> {
        let flags = self.read_flags();
        call_with_fallback(&methods::GET_VALUE, |name| async move {
            self.call(name, &(display_number(device), device.edid.as_str(), code, flags))
                .await
        })
        .await
        .map(WireValue::Tuple)
    }

    async fn get_multiple_values(
        &self,
        device: &DeviceAddress,
        codes: &[u8],
    ) -> Result<WireValue, TransportError> {
        let flags = self.read_flags();
        call_with_fallback(&methods::GET_MULTIPLE, |name| async move {
            self.call(name, &(display_number(device), device.edid.as_str(), codes, flags))
                .await
        })
        .await
        .map(WireValue::Tuple)
    }

    async fn set_value(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
    ) -> Result<WireValue, TransportError> {
        let flags = self.write_flags();
        call_with_fallback(&methods::SET_VALUE, |name| async move {
            self.call(
                name,
                &(display_number(device), device.edid.as_str(), code, value, flags),
            )
            .await
        })
        .await
        .map(WireValue::Tuple)
    }

    async fn set_value_with_context(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
        context: &str,
    ) -> Result<WireValue, TransportError> {
        let flags = self.write_flags();
        call_with_fallback(&methods::SET_WITH_CONTEXT, |name| async move {
            self.call(
                name,
                &(display_number(device), device.edid.as_str(), code, value, context, flags),
            )
            .await
        })
        .await
        .map(WireValue::Tuple)
    }

    fn supports_context(&self) -> bool {
        true
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let proxy = self.proxy().await?;

        if let Err(err) = proxy
            .set_property("ServiceEmitConnectivitySignals", true)
            .await
        {
            debug!("Cannot enable connectivity signals: {err}");
        }

        let signals = proxy
            .receive_all_signals()
            .await
            .map_err(|err| classify("signals", err))?
            .filter_map(|message| async move { event_from_signal(&message) });
        let owners = proxy
            .receive_owner_changed()
            .await
            .map_err(|err| classify("owner changes", err))?
            .map(|owner| match owner {
                Some(_) => TransportEvent::ServiceAvailable,
                None => TransportEvent::ServiceUnavailable,
            });

        Ok(futures::stream::select(signals, owners).boxed())
    }
}

fn event_from_signal(message: &zbus::Message) -> Option<TransportEvent> {
    let header = message.header();
    let member = header.member()?.as_str().to_string();
    let body = message.body();
    match member.as_str() {
        "ConnectedDisplaysChanged" => Some(TransportEvent::DevicesChanged),
        "ServiceInitialized" => Some(TransportEvent::ServiceAvailable),
        "VcpValueChanged" => {
            match body.deserialize::<(i32, String, u8, u16, String, String, u32)>() {
                Ok((display, edid, code, value, client, _context, _flags)) => {
                    Some(TransportEvent::FeatureChanged {
                        id: display.to_string(),
                        edid,
                        code,
                        value: i64::from(value),
                        source: client,
                    })
                }
                Err(err) => {
                    warn!("Malformed VcpValueChanged signal: {err}");
                    None
                }
            }
        }
        other => {
            debug!(signal = other, "Ignoring signal");
            None
        }
    }
}
