// SPDX-License-Identifier: GPL-3.0-only
//! Control client
//!
//! Ties a transport to the registry, the write dispatcher and the load
//! tracker. This is the surface a presentation layer drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::decode::{
    decode_capabilities, decode_device_list, decode_multiple_values, decode_value_reply,
};
use crate::dispatcher::{Dispatcher, RequestHandle};
use crate::error::{ClientError, Result, TransportError};
use crate::loader::LoadTracker;
use crate::model::{DeviceKey, Feature, FeatureKind};
use crate::registry::DeviceRegistry;
use crate::transport::{Transport, TransportEvent};

/// Result of a discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub discovered: usize,
    /// Devices whose capabilities were fetched and decoded
    pub updated: usize,
    /// Devices whose capabilities could not be fetched or decoded
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Number of features updated
    Applied(usize),
    /// A newer load started first; nothing was applied
    Superseded,
}

#[derive(Clone)]
pub struct ControlClient {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    dispatcher: Dispatcher,
    loads: LoadTracker,
    available: Arc<AtomicBool>,
}

impl ControlClient {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let registry = DeviceRegistry::new();
        let available = Arc::new(AtomicBool::new(true));
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            registry.clone(),
            Arc::clone(&available),
            config.client_context.clone(),
        );
        Self {
            transport,
            registry,
            dispatcher,
            loads: LoadTracker::new(),
            available,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Discover devices and reload every connected device's capabilities
    ///
    /// A discovery reply that does not decode leaves the registry untouched.
    /// A device whose capabilities fail keeps its previous features.
    pub async fn refresh_all(&self) -> Result<RefreshSummary> {
        let raw = self.transport.discover().await.map_err(|err| self.call_failed(err))?;
        self.set_available(true);

        let discovered = decode_device_list(&raw)?;
        let mut summary = RefreshSummary {
            discovered: discovered.len(),
            ..RefreshSummary::default()
        };
        let keys = self.registry.merge_discovery(discovered);

        for key in keys {
            let Some(mut device) = self.registry.device(&key) else {
                continue;
            };
            if !device.connected {
                continue;
            }
            let raw = match self.transport.get_capabilities(&device.address()).await {
                Ok(raw) => raw,
                Err(err) if err.is_unavailable() => return Err(self.call_failed(err)),
                Err(err) => {
                    warn!(device = %key, "Failed to fetch capabilities: {err}");
                    summary.failed += 1;
                    continue;
                }
            };
            match decode_capabilities(&raw, &mut device) {
                Ok(()) => {
                    self.registry.upsert_device(device);
                    summary.updated += 1;
                }
                Err(err) => {
                    warn!(device = %key, "{err}");
                    summary.failed += 1;
                }
            }
        }

        info!(
            discovered = summary.discovered,
            updated = summary.updated,
            failed = summary.failed,
            "Refreshed displays via {}",
            self.transport.name()
        );
        Ok(summary)
    }

    /// Read current values for every feature of `key`
    ///
    /// Starting another load supersedes this one; a superseded load never
    /// touches the registry.
    pub async fn load_values(&self, key: &DeviceKey) -> Result<LoadOutcome> {
        self.ensure_available()?;
        let device = self
            .registry
            .device(key)
            .ok_or_else(|| ClientError::UnknownDevice(key.clone()))?;
        let ticket = self.loads.begin();

        let codes: Vec<u8> = device
            .features
            .iter()
            .filter(|f| f.kind != FeatureKind::Command && f.is_available)
            .map(|f| f.code)
            .collect();
        if codes.is_empty() {
            return Ok(LoadOutcome::Applied(0));
        }

        let address = device.address();
        let reply = tokio::select! {
            _ = ticket.token().cancelled() => None,
            reply = self.transport.get_multiple_values(&address, &codes) => Some(reply),
        };
        let Some(reply) = reply.filter(|_| self.loads.is_current(&ticket)) else {
            debug!(device = %key, generation = ticket.generation(), "Discarding superseded load");
            return Ok(LoadOutcome::Superseded);
        };

        let readings = decode_multiple_values(&reply.map_err(|err| self.call_failed(err))?)?;
        Ok(LoadOutcome::Applied(self.registry.apply_readings(key, &readings)))
    }

    /// Read one feature and store the result
    pub async fn read_value(&self, key: &DeviceKey, code: u8) -> Result<Feature> {
        self.ensure_available()?;
        let device = self
            .registry
            .device(key)
            .ok_or_else(|| ClientError::UnknownDevice(key.clone()))?;
        if device.feature(code).is_none() {
            return Err(ClientError::UnknownFeature {
                device: key.clone(),
                code,
            });
        }
        let raw = self
            .transport
            .get_value(&device.address(), code)
            .await
            .map_err(|err| self.call_failed(err))?;
        let reading = decode_value_reply(&raw)?;
        self.registry.apply_readings(key, &[(code, reading)]);
        self.registry
            .find_feature_by_code(key, code)
            .ok_or_else(|| ClientError::UnknownFeature {
                device: key.clone(),
                code,
            })
    }

    pub fn request_value_change(
        &self,
        key: &DeviceKey,
        code: u8,
        value: i64,
    ) -> Result<RequestHandle> {
        self.dispatcher.request_value_change(key, code, value)
    }

    pub fn request_toggle(
        &self,
        key: &DeviceKey,
        code: u8,
        enabled: bool,
    ) -> Result<RequestHandle> {
        self.dispatcher.request_toggle(key, code, enabled)
    }

    pub fn request_input_switch(&self, key: &DeviceKey, value: i64) -> Result<RequestHandle> {
        self.dispatcher.request_input_switch(key, value)
    }

    /// React to one transport notification
    pub async fn handle_event(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::DevicesChanged => {
                info!("Connected displays changed, refreshing");
                self.refresh_all().await?;
            }
            TransportEvent::FeatureChanged {
                id,
                edid,
                code,
                value,
                source,
            } => {
                let Some(key) = self.registry.find_key_by_address(&id, &edid) else {
                    debug!(display_id = %id, "Value change for unknown display");
                    return Ok(());
                };
                if self.registry.apply_feature_value(&key, code, value).is_none() {
                    debug!(
                        device = %key,
                        code = format_args!("0x{code:02X}"),
                        "Value change for unknown feature"
                    );
                } else {
                    debug!(
                        device = %key,
                        code = format_args!("0x{code:02X}"),
                        value,
                        source = %source,
                        "Feature changed externally"
                    );
                }
            }
            TransportEvent::ServiceUnavailable => {
                warn!("{} transport became unavailable", self.transport.name());
                self.set_available(false);
                self.loads.cancel();
                self.dispatcher.cancel_all();
                self.registry.mark_all_disconnected();
            }
            TransportEvent::ServiceAvailable => {
                info!("{} transport is available", self.transport.name());
                self.set_available(true);
                self.refresh_all().await?;
            }
        }
        Ok(())
    }

    /// Handle transport events until the stream ends or `shutdown` fires
    pub async fn run_events(&self, shutdown: CancellationToken) -> Result<()> {
        let mut events = self.transport.events().await.map_err(|err| self.call_failed(err))?;
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            let Some(event) = event else {
                debug!("Transport event stream ended");
                break;
            };
            if let Err(err) = self.handle_event(event).await {
                warn!("Failed to handle transport event: {err}");
            }
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ClientError::TransportUnavailable(format!(
                "{} transport is not reachable",
                self.transport.name()
            )))
        }
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn call_failed(&self, err: TransportError) -> ClientError {
        if err.is_unavailable() {
            self.set_available(false);
        }
        err.into()
    }
}
