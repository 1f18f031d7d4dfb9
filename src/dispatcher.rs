// SPDX-License-Identifier: GPL-3.0-only
//! Request dispatcher
//!
//! Serializes user-driven writes into a single FIFO queue. At most one write
//! is in flight at a time, across all devices, and completion order always
//! equals submission order.
//!
//! # States
//!
//! - Idle: queue empty, no worker task
//! - Draining: a worker pops and executes requests, yielding to the runtime
//!   between items, and returns to Idle once the queue is empty
//!
//! The registry only changes after the transport confirms a write. A failed
//! write leaves the feature untouched and is reported, never retried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use crate::catalog::INPUT_SOURCE_CODE;
use crate::error::{ClientError, Result, TransportError};
use crate::model::{DeviceAddress, DeviceKey, Feature};
use crate::registry::DeviceRegistry;
use crate::transport::Transport;

/// One queued write
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub device: DeviceKey,
    pub address: DeviceAddress,
    pub code: u8,
    pub value: i64,
    pub enqueued_at: Instant,
}

/// Final state of a queued write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// The transport confirmed the write and the registry holds the value
    Applied(i64),
    Failed(TransportError),
    /// Dropped by [`Dispatcher::cancel_all`] before it completed
    Cancelled,
}

/// Completion notice broadcast to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchNotice {
    pub device: DeviceKey,
    pub code: u8,
    pub value: i64,
    pub outcome: WriteOutcome,
}

/// Resolves once the write it was returned for has completed
#[derive(Debug)]
pub struct RequestHandle {
    device: DeviceKey,
    code: u8,
    value: i64,
    rx: oneshot::Receiver<WriteOutcome>,
}

impl RequestHandle {
    /// Value that will be written, after clamping
    pub fn value(&self) -> i64 {
        self.value
    }

    pub async fn outcome(self) -> WriteOutcome {
        self.rx.await.unwrap_or(WriteOutcome::Cancelled)
    }

    /// Wait for completion, turning a failed write into an error
    pub async fn applied(self) -> Result<i64> {
        let device = self.device.clone();
        let (code, value) = (self.code, self.value);
        match self.outcome().await {
            WriteOutcome::Applied(value) => Ok(value),
            WriteOutcome::Failed(err) => Err(ClientError::WriteFailed {
                device,
                code,
                value,
                reason: err.to_string(),
            }),
            WriteOutcome::Cancelled => Err(ClientError::WriteFailed {
                device,
                code,
                value,
                reason: "cancelled".to_string(),
            }),
        }
    }
}

struct Queued {
    request: PendingRequest,
    reply: oneshot::Sender<WriteOutcome>,
}

struct QueueState {
    queue: VecDeque<Queued>,
    draining: bool,
    token: CancellationToken,
}

struct Shared {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    available: Arc<AtomicBool>,
    context: Option<String>,
    state: Mutex<QueueState>,
    notices: broadcast::Sender<DispatchNotice>,
}

#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// `available` is shared with the owner so an unreachable service makes
    /// requests fail fast. `context`, when set, is attached to writes on
    /// transports that support it.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: DeviceRegistry,
        available: Arc<AtomicBool>,
        context: Option<String>,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                transport,
                registry,
                available,
                context: context.filter(|c| !c.is_empty()),
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    draining: false,
                    token: CancellationToken::new(),
                }),
                notices,
            }),
        }
    }

    /// Completion notices, in completion order
    pub fn notices(&self) -> broadcast::Receiver<DispatchNotice> {
        self.shared.notices.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.lock_state().draining
    }

    /// Queue a write of `value` to feature `code`
    ///
    /// The value is clamped into the feature's range. Must be called from
    /// within a Tokio runtime.
    pub fn request_value_change(
        &self,
        device: &DeviceKey,
        code: u8,
        value: i64,
    ) -> Result<RequestHandle> {
        let (address, feature) = self.writable_feature(device, code)?;
        Ok(self.enqueue(device.clone(), address, code, feature.clamp(value)))
    }

    /// Queue a toggle: maximum when enabled, minimum otherwise
    pub fn request_toggle(
        &self,
        device: &DeviceKey,
        code: u8,
        enabled: bool,
    ) -> Result<RequestHandle> {
        let (address, feature) = self.writable_feature(device, code)?;
        let value = if enabled {
            feature.max_value
        } else {
            feature.min_value
        };
        Ok(self.enqueue(device.clone(), address, code, value))
    }

    /// Queue an input source switch
    ///
    /// The value must be one of the device's input options. A device that
    /// lists none falls back to the feature's choices, then to its range.
    pub fn request_input_switch(
        &self,
        device: &DeviceKey,
        value: i64,
    ) -> Result<RequestHandle> {
        let (address, feature) = self.writable_feature(device, INPUT_SOURCE_CODE)?;
        let inputs = self
            .shared
            .registry
            .device(device)
            .map(|d| d.inputs)
            .unwrap_or_default();
        let offered = if !inputs.is_empty() {
            inputs.iter().any(|i| i.value() == value)
        } else if !feature.choices.is_empty() {
            feature.choices.iter().any(|c| c.value() == value)
        } else {
            feature.clamp(value) == value
        };
        if !offered {
            return Err(ClientError::InvalidInput {
                device: device.clone(),
                value,
            });
        }
        Ok(self.enqueue(device.clone(), address, INPUT_SOURCE_CODE, value))
    }

    /// Cancel the in-flight write and drop everything queued
    ///
    /// Later requests run under a fresh token.
    pub fn cancel_all(&self) {
        let (dropped, token) = {
            let mut state = self.shared.lock_state();
            let token = std::mem::replace(&mut state.token, CancellationToken::new());
            (state.queue.drain(..).collect::<Vec<_>>(), token)
        };
        token.cancel();
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Cancelled queued writes");
        }
        for queued in dropped {
            self.shared.complete(queued, WriteOutcome::Cancelled);
        }
    }

    fn writable_feature(&self, device: &DeviceKey, code: u8) -> Result<(DeviceAddress, Feature)> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(ClientError::TransportUnavailable(format!(
                "{} transport is not reachable",
                self.shared.transport.name()
            )));
        }
        let entry = self
            .shared
            .registry
            .device(device)
            .ok_or_else(|| ClientError::UnknownDevice(device.clone()))?;
        let feature = entry
            .feature(code)
            .cloned()
            .ok_or_else(|| ClientError::UnknownFeature {
                device: device.clone(),
                code,
            })?;
        if !feature.is_mutable {
            return Err(ClientError::ReadOnlyFeature {
                device: device.clone(),
                code,
            });
        }
        Ok((entry.address(), feature))
    }

    fn enqueue(
        &self,
        device: DeviceKey,
        address: DeviceAddress,
        code: u8,
        value: i64,
    ) -> RequestHandle {
        let (reply, rx) = oneshot::channel();
        let start_worker = {
            let mut state = self.shared.lock_state();
            state.queue.push_back(Queued {
                request: PendingRequest {
                    device: device.clone(),
                    address,
                    code,
                    value,
                    enqueued_at: Instant::now(),
                },
                reply,
            });
            !std::mem::replace(&mut state.draining, true)
        };
        debug!(device = %device, code = format_args!("0x{code:02X}"), value, "Queued write");
        if start_worker {
            tokio::spawn(drain(Arc::clone(&self.shared)));
        }
        RequestHandle {
            device,
            code,
            value,
            rx,
        }
    }
}

impl Shared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(&self, request: &PendingRequest, token: &CancellationToken) -> WriteOutcome {
        let value = request.value.clamp(0, i64::from(u16::MAX)) as u16;
        let address = &request.address;
        let call = async {
            match self.context.as_deref() {
                Some(context) if self.transport.supports_context() => {
                    self.transport
                        .set_value_with_context(address, request.code, value, context)
                        .await
                }
                _ => self.transport.set_value(address, request.code, value).await,
            }
        };

        let result = tokio::select! {
            _ = token.cancelled() => return WriteOutcome::Cancelled,
            result = call => result,
        };

        match result {
            Ok(_) => {
                let stored = self
                    .registry
                    .apply_feature_value(&request.device, request.code, request.value)
                    .map(|f| f.current_value)
                    .unwrap_or(request.value);
                debug!(
                    device = %request.device,
                    code = format_args!("0x{:02X}", request.code),
                    value = stored,
                    waited_ms = request.enqueued_at.elapsed().as_millis() as u64,
                    "Write applied"
                );
                WriteOutcome::Applied(stored)
            }
            Err(err) => {
                if err.is_unavailable() {
                    self.available.store(false, Ordering::SeqCst);
                }
                warn!(
                    device = %request.device,
                    code = format_args!("0x{:02X}", request.code),
                    value = request.value,
                    "Write failed: {err}"
                );
                WriteOutcome::Failed(err)
            }
        }
    }

    fn complete(&self, queued: Queued, outcome: WriteOutcome) {
        let notice = DispatchNotice {
            device: queued.request.device,
            code: queued.request.code,
            value: queued.request.value,
            outcome: outcome.clone(),
        };
        let _ = queued.reply.send(outcome);
        let _ = self.notices.send(notice);
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let (queued, token) = {
            let mut state = shared.lock_state();
            match state.queue.pop_front() {
                Some(queued) => (queued, state.token.clone()),
                None => {
                    state.draining = false;
                    return;
                }
            }
        };
        let outcome = shared.execute(&queued.request, &token).await;
        shared.complete(queued, outcome);
        tokio::task::yield_now().await;
    }
}
