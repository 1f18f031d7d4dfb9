// SPDX-License-Identifier: GPL-3.0-only
//! Scripted in-memory transport for tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{Notify, Semaphore, mpsc};

use super::{Transport, TransportEvent};
use crate::error::TransportError;
use crate::model::DeviceAddress;
use crate::wire::WireValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Discover,
    Capabilities(String),
    GetValue(String, u8),
    GetMultiple(String, Vec<u8>),
    Set {
        id: String,
        code: u8,
        value: u16,
        context: Option<String>,
    },
}

#[derive(Default)]
struct Script {
    discover: Option<Result<WireValue, TransportError>>,
    capabilities: HashMap<String, Result<WireValue, TransportError>>,
    values: HashMap<String, Result<WireValue, TransportError>>,
    set_results: VecDeque<Result<(), TransportError>>,
    gates: HashMap<String, Arc<Semaphore>>,
    calls: Vec<Call>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

pub struct MockTransport {
    script: Mutex<Script>,
    call_started: Notify,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    context: bool,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(Script {
                events: Some(events_rx),
                ..Script::default()
            }),
            call_started: Notify::new(),
            events_tx,
            context: false,
        }
    }

    pub fn with_context_support(mut self) -> Self {
        self.context = true;
        self
    }

    pub fn set_discover(&self, reply: Result<WireValue, TransportError>) {
        self.script.lock().unwrap().discover = Some(reply);
    }

    pub fn set_capabilities(&self, id: &str, reply: Result<WireValue, TransportError>) {
        self.script.lock().unwrap().capabilities.insert(id.to_string(), reply);
    }

    /// Reply for both single and batch reads of `id`
    pub fn set_values(&self, id: &str, reply: Result<WireValue, TransportError>) {
        self.script.lock().unwrap().values.insert(id.to_string(), reply);
    }

    /// Queue outcomes for successive writes; writes succeed once drained
    pub fn push_set_result(&self, result: Result<(), TransportError>) {
        self.script.lock().unwrap().set_results.push_back(result);
    }

    /// Block every read and write for `id` until permits are added
    pub fn gate(&self, id: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script
            .lock()
            .unwrap()
            .gates
            .insert(id.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn set_calls(&self) -> Vec<(String, u8, u16)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Set { id, code, value, .. } => Some((id, code, value)),
                _ => None,
            })
            .collect()
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Wait until at least `count` calls have started
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.call_started.notified();
            if self.script.lock().unwrap().calls.len() >= count {
                return;
            }
            notified.await;
        }
    }

    async fn enter(&self, id: &str, call: Call) {
        let gate = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(call);
            script.gates.get(id).cloned()
        };
        self.call_started.notify_waiters();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    fn write_result(&self) -> Result<WireValue, TransportError> {
        self.script
            .lock()
            .unwrap()
            .set_results
            .pop_front()
            .unwrap_or(Ok(()))
            .map(|()| WireValue::Tuple(vec![WireValue::I32(0), WireValue::from("")]))
    }
}

fn missing(what: &str) -> TransportError {
    TransportError::MethodFailed {
        method: what.to_string(),
        reason: "no scripted reply".to_string(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn discover(&self) -> Result<WireValue, TransportError> {
        self.enter("", Call::Discover).await;
        self.script
            .lock()
            .unwrap()
            .discover
            .clone()
            .unwrap_or_else(|| Err(missing("discover")))
    }

    async fn get_capabilities(&self, device: &DeviceAddress) -> Result<WireValue, TransportError> {
        self.enter(&device.id, Call::Capabilities(device.id.clone())).await;
        self.script
            .lock()
            .unwrap()
            .capabilities
            .get(&device.id)
            .cloned()
            .unwrap_or_else(|| Err(missing("capabilities")))
    }

    async fn get_value(
        &self,
        device: &DeviceAddress,
        code: u8,
    ) -> Result<WireValue, TransportError> {
        self.enter(&device.id, Call::GetValue(device.id.clone(), code)).await;
        self.script
            .lock()
            .unwrap()
            .values
            .get(&device.id)
            .cloned()
            .unwrap_or_else(|| Err(missing("get value")))
    }

    async fn get_multiple_values(
        &self,
        device: &DeviceAddress,
        codes: &[u8],
    ) -> Result<WireValue, TransportError> {
        self.enter(&device.id, Call::GetMultiple(device.id.clone(), codes.to_vec()))
            .await;
        self.script
            .lock()
            .unwrap()
            .values
            .get(&device.id)
            .cloned()
            .unwrap_or_else(|| Err(missing("get multiple values")))
    }

    async fn set_value(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
    ) -> Result<WireValue, TransportError> {
        self.enter(
            &device.id,
            Call::Set {
                id: device.id.clone(),
                code,
                value,
                context: None,
            },
        )
        .await;
        self.write_result()
    }

    async fn set_value_with_context(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
        context: &str,
    ) -> Result<WireValue, TransportError> {
        self.enter(
            &device.id,
            Call::Set {
                id: device.id.clone(),
                code,
                value,
                context: Some(context.to_string()),
            },
        )
        .await;
        self.write_result()
    }

    fn supports_context(&self) -> bool {
        self.context
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        let rx = self
            .script
            .lock()
            .unwrap()
            .events
            .take()
            .ok_or_else(|| TransportError::Protocol("events already taken".into()))?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

/// Device record as a discovery reply would carry it
pub fn device_record(id: &str, edid: &str, model: &str) -> WireValue {
    WireValue::map([
        ("id", WireValue::from(id)),
        ("edid_hash", WireValue::from(edid)),
        ("manufacturer", WireValue::from("Acme")),
        ("model", WireValue::from(model)),
    ])
}

/// Capabilities reply with a brightness slider and an input selector
pub fn capabilities_record(brightness: u16) -> WireValue {
    WireValue::map([
        (
            "features",
            WireValue::List(vec![
                WireValue::map([
                    ("code", WireValue::U8(0x10)),
                    ("value", WireValue::U16(brightness)),
                    ("max", WireValue::U16(100)),
                ]),
                WireValue::map([
                    ("code", WireValue::U8(0x60)),
                    ("kind", WireValue::from("choice")),
                    ("value", WireValue::U16(0x0F)),
                    ("max", WireValue::U16(0x1B)),
                ]),
                WireValue::map([
                    ("code", WireValue::U8(0xDF)),
                    ("read_only", WireValue::Bool(true)),
                ]),
            ]),
        ),
        (
            "inputs",
            WireValue::List(vec![
                WireValue::map([("value", WireValue::U8(0x0F))]),
                WireValue::map([("value", WireValue::U8(0x11))]),
            ]),
        ),
    ])
}
