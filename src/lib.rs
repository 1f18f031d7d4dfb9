// SPDX-License-Identifier: GPL-3.0-only
//! Client library for DDC/CI display control services
//!
//! Discovers displays through a [`Transport`], decodes their capability
//! records into typed [`Feature`]s, keeps them in a [`DeviceRegistry`] and
//! serializes writes through a [`Dispatcher`]. [`ControlClient`] wires these
//! together.

#[macro_use]
extern crate tracing;

pub mod catalog;
pub mod client;
pub mod config;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod model;
pub mod registry;
pub mod transport;
pub mod wire;

pub use client::{ControlClient, LoadOutcome, RefreshSummary};
pub use config::{BusKind, Config, TransportKind};
pub use dispatcher::{DispatchNotice, Dispatcher, RequestHandle, WriteOutcome};
pub use error::{ClientError, Result, TransportError};
pub use model::{Category, Device, DeviceKey, Feature, FeatureChoice, FeatureKind};
pub use registry::{DeviceRegistry, Subscription};
pub use transport::{Transport, TransportEvent};
pub use wire::WireValue;
