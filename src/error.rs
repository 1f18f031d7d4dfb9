// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the control client
//!
//! Errors are split by the boundary they cross: transports report
//! [`TransportError`], the decoder reports [`DecodeError`] for whole replies and
//! [`MalformedRecord`] for single entries, and everything the presentation
//! layer sees is a [`ClientError`].

use thiserror::Error;

use crate::model::DeviceKey;

/// Failure reported by a transport adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The control mechanism cannot be reached at all
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// A single method call failed
    #[error("method {method} failed: {reason}")]
    MethodFailed { method: String, reason: String },

    /// The service answered with a non-zero status code
    #[error("service returned status {status}: {message}")]
    ServiceStatus { status: i32, message: String },

    /// The call did not complete within the configured timeout
    #[error("{0} timed out")]
    Timeout(String),

    /// The reply could not be interpreted by the adapter
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// A top-level reply had a shape the decoder does not understand
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot decode {what}: {reason}")]
pub struct DecodeError {
    pub what: &'static str,
    pub reason: String,
}

impl DecodeError {
    pub fn new(what: &'static str, reason: impl Into<String>) -> Self {
        Self {
            what,
            reason: reason.into(),
        }
    }
}

/// A single device, feature or choice entry was unusable
///
/// These never leave the decoder; they are logged and the entry is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed {kind} record: {reason}")]
pub struct MalformedRecord {
    pub kind: &'static str,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid KDL in {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("config node `{node}` {reason}")]
    Value { node: String, reason: String },
}

/// Errors surfaced to the presentation layer
#[derive(Error, Debug)]
pub enum ClientError {
    /// The control service is down, missing or not permitted
    #[error("display control service is unavailable: {0}")]
    TransportUnavailable(String),

    /// A call-level transport failure other than unavailability
    #[error(transparent)]
    Transport(TransportError),

    /// A reply had an unrecognized top-level shape
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A queued write failed
    #[error("write of {value} to feature 0x{code:02X} on {device} failed: {reason}")]
    WriteFailed {
        device: DeviceKey,
        code: u8,
        value: i64,
        reason: String,
    },

    #[error("device {0} is not known")]
    UnknownDevice(DeviceKey),

    #[error("device {device} has no feature 0x{code:02X}")]
    UnknownFeature { device: DeviceKey, code: u8 },

    #[error("feature 0x{code:02X} on {device} is read-only")]
    ReadOnlyFeature { device: DeviceKey, code: u8 },

    #[error("input {value} is not offered by {device}")]
    InvalidInput { device: DeviceKey, value: i64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => ClientError::TransportUnavailable(reason),
            other => ClientError::Transport(other),
        }
    }
}

/// Result type alias for ClientError
pub type Result<T> = std::result::Result<T, ClientError>;
