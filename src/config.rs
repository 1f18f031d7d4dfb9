// SPDX-License-Identifier: GPL-3.0-only
//! Client configuration
//!
//! Read from `config.kdl` in the user config directory:
//!
//! ```kdl
//! transport "dbus"
//! bus "auto"
//! client-context "my-panel"
//! no-verify #true
//! call-timeout-ms 3000
//! ```
//!
//! A missing file means defaults. Unknown nodes are ignored with a warning.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const APP_DIR: &str = "ddc-control-client";
pub const CONFIG_FILE: &str = "config.kdl";

pub const DEFAULT_OBJECT_PATH: &str = "/com/ddcutil/DdcutilObject";
pub const DEFAULT_INTERFACE: &str = "com.ddcutil.DdcutilInterface";

/// Which adapter reaches the displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Dbus,
    Cli,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dbus" | "d-bus" | "service" => Ok(TransportKind::Dbus),
            "cli" | "ddcutil" => Ok(TransportKind::Cli),
            other => Err(format!("unknown transport `{other}` (expected dbus or cli)")),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Dbus => "dbus",
            TransportKind::Cli => "cli",
        })
    }
}

/// Message bus the control service lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
    /// System bus first, session bus when the service is not there
    #[default]
    Auto,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(BusKind::System),
            "session" => Ok(BusKind::Session),
            "auto" => Ok(BusKind::Auto),
            other => Err(format!("unknown bus `{other}` (expected system, session or auto)")),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,
    pub bus: BusKind,
    /// Overrides the well-known service name chain
    pub service_name: Option<String>,
    pub object_path: String,
    pub interface: String,
    /// Attached to writes so other clients can tell who changed a value
    pub client_context: Option<String>,
    /// Skip read-back verification after writes
    pub no_verify: bool,
    /// Ask the service for raw rather than interpreted values
    pub raw_values: bool,
    pub call_timeout_ms: u64,
    pub ddcutil_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bus: BusKind::default(),
            service_name: None,
            object_path: DEFAULT_OBJECT_PATH.to_string(),
            interface: DEFAULT_INTERFACE.to_string(),
            client_context: None,
            no_verify: false,
            raw_values: false,
            call_timeout_ms: 5000,
            ddcutil_path: "ddcutil".to_string(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/ddc-control-client/config.kdl`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => {
                    debug!("No config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path.display().to_string()),
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Parse a KDL document; `origin` names it in errors
    pub fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let document: KdlDocument = text.parse().map_err(|err: kdl::KdlError| ConfigError::Parse {
            path: origin.to_string(),
            reason: err.to_string(),
        })?;

        let mut config = Self::default();
        for node in document.nodes() {
            let name = node.name().value();
            match name {
                "transport" => config.transport = parse_arg(node)?,
                "bus" => config.bus = parse_arg(node)?,
                "service-name" => config.service_name = Some(string_arg(node)?),
                "object-path" => config.object_path = string_arg(node)?,
                "interface" => config.interface = string_arg(node)?,
                "client-context" => {
                    config.client_context = Some(string_arg(node)?).filter(|c| !c.is_empty())
                }
                "no-verify" => config.no_verify = bool_arg(node)?,
                "raw-values" => config.raw_values = bool_arg(node)?,
                "call-timeout-ms" => {
                    config.call_timeout_ms = u64::try_from(int_arg(node)?)
                        .ok()
                        .filter(|ms| *ms > 0)
                        .ok_or_else(|| {
                            value_error(node, "must be a positive number of milliseconds")
                        })?
                }
                "ddcutil-path" => config.ddcutil_path = string_arg(node)?,
                other => warn!(node = other, "Ignoring unknown config node"),
            }
        }
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn value_error(node: &KdlNode, reason: &str) -> ConfigError {
    ConfigError::Value {
        node: node.name().value().to_string(),
        reason: reason.to_string(),
    }
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

fn string_arg(node: &KdlNode) -> Result<String, ConfigError> {
    first_arg(node)
        .and_then(KdlValue::as_string)
        .map(str::to_string)
        .ok_or_else(|| value_error(node, "expects a string argument"))
}

fn parse_arg<T: FromStr<Err = String>>(node: &KdlNode) -> Result<T, ConfigError> {
    string_arg(node)?.parse().map_err(|reason: String| value_error(node, &reason))
}

/// A bare flag node counts as `#true`
fn bool_arg(node: &KdlNode) -> Result<bool, ConfigError> {
    match first_arg(node) {
        None => Ok(true),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| value_error(node, "expects #true or #false")),
    }
}

fn int_arg(node: &KdlNode) -> Result<i128, ConfigError> {
    first_arg(node)
        .and_then(KdlValue::as_integer)
        .ok_or_else(|| value_error(node, "expects an integer argument"))
}
