// SPDX-License-Identifier: GPL-3.0-only
//! `ddcutil` command line transport
//!
//! Used when the D-Bus service is not installed. Each operation spawns the
//! tool and parses its text output into the same record shapes the service
//! adapter produces. There is no change notification, so [`events`] yields
//! an empty stream.
//!
//! [`events`]: Transport::events

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::process::Command;

use super::{Transport, TransportEvent};
use crate::catalog::INPUT_SOURCE_CODE;
use crate::config::Config;
use crate::error::TransportError;
use crate::model::DeviceAddress;
use crate::wire::WireValue;

pub struct CliTransport {
    program: String,
    no_verify: bool,
    timeout: Duration,
}

impl CliTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.ddcutil_path.clone(),
            no_verify: config.no_verify,
            timeout: config.call_timeout(),
        }
    }

    /// Run the tool and return its standard output
    async fn run(&self, operation: &str, args: Vec<String>) -> Result<String, TransportError> {
        debug!(program = %self.program, ?args, "Running ddcutil");
        let mut command = Command::new(&self.program);
        command.args(&args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| TransportError::Timeout(operation.to_string()))?;

        let output = match output {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(TransportError::Unavailable(format!(
                    "{} not found",
                    self.program
                )));
            }
            Err(err) => {
                return Err(TransportError::MethodFailed {
                    method: operation.to_string(),
                    reason: err.to_string(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = match stderr.trim() {
                "" => stdout.trim().to_string(),
                text => text.to_string(),
            };
            return Err(TransportError::MethodFailed {
                method: operation.to_string(),
                reason: format!("{} ({})", reason, output.status),
            });
        }
        Ok(stdout)
    }
}

fn display_args(device: &DeviceAddress, rest: &[&str]) -> Vec<String> {
    let mut args = vec!["--display".to_string(), device.id.clone()];
    args.extend(rest.iter().map(|s| s.to_string()));
    args
}

fn hex(code: u8) -> String {
    format!("{code:02x}")
}

/// Parse `detect --brief` output into device records
///
/// Blocks headed `Invalid display` or `Phantom display` are skipped.
pub(crate) fn parse_detect(text: &str) -> WireValue {
    let mut devices = Vec::new();
    let mut current: Option<Vec<(String, WireValue)>> = None;

    for line in text.lines() {
        if !line.starts_with(char::is_whitespace) {
            devices.extend(current.take().map(WireValue::Map));
            if let Some(number) = line.trim().strip_prefix("Display ") {
                current = Some(vec![("id".to_string(), WireValue::from(number.trim()))]);
            }
            continue;
        }
        let Some(fields) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "I2C bus" => fields.push(("bus_address".into(), WireValue::from(value))),
            "Monitor" => {
                let mut parts = value.splitn(3, ':');
                for name in ["manufacturer", "model", "serial"] {
                    let part = parts.next().unwrap_or_default().trim();
                    fields.push((name.into(), WireValue::from(part)));
                }
            }
            "Mfg id" => fields.push(("manufacturer".into(), WireValue::from(value))),
            "Model" => fields.push(("model".into(), WireValue::from(value))),
            "Serial number" => fields.push(("serial".into(), WireValue::from(value))),
            "VCP version" => fields.push(("mccs_version".into(), WireValue::from(value))),
            _ => {}
        }
    }
    devices.extend(current.map(WireValue::Map));
    WireValue::List(devices)
}

/// Parse `capabilities` output into a capabilities record
pub(crate) fn parse_capabilities(text: &str) -> WireValue {
    let mut model = String::new();
    let mut version = String::new();
    let mut features: Vec<(i64, String, Vec<(String, WireValue)>)> = Vec::new();
    let mut in_values = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Model:") {
            model = rest.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix("MCCS version:") {
            version = rest.trim().to_string();
        } else if let Some(rest) = trimmed.strip_prefix("Feature:") {
            in_values = false;
            let rest = rest.trim();
            let (code, name) = match rest.split_once(' ') {
                Some((code, name)) => (
                    code,
                    name.trim().trim_start_matches('(').trim_end_matches(')'),
                ),
                None => (rest, ""),
            };
            match i64::from_str_radix(code, 16) {
                Ok(code) => features.push((code, name.to_string(), Vec::new())),
                Err(_) => debug!(line = trimmed, "Skipping unparsable feature line"),
            }
        } else if let Some(rest) = trimmed.strip_prefix("Values:") {
            in_values = true;
            // Inline form: `Values: 01 02 03 (interpretation unavailable)`
            let inline = rest.split('(').next().unwrap_or_default();
            if let Some((_, _, values)) = features.last_mut() {
                for token in inline.split_whitespace() {
                    if let Ok(value) = i64::from_str_radix(token, 16) {
                        values.push((value.to_string(), WireValue::from("")));
                    }
                }
            }
        } else if in_values {
            let Some((value, label)) = trimmed.split_once(':') else {
                in_values = false;
                continue;
            };
            match (i64::from_str_radix(value.trim(), 16), features.last_mut()) {
                (Ok(value), Some((_, _, values))) => {
                    values.push((value.to_string(), WireValue::from(label.trim())));
                }
                _ => in_values = false,
            }
        }
    }

    let inputs: Vec<WireValue> = features
        .iter()
        .find(|(code, _, _)| *code == i64::from(INPUT_SOURCE_CODE))
        .map(|(_, _, values)| {
            values
                .iter()
                .map(|(value, label)| {
                    WireValue::map([
                        ("value", WireValue::from(value.as_str())),
                        ("label", label.clone()),
                    ])
                })
                .collect()
        })
        .unwrap_or_default();

    let records: Vec<WireValue> = features
        .into_iter()
        .map(|(code, name, values)| {
            let kind = if values.is_empty() { "slider" } else { "choice" };
            WireValue::map([
                ("code", WireValue::I64(code)),
                ("name", WireValue::Str(name)),
                ("kind", WireValue::from(kind)),
                ("choices", WireValue::Map(values)),
            ])
        })
        .collect();

    WireValue::map([
        ("model", WireValue::Str(model)),
        ("mccs_version", WireValue::Str(version)),
        ("features", WireValue::List(records)),
        ("inputs", WireValue::List(inputs)),
    ])
}

/// Parse one `getvcp --brief` line into `(code, reading)`
///
/// `VCP 10 C 30 100` is continuous, `VCP 60 SNC x0f` non-continuous.
fn parse_vcp_line(line: &str) -> Result<(u8, WireValue), TransportError> {
    let protocol = |reason: &str| TransportError::Protocol(format!("{reason}: `{}`", line.trim()));
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("VCP") {
        return Err(protocol("not a value line"));
    }
    let code = tokens
        .next()
        .and_then(|code| u8::from_str_radix(code, 16).ok())
        .ok_or_else(|| protocol("bad feature code"))?;
    let number = |token: Option<&str>| {
        token.and_then(|t| match t.strip_prefix('x') {
            Some(hex) => i64::from_str_radix(hex, 16).ok(),
            None => t.parse::<i64>().ok(),
        })
    };
    let reading = match tokens.next() {
        Some("C") => {
            let current = number(tokens.next()).ok_or_else(|| protocol("missing value"))?;
            let maximum = number(tokens.next()).ok_or_else(|| protocol("missing maximum"))?;
            WireValue::Tuple(vec![WireValue::I64(current), WireValue::I64(maximum)])
        }
        Some("SNC") => {
            let current = number(tokens.next()).ok_or_else(|| protocol("missing value"))?;
            WireValue::Tuple(vec![WireValue::I64(current)])
        }
        // mh ml sh sl: maximum and current as high and low bytes
        Some("CNC") => {
            let mut byte = || number(tokens.next()).ok_or_else(|| protocol("missing value byte"));
            let (mh, ml, sh, sl) = (byte()?, byte()?, byte()?, byte()?);
            WireValue::Tuple(vec![WireValue::I64((sh << 8) | sl), WireValue::I64((mh << 8) | ml)])
        }
        Some("ERR") => {
            return Err(TransportError::MethodFailed {
                method: "getvcp".to_string(),
                reason: format!("feature {code:#04x} could not be read"),
            });
        }
        _ => return Err(protocol("unsupported value type")),
    };
    Ok((code, reading))
}

fn value_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|line| line.trim_start().starts_with("VCP "))
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &'static str {
        "ddcutil"
    }

    async fn discover(&self) -> Result<WireValue, TransportError> {
        let text = self
            .run("detect", vec!["detect".into(), "--brief".into()])
            .await?;
        Ok(parse_detect(&text))
    }

    async fn get_capabilities(&self, device: &DeviceAddress) -> Result<WireValue, TransportError> {
        let text = self
            .run("capabilities", display_args(device, &["capabilities"]))
            .await?;
        Ok(parse_capabilities(&text))
    }

    async fn get_value(
        &self,
        device: &DeviceAddress,
        code: u8,
    ) -> Result<WireValue, TransportError> {
        let code = hex(code);
        let text = self
            .run("getvcp", display_args(device, &["getvcp", code.as_str(), "--brief"]))
            .await?;
        let line = value_lines(&text)
            .next()
            .ok_or_else(|| {
                TransportError::Protocol(format!("no value in getvcp output: {}", text.trim()))
            })?;
        parse_vcp_line(line).map(|(_, reading)| reading)
    }

    async fn get_multiple_values(
        &self,
        device: &DeviceAddress,
        codes: &[u8],
    ) -> Result<WireValue, TransportError> {
        let codes: Vec<String> = codes.iter().copied().map(hex).collect();
        let mut args = vec!["getvcp"];
        args.extend(codes.iter().map(String::as_str));
        args.push("--brief");
        let text = self.run("getvcp", display_args(device, &args)).await?;

        let mut entries = Vec::new();
        for line in value_lines(&text) {
            match parse_vcp_line(line) {
                Ok((code, WireValue::Tuple(mut fields))) => {
                    fields.insert(0, WireValue::U8(code));
                    entries.push(WireValue::Tuple(fields));
                }
                Ok(_) => {}
                Err(err) => debug!("Skipping value line: {err}"),
            }
        }
        Ok(WireValue::List(entries))
    }

    async fn set_value(
        &self,
        device: &DeviceAddress,
        code: u8,
        value: u16,
    ) -> Result<WireValue, TransportError> {
        let code = hex(code);
        let value = value.to_string();
        let mut args = vec!["setvcp", code.as_str(), value.as_str()];
        if self.no_verify {
            args.push("--noverify");
        }
        self.run("setvcp", display_args(device, &args)).await?;
        Ok(WireValue::Tuple(Vec::new()))
    }

    async fn events(&self) -> Result<BoxStream<'static, TransportEvent>, TransportError> {
        Ok(futures::stream::empty().boxed())
    }
}
