// SPDX-License-Identifier: GPL-3.0-only
//! Wire record decoder
//!
//! Turns transport replies into [`Device`] and [`Feature`] records. Services
//! have renamed fields over the years, so every field is looked up under a
//! fixed, priority-ordered list of spellings and the first present key wins.
//!
//! Individual bad entries are logged and skipped. Only a reply whose outer
//! shape is wrong fails the whole call.

use crate::catalog;
use crate::error::{DecodeError, MalformedRecord};
use crate::model::{Category, Device, Feature, FeatureChoice, FeatureKind, InputOption};
use crate::wire::WireValue;

pub(crate) mod keys {
    pub const DEVICE_ID: &[&str] = &["id", "bus_address", "path", "display_number"];
    pub const EDID_HASH: &[&str] = &["edid_hash", "edid", "edid_txt"];
    pub const SERIAL: &[&str] = &["serial", "serial_number", "sn"];
    pub const VENDOR: &[&str] = &["manufacturer", "vendor", "mfg", "manufacturer_id"];
    pub const MODEL: &[&str] = &["model", "model_name", "product_name"];
    pub const CONNECTED: &[&str] = &["connected", "is_connected"];
    pub const WRITE_VERIFICATION: &[&str] = &["supports_write_verification", "scc", "supports_scc"];
    pub const MCCS_VERSION: &[&str] = &["mccs_version", "mccs"];

    pub const IDENTIFIER: &[&str] = &["identifier", "key"];
    pub const NAME: &[&str] = &["name", "label", "title"];
    pub const DESCRIPTION: &[&str] = &["description", "desc"];
    pub const CODE: &[&str] = &["code", "vcp_code", "feature_code"];
    pub const CATEGORY: &[&str] = &["category", "group"];
    pub const KIND: &[&str] = &["kind", "type"];
    pub const MIN: &[&str] = &["min_value", "minimum", "min"];
    pub const MAX: &[&str] = &["max_value", "maximum", "max", "MaxValue"];
    pub const STEP: &[&str] = &["step"];
    pub const DEFAULT: &[&str] = &["default_value", "default"];
    pub const CURRENT: &[&str] = &["current_value", "current", "value", "CurrentValue"];
    pub const MUTABLE: &[&str] = &["is_mutable", "mutable", "writable", "is_rw"];
    pub const READ_ONLY: &[&str] = &["is_read_only", "read_only"];
    pub const AVAILABLE: &[&str] = &["is_available", "available"];
    pub const CHOICES: &[&str] = &["choices", "values", "options"];

    pub const CHOICE_VALUE: &[&str] = &["value", "code", "id"];
    pub const CHOICE_LABEL: &[&str] = &["label", "name", "title"];

    pub const FEATURES: &[&str] = &["features", "vcp_features"];
    pub const INPUTS: &[&str] = &["inputs", "input_sources"];

    pub const READING_CURRENT: &[&str] = &["current", "value", "CurrentValue", "current_value"];
    pub const READING_MAX: &[&str] = &["maximum", "max", "MaxValue", "max_value"];
    pub const READING_CODE: &[&str] = &["code", "vcp_code"];
}

/// A single value read back from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueReading {
    pub current: i64,
    pub maximum: Option<i64>,
}

/// Decode a discovery reply into identity-only devices
///
/// Accepts a bare list of device maps or the same list wrapped in a
/// one-element tuple.
pub fn decode_device_list(raw: &WireValue) -> Result<Vec<Device>, DecodeError> {
    let Some(entries) = raw.unwrap_single().as_list() else {
        return Err(DecodeError::new(
            "device list",
            format!("expected a list, got {}", raw.unwrap_single().shape()),
        ));
    };

    let mut devices = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        if !entry.is_map() {
            debug!(index, shape = entry.shape(), "Skipping non-record device entry");
            continue;
        }
        devices.push(decode_device(entry));
    }
    Ok(devices)
}

fn decode_device(record: &WireValue) -> Device {
    let text = |keys: &[&str]| record.lookup_text(keys).unwrap_or_default();

    let mut device = Device::new(text(keys::DEVICE_ID));
    device.edid_hash = text(keys::EDID_HASH);
    device.serial = text(keys::SERIAL);
    device.vendor = text(keys::VENDOR);
    device.model = text(keys::MODEL);
    device.mccs_version = text(keys::MCCS_VERSION);
    device.connected = record.lookup_bool(keys::CONNECTED).unwrap_or(true);
    device.supports_write_verification =
        record.lookup_bool(keys::WRITE_VERIFICATION).unwrap_or(false);
    device
}

/// Populate a device's features and inputs from a capabilities reply
///
/// The device is only touched once the whole reply has decoded, so a
/// [`DecodeError`] leaves it exactly as it was.
pub fn decode_capabilities(raw: &WireValue, device: &mut Device) -> Result<(), DecodeError> {
    let record = raw.unwrap_single();
    if !record.is_map() {
        return Err(DecodeError::new(
            "capabilities",
            format!("expected a record, got {}", record.shape()),
        ));
    }

    let mut features: Vec<Feature> = match record.lookup(keys::FEATURES) {
        None => Vec::new(),
        Some(WireValue::List(entries)) => entries
            .iter()
            .filter_map(|entry| match decode_feature_record(entry) {
                Ok((mut feature, reported)) => {
                    if let Some(previous) = device.feature(feature.code) {
                        carry_over(&mut feature, previous, reported);
                    }
                    Some(feature)
                }
                Err(err) => {
                    warn!(device_id = %device.id, "{err}");
                    None
                }
            })
            .collect(),
        Some(other) => {
            return Err(DecodeError::new(
                "capabilities",
                format!("features must be a list, got {}", other.shape()),
            ));
        }
    };

    let inputs: Vec<InputOption> = match record.lookup(keys::INPUTS) {
        None => Vec::new(),
        Some(WireValue::List(entries)) => entries
            .iter()
            .filter_map(|entry| match decode_input(entry) {
                Ok(input) => Some(input),
                Err(err) => {
                    warn!(device_id = %device.id, "{err}");
                    None
                }
            })
            .collect(),
        Some(other) => {
            return Err(DecodeError::new(
                "capabilities",
                format!("inputs must be a list, got {}", other.shape()),
            ));
        }
    };

    if let Some(input) = features.iter_mut().find(|f| f.code == catalog::INPUT_SOURCE_CODE) {
        for option in &inputs {
            input.widen_to(option.value());
        }
    }

    if let Some(model) = record.lookup_text(keys::MODEL).filter(|m| !m.is_empty()) {
        device.model = model;
    }
    if let Some(version) = record.lookup_text(keys::MCCS_VERSION).filter(|v| !v.is_empty()) {
        device.mccs_version = version;
    }
    device.features = features;
    device.inputs = inputs;
    Ok(())
}

/// Which optional value fields a feature record actually carried
#[derive(Debug, Clone, Copy)]
struct Reported {
    current: bool,
    max: bool,
}

/// Keep what the registry already knew when a fresh record leaves it out
///
/// Capability replies describe features without reading them, so a
/// rediscovery must not reset confirmed values to the defaults.
fn carry_over(feature: &mut Feature, previous: &Feature, reported: Reported) {
    if !reported.max && previous.max_value > feature.max_value {
        feature.max_value = previous.max_value;
    }
    if !reported.current {
        feature.set_current(previous.current_value);
    }
}

/// Decode one feature record
pub fn decode_feature(record: &WireValue) -> Result<Feature, MalformedRecord> {
    decode_feature_record(record).map(|(feature, _)| feature)
}

fn decode_feature_record(record: &WireValue) -> Result<(Feature, Reported), MalformedRecord> {
    if !record.is_map() {
        return Err(MalformedRecord::new(
            "feature",
            format!("expected a record, got {}", record.shape()),
        ));
    }

    let raw_code = record
        .lookup_int(keys::CODE)
        .ok_or_else(|| MalformedRecord::new("feature", "missing feature code"))?;
    let code = u8::try_from(raw_code).map_err(|_| {
        MalformedRecord::new("feature", format!("code {raw_code} is outside 0-255"))
    })?;

    let kind = record
        .lookup_text(keys::KIND)
        .map(|k| FeatureKind::from_name(&k))
        .unwrap_or_default();

    let category = record
        .lookup_text(keys::CATEGORY)
        .and_then(|c| Category::from_name(&c))
        .unwrap_or_else(|| catalog::categorize_by_code(code));

    let choices = if kind == FeatureKind::Choice {
        record
            .lookup(keys::CHOICES)
            .map(decode_choice_collection)
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let reported_current = record.lookup_int(keys::CURRENT);
    let reported_max = record.lookup_int(keys::MAX);
    let current = reported_current.unwrap_or(0);
    let mut min_value = record.lookup_int(keys::MIN).unwrap_or(0);
    let mut max_value = reported_max.unwrap_or_else(|| current.max(100));
    if max_value < min_value {
        std::mem::swap(&mut min_value, &mut max_value);
    }
    // Without an explicit range a choice feature spans its codes
    if reported_max.is_none() {
        for choice in &choices {
            min_value = min_value.min(choice.value());
            max_value = max_value.max(choice.value());
        }
    }

    let read_only = record.lookup_bool(keys::READ_ONLY).unwrap_or(false);
    let is_mutable = !read_only && record.lookup_bool(keys::MUTABLE).unwrap_or(true);

    let mut feature = Feature {
        identifier: record
            .lookup_text(keys::IDENTIFIER)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| code.to_string()),
        name: record
            .lookup_text(keys::NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| catalog::default_name(code)),
        description: record
            .lookup_text(keys::DESCRIPTION)
            .unwrap_or_else(|| catalog::default_description(code)),
        code,
        category,
        kind,
        min_value,
        max_value,
        step: record.lookup_int(keys::STEP).filter(|s| *s > 0).unwrap_or(1),
        default_value: record.lookup_int(keys::DEFAULT),
        current_value: current,
        is_mutable,
        is_available: record.lookup_bool(keys::AVAILABLE).unwrap_or(true),
        choices,
    };
    feature.set_current(match reported_current {
        Some(value) => value,
        None if kind == FeatureKind::Choice => min_value,
        None => 0,
    });
    let reported = Reported {
        current: reported_current.is_some(),
        max: reported_max.is_some(),
    };
    Ok((feature, reported))
}

/// Decode one `(value, label)` record
pub fn decode_choice(record: &WireValue) -> Result<FeatureChoice, MalformedRecord> {
    decode_choice_with(record, |value| value.to_string())
}

fn decode_input(record: &WireValue) -> Result<InputOption, MalformedRecord> {
    decode_choice_with(record, |value| {
        catalog::input_label(value)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string())
    })
}

fn decode_choice_with(
    record: &WireValue,
    default_label: impl Fn(i64) -> String,
) -> Result<FeatureChoice, MalformedRecord> {
    if !record.is_map() {
        return Err(MalformedRecord::new(
            "choice",
            format!("expected a record, got {}", record.shape()),
        ));
    }
    let value = record.lookup_int(keys::CHOICE_VALUE).unwrap_or(0);
    let label = record
        .lookup_text(keys::CHOICE_LABEL)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| default_label(value));
    Ok(FeatureChoice::new(value, label))
}

/// Choices arrive either as a list of records or as a value to label map
fn decode_choice_collection(raw: &WireValue) -> Vec<FeatureChoice> {
    match raw {
        WireValue::List(entries) => entries
            .iter()
            .filter_map(|entry| match decode_choice(entry) {
                Ok(choice) => Some(choice),
                Err(err) => {
                    warn!("{err}");
                    None
                }
            })
            .collect(),
        WireValue::Map(entries) => entries
            .iter()
            .filter_map(|(key, label)| {
                let Some(value) = crate::wire::parse_int(key) else {
                    warn!(key = %key, "Skipping choice with a non-numeric value");
                    return None;
                };
                let label = label
                    .to_text()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| value.to_string());
                Some(FeatureChoice::new(value, label))
            })
            .collect(),
        other => {
            warn!(shape = other.shape(), "Ignoring choices of unexpected shape");
            Vec::new()
        }
    }
}

/// Decode a single value read
pub fn decode_value_reply(raw: &WireValue) -> Result<ValueReading, DecodeError> {
    let value = raw.unwrap_single();
    reading_from(value).ok_or_else(|| {
        DecodeError::new("value reply", format!("unusable {} reply", value.shape()))
    })
}

fn reading_from(value: &WireValue) -> Option<ValueReading> {
    match value {
        WireValue::Map(_) => Some(ValueReading {
            current: value.lookup_int(keys::READING_CURRENT)?,
            maximum: value.lookup_int(keys::READING_MAX),
        }),
        WireValue::Tuple(fields) => Some(ValueReading {
            current: fields.first()?.as_lenient_int()?,
            maximum: fields.get(1).and_then(WireValue::as_lenient_int),
        }),
        scalar => Some(ValueReading {
            current: scalar.as_lenient_int()?,
            maximum: None,
        }),
    }
}

/// Decode a batch read into `(code, reading)` pairs in reply order
pub fn decode_multiple_values(raw: &WireValue) -> Result<Vec<(u8, ValueReading)>, DecodeError> {
    let value = raw.unwrap_single();
    let mut readings = Vec::new();

    match value {
        WireValue::List(entries) => {
            for entry in entries {
                let decoded = match entry {
                    WireValue::Map(_) => entry
                        .lookup_int(keys::READING_CODE)
                        .zip(reading_from(entry)),
                    WireValue::Tuple(fields) if fields.len() >= 2 => fields[0]
                        .as_lenient_int()
                        .zip(reading_from(&WireValue::Tuple(fields[1..].to_vec()))),
                    _ => None,
                };
                match decoded.and_then(|(code, r)| u8::try_from(code).ok().map(|c| (c, r))) {
                    Some(pair) => readings.push(pair),
                    None => warn!(shape = entry.shape(), "Skipping malformed value entry"),
                }
            }
        }
        WireValue::Map(entries) => {
            for (key, entry) in entries {
                let code = crate::wire::parse_int(key).and_then(|c| u8::try_from(c).ok());
                match code.zip(reading_from(entry)) {
                    Some(pair) => readings.push(pair),
                    None => warn!(key = %key, "Skipping malformed value entry"),
                }
            }
        }
        other => {
            return Err(DecodeError::new(
                "value batch",
                format!("expected a list or record, got {}", other.shape()),
            ));
        }
    }
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> WireValue {
        WireValue::map([
            ("id", WireValue::from("1")),
            ("manufacturer", WireValue::from("Acme")),
            ("model", WireValue::from("X1")),
        ])
    }

    #[test]
    fn discovery_scenario_decodes_identity_and_defaults() {
        let devices = decode_device_list(&WireValue::List(vec![acme()])).unwrap();
        assert_eq!(devices.len(), 1);
        let device = &devices[0];
        assert_eq!(device.id, "1");
        assert_eq!(device.vendor, "Acme");
        assert_eq!(device.model, "X1");
        assert!(device.connected);
        assert!(!device.supports_write_verification);
        assert!(device.serial.is_empty());
    }

    #[test]
    fn tuple_wrapped_list_decodes_the_same() {
        let bare = WireValue::List(vec![acme(), WireValue::map([("id", WireValue::from("2"))])]);
        let wrapped = WireValue::Tuple(vec![bare.clone()]);
        let from_bare: Vec<_> = decode_device_list(&bare)
            .unwrap()
            .iter()
            .map(Device::key)
            .collect();
        let from_wrapped: Vec<_> = decode_device_list(&wrapped)
            .unwrap()
            .iter()
            .map(Device::key)
            .collect();
        assert_eq!(from_bare, from_wrapped);
        assert_eq!(from_bare.len(), 2);
    }

    #[test]
    fn non_record_entries_are_skipped() {
        let raw = WireValue::List(vec![WireValue::from("junk"), acme(), WireValue::U8(3)]);
        let devices = decode_device_list(&raw).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor, "Acme");
    }

    #[test]
    fn wrong_outer_shape_is_an_error() {
        assert!(decode_device_list(&acme()).is_err());
        assert!(decode_device_list(&WireValue::from("nope")).is_err());
    }

    #[test]
    fn every_spelling_of_a_device_field_decodes_alike() {
        fn field(device: &Device, index: usize) -> &str {
            match index {
                0 => &device.id,
                1 => &device.edid_hash,
                2 => &device.serial,
                3 => &device.vendor,
                _ => &device.model,
            }
        }
        let cases = [keys::DEVICE_ID, keys::EDID_HASH, keys::SERIAL, keys::VENDOR, keys::MODEL];
        for (index, spellings) in cases.iter().enumerate() {
            for spelling in *spellings {
                let record = WireValue::map([(*spelling, WireValue::from("v"))]);
                let device = decode_device(&record);
                assert_eq!(field(&device, index), "v", "spelling {spelling}");
            }
        }
        for spelling in keys::CONNECTED {
            let record = WireValue::map([(*spelling, WireValue::Bool(false))]);
            assert!(!decode_device(&record).connected, "spelling {spelling}");
        }
        for spelling in keys::WRITE_VERIFICATION {
            let record = WireValue::map([(*spelling, WireValue::Bool(true))]);
            assert!(decode_device(&record).supports_write_verification, "spelling {spelling}");
        }
    }

    #[test]
    fn every_spelling_of_a_feature_field_decodes_alike() {
        fn decode_with(spelling: &str, value: WireValue) -> Feature {
            let record = WireValue::map([("code", WireValue::U8(0x10)), (spelling, value)]);
            decode_feature(&record).unwrap()
        }

        for spelling in keys::CODE {
            let record = WireValue::map([(*spelling, WireValue::U8(0x12))]);
            assert_eq!(decode_feature(&record).unwrap().code, 0x12, "spelling {spelling}");
        }
        for spelling in keys::IDENTIFIER {
            let feature = decode_with(spelling, WireValue::from("glow"));
            assert_eq!(feature.identifier, "glow", "spelling {spelling}");
        }
        for spelling in keys::NAME {
            let feature = decode_with(spelling, WireValue::from("Glow"));
            assert_eq!(feature.name, "Glow", "spelling {spelling}");
        }
        for spelling in keys::DESCRIPTION {
            let feature = decode_with(spelling, WireValue::from("Backlight"));
            assert_eq!(feature.description, "Backlight", "spelling {spelling}");
        }
        for spelling in keys::CATEGORY {
            let feature = decode_with(spelling, WireValue::from("power"));
            assert_eq!(feature.category, Category::Power, "spelling {spelling}");
        }
        for spelling in keys::KIND {
            let feature = decode_with(spelling, WireValue::from("toggle"));
            assert_eq!(feature.kind, FeatureKind::Toggle, "spelling {spelling}");
        }
        for spelling in keys::MIN {
            let feature = decode_with(spelling, WireValue::U16(5));
            assert_eq!(feature.min_value, 5, "spelling {spelling}");
        }
        for spelling in keys::MAX {
            let feature = decode_with(spelling, WireValue::U16(50));
            assert_eq!(feature.max_value, 50, "spelling {spelling}");
        }
        for spelling in keys::STEP {
            let feature = decode_with(spelling, WireValue::U16(10));
            assert_eq!(feature.step, 10, "spelling {spelling}");
        }
        for spelling in keys::DEFAULT {
            let feature = decode_with(spelling, WireValue::U16(30));
            assert_eq!(feature.default_value, Some(30), "spelling {spelling}");
        }
        for spelling in keys::CURRENT {
            let feature = decode_with(spelling, WireValue::U16(42));
            assert_eq!(feature.current_value, 42, "spelling {spelling}");
        }
        for spelling in keys::MUTABLE {
            let feature = decode_with(spelling, WireValue::Bool(false));
            assert!(!feature.is_mutable, "spelling {spelling}");
        }
        for spelling in keys::READ_ONLY {
            let feature = decode_with(spelling, WireValue::Bool(true));
            assert!(!feature.is_mutable, "spelling {spelling}");
        }
        for spelling in keys::AVAILABLE {
            let feature = decode_with(spelling, WireValue::Bool(false));
            assert!(!feature.is_available, "spelling {spelling}");
        }
        for spelling in keys::CHOICES {
            let record = WireValue::map([
                ("code", WireValue::U8(0x14)),
                ("kind", WireValue::from("choice")),
                (
                    *spelling,
                    WireValue::List(vec![WireValue::map([("value", WireValue::U8(5))])]),
                ),
            ]);
            let feature = decode_feature(&record).unwrap();
            assert_eq!(feature.choices, vec![FeatureChoice::new(5, "5")], "spelling {spelling}");
        }
    }

    #[test]
    fn every_spelling_of_a_choice_or_reading_field_decodes_alike() {
        for spelling in keys::CHOICE_VALUE {
            let choice = decode_choice(&WireValue::map([(*spelling, WireValue::U8(7))])).unwrap();
            assert_eq!(choice.value(), 7, "spelling {spelling}");
        }
        for spelling in keys::CHOICE_LABEL {
            let choice = decode_choice(&WireValue::map([(*spelling, WireValue::from("Warm"))]));
            assert_eq!(choice.unwrap().label(), "Warm", "spelling {spelling}");
        }
        for spelling in keys::READING_CURRENT {
            let reading = decode_value_reply(&WireValue::map([(*spelling, WireValue::U16(30))]));
            assert_eq!(reading.unwrap().current, 30, "spelling {spelling}");
        }
        for spelling in keys::READING_MAX {
            let raw = WireValue::map([
                ("current", WireValue::U16(30)),
                (*spelling, WireValue::U16(60)),
            ]);
            assert_eq!(decode_value_reply(&raw).unwrap().maximum, Some(60), "spelling {spelling}");
        }
        for spelling in keys::READING_CODE {
            let raw = WireValue::List(vec![WireValue::map([
                (*spelling, WireValue::U8(0x12)),
                ("current", WireValue::U16(30)),
            ])]);
            assert_eq!(decode_multiple_values(&raw).unwrap()[0].0, 0x12, "spelling {spelling}");
        }
        for spelling in keys::FEATURES {
            let raw = WireValue::map([(
                *spelling,
                WireValue::List(vec![WireValue::map([("code", WireValue::U8(0x10))])]),
            )]);
            let mut device = Device::new("1");
            decode_capabilities(&raw, &mut device).unwrap();
            assert_eq!(device.features.len(), 1, "spelling {spelling}");
        }
        for spelling in keys::INPUTS {
            let raw = WireValue::map([(
                *spelling,
                WireValue::List(vec![WireValue::map([("value", WireValue::U8(0x11))])]),
            )]);
            let mut device = Device::new("1");
            decode_capabilities(&raw, &mut device).unwrap();
            assert_eq!(device.inputs.len(), 1, "spelling {spelling}");
        }
    }

    #[test]
    fn toggle_scenario_lands_in_luminance() {
        let record = WireValue::map([
            ("code", WireValue::I32(16)),
            ("kind", WireValue::from("toggle")),
            ("value", WireValue::I32(1)),
        ]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!(feature.code, 16);
        assert_eq!(feature.kind, FeatureKind::Toggle);
        assert_eq!(feature.category, Category::Luminance);
        assert_eq!(feature.current_value, 1);
        assert_eq!(feature.identifier, "16");
        assert_eq!(feature.name, "Brightness");
    }

    #[test]
    fn numeric_fields_decode_from_any_width() {
        let encodings = [
            WireValue::U8(60),
            WireValue::U16(60),
            WireValue::U32(60),
            WireValue::U64(60),
        ];
        for encoded in encodings {
            let record = WireValue::map([
                ("code", WireValue::U8(0x12)),
                ("value", encoded.clone()),
                ("max", encoded.clone()),
            ]);
            let feature = decode_feature(&record).unwrap();
            assert_eq!(feature.current_value, 60, "{}", encoded.shape());
            assert_eq!(feature.max_value, 60, "{}", encoded.shape());
        }
    }

    #[test]
    fn range_defaults_and_clamping() {
        let record = WireValue::map([("code", WireValue::U8(0x10)), ("value", WireValue::U16(40))]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!((feature.min_value, feature.max_value, feature.step), (0, 100, 1));

        let record =
            WireValue::map([("code", WireValue::U8(0x10)), ("value", WireValue::U16(300))]);
        assert_eq!(decode_feature(&record).unwrap().max_value, 300);

        let record = WireValue::map([
            ("code", WireValue::U8(0x10)),
            ("min", WireValue::U16(90)),
            ("max", WireValue::U16(10)),
            ("value", WireValue::U16(200)),
        ]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!((feature.min_value, feature.max_value), (10, 90));
        assert_eq!(feature.current_value, 90);
    }

    #[test]
    fn bad_codes_are_malformed() {
        let missing = WireValue::map([("name", WireValue::from("Mystery"))]);
        assert!(decode_feature(&missing).is_err());
        let too_big = WireValue::map([("code", WireValue::U32(256))]);
        assert!(decode_feature(&too_big).is_err());
        let hex = WireValue::map([("code", WireValue::from("0x60"))]);
        assert_eq!(decode_feature(&hex).unwrap().category, Category::Input);
    }

    #[test]
    fn explicit_category_wins_unless_unrecognised() {
        let record = WireValue::map([
            ("code", WireValue::U8(0xF0)),
            ("category", WireValue::from("Colour")),
        ]);
        assert_eq!(decode_feature(&record).unwrap().category, Category::Color);

        let record = WireValue::map([
            ("code", WireValue::U8(0xD6)),
            ("group", WireValue::from("misc")),
        ]);
        assert_eq!(decode_feature(&record).unwrap().category, Category::Power);
    }

    #[test]
    fn read_only_overrides_mutable() {
        let record = WireValue::map([
            ("code", WireValue::U8(0xDF)),
            ("writable", WireValue::Bool(true)),
            ("read_only", WireValue::Bool(true)),
        ]);
        assert!(!decode_feature(&record).unwrap().is_mutable);
    }

    #[test]
    fn choices_only_for_choice_kind() {
        let choices = WireValue::List(vec![
            WireValue::map([("value", WireValue::U8(5)), ("label", WireValue::from("6500K"))]),
            WireValue::map([("value", WireValue::U8(6))]),
            WireValue::from("junk"),
        ]);
        let record = WireValue::map([
            ("code", WireValue::U8(0x14)),
            ("type", WireValue::from("Enum")),
            ("choices", choices.clone()),
        ]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!(feature.kind, FeatureKind::Choice);
        assert_eq!(feature.choices.len(), 2);
        assert_eq!(feature.choice_label(5), Some("6500K"));
        assert_eq!(feature.choice_label(6), Some("6"));

        let record = WireValue::map([("code", WireValue::U8(0x14)), ("choices", choices)]);
        assert!(decode_feature(&record).unwrap().choices.is_empty());
    }

    #[test]
    fn choice_map_form_is_accepted() {
        let record = WireValue::map([
            ("code", WireValue::U8(0xDC)),
            ("kind", WireValue::from("menu")),
            (
                "values",
                WireValue::map([
                    ("0x00", WireValue::from("Standard")),
                    ("0x02", WireValue::from("Movie")),
                ]),
            ),
        ]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!(
            feature.choices,
            vec![FeatureChoice::new(0, "Standard"), FeatureChoice::new(2, "Movie")]
        );
    }

    #[test]
    fn choice_without_range_spans_its_codes() {
        let record = WireValue::map([
            ("code", WireValue::U8(0x60)),
            ("kind", WireValue::from("choice")),
            (
                "choices",
                WireValue::map([
                    ("0x0f", WireValue::from("DP-1")),
                    ("0x90", WireValue::from("HDMI-1")),
                ]),
            ),
        ]);
        let feature = decode_feature(&record).unwrap();
        assert_eq!((feature.min_value, feature.max_value), (0, 0x90));
        assert_eq!(feature.current_value, 0);

        let raw = WireValue::map([
            ("features", WireValue::List(vec![WireValue::map([("code", WireValue::U8(0x60))])])),
            ("inputs", WireValue::List(vec![WireValue::map([("value", WireValue::U8(0xD0))])])),
        ]);
        let mut device = Device::new("1");
        decode_capabilities(&raw, &mut device).unwrap();
        assert_eq!(device.feature(0x60).unwrap().max_value, 0xD0);
    }

    #[test]
    fn rediscovery_keeps_values_the_record_leaves_out() {
        let mut device = Device::new("1");
        let mut brightness =
            decode_feature(&WireValue::map([("code", WireValue::U8(0x10))])).unwrap();
        brightness.apply_reading(75, Some(255));
        device.features.push(brightness);

        let described = WireValue::map([(
            "features",
            WireValue::List(vec![WireValue::map([("code", WireValue::U8(0x10))])]),
        )]);
        decode_capabilities(&described, &mut device).unwrap();
        let feature = device.feature(0x10).unwrap();
        assert_eq!((feature.current_value, feature.max_value), (75, 255));

        let read = WireValue::map([(
            "features",
            WireValue::List(vec![WireValue::map([
                ("code", WireValue::U8(0x10)),
                ("value", WireValue::U16(20)),
                ("max", WireValue::U16(100)),
            ])]),
        )]);
        decode_capabilities(&read, &mut device).unwrap();
        let feature = device.feature(0x10).unwrap();
        assert_eq!((feature.current_value, feature.max_value), (20, 100));
    }

    #[test]
    fn choice_defaults() {
        let choice = decode_choice(&WireValue::map([("label", WireValue::from("Off"))])).unwrap();
        assert_eq!((choice.value(), choice.label()), (0, "Off"));
        let choice = decode_choice(&WireValue::map([("value", WireValue::U16(7))])).unwrap();
        assert_eq!(choice.label(), "7");
    }

    #[test]
    fn capabilities_skip_bad_features_and_label_inputs() {
        let raw = WireValue::Tuple(vec![WireValue::map([
            ("mccs_version", WireValue::from("2.2")),
            (
                "features",
                WireValue::List(vec![
                    WireValue::map([("code", WireValue::U8(0x10))]),
                    WireValue::map([("name", WireValue::from("no code"))]),
                    WireValue::map([("vcp_code", WireValue::U8(0x12))]),
                ]),
            ),
            (
                "input_sources",
                WireValue::List(vec![
                    WireValue::map([("value", WireValue::U8(0x11))]),
                    WireValue::map([
                        ("value", WireValue::U8(0x0F)),
                        ("label", WireValue::from("DP")),
                    ]),
                ]),
            ),
        ])]);
        let mut device = Device::new("1");
        decode_capabilities(&raw, &mut device).unwrap();
        let codes: Vec<u8> = device.features.iter().map(|f| f.code).collect();
        assert_eq!(codes, vec![0x10, 0x12]);
        assert_eq!(device.inputs[0].label(), "HDMI 1");
        assert_eq!(device.inputs[1].label(), "DP");
        assert_eq!(device.mccs_version, "2.2");
    }

    #[test]
    fn capability_decode_error_leaves_device_untouched() {
        let mut device = Device::new("1");
        let brightness = WireValue::map([("code", WireValue::U8(0x10))]);
        device.features.push(decode_feature(&brightness).unwrap());
        let before = device.clone();

        let raw = WireValue::map([("features", WireValue::from("not a list"))]);
        assert!(decode_capabilities(&raw, &mut device).is_err());
        assert!(decode_capabilities(&WireValue::List(vec![]), &mut device).is_err());
        assert_eq!(device, before);
    }

    #[test]
    fn value_reply_shapes() {
        let map = WireValue::map([("current", WireValue::U16(30)), ("max", WireValue::U16(100))]);
        let tuple =
            WireValue::Tuple(vec![WireValue::U16(30), WireValue::U16(100), WireValue::from("30")]);
        for raw in [map.clone(), tuple, WireValue::Tuple(vec![map])] {
            assert_eq!(
                decode_value_reply(&raw).unwrap(),
                ValueReading { current: 30, maximum: Some(100) }
            );
        }
        assert_eq!(
            decode_value_reply(&WireValue::U32(7)).unwrap(),
            ValueReading { current: 7, maximum: None }
        );
        assert!(decode_value_reply(&WireValue::List(vec![])).is_err());
    }

    #[test]
    fn multiple_values_from_lists_and_maps() {
        let raw = WireValue::List(vec![
            WireValue::map([("code", WireValue::U8(0x10)), ("value", WireValue::U16(50))]),
            WireValue::Tuple(vec![WireValue::U8(0x12), WireValue::U16(70), WireValue::U16(100)]),
            WireValue::from("junk"),
        ]);
        let readings = decode_multiple_values(&raw).unwrap();
        assert_eq!(
            readings,
            vec![
                (0x10, ValueReading { current: 50, maximum: None }),
                (0x12, ValueReading { current: 70, maximum: Some(100) }),
            ]
        );

        let raw = WireValue::map([("0x60", WireValue::U16(0x11))]);
        assert_eq!(
            decode_multiple_values(&raw).unwrap(),
            vec![(0x60, ValueReading { current: 0x11, maximum: None })]
        );
    }
}
