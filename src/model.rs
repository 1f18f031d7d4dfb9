// SPDX-License-Identifier: GPL-3.0-only
//! Decoded device and feature data model
//!
//! These are the fixed-shape records the decoder produces. Nothing past the
//! decoder sees the loosely-typed wire values.

use std::fmt;

use serde::Serialize;

/// Stable cross-session identity of a device
///
/// Derived from the EDID hash when present, then the serial number, then the
/// transport-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a transport needs to reach a device
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeviceAddress {
    /// Transport-assigned handle (display number, bus address or object path)
    pub id: String,
    /// EDID text, empty when the transport did not report one
    pub edid: String,
}

/// Semantic bucket a feature is presented under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Luminance,
    Contrast,
    Color,
    Power,
    Input,
    Advanced,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Luminance,
        Category::Contrast,
        Category::Color,
        Category::Power,
        Category::Input,
        Category::Advanced,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Luminance => "luminance",
            Category::Contrast => "contrast",
            Category::Color => "color",
            Category::Power => "power",
            Category::Input => "input",
            Category::Advanced => "advanced",
        }
    }

    /// Match a transport-supplied category name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "luminance" | "brightness" => Some(Category::Luminance),
            "contrast" => Some(Category::Contrast),
            "color" | "colour" => Some(Category::Color),
            "power" => Some(Category::Power),
            "input" => Some(Category::Input),
            "advanced" => Some(Category::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a feature is edited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    #[default]
    Slider,
    Toggle,
    Choice,
    Command,
}

impl FeatureKind {
    /// Case-insensitive match against the kind vocabulary; anything
    /// unrecognized is a slider
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "toggle" | "switch" => FeatureKind::Toggle,
            "choice" | "enum" | "menu" => FeatureKind::Choice,
            "command" | "button" => FeatureKind::Command,
            _ => FeatureKind::Slider,
        }
    }
}

/// One labelled value of a choice feature or input source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureChoice {
    value: i64,
    label: String,
}

impl FeatureChoice {
    pub fn new(value: i64, label: impl Into<String>) -> Self {
        Self {
            value,
            label: label.into(),
        }
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Monitor input sources share the choice shape
pub type InputOption = FeatureChoice;

/// One controllable capability of a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    pub identifier: String,
    pub name: String,
    pub description: String,
    pub code: u8,
    pub category: Category,
    pub kind: FeatureKind,
    pub min_value: i64,
    pub max_value: i64,
    pub step: i64,
    pub default_value: Option<i64>,
    pub current_value: i64,
    pub is_mutable: bool,
    pub is_available: bool,
    pub choices: Vec<FeatureChoice>,
}

impl Feature {
    /// Clamp a candidate value into the feature's range
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.min_value, self.max_value)
    }

    /// Grow the range so it covers `value`
    pub fn widen_to(&mut self, value: i64) {
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
    }

    /// Store a confirmed value, keeping `min <= current <= max`
    ///
    /// Choice values are codes rather than positions on a scale, so the
    /// range grows to fit them instead of clamping.
    pub fn set_current(&mut self, value: i64) {
        if self.kind == FeatureKind::Choice {
            self.widen_to(value);
            self.current_value = value;
        } else {
            self.current_value = self.clamp(value);
        }
    }

    /// Apply a reading that may also carry a new maximum
    ///
    /// The maximum of a choice feature is not a bound on its codes and is
    /// ignored.
    pub fn apply_reading(&mut self, current: i64, maximum: Option<i64>) {
        if let Some(max) = maximum.filter(|_| self.kind != FeatureKind::Choice) {
            if max >= self.min_value {
                self.max_value = max;
            }
        }
        self.set_current(current);
    }

    pub fn choice_label(&self, value: i64) -> Option<&str> {
        self.choices
            .iter()
            .find(|c| c.value() == value)
            .map(FeatureChoice::label)
    }
}

/// One physical or logical display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub edid_hash: String,
    pub serial: String,
    pub vendor: String,
    pub model: String,
    pub mccs_version: String,
    pub connected: bool,
    pub supports_write_verification: bool,
    pub features: Vec<Feature>,
    pub inputs: Vec<InputOption>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            edid_hash: String::new(),
            serial: String::new(),
            vendor: String::new(),
            model: String::new(),
            mccs_version: String::new(),
            connected: true,
            supports_write_verification: false,
            features: Vec::new(),
            inputs: Vec::new(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        if !self.edid_hash.is_empty() {
            DeviceKey::new(self.edid_hash.clone())
        } else if !self.serial.is_empty() {
            DeviceKey::new(self.serial.clone())
        } else {
            DeviceKey::new(format!("id:{}", self.id))
        }
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress {
            id: self.id.clone(),
            edid: self.edid_hash.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        match (self.vendor.is_empty(), self.model.is_empty()) {
            (_, true) if self.id.is_empty() => "Display".to_string(),
            (_, true) => format!("Display {}", self.id),
            (true, false) => self.model.clone(),
            (false, false) => format!("{} {}", self.vendor, self.model),
        }
    }

    pub fn feature(&self, code: u8) -> Option<&Feature> {
        self.features.iter().find(|f| f.code == code)
    }

    pub fn feature_mut(&mut self, code: u8) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.code == code)
    }

    /// Copy identity fields from a fresher discovery record
    pub fn update_identity(&mut self, other: &Device) {
        self.id = other.id.clone();
        self.edid_hash = other.edid_hash.clone();
        self.serial = other.serial.clone();
        self.vendor = other.vendor.clone();
        self.model = other.model.clone();
        if !other.mccs_version.is_empty() {
            self.mccs_version = other.mccs_version.clone();
        }
        self.connected = other.connected;
        self.supports_write_verification = other.supports_write_verification;
    }
}
