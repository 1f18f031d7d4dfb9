// SPDX-License-Identifier: GPL-3.0-only
//! Feature catalog
//!
//! Maps raw VCP codes to presentation categories and supplies default names
//! for well-known MCCS features. Only consulted when a transport leaves the
//! information out.

use crate::model::Category;

/// VCP code for luminance (brightness)
pub const BRIGHTNESS_CODE: u8 = 0x10;

/// VCP code for the active input source
pub const INPUT_SOURCE_CODE: u8 = 0x60;

/// Category for a feature code when the transport does not supply one
pub fn categorize_by_code(code: u8) -> Category {
    match code {
        0x10 | 0x12 | 0x13 => Category::Luminance,
        0x14 | 0x16 => Category::Contrast,
        0x18 | 0x1A | 0x1C => Category::Color,
        0x60 => Category::Input,
        0xD6 | 0xE1 => Category::Power,
        _ => Category::Advanced,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownFeature {
    pub code: u8,
    pub name: &'static str,
    pub description: &'static str,
}

const KNOWN_FEATURES: &[KnownFeature] = &[
    KnownFeature {
        code: 0x10,
        name: "Brightness",
        description: "Overall backlight intensity.",
    },
    KnownFeature {
        code: 0x12,
        name: "Contrast",
        description: "Difference between light and dark.",
    },
    KnownFeature {
        code: 0x14,
        name: "Select color preset",
        description: "Color temperature preset.",
    },
    KnownFeature {
        code: 0x16,
        name: "Red gain",
        description: "Red channel video gain.",
    },
    KnownFeature {
        code: 0x18,
        name: "Green gain",
        description: "Green channel video gain.",
    },
    KnownFeature {
        code: 0x1A,
        name: "Blue gain",
        description: "Blue channel video gain.",
    },
    KnownFeature {
        code: 0x1C,
        name: "Auto color setup",
        description: "Trigger automatic color calibration.",
    },
    KnownFeature {
        code: 0x60,
        name: "Input source",
        description: "Active video input.",
    },
    KnownFeature {
        code: 0x62,
        name: "Audio speaker volume",
        description: "Speaker or headphone volume.",
    },
    KnownFeature {
        code: 0x87,
        name: "Sharpness",
        description: "Image sharpness.",
    },
    KnownFeature {
        code: 0x8A,
        name: "Saturation",
        description: "Color saturation.",
    },
    KnownFeature {
        code: 0xD6,
        name: "Power mode",
        description: "On, standby, suspend or off.",
    },
    KnownFeature {
        code: 0xDC,
        name: "Display mode",
        description: "Built-in picture preset.",
    },
    KnownFeature {
        code: 0xE1,
        name: "Power LED",
        description: "Status LED control.",
    },
];

pub fn known_feature(code: u8) -> Option<&'static KnownFeature> {
    KNOWN_FEATURES.iter().find(|f| f.code == code)
}

/// Name used when a feature record has none
pub fn default_name(code: u8) -> String {
    known_feature(code)
        .map(|f| f.name.to_string())
        .unwrap_or_else(|| format!("VCP 0x{code:02X}"))
}

pub fn default_description(code: u8) -> String {
    known_feature(code)
        .map(|f| f.description.to_string())
        .unwrap_or_default()
}

/// Conventional MCCS labels for input source values
pub fn input_label(value: i64) -> Option<&'static str> {
    match value {
        0x01 => Some("VGA 1"),
        0x02 => Some("VGA 2"),
        0x03 => Some("DVI 1"),
        0x04 => Some("DVI 2"),
        0x0F => Some("DisplayPort 1"),
        0x10 => Some("DisplayPort 2"),
        0x11 => Some("HDMI 1"),
        0x12 => Some("HDMI 2"),
        0x1B => Some("USB-C"),
        _ => None,
    }
}
