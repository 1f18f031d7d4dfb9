// SPDX-License-Identifier: GPL-3.0-only
//! Self-describing reply values
//!
//! Transports hand the decoder a [`WireValue`]: the owned, loosely-typed
//! shape of a D-Bus variant or of parsed command output. The helpers here do
//! widening integer coercion and priority-ordered key lookup so the decoder
//! can stay declarative.

/// A loosely-typed structured value as produced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Bool(bool),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    List(Vec<WireValue>),
    Tuple(Vec<WireValue>),
    /// String-keyed record; insertion order is kept
    Map(Vec<(String, WireValue)>),
}

impl WireValue {
    /// Build a map from `(key, value)` pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, WireValue)>,
    {
        WireValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Peel one level of single-element tuple wrapping
    pub fn unwrap_single(&self) -> &WireValue {
        match self {
            WireValue::Tuple(fields) if fields.len() == 1 => &fields[0],
            other => other,
        }
    }

    /// Widening integer coercion
    ///
    /// Wire types are tried as u32, u16, u8, u64, i16, i32 and finally i64;
    /// the first that matches wins. A u64 above `i64::MAX` does not coerce.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            WireValue::U32(v) => Some(i64::from(*v)),
            WireValue::U16(v) => Some(i64::from(*v)),
            WireValue::U8(v) => Some(i64::from(*v)),
            WireValue::U64(v) => i64::try_from(*v).ok(),
            WireValue::I16(v) => Some(i64::from(*v)),
            WireValue::I32(v) => Some(i64::from(*v)),
            WireValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer coercion that also accepts decimal or `0x` hex strings
    pub fn as_lenient_int(&self) -> Option<i64> {
        match self {
            WireValue::Str(s) => parse_int(s),
            other => other.as_int(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(b) => Some(*b),
            WireValue::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            other => other.as_int().map(|v| v != 0),
        }
    }

    /// Render scalars as text; containers have no string form
    pub fn to_text(&self) -> Option<String> {
        match self {
            WireValue::Str(s) => Some(s.clone()),
            WireValue::Bool(b) => Some(b.to_string()),
            WireValue::F64(f) => Some(f.to_string()),
            other => other.as_int().map(|v| v.to_string()),
        }
    }

    pub fn as_list(&self) -> Option<&[WireValue]> {
        match self {
            WireValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, WireValue)]> {
        match self {
            WireValue::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_map(&self) -> bool {
        matches!(self, WireValue::Map(_))
    }

    pub fn get(&self, key: &str) -> Option<&WireValue> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look a field up under several spellings; the first key present wins
    pub fn lookup(&self, keys: &[&str]) -> Option<&WireValue> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn lookup_text(&self, keys: &[&str]) -> Option<String> {
        self.lookup(keys).and_then(WireValue::to_text)
    }

    pub fn lookup_int(&self, keys: &[&str]) -> Option<i64> {
        self.lookup(keys).and_then(WireValue::as_lenient_int)
    }

    pub fn lookup_bool(&self, keys: &[&str]) -> Option<bool> {
        self.lookup(keys).and_then(WireValue::as_bool)
    }

    /// Short shape name for diagnostics
    pub fn shape(&self) -> &'static str {
        match self {
            WireValue::Bool(_) => "bool",
            WireValue::U8(_) => "byte",
            WireValue::I16(_) => "int16",
            WireValue::U16(_) => "uint16",
            WireValue::I32(_) => "int32",
            WireValue::U32(_) => "uint32",
            WireValue::I64(_) => "int64",
            WireValue::U64(_) => "uint64",
            WireValue::F64(_) => "double",
            WireValue::Str(_) => "string",
            WireValue::List(_) => "list",
            WireValue::Tuple(_) => "tuple",
            WireValue::Map(_) => "map",
        }
    }
}

/// Parse `"16"`, `"0x10"` or `"x10"`
pub fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let lower = text.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x").or_else(|| lower.strip_prefix('x')) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::Str(value.to_string())
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::Str(value)
    }
}

impl From<bool> for WireValue {
    fn from(value: bool) -> Self {
        WireValue::Bool(value)
    }
}

impl From<u8> for WireValue {
    fn from(value: u8) -> Self {
        WireValue::U8(value)
    }
}

impl From<u16> for WireValue {
    fn from(value: u16) -> Self {
        WireValue::U16(value)
    }
}

impl From<u32> for WireValue {
    fn from(value: u32) -> Self {
        WireValue::U32(value)
    }
}

impl From<i32> for WireValue {
    fn from(value: i32) -> Self {
        WireValue::I32(value)
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::I64(value)
    }
}

impl From<Vec<WireValue>> for WireValue {
    fn from(value: Vec<WireValue>) -> Self {
        WireValue::List(value)
    }
}
