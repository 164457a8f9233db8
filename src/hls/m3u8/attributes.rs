//! Typed attribute lists (`NAME=value,NAME="quoted"`) and their registry.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use tracing::trace;

use crate::common::errors::HlsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    DecimalInteger,
    SignedFloat,
    QuotedString,
    EnumeratedString,
    /// Quoted, comma-separated list (e.g. `CODECS`).
    CsvList,
    /// `0x`-prefixed bytes (e.g. `IV`).
    Hex,
    Resolution,
    ByteRange,
}

/// `length[@offset]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: Option<u64>,
}

impl ByteRange {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (length, offset) = match raw.split_once('@') {
            Some((l, o)) => (l, Some(o.trim().parse().ok()?)),
            None => (raw, None),
        };
        Some(Self {
            length: length.trim().parse().ok()?,
            offset,
        })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}@{}", self.length, offset),
            None => write!(f, "{}", self.length),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn parse(raw: &str) -> Option<Self> {
        let (w, h) = raw.trim().split_once(['x', 'X'])?;
        Some(Self {
            width: w.trim().parse().ok()?,
            height: h.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Decode `0x`-prefixed hex. An odd digit count gets an implicit leading zero.
pub fn parse_hex(raw: &str) -> Option<Vec<u8>> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits)).ok()
    } else {
        hex::decode(digits).ok()
    }
}

fn unquote(raw: &str) -> Option<&str> {
    raw.strip_prefix('"')?.strip_suffix('"')
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    DecimalInteger(u64),
    SignedFloat(f64),
    QuotedString(String),
    EnumeratedString(String),
    CsvList(Vec<String>),
    Hex(Vec<u8>),
    Resolution(Resolution),
    ByteRange(ByteRange),
}

impl AttributeValue {
    /// Parse `raw` as `kind`. Numbers parse locale-invariantly.
    pub fn parse(kind: AttributeKind, raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match kind {
            AttributeKind::DecimalInteger => {
                if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                raw.parse().ok().map(Self::DecimalInteger)
            }
            AttributeKind::SignedFloat => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Self::SignedFloat),
            AttributeKind::QuotedString => unquote(raw).map(|s| Self::QuotedString(s.to_string())),
            AttributeKind::EnumeratedString => {
                if raw.is_empty() || raw.contains(['"', ',', ' ']) {
                    return None;
                }
                Some(Self::EnumeratedString(raw.to_string()))
            }
            AttributeKind::CsvList => {
                let inner = unquote(raw)?;
                Some(Self::CsvList(
                    inner
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                ))
            }
            AttributeKind::Hex => parse_hex(raw).map(Self::Hex),
            AttributeKind::Resolution => Resolution::parse(raw).map(Self::Resolution),
            AttributeKind::ByteRange => ByteRange::parse(unquote(raw).unwrap_or(raw))
                .map(Self::ByteRange),
        }
    }

    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::DecimalInteger(_) => AttributeKind::DecimalInteger,
            Self::SignedFloat(_) => AttributeKind::SignedFloat,
            Self::QuotedString(_) => AttributeKind::QuotedString,
            Self::EnumeratedString(_) => AttributeKind::EnumeratedString,
            Self::CsvList(_) => AttributeKind::CsvList,
            Self::Hex(_) => AttributeKind::Hex,
            Self::Resolution(_) => AttributeKind::Resolution,
            Self::ByteRange(_) => AttributeKind::ByteRange,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::DecimalInteger(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::SignedFloat(v) => Some(*v),
            Self::DecimalInteger(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text of quoted and enumerated strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::QuotedString(s) | Self::EnumeratedString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::CsvList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Hex(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_resolution(&self) -> Option<Resolution> {
        match self {
            Self::Resolution(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_byte_range(&self) -> Option<ByteRange> {
        match self {
            Self::ByteRange(r) => Some(*r),
            _ => None,
        }
    }
}

/// Serializes back to playlist syntax.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecimalInteger(v) => write!(f, "{}", v),
            Self::SignedFloat(v) => write!(f, "{}", v),
            Self::QuotedString(s) => write!(f, "\"{}\"", s),
            Self::EnumeratedString(s) => f.write_str(s),
            Self::CsvList(items) => write!(f, "\"{}\"", items.join(",")),
            Self::Hex(bytes) => write!(f, "0x{}", hex::encode_upper(bytes)),
            Self::Resolution(r) => write!(f, "{}", r),
            Self::ByteRange(r) => write!(f, "\"{}\"", r),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInstance {
    pub name: String,
    pub value: AttributeValue,
}

impl fmt::Display for AttributeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Split on commas outside double quotes, then on the first `=`.
/// Pieces without `=` are dropped.
pub fn split_attributes(list: &str) -> Vec<(String, String)> {
    let mut pieces = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pieces.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&list[start..]);

    pieces
        .into_iter()
        .filter_map(|piece| {
            let (name, value) = piece.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    pub required: bool,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Copy-on-write attribute table for one tag.
#[derive(Debug, Default)]
pub struct AttributeRegistry {
    defs: RwLock<Arc<HashMap<String, AttributeDef>>>,
}

impl AttributeRegistry {
    pub fn new(defs: impl IntoIterator<Item = AttributeDef>) -> Self {
        let map = defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        Self {
            defs: RwLock::new(Arc::new(map)),
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, AttributeDef>> {
        self.defs.read().clone()
    }

    /// Add or replace a definition without disturbing readers of older snapshots.
    pub fn register(&self, def: AttributeDef) {
        let mut guard = self.defs.write();
        let mut next = HashMap::clone(&guard);
        next.insert(def.name.clone(), def);
        *guard = Arc::new(next);
    }

    pub fn get(&self, name: &str) -> Option<AttributeDef> {
        self.defs.read().get(name).cloned()
    }

    /// Parse an attribute list for `tag`. Unknown names are ignored.
    pub fn parse(&self, tag: &str, list: &str) -> Result<Vec<AttributeInstance>, HlsError> {
        let defs = self.snapshot();
        let mut out: Vec<AttributeInstance> = Vec::new();

        for (name, raw) in split_attributes(list) {
            let Some(def) = defs.get(&name) else {
                trace!("Ignoring unknown attribute {} on {}", name, tag);
                continue;
            };
            let value = AttributeValue::parse(def.kind, &raw)
                .ok_or_else(|| HlsError::InvalidAttribute {
                    name: name.clone(),
                    value: raw.clone(),
                })?;
            out.push(AttributeInstance { name, value });
        }

        if let Some(missing) = defs
            .values()
            .find(|d| d.required && !out.iter().any(|a| a.name == d.name))
        {
            return Err(HlsError::MissingAttribute {
                tag: tag.to_string(),
                attribute: missing.name.clone(),
            });
        }

        Ok(out)
    }
}
