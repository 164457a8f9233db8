use std::{fmt, sync::Arc};

use super::attributes::{AttributeInstance, AttributeRegistry, AttributeValue, ByteRange};
use crate::common::errors::HlsError;

/// How long a tag stays in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagScope {
    /// Describes the whole playlist.
    Global,
    /// Applies to every following segment until replaced.
    Shared,
    /// Applies to the next URI line only.
    Segment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Marker,
    Integer(u64),
    Text(String),
    ExtInf {
        duration: f64,
        title: Option<String>,
    },
    ByteRange(ByteRange),
    Attributes(Vec<AttributeInstance>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagInstance {
    pub name: String,
    pub scope: TagScope,
    pub value: TagValue,
}

impl TagInstance {
    pub fn attributes(&self) -> &[AttributeInstance] {
        match &self.value {
            TagValue::Attributes(attrs) => attrs,
            _ => &[],
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes()
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attribute(name)?.as_str()
    }

    pub fn attr_u64(&self, name: &str) -> Option<u64> {
        self.attribute(name)?.as_u64()
    }

    pub fn integer(&self) -> Option<u64> {
        match self.value {
            TagValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TagInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)?;
        match &self.value {
            TagValue::Marker => Ok(()),
            TagValue::Integer(v) => write!(f, ":{}", v),
            TagValue::Text(s) => write!(f, ":{}", s),
            TagValue::ExtInf { duration, title } => {
                write!(f, ":{},{}", duration, title.as_deref().unwrap_or(""))
            }
            TagValue::ByteRange(r) => write!(f, ":{}", r),
            TagValue::Attributes(attrs) => {
                f.write_str(":")?;
                for (i, attr) in attrs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", attr)?;
                }
                Ok(())
            }
        }
    }
}

pub type TagParser = fn(&TagDef, Option<&str>) -> Result<TagValue, HlsError>;

#[derive(Clone)]
pub struct TagDef {
    pub name: String,
    pub scope: TagScope,
    pub parser: TagParser,
    pub attributes: Option<Arc<AttributeRegistry>>,
}

impl fmt::Debug for TagDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagDef")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TagDef {
    pub fn new(name: impl Into<String>, scope: TagScope, parser: TagParser) -> Self {
        Self {
            name: name.into(),
            scope,
            parser,
            attributes: None,
        }
    }

    pub fn with_attributes(name: impl Into<String>, scope: TagScope, registry: AttributeRegistry) -> Self {
        Self {
            name: name.into(),
            scope,
            parser: parse_attributes,
            attributes: Some(Arc::new(registry)),
        }
    }

    pub fn parse(&self, value: Option<&str>) -> Result<TagInstance, HlsError> {
        Ok(TagInstance {
            name: self.name.clone(),
            scope: self.scope,
            value: (self.parser)(self, value)?,
        })
    }

    fn invalid(&self, value: Option<&str>) -> HlsError {
        HlsError::InvalidTag {
            tag: self.name.clone(),
            value: value.unwrap_or("").to_string(),
        }
    }
}

pub fn parse_marker(_: &TagDef, _: Option<&str>) -> Result<TagValue, HlsError> {
    Ok(TagValue::Marker)
}

pub fn parse_integer(def: &TagDef, value: Option<&str>) -> Result<TagValue, HlsError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|v| v.parse().ok())
        .map(TagValue::Integer)
        .ok_or_else(|| def.invalid(value))
}

pub fn parse_text(def: &TagDef, value: Option<&str>) -> Result<TagValue, HlsError> {
    value
        .map(|v| TagValue::Text(v.trim().to_string()))
        .ok_or_else(|| def.invalid(value))
}

/// `#EXTINF:<duration>,[<title>]`
pub fn parse_extinf(def: &TagDef, value: Option<&str>) -> Result<TagValue, HlsError> {
    let raw = value.ok_or_else(|| def.invalid(value))?;
    let (duration, title) = match raw.split_once(',') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (raw, None),
    };
    let duration = duration
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| def.invalid(value))?;

    Ok(TagValue::ExtInf {
        duration,
        title: title.filter(|t| !t.is_empty()).map(str::to_string),
    })
}

pub fn parse_byte_range(def: &TagDef, value: Option<&str>) -> Result<TagValue, HlsError> {
    value
        .and_then(ByteRange::parse)
        .map(TagValue::ByteRange)
        .ok_or_else(|| def.invalid(value))
}

pub fn parse_attributes(def: &TagDef, value: Option<&str>) -> Result<TagValue, HlsError> {
    let list = value.unwrap_or("");
    let attrs = match &def.attributes {
        Some(registry) => registry.parse(&def.name, list)?,
        None => Vec::new(),
    };
    Ok(TagValue::Attributes(attrs))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn def(parser: TagParser) -> TagDef {
        TagDef::new("EXT-TEST", TagScope::Segment, parser)
    }

    #[test]
    fn extinf_with_and_without_title() {
        let d = def(parse_extinf);
        assert_eq!(
            d.parse(Some("9.5,")).unwrap().value,
            TagValue::ExtInf {
                duration: 9.5,
                title: None
            }
        );
        assert_eq!(
            d.parse(Some("10,Intro, part 1")).unwrap().value,
            TagValue::ExtInf {
                duration: 10.0,
                title: Some("Intro, part 1".into())
            }
        );
        assert_eq!(
            d.parse(Some("4.004")).unwrap().to_string(),
            "#EXT-TEST:4.004,"
        );
    }

    #[rstest]
    #[case(parse_extinf as TagParser, Some("abc,"))]
    #[case(parse_extinf as TagParser, None)]
    #[case(parse_integer as TagParser, Some("ten"))]
    #[case(parse_integer as TagParser, None)]
    #[case(parse_byte_range as TagParser, Some("1@x"))]
    fn malformed_values_are_errors(#[case] parser: TagParser, #[case] value: Option<&str>) {
        assert!(matches!(
            def(parser).parse(value),
            Err(HlsError::InvalidTag { .. })
        ));
    }

    #[test]
    fn byte_range_value() {
        let tag = def(parse_byte_range).parse(Some("1000@0")).unwrap();
        assert_eq!(
            tag.value,
            TagValue::ByteRange(ByteRange {
                length: 1000,
                offset: Some(0)
            })
        );
        assert_eq!(tag.to_string(), "#EXT-TEST:1000@0");
    }

    #[test]
    fn marker_ignores_value() {
        let tag = def(parse_marker).parse(Some("junk")).unwrap();
        assert_eq!(tag.value, TagValue::Marker);
        assert_eq!(tag.to_string(), "#EXT-TEST");
    }
}
