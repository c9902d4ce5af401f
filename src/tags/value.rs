use std::fmt;

use serde::{Deserialize, Serialize};

/// declared type of a tag value, as stored in the tags blob
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagValueType {
    String,
    Integer,
    Float,
    Boolean,
    Json,
    Yaml,
    StringList,
    Uuid,
    Hash,
    Version,
    Timestamp,
    Url,
    Email,
    Path,
    MimeType,
    Language,
    NovusPackMetadata,
}

/// in-memory representation a value type maps onto
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repr {
    Text,
    Integer,
    Float,
    Boolean,
    Json,
    Yaml,
}

impl TagValueType {
    pub fn code(self) -> u8 {
        match self {
            TagValueType::String => 0x00,
            TagValueType::Integer => 0x01,
            TagValueType::Float => 0x02,
            TagValueType::Boolean => 0x03,
            TagValueType::Json => 0x04,
            TagValueType::Yaml => 0x05,
            TagValueType::StringList => 0x06,
            TagValueType::Uuid => 0x07,
            TagValueType::Hash => 0x08,
            TagValueType::Version => 0x09,
            TagValueType::Timestamp => 0x0A,
            TagValueType::Url => 0x0B,
            TagValueType::Email => 0x0C,
            TagValueType::Path => 0x0D,
            TagValueType::MimeType => 0x0E,
            TagValueType::Language => 0x0F,
            TagValueType::NovusPackMetadata => 0x10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let ty = match code {
            0x00 => TagValueType::String,
            0x01 => TagValueType::Integer,
            0x02 => TagValueType::Float,
            0x03 => TagValueType::Boolean,
            0x04 => TagValueType::Json,
            0x05 => TagValueType::Yaml,
            0x06 => TagValueType::StringList,
            0x07 => TagValueType::Uuid,
            0x08 => TagValueType::Hash,
            0x09 => TagValueType::Version,
            0x0A => TagValueType::Timestamp,
            0x0B => TagValueType::Url,
            0x0C => TagValueType::Email,
            0x0D => TagValueType::Path,
            0x0E => TagValueType::MimeType,
            0x0F => TagValueType::Language,
            0x10 => TagValueType::NovusPackMetadata,
            _ => return None,
        };
        Some(ty)
    }

    pub fn repr(self) -> Repr {
        match self {
            TagValueType::Integer => Repr::Integer,
            TagValueType::Float => Repr::Float,
            TagValueType::Boolean => Repr::Boolean,
            TagValueType::Json => Repr::Json,
            TagValueType::Yaml => Repr::Yaml,
            _ => Repr::Text,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TagValueType::String => "string",
            TagValueType::Integer => "integer",
            TagValueType::Float => "float",
            TagValueType::Boolean => "boolean",
            TagValueType::Json => "json",
            TagValueType::Yaml => "yaml",
            TagValueType::StringList => "string-list",
            TagValueType::Uuid => "uuid",
            TagValueType::Hash => "hash",
            TagValueType::Version => "version",
            TagValueType::Timestamp => "timestamp",
            TagValueType::Url => "url",
            TagValueType::Email => "email",
            TagValueType::Path => "path",
            TagValueType::MimeType => "mime-type",
            TagValueType::Language => "language",
            TagValueType::NovusPackMetadata => "novuspack-metadata",
        }
    }
}

impl fmt::Display for TagValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// a tag value; the variant is its runtime representation
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(serde_json::Value),
    /// yaml document text
    Yaml(String),
}

impl TagValue {
    pub fn repr(&self) -> Repr {
        match self {
            TagValue::String(_) => Repr::Text,
            TagValue::Integer(_) => Repr::Integer,
            TagValue::Float(_) => Repr::Float,
            TagValue::Boolean(_) => Repr::Boolean,
            TagValue::Json(_) => Repr::Json,
            TagValue::Yaml(_) => Repr::Yaml,
        }
    }

    /// the value type a bare value is tagged with by default
    pub fn natural_type(&self) -> TagValueType {
        match self {
            TagValue::String(_) => TagValueType::String,
            TagValue::Integer(_) => TagValueType::Integer,
            TagValue::Float(_) => TagValueType::Float,
            TagValue::Boolean(_) => TagValueType::Boolean,
            TagValue::Json(_) => TagValueType::Json,
            TagValue::Yaml(_) => TagValueType::Yaml,
        }
    }

    /// map an untyped json value onto the closest tag value
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => TagValue::String(s),
            Value::Bool(b) => TagValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TagValue::Integer(i),
                None => match n.as_f64() {
                    Some(f) => TagValue::Float(f),
                    None => TagValue::Json(Value::Number(n)),
                },
            },
            other => TagValue::Json(other),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.repr() {
            Repr::Text => "string",
            Repr::Integer => "integer",
            Repr::Float => "float",
            Repr::Boolean => "boolean",
            Repr::Json => "json",
            Repr::Yaml => "yaml",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) | TagValue::Yaml(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(s) | TagValue::Yaml(s) => f.write_str(s),
            TagValue::Integer(i) => write!(f, "{}", i),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Boolean(b) => write!(f, "{}", b),
            TagValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Integer(v.into())
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Boolean(v)
    }
}

impl From<serde_json::Value> for TagValue {
    fn from(v: serde_json::Value) -> Self {
        TagValue::Json(v)
    }
}

/// yaml document text, for typed access to yaml tags
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Yaml(pub String);

impl Yaml {
    /// parsed document; the stored text is kept as written
    pub fn value(&self) -> std::result::Result<serde_yaml::Value, serde_yaml::Error> {
        parse_yaml(&self.0)
    }
}

pub(crate) fn parse_yaml(text: &str) -> std::result::Result<serde_yaml::Value, serde_yaml::Error> {
    serde_yaml::from_str(text)
}

/// rust types a stored tag value can be read back as
pub trait TagType: Sized {
    const NAME: &'static str;

    /// None when the stored representation cannot be expressed as `Self`
    fn from_value(value: &TagValue) -> Option<Self>;
}

impl TagType for TagValue {
    const NAME: &'static str = "any";

    fn from_value(value: &TagValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl TagType for String {
    const NAME: &'static str = "string";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl TagType for i64 {
    const NAME: &'static str = "integer";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// largest integer an f64 holds exactly
const F64_EXACT: i64 = 1 << 53;

impl TagType for f64 {
    const NAME: &'static str = "float";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::Float(f) => Some(*f),
            TagValue::Integer(i) if (-F64_EXACT..=F64_EXACT).contains(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl TagType for bool {
    const NAME: &'static str = "boolean";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl TagType for serde_json::Value {
    const NAME: &'static str = "json";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::Json(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl TagType for Yaml {
    const NAME: &'static str = "yaml";

    fn from_value(value: &TagValue) -> Option<Self> {
        match value {
            TagValue::Yaml(s) => Some(Yaml(s.clone())),
            _ => None,
        }
    }
}
