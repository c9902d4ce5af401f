//! tags blob: `key_len:u16 | key | value_type:u8 | value_len:u32 | value`, repeated

use std::collections::HashSet;

use super::store::{Tag, TagStore};
use super::value::{parse_yaml, Repr, TagValue, TagValueType};
use crate::error::{Error, ErrorContext, Result};
use crate::format::{len_u16, len_u32, FieldReader, FieldWriter};

fn encode_value(value: &TagValue) -> Result<Vec<u8>> {
    let bytes = match value {
        TagValue::String(s) | TagValue::Yaml(s) => s.as_bytes().to_vec(),
        TagValue::Integer(i) => i.to_le_bytes().to_vec(),
        TagValue::Float(f) => f.to_le_bytes().to_vec(),
        TagValue::Boolean(b) => vec![*b as u8],
        TagValue::Json(v) => serde_json::to_vec(v).map_err(|e| {
            Error::validation(
                "json tag value cannot be serialized",
                ErrorContext::new("TagValue", e, "serializable json"),
            )
        })?,
    };
    Ok(bytes)
}

fn fixed_width(key: &str, value_type: TagValueType, bytes: &[u8]) -> Result<[u8; 8]> {
    <[u8; 8]>::try_from(bytes).map_err(|_| {
        Error::corruption(
            format!("tag {} has a malformed {} value", key, value_type),
            ErrorContext::new("TagValue", format!("{} bytes", bytes.len()), "8 bytes"),
        )
    })
}

fn utf8(key: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        Error::corruption(
            format!("tag {} value is not valid utf-8", key),
            ErrorContext::new("TagValue", e.utf8_error(), "valid utf-8"),
        )
    })
}

fn decode_value(key: &str, value_type: TagValueType, bytes: Vec<u8>) -> Result<TagValue> {
    let value = match value_type.repr() {
        Repr::Text => TagValue::String(utf8(key, bytes)?),
        Repr::Yaml => {
            let text = utf8(key, bytes)?;
            parse_yaml(&text).map_err(|e| {
                Error::corruption(
                    format!("tag {} holds invalid yaml", key),
                    ErrorContext::new("TagValue", e, "a yaml document"),
                )
            })?;
            TagValue::Yaml(text)
        }
        Repr::Integer => TagValue::Integer(i64::from_le_bytes(fixed_width(key, value_type, &bytes)?)),
        Repr::Float => TagValue::Float(f64::from_le_bytes(fixed_width(key, value_type, &bytes)?)),
        Repr::Boolean => match bytes.as_slice() {
            [0] => TagValue::Boolean(false),
            [1] => TagValue::Boolean(true),
            _ => {
                return Err(Error::corruption(
                    format!("tag {} has an invalid boolean", key),
                    ErrorContext::new("TagValue", format!("{:?}", bytes), "a single 0 or 1 byte"),
                ))
            }
        },
        Repr::Json => TagValue::Json(serde_json::from_slice(&bytes).map_err(|e| {
            Error::corruption(
                format!("tag {} holds invalid json", key),
                ErrorContext::new("TagValue", e, "valid json"),
            )
        })?),
    };
    Ok(value)
}

impl TagStore {
    /// serialize every tag, in order
    pub fn encode_blob(&self) -> Result<Vec<u8>> {
        let mut w = FieldWriter::new(Vec::new());
        for tag in self.iter() {
            let value = encode_value(&tag.value)?;
            w.u16("TagKeyLength", len_u16("TagKeyLength", tag.key.len())?)?;
            w.bytes("TagKey", tag.key.as_bytes())?;
            w.u8("TagValueType", tag.value_type.code())?;
            w.u32("TagValueLength", len_u32("TagValueLength", value.len())?)?;
            w.bytes("TagValue", &value)?;
        }
        Ok(w.into_inner())
    }

    /// parse a blob produced by `encode_blob`
    pub fn decode_blob(blob: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(blob);
        let mut store = TagStore::new();
        let mut seen = HashSet::new();

        while r.consumed() < blob.len() as u64 {
            let key_len = r.u16("TagKeyLength")?;
            let key = r.string("TagKey", key_len as usize)?;
            let code = r.u8("TagValueType")?;
            let value_type = TagValueType::from_code(code).ok_or_else(|| {
                Error::corruption(
                    format!("tag {} has an unknown value type", key),
                    ErrorContext::new("TagValueType", code, "a known tag value type"),
                )
            })?;
            let value_len = r.u32("TagValueLength")?;
            let bytes = r.bytes("TagValue", value_len as usize)?;
            let value = decode_value(&key, value_type, bytes)?;

            if key.is_empty() {
                return Err(Error::corruption(
                    "tag with an empty key",
                    ErrorContext::new("TagKey", "\"\"", "non-empty key"),
                ));
            }
            if !seen.insert(key.clone()) {
                return Err(Error::corruption(
                    format!("tag {} appears twice", key),
                    ErrorContext::new("TagKey", &key, "unique key"),
                ));
            }
            store.add_tag(Tag {
                key,
                value,
                value_type,
            })?;
        }
        Ok(store)
    }
}
