use std::collections::HashSet;

use super::value::{parse_yaml, Repr, TagType, TagValue, TagValueType};
use crate::error::{Error, ErrorContext, Result};

/// a typed key/value annotation
#[derive(Clone, Debug, PartialEq)]
pub struct Tag<T = TagValue> {
    pub key: String,
    pub value: T,
    pub value_type: TagValueType,
}

impl Tag {
    /// tag a value with its natural type
    pub fn new(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        let value = value.into();
        Self {
            key: key.into(),
            value_type: value.natural_type(),
            value,
        }
    }

    /// tag a value with an explicit type, checking they agree
    pub fn typed(
        key: impl Into<String>,
        value: impl Into<TagValue>,
        value_type: TagValueType,
    ) -> Result<Self> {
        let tag = Self {
            key: key.into(),
            value: value.into(),
            value_type,
        };
        tag.check()?;
        Ok(tag)
    }

    fn check(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::validation(
                "tag key is empty",
                ErrorContext::new("TagKey", "\"\"", "non-empty key"),
            ));
        }
        if self.value_type.repr() != self.value.repr() {
            return Err(Error::validation(
                format!("tag {} value does not match its type", self.key),
                ErrorContext::new("ValueType", self.value_type, self.value.type_name()),
            ));
        }
        if let TagValue::Yaml(text) = &self.value {
            parse_yaml(text).map_err(|e| {
                Error::validation(
                    format!("tag {} holds invalid yaml", self.key),
                    ErrorContext::new("TagValue", e, "a yaml document"),
                )
            })?;
        }
        Ok(())
    }

    fn cast<T: TagType>(&self) -> Result<Tag<T>> {
        let value = T::from_value(&self.value).ok_or_else(|| Error::TypeMismatch {
            key: self.key.clone(),
            stored: self.value_type.name(),
            requested: T::NAME,
        })?;
        Ok(Tag {
            key: self.key.clone(),
            value,
            value_type: self.value_type,
        })
    }
}

/// insertion-ordered, key-unique tag collection
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagStore {
    tags: Vec<Tag>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.key == key)
    }

    /// append a new tag; the key must not exist yet
    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: impl Into<TagValue>,
        value_type: TagValueType,
    ) -> Result<()> {
        self.add_tag(Tag::typed(key, value, value_type)?)
    }

    pub fn add_tag(&mut self, tag: Tag) -> Result<()> {
        tag.check()?;
        if self.has(&tag.key) {
            return Err(Error::DuplicateKey(tag.key));
        }
        self.tags.push(tag);
        Ok(())
    }

    /// add several tags; nothing is added if any key collides
    pub fn add_all(&mut self, tags: impl IntoIterator<Item = Tag>) -> Result<()> {
        let tags: Vec<Tag> = tags.into_iter().collect();
        let mut seen = HashSet::new();
        for tag in &tags {
            tag.check()?;
            if self.has(&tag.key) || !seen.insert(tag.key.as_str()) {
                return Err(Error::DuplicateKey(tag.key.clone()));
            }
        }
        self.tags.extend(tags);
        Ok(())
    }

    /// replace the value and type of an existing tag in place
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<TagValue>,
        value_type: TagValueType,
    ) -> Result<()> {
        let tag = Tag::typed(key, value, value_type)?;
        let idx = self
            .position(key)
            .ok_or_else(|| Error::TagNotFound(key.to_string()))?;
        self.tags[idx] = tag;
        Ok(())
    }

    /// untyped lookup; None when absent
    pub fn get(&self, key: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.key == key)
    }

    /// typed lookup; Ok(None) when absent, TypeMismatch when `T` cannot
    /// represent the stored value
    pub fn get_as<T: TagType>(&self, key: &str) -> Result<Option<Tag<T>>> {
        self.get(key).map(Tag::cast).transpose()
    }

    pub fn value(&self, key: &str) -> Option<&TagValue> {
        self.get(key).map(|t| &t.value)
    }

    pub fn remove(&mut self, key: &str) -> Result<Tag> {
        let idx = self
            .position(key)
            .ok_or_else(|| Error::TagNotFound(key.to_string()))?;
        Ok(self.tags.remove(idx))
    }

    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.key.as_str())
    }

    /// tags declared with `value_type`, in order
    pub fn all_of_type(&self, value_type: TagValueType) -> Vec<&Tag> {
        self.tags
            .iter()
            .filter(|t| t.value_type == value_type)
            .collect()
    }

    /// tags whose stored representation reads back as `T`, in order
    pub fn all_as<T: TagType>(&self) -> Vec<Tag<T>> {
        self.tags.iter().filter_map(|t| t.cast().ok()).collect()
    }

    /// tags whose representation is `repr`
    pub fn all_with_repr(&self, repr: Repr) -> Vec<&Tag> {
        self.tags
            .iter()
            .filter(|t| t.value_type.repr() == repr)
            .collect()
    }
}

impl<'a> IntoIterator for &'a TagStore {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.iter()
    }
}

impl FromIterator<Tag> for TagStore {
    /// later duplicates are dropped
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut store = TagStore::new();
        for tag in iter {
            if !store.has(&tag.key) {
                store.tags.push(tag);
            }
        }
        store
    }
}

/// anything that owns a tag store and persists it
pub trait TagOwner {
    fn tags(&self) -> &TagStore;
    fn tags_mut(&mut self) -> &mut TagStore;

    /// push the store into the owner's persisted representation
    fn sync_tags(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::tags::Yaml;
    use serde_json::json;

    fn store() -> TagStore {
        let mut s = TagStore::new();
        s.add("owner", "root", TagValueType::String).unwrap();
        s.add("size", 10i64, TagValueType::Integer).unwrap();
        s.add("site", "https://x.test", TagValueType::Url).unwrap();
        s
    }

    #[test]
    fn test_duplicate_add_keeps_original() {
        let mut s = store();
        let err = s.add("owner", "other", TagValueType::String).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(ref k) if k == "owner"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(s.value("owner"), Some(&TagValue::String("root".into())));
    }

    #[test]
    fn test_missing_get_is_none() {
        let s = store();
        assert!(s.get("missing").is_none());
        assert!(s.get_as::<String>("missing").unwrap().is_none());
    }

    #[test]
    fn test_set_keeps_order() {
        let mut s = store();
        s.set("owner", true, TagValueType::Boolean).unwrap();
        assert_eq!(s.keys().collect::<Vec<_>>(), ["owner", "size", "site"]);
        assert_eq!(s.get_as::<bool>("owner").unwrap().unwrap().value, true);

        let err = s.set("nope", 1i64, TagValueType::Integer).unwrap_err();
        assert!(matches!(err, Error::TagNotFound(_)));
    }

    #[test]
    fn test_typed_mismatch_fails_closed() {
        let s = store();
        let err = s.get_as::<bool>("size").unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                stored: "integer",
                requested: "boolean",
                ..
            }
        ));
        // untyped access always works
        assert_eq!(s.get_as::<TagValue>("size").unwrap().unwrap().value, TagValue::Integer(10));
    }

    #[test]
    fn test_type_must_match_value() {
        let mut s = TagStore::new();
        let err = s.add("n", "ten", TagValueType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(s.is_empty());

        let err = s.add("", 1i64, TagValueType::Integer).unwrap_err();
        assert_eq!(err.context().unwrap().field, "TagKey");
    }

    #[test]
    fn test_remove() {
        let mut s = store();
        let removed = s.remove("size").unwrap();
        assert_eq!(removed.value, TagValue::Integer(10));
        assert!(!s.has("size"));
        assert!(matches!(s.remove("size"), Err(Error::TagNotFound(_))));
    }

    #[test]
    fn test_all_of_type() {
        let mut s = store();
        s.add("meta", json!({"a": [1, 2]}), TagValueType::Json).unwrap();
        assert_eq!(s.all_of_type(TagValueType::Url).len(), 1);
        assert!(s.all_of_type(TagValueType::Float).is_empty());

        let strings = s.all_as::<String>();
        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0].key, "owner");
        assert_eq!(strings[1].value_type, TagValueType::Url);

        assert_eq!(s.all_with_repr(Repr::Json).len(), 1);
    }

    #[test]
    fn test_add_all_is_atomic() {
        let mut s = store();
        let err = s
            .add_all(vec![Tag::new("a", 1i64), Tag::new("owner", "x")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
        assert!(!s.has("a"));

        let err = s
            .add_all(vec![Tag::new("b", 1i64), Tag::new("b", 2i64)])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));

        s.add_all(vec![Tag::new("b", 1i64), Tag::new("c", 2.5)]).unwrap();
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let mut s = store();
        let err = s
            .add("doc", TagValue::Yaml("k: [1, 2".into()), TagValueType::Yaml)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context().unwrap().field, "TagValue");
        assert!(!s.has("doc"));

        let err = s
            .add_all(vec![Tag::new("bad", TagValue::Yaml("a: b: c".into()))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let text = "# build\nlevels:   [1, 2]\n";
        s.add("doc", TagValue::Yaml(text.into()), TagValueType::Yaml).unwrap();
        let doc = s.get_as::<Yaml>("doc").unwrap().unwrap();
        assert_eq!(doc.value.0, text);
        assert_eq!(doc.value.value().unwrap()["levels"][1], serde_yaml::Value::from(2));
    }
}
