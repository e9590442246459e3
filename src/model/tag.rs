//! Tags: ordered sequences of ordered UTF-8 string sequences.

use serde::{Deserialize, Deserializer, Serialize};

/// A single tag: `[name, value, ...]`. Must have at least one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tag(Vec<String>);

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = Vec::<String>::deserialize(deserializer)?;
        Tag::new(fields).ok_or_else(|| serde::de::Error::custom("tag must have at least one element"))
    }
}

impl Tag {
    /// Build a tag, rejecting an empty vector.
    pub fn new(fields: Vec<String>) -> Option<Self> {
        if fields.is_empty() {
            None
        } else {
            Some(Self(fields))
        }
    }

    /// The tag name (first element).
    #[inline]
    pub fn name(&self) -> &str {
        &self.0[0]
    }

    /// The first value after the name, if present.
    #[inline]
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// All elements, name included.
    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Whether this tag is indexable under NIP-01's single-letter `#x` convention.
    #[inline]
    pub fn is_indexable(&self) -> bool {
        let mut chars = self.name().chars();
        matches!((chars.next(), chars.next()), (Some(_), None))
    }

    /// `true` if this is a protected-event marker tag (NIP-70).
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.name() == "-"
    }

    /// Convenience constructor for an `e` (event reference) tag.
    pub fn event(id: impl Into<String>) -> Self {
        Self(vec!["e".to_string(), id.into()])
    }

    /// Convenience constructor for a `d` (identifier) tag.
    pub fn identifier(value: impl Into<String>) -> Self {
        Self(vec!["d".to_string(), value.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(Tag::new(vec![]).is_none());
    }

    #[test]
    fn deserialize_rejects_empty_array() {
        let result: Result<Tag, _> = serde_json::from_str("[]");
        assert!(result.is_err());
    }

    #[test]
    fn indexable_single_letter_only() {
        let t = Tag::new(vec!["e".into(), "abc".into()]).unwrap();
        assert!(t.is_indexable());
        let t = Tag::new(vec!["relay".into(), "wss://x".into()]).unwrap();
        assert!(!t.is_indexable());
    }

    #[test]
    fn protected_marker() {
        let t = Tag::new(vec!["-".into()]).unwrap();
        assert!(t.is_protected());
    }
}
