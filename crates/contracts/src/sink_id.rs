//! SinkId - registry key for sinks attached to a dispatch hub
//!
//! Uses `Arc<str>` so the id can be cloned into worker threads, metric labels
//! and status records without reallocating.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Stable string identifier of a sink.
///
/// # Examples
/// ```
/// use contracts::SinkId;
///
/// let id: SinkId = "access_file".into();
/// let id2 = id.clone();
/// assert_eq!(id, id2);
/// assert_eq!(id.as_str(), "access_file");
/// ```
#[derive(Clone, Default)]
pub struct SinkId(Arc<str>);

impl SinkId {
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Deref for SinkId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for SinkId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SinkId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SinkId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for SinkId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&String> for SinkId {
    #[inline]
    fn from(s: &String) -> Self {
        Self(Arc::from(s.as_str()))
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SinkId({:?})", self.0)
    }
}

impl PartialEq for SinkId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for SinkId {}

impl PartialEq<str> for SinkId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for SinkId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

// Hashes like `str` so maps keyed by SinkId can be queried with `&str`
impl Hash for SinkId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Serialize for SinkId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SinkId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_shares_storage() {
        let id1: SinkId = "console".into();
        let id2 = id1.clone();
        assert_eq!(id1.as_str().as_ptr(), id2.as_str().as_ptr());
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map: HashMap<SinkId, u32> = HashMap::new();
        map.insert("file".into(), 1);
        map.insert("udp".into(), 2);
        assert_eq!(map.get("udp"), Some(&2));
    }

    #[test]
    fn test_blank_is_empty() {
        assert!(SinkId::from("  ").is_empty());
        assert!(!SinkId::from("list").is_empty());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id: SinkId = "list".into();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"list\"");
        let parsed: SinkId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
