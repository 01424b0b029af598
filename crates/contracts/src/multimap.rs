//! Multi-valued name → values maps for headers and parameters
//!
//! Built append-only during capture, finalized once, read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable name → ordered values mapping.
///
/// Header maps fold names to lowercase (lookups are case-insensitive);
/// parameter maps keep names verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiMap {
    entries: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    fold_case: bool,
}

impl MultiMap {
    /// Empty case-sensitive map
    pub fn new() -> Self {
        Self::default()
    }

    /// All values recorded under `name`, in arrival order
    pub fn get(&self, name: &str) -> Option<&[String]> {
        if self.fold_case {
            self.entries
                .get(name.to_ascii_lowercase().as_str())
                .map(Vec::as_slice)
        } else {
            self.entries.get(name).map(Vec::as_slice)
        }
    }

    /// First value recorded under `name`
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Whether names are compared case-insensitively
    pub fn is_case_insensitive(&self) -> bool {
        self.fold_case
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

/// Append-only builder; one pass of `push` calls, then `finish`.
#[derive(Debug, Default)]
pub struct MultiMapBuilder {
    pairs: Vec<(String, String)>,
    fold_case: bool,
}

impl MultiMapBuilder {
    /// Builder for parameter maps (names kept verbatim)
    pub fn case_sensitive() -> Self {
        Self {
            pairs: Vec::new(),
            fold_case: false,
        }
    }

    /// Builder for header maps (names folded to lowercase)
    pub fn case_insensitive() -> Self {
        Self {
            pairs: Vec::new(),
            fold_case: true,
        }
    }

    #[inline]
    pub fn push(&mut self, name: &str, value: &str) {
        let name = if self.fold_case {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        };
        self.pairs.push((name, value.to_string()));
    }

    /// Append every `(name, value)` pair from an iterator
    pub fn extend<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in pairs {
            self.push(name, value);
        }
    }

    /// Number of pairs pushed so far
    pub fn pending(&self) -> usize {
        self.pairs.len()
    }

    /// Group the pushed pairs into the final map
    pub fn finish(self) -> MultiMap {
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in self.pairs {
            entries.entry(name).or_default().push(value);
        }
        MultiMap {
            entries,
            fold_case: self.fold_case,
        }
    }
}
