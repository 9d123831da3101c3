use std::{
    collections::{btree_map, BTreeMap},
    fmt,
};

use serde::{Deserialize, Serialize};

/// Identifier of a single boolean flag, a toggle target, or a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagKey(String);

impl FlagKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlagKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FlagKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Governs what `apply` overlays a partial update onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Overlay onto the initial defaults; keys absent from the patch revert.
    #[default]
    FullReset,
    /// Overlay onto the current map; keys absent from the patch are kept.
    Merge,
}

impl ResetPolicy {
    /// Maps the boolean construction flag where `true` means "reset to defaults".
    pub fn from_reset_flag(reset: bool) -> Self {
        if reset {
            Self::FullReset
        } else {
            Self::Merge
        }
    }
}

/// How overlapping toggles of the same target are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// In-flight sequences run side by side; the last commit wins.
    #[default]
    Interleave,
    /// Sequences on the same target run one after another in call order.
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKind {
    Single,
    Group,
}

/// The `(show, loading)` flag pair backing one toggleable target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPair {
    pub show: FlagKey,
    pub loading: FlagKey,
}

impl KeyPair {
    pub fn new(show: impl Into<FlagKey>, loading: impl Into<FlagKey>) -> Self {
        Self {
            show: show.into(),
            loading: loading.into(),
        }
    }
}

/// A full set of flag values. Keys are fixed by whoever builds the initial map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagMap(BTreeMap<FlagKey, bool>);

impl FlagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &FlagKey) -> Option<bool> {
        self.0.get(key).copied()
    }

    pub fn contains_key(&self, key: &FlagKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<FlagKey>, value: bool) -> Option<bool> {
        self.0.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FlagKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FlagKey, bool> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy of `self` with every entry of `patch` written over it.
    pub fn overlay(&self, patch: &FlagPatch) -> FlagMap {
        let mut next = self.clone();
        for (key, value) in patch.iter() {
            next.0.insert(key.clone(), *value);
        }
        next
    }

    /// Keys whose values differ between `self` and `other`.
    pub fn diff_keys<'a>(&'a self, other: &'a FlagMap) -> Vec<&'a FlagKey> {
        self.0
            .iter()
            .filter(|(key, value)| other.get(key) != Some(**value))
            .map(|(key, _)| key)
            .chain(other.keys().filter(|key| !self.contains_key(key)))
            .collect()
    }
}

impl<K: Into<FlagKey>> FromIterator<(K, bool)> for FlagMap {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<'a> IntoIterator for &'a FlagMap {
    type Item = (&'a FlagKey, &'a bool);
    type IntoIter = btree_map::Iter<'a, FlagKey, bool>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A partial update: only the listed keys are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagPatch(BTreeMap<FlagKey, bool>);

impl FlagPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<FlagKey>, value: bool) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<FlagKey>, value: bool) {
        self.0.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &FlagKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, FlagKey, bool> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<FlagKey>> FromIterator<(K, bool)> for FlagPatch {
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One line of the action log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: String,
    pub message: String,
}
