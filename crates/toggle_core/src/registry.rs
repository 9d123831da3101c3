//! Static assembly-time configuration: which flags back each target, and
//! which targets a group cascades to.

use std::collections::BTreeMap;

use shared::domain::{FlagKey, FlagMap, KeyPair};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("target '{target}' references flag '{key}' missing from the initial flag map")]
    MissingFlag { target: FlagKey, key: FlagKey },
    #[error("target '{target}' uses '{key}' as both its show and loading flag")]
    SharedPairKey { target: FlagKey, key: FlagKey },
    #[error("group '{group}' has no registered key pair")]
    GroupWithoutKeyPair { group: FlagKey },
    #[error("group '{group}' depends on unregistered target '{dependent}'")]
    UnknownDependent { group: FlagKey, dependent: FlagKey },
    #[error("group '{group}' lists itself as a dependent")]
    SelfDependency { group: FlagKey },
}

/// Maps each toggleable target to its `(show, loading)` flags.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    pairs: BTreeMap<FlagKey, KeyPair>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: impl Into<FlagKey>, pair: KeyPair) -> Self {
        self.register(target, pair);
        self
    }

    /// Registers or replaces the pair for `target`.
    pub fn register(&mut self, target: impl Into<FlagKey>, pair: KeyPair) -> Option<KeyPair> {
        self.pairs.insert(target.into(), pair)
    }

    pub fn get(&self, target: &FlagKey) -> Option<&KeyPair> {
        self.pairs.get(target)
    }

    pub fn contains(&self, target: &FlagKey) -> bool {
        self.pairs.contains_key(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlagKey, &KeyPair)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Checks that both flags of every pair exist in `flags` and are distinct.
    pub fn validate(&self, flags: &FlagMap) -> Result<(), RegistryError> {
        for (target, pair) in &self.pairs {
            if pair.show == pair.loading {
                return Err(RegistryError::SharedPairKey {
                    target: target.clone(),
                    key: pair.show.clone(),
                });
            }
            for key in [&pair.show, &pair.loading] {
                if !flags.contains_key(key) {
                    return Err(RegistryError::MissingFlag {
                        target: target.clone(),
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Maps a group target to the ordered set of targets it cascades to.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<FlagKey, Vec<FlagKey>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group<I, K>(mut self, group: impl Into<FlagKey>, dependents: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FlagKey>,
    {
        self.register(group, dependents);
        self
    }

    /// Registers or replaces `group`. Repeated dependents keep their first position.
    pub fn register<I, K>(&mut self, group: impl Into<FlagKey>, dependents: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<FlagKey>,
    {
        let mut ordered: Vec<FlagKey> = Vec::new();
        for dependent in dependents {
            let dependent = dependent.into();
            if !ordered.contains(&dependent) {
                ordered.push(dependent);
            }
        }
        self.groups.insert(group.into(), ordered);
    }

    pub fn dependents(&self, group: &FlagKey) -> Option<&[FlagKey]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn contains(&self, group: &FlagKey) -> bool {
        self.groups.contains_key(group)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlagKey, &[FlagKey])> {
        self.groups.iter().map(|(group, deps)| (group, deps.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every group and each of its dependents must be a registered target.
    pub fn validate(&self, targets: &TargetRegistry) -> Result<(), RegistryError> {
        for (group, dependents) in &self.groups {
            if !targets.contains(group) {
                return Err(RegistryError::GroupWithoutKeyPair {
                    group: group.clone(),
                });
            }
            for dependent in dependents {
                if dependent == group {
                    return Err(RegistryError::SelfDependency {
                        group: group.clone(),
                    });
                }
                if !targets.contains(dependent) {
                    return Err(RegistryError::UnknownDependent {
                        group: group.clone(),
                        dependent: dependent.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
