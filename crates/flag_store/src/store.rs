use std::sync::Arc;

use shared::{
    domain::{FlagKey, FlagMap, FlagPatch, ResetPolicy},
    error::{ErrorCode, ErrorReport},
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown flag key '{key}'")]
    UnknownKey { key: FlagKey },
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownKey { .. } => ErrorCode::UnknownKey,
        }
    }
}

impl From<&StoreError> for ErrorReport {
    fn from(value: &StoreError) -> Self {
        ErrorReport::new(value.code(), value.to_string())
    }
}

/// Boolean flag map with a fixed key set and a per-instance [`ResetPolicy`].
///
/// Cloning is cheap; every clone shares the same state. Each `apply` is
/// atomic with respect to readers and other `apply` calls, but there is no
/// transaction spanning several calls.
#[derive(Clone)]
pub struct FlagStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    initial: FlagMap,
    policy: ResetPolicy,
    current: watch::Sender<FlagMap>,
}

impl FlagStore {
    pub fn new(initial: FlagMap, policy: ResetPolicy) -> Self {
        let (current, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(StoreInner {
                initial,
                policy,
                current,
            }),
        }
    }

    pub fn policy(&self) -> ResetPolicy {
        self.inner.policy
    }

    /// The defaults captured at construction.
    pub fn initial(&self) -> &FlagMap {
        &self.inner.initial
    }

    /// Commits `patch` according to the store's policy and returns the new snapshot.
    ///
    /// A patch naming any key outside the initial map is rejected whole.
    pub fn apply(&self, patch: &FlagPatch) -> Result<FlagMap, StoreError> {
        if let Some(key) = patch
            .keys()
            .find(|key| !self.inner.initial.contains_key(key))
        {
            warn!(%key, "rejected flag patch with unknown key");
            return Err(StoreError::UnknownKey { key: key.clone() });
        }

        let mut committed = FlagMap::new();
        let changed = self.inner.current.send_if_modified(|current| {
            let next = match self.inner.policy {
                ResetPolicy::FullReset => self.inner.initial.overlay(patch),
                ResetPolicy::Merge => current.overlay(patch),
            };
            let changed = *current != next;
            *current = next.clone();
            committed = next;
            changed
        });

        debug!(
            policy = ?self.inner.policy,
            keys = patch.len(),
            changed,
            "applied flag patch"
        );
        Ok(committed)
    }

    /// Restores every flag to its initial value.
    pub fn reset(&self) -> FlagMap {
        let initial = self.inner.initial.clone();
        self.inner.current.send_if_modified(|current| {
            let changed = *current != initial;
            *current = initial.clone();
            changed
        });
        initial
    }

    pub fn snapshot(&self) -> FlagMap {
        self.inner.current.borrow().clone()
    }

    pub fn get(&self, key: &FlagKey) -> Option<bool> {
        self.inner.current.borrow().get(key)
    }

    /// Receiver notified after every commit that changes at least one flag.
    pub fn subscribe(&self) -> watch::Receiver<FlagMap> {
        self.inner.current.subscribe()
    }

    /// Snapshots produced by future changes, as a stream.
    pub fn changes(&self) -> WatchStream<FlagMap> {
        WatchStream::from_changes(self.subscribe())
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
