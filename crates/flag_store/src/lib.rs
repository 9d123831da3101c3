//! Observable flag state: the policy-aware [`FlagStore`] and the bounded [`ActionLog`].

mod action_log;
mod store;

pub use action_log::{ActionLog, SharedActionLog, DEFAULT_LOG_CAPACITY};
pub use store::{FlagStore, StoreError};
