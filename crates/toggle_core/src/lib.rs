//! Two-phase (loading, then commit) toggling of flag targets and groups.

mod coordinator;
pub mod error;
pub mod registry;
pub mod work;

pub use coordinator::{
    CoordinatorBuilder, CoordinatorConfig, ToggleCoordinator, ToggleHandle, ToggleOutcome,
    DEFAULT_GROUP_DELAY, DEFAULT_SINGLE_DELAY,
};
pub use error::CoordinatorError;
pub use registry::{GroupRegistry, RegistryError, TargetRegistry};
pub use work::{SimulatedDelay, ToggleWork, WorkRequest};
