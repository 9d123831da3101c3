use flag_store::StoreError;
use shared::{
    domain::{FlagKey, ToggleKind},
    error::{ErrorCode, ErrorReport},
};
use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown {kind:?} toggle target '{target}'")]
    UnknownTarget { target: FlagKey, kind: ToggleKind },
    #[error("toggle of '{target}' failed: {source}")]
    ToggleFailed {
        target: FlagKey,
        source: anyhow::Error,
    },
    #[error("toggle task for '{target}' did not complete: {source}")]
    TaskAborted {
        target: FlagKey,
        source: tokio::task::JoinError,
    },
    #[error("toggle of '{target}' requires a running tokio runtime")]
    NoRuntime { target: FlagKey },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTarget { .. } => ErrorCode::UnknownTarget,
            Self::ToggleFailed { .. } => ErrorCode::ToggleFailed,
            Self::TaskAborted { .. } | Self::NoRuntime { .. } => ErrorCode::Internal,
            Self::Store(err) => err.code(),
            Self::Registry(_) => ErrorCode::InvalidConfig,
        }
    }
}

impl From<&CoordinatorError> for ErrorReport {
    fn from(value: &CoordinatorError) -> Self {
        ErrorReport::new(value.code(), value.to_string())
    }
}
