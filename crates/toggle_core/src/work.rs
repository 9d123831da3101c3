//! The deferred unit of work that sits between a toggle's loading commit and
//! its final commit.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{FlagKey, ToggleKind};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub target: FlagKey,
    pub kind: ToggleKind,
    pub delay: Duration,
}

#[async_trait]
pub trait ToggleWork: Send + Sync {
    /// Completes the work behind one toggle. An error leaves the target's
    /// show flag unchanged.
    async fn run(&self, request: &WorkRequest, cancel: &CancellationToken) -> Result<()>;
}

/// Waits out the configured delay; fails only when cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedDelay;

#[async_trait]
impl ToggleWork for SimulatedDelay {
    async fn run(&self, request: &WorkRequest, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("toggle of '{}' cancelled", request.target)),
            _ = tokio::time::sleep(request.delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(delay_ms: u64) -> WorkRequest {
        WorkRequest {
            target: "box1".into(),
            kind: ToggleKind::Single,
            delay: Duration::from_millis(delay_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_delay_waits_full_duration() {
        let started = tokio::time::Instant::now();
        SimulatedDelay
            .run(&request(300), &CancellationToken::new())
            .await
            .expect("delay completes");
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_delay_fails_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = SimulatedDelay
            .run(&request(300), &cancel)
            .await
            .expect_err("cancelled");
        assert!(err.to_string().contains("cancelled"));
    }
}
