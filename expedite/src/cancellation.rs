use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::AutomationError;

/// Cooperative abort signal checked at every wait point of a run.
///
/// Cloning shares the same underlying flag, so the host keeps one clone and the
/// worker another. A fresh context is created for every run.
#[derive(Clone, Debug, Default)]
pub struct CancellationContext {
    token: CancellationToken,
}

impl CancellationContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Raise the abort flag. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Cancellation requested");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `Aborted` if the flag is set
    pub fn check(&self) -> Result<(), AutomationError> {
        if self.token.is_cancelled() {
            Err(AutomationError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// The timer races the token, so an abort raised mid-delay is observed
    /// immediately instead of after the delay elapses.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AutomationError> {
        self.check()?;
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.token.cancelled() => Err(AutomationError::Aborted),
        }
    }

    /// Resolves once the flag is raised
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
