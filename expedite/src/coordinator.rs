use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cancellation::CancellationContext;
use crate::errors::AutomationError;

/// Why the worker handed control to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Several subjects matched the identifier and one has to be picked
    SubjectChoice,
    /// The target application rejected the identifier with a popup
    Correction,
}

/// Published to the host so it knows whether resume input is expected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseStatus {
    Running,
    Paused(PauseReason),
}

/// Lets the worker block for explicit human confirmation and the host unblock it.
///
/// One coordinator is shared by the host and the worker of a run. At most one
/// pause is outstanding at a time.
#[derive(Debug)]
pub struct PauseCoordinator {
    status: watch::Sender<PauseStatus>,
    resumed: watch::Sender<bool>,
    pauses: AtomicUsize,
}

impl Default for PauseCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseCoordinator {
    pub fn new() -> Self {
        let (status, _) = watch::channel(PauseStatus::Running);
        let (resumed, _) = watch::channel(false);
        Self {
            status,
            resumed,
            pauses: AtomicUsize::new(0),
        }
    }

    /// Enter the paused state and notify the host that resume input is expected
    pub fn request_pause(&self, reason: PauseReason) -> Result<(), AutomationError> {
        if let PauseStatus::Paused(current) = *self.status.borrow() {
            return Err(AutomationError::Internal(format!(
                "pause requested for {reason:?} while already paused for {current:?}"
            )));
        }
        self.resumed.send_replace(false);
        self.pauses.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(PauseStatus::Paused(reason));
        info!("Paused for {:?}", reason);
        Ok(())
    }

    /// Block until the host resumes or the run is cancelled
    pub async fn await_resume(&self, cancel: &CancellationContext) -> Result<(), AutomationError> {
        cancel.check()?;
        let mut resumed = self.resumed.subscribe();
        tokio::select! {
            result = resumed.wait_for(|resumed| *resumed) => {
                result.map_err(|_| AutomationError::Internal("resume signal dropped".to_string()))?;
                debug!("Resume received");
                Ok(())
            }
            _ = cancel.cancelled() => Err(AutomationError::Aborted),
        }
    }

    /// Reset for the next pause
    pub fn clear(&self) {
        self.resumed.send_replace(false);
        self.status.send_replace(PauseStatus::Running);
    }

    /// Signal resume. Ignored unless a pause is outstanding.
    pub fn resume(&self) -> bool {
        if self.is_paused() {
            self.resumed.send_replace(true);
            true
        } else {
            debug!("Resume ignored: nothing is paused");
            false
        }
    }

    pub fn is_paused(&self) -> bool {
        matches!(*self.status.borrow(), PauseStatus::Paused(_))
    }

    pub fn status(&self) -> PauseStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PauseStatus> {
        self.status.subscribe()
    }

    /// Number of pauses requested since creation
    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}
