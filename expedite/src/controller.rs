use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cancellation::CancellationContext;
use crate::config::Configuration;
use crate::coordinator::PauseCoordinator;
use crate::engine::{run_workflow, RunOutcome, RunRequest};
use crate::errors::AutomationError;
use crate::log_sink::LogSink;
use crate::platforms::Platform;
use crate::probe::run_coordinate_probe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Workflow,
    CoordinateProbe,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Workflow => f.write_str("workflow"),
            RunKind::CoordinateProbe => f.write_str("coordinate probe"),
        }
    }
}

struct ActiveRun {
    kind: RunKind,
    cancel: CancellationContext,
}

type Slot = Arc<Mutex<Option<ActiveRun>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Frees the controller's slot when the worker task finishes, however it ends
struct SlotGuard {
    slot: Slot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.slot).take();
    }
}

/// A spawned run
pub struct RunHandle<T> {
    kind: RunKind,
    cancel: CancellationContext,
    join: JoinHandle<T>,
}

impl<T> RunHandle<T> {
    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<T, AutomationError> {
        self.join
            .await
            .map_err(|e| AutomationError::Internal(format!("{} task failed: {e}", self.kind)))
    }
}

/// Owns the single active run and the primitives the host uses to steer it.
///
/// Starting a run requires a tokio runtime. A fresh cancellation context is
/// made for each run; the pause coordinator is shared.
#[derive(Clone)]
pub struct RunController {
    platform: Platform,
    coordinator: Arc<PauseCoordinator>,
    active: Slot,
}

impl RunController {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            coordinator: Arc::new(PauseCoordinator::new()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn coordinator(&self) -> Arc<PauseCoordinator> {
        self.coordinator.clone()
    }

    pub fn active_kind(&self) -> Option<RunKind> {
        lock(&self.active).as_ref().map(|run| run.kind)
    }

    pub fn start_workflow(
        &self,
        request: RunRequest,
        sink: LogSink,
    ) -> Result<RunHandle<RunOutcome>, AutomationError> {
        let (cancel, guard) = self.begin(RunKind::Workflow)?;
        self.coordinator.clear();
        let platform = self.platform.clone();
        let coordinator = self.coordinator.clone();
        let worker_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            run_workflow(&platform, request, worker_cancel, coordinator, sink).await
        });
        Ok(RunHandle {
            kind: RunKind::Workflow,
            cancel,
            join,
        })
    }

    pub fn start_probe(
        &self,
        config: Configuration,
        sink: LogSink,
    ) -> Result<RunHandle<Result<(), AutomationError>>, AutomationError> {
        let (cancel, guard) = self.begin(RunKind::CoordinateProbe)?;
        let platform = self.platform.clone();
        let worker_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let _guard = guard;
            run_coordinate_probe(&platform, &config, &worker_cancel, &sink).await
        });
        Ok(RunHandle {
            kind: RunKind::CoordinateProbe,
            cancel,
            join,
        })
    }

    /// Raise the abort flag of the active run. Returns false when idle.
    pub fn abort(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                info!("Aborting {}", run.kind);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Resume a pending pause. Returns false when nothing is paused.
    pub fn resume(&self) -> bool {
        self.coordinator.resume()
    }

    fn begin(&self, kind: RunKind) -> Result<(CancellationContext, SlotGuard), AutomationError> {
        let mut active = lock(&self.active);
        if let Some(run) = active.as_ref() {
            return Err(AutomationError::AlreadyRunning(format!(
                "cannot start {kind} while a {} is running",
                run.kind
            )));
        }
        let cancel = CancellationContext::new();
        *active = Some(ActiveRun {
            kind,
            cancel: cancel.clone(),
        });
        debug!("Starting {}", kind);
        Ok((
            cancel,
            SlotGuard {
                slot: self.active.clone(),
            },
        ))
    }
}
