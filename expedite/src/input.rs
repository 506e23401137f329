use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::cancellation::CancellationContext;
use crate::errors::AutomationError;
use crate::log_sink::LogSink;
use crate::platforms::InputDevice;
use crate::types::{Key, Offset, WindowReference};

/// Issues synthetic input on behalf of a run.
///
/// Every call checks cancellation first; once a run is aborted no further
/// input reaches the OS queue. There are no retries at this layer.
#[derive(Clone)]
pub struct InputInjector {
    device: Arc<dyn InputDevice>,
    cancel: CancellationContext,
    sink: LogSink,
    debug_actions: bool,
    actions: Arc<AtomicUsize>,
}

impl InputInjector {
    pub fn new(
        device: Arc<dyn InputDevice>,
        cancel: CancellationContext,
        sink: LogSink,
        debug_actions: bool,
    ) -> Self {
        Self {
            device,
            cancel,
            sink,
            debug_actions,
            actions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Click at an offset relative to the window's cached top-left corner
    pub fn click(
        &self,
        window: &WindowReference,
        offset: Offset,
        label: &str,
    ) -> Result<(), AutomationError> {
        self.cancel.check()?;
        let point = window.rect.absolute(offset);
        self.log_action(format!(
            "CLICK {label} @ {offset} (approx screen ({}, {}))",
            point.x, point.y
        ));
        self.device.click_at(point)
    }

    /// Click the control that opens the wizard, preceded by a banner so each
    /// record is easy to find in the output
    pub fn click_primary(
        &self,
        window: &WindowReference,
        offset: Offset,
        label: &str,
    ) -> Result<(), AutomationError> {
        self.cancel.check()?;
        let rule = "*".repeat(56);
        self.sink.append(format!("\n{rule}\n"));
        self.sink
            .append(format!("********************  {} CLICK  ********************\n", label.to_uppercase()));
        self.sink.append(format!("{rule}\n"));
        self.click(window, offset, label)
    }

    pub fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        self.cancel.check()?;
        self.log_action(format!("KEY {key}"));
        self.device.press_key(key)
    }

    pub fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        self.cancel.check()?;
        self.log_action(format!("TYPE {text}"));
        self.device.type_text(text)
    }

    pub fn focus(&self, window: &WindowReference) -> Result<(), AutomationError> {
        self.cancel.check()?;
        self.log_action(format!("FOCUS '{}' ({})", window.title, window.handle));
        self.device.focus_window(window.handle)
    }

    /// Numbered diagnostic line, emitted only with debug actions enabled
    pub fn log_action(&self, message: String) {
        debug!(action = %message, "automation action");
        if !self.debug_actions {
            return;
        }
        let n = self.actions.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.append(format!("[ACTION {n:02}] {message}\n"));
    }
}
