use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::cancellation::CancellationContext;
use crate::errors::AutomationError;
use crate::input::InputInjector;
use crate::log_sink::LogSink;
use crate::platforms::WindowSystem;
use crate::types::{Key, TitlePattern, WindowHandle, WindowReference};

// Pause between enumerations while waiting for a single main window
const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Resolves handle-bound references to the target application's windows.
///
/// Titles are only used to find a window; once found, a reference is bound to
/// its handle because duplicate titles are expected to appear transiently.
#[derive(Clone)]
pub struct WindowLocator {
    windows: Arc<dyn WindowSystem>,
    injector: InputInjector,
    cancel: CancellationContext,
    sink: LogSink,
    key_delay: Duration,
}

impl WindowLocator {
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        injector: InputInjector,
        cancel: CancellationContext,
        sink: LogSink,
        key_delay: Duration,
    ) -> Self {
        Self {
            windows,
            injector,
            cancel,
            sink,
            key_delay,
        }
    }

    /// Wait until exactly one visible window matches `pattern`.
    ///
    /// Two or more matches mean a stale dialog is blocking the application;
    /// Enter is pressed to acknowledge it and the lookup is retried. The
    /// waiting message is logged only when the number of matches changes.
    #[instrument(level = "debug", skip(self, pattern), fields(pattern = %pattern))]
    pub async fn resolve_single_window(
        &self,
        pattern: &TitlePattern,
        timeout: Duration,
    ) -> Result<WindowReference, AutomationError> {
        let deadline = Instant::now() + timeout;
        let mut last_count: Option<usize> = None;

        while Instant::now() < deadline {
            self.cancel.check()?;

            match self.matching_windows(pattern) {
                Ok(matches) if matches.len() == 1 => match self.reference(matches[0]) {
                    Ok(reference) => {
                        debug!("Resolved '{}' to window {}", pattern, reference.handle);
                        return Ok(reference);
                    }
                    // The window can vanish between enumeration and inspection.
                    Err(e) => debug!("Matched window disappeared: {}", e),
                },
                Ok(matches) => {
                    let count = matches.len();
                    if last_count != Some(count) {
                        if count > 1 {
                            self.sink.append(format!(
                                "Waiting for a single '{pattern}' window (found {count}). Pressing Enter to clear popups...\n"
                            ));
                        } else {
                            self.sink.append(format!(
                                "Waiting for a single '{pattern}' window (found {count})...\n"
                            ));
                        }
                        last_count = Some(count);
                    }
                    if count > 1 {
                        self.acknowledge_popup().await?;
                    }
                }
                Err(e) => debug!("Window enumeration failed, retrying: {}", e),
            }

            self.cancel.sleep(RESOLVE_POLL_INTERVAL).await?;
        }

        Err(AutomationError::Timeout(format!(
            "Timed out waiting for a single '{pattern}' window (last seen {})",
            last_count.map_or_else(|| "1 unreadable".to_string(), |c| c.to_string())
        )))
    }

    /// Poll for a window that is expected to appear exactly once, such as the
    /// wizard opened by the primary action. The first visible match wins.
    #[instrument(level = "debug", skip(self, pattern), fields(pattern = %pattern))]
    pub async fn wait_for_window(
        &self,
        pattern: &TitlePattern,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<WindowReference, AutomationError> {
        for attempt in 1..=max_attempts {
            self.cancel.check()?;
            match self.matching_windows(pattern) {
                Ok(matches) => {
                    if let Some(reference) =
                        matches.into_iter().find_map(|handle| self.reference(handle).ok())
                    {
                        debug!("'{}' appeared on attempt {}", pattern, attempt);
                        return Ok(reference);
                    }
                }
                Err(e) => debug!("Window enumeration failed on attempt {}: {}", attempt, e),
            }
            self.cancel.sleep(interval).await?;
        }
        Err(AutomationError::Timeout(format!(
            "Window '{pattern}' did not appear after {max_attempts} attempts"
        )))
    }

    /// Visible top-level windows owned by `process_id`
    pub fn count_process_windows(&self, process_id: u32) -> usize {
        match self.windows.enumerate_top_level_windows() {
            Ok(handles) => handles
                .into_iter()
                .filter(|&handle| self.windows.is_visible(handle))
                .filter(|&handle| {
                    self.windows
                        .owner_process_id(handle)
                        .is_ok_and(|pid| pid == process_id)
                })
                .count(),
            Err(e) => {
                debug!("Window enumeration failed while counting: {}", e);
                0
            }
        }
    }

    /// Re-read the rectangle of a resolved window, keeping the cached one if
    /// the window cannot be inspected
    pub fn refresh(&self, reference: &WindowReference) -> WindowReference {
        match self.windows.window_rect(reference.handle) {
            Ok(rect) => WindowReference {
                rect,
                ..reference.clone()
            },
            Err(e) => {
                debug!("Keeping cached rectangle for {}: {}", reference.handle, e);
                reference.clone()
            }
        }
    }

    fn matching_windows(&self, pattern: &TitlePattern) -> Result<Vec<WindowHandle>, AutomationError> {
        let handles = self.windows.enumerate_top_level_windows()?;
        Ok(handles
            .into_iter()
            .filter(|&handle| self.windows.is_visible(handle))
            .filter(|&handle| {
                self.windows
                    .window_title(handle)
                    .is_ok_and(|title| pattern.matches(&title))
            })
            .collect())
    }

    fn reference(&self, handle: WindowHandle) -> Result<WindowReference, AutomationError> {
        Ok(WindowReference {
            handle,
            process_id: self.windows.owner_process_id(handle)?,
            title: self.windows.window_title(handle)?,
            rect: self.windows.window_rect(handle)?,
        })
    }

    async fn acknowledge_popup(&self) -> Result<(), AutomationError> {
        if let Err(e) = self.injector.press_key(Key::Enter) {
            if e.is_abort() {
                return Err(e);
            }
            debug!("Failed to acknowledge popup: {}", e);
        }
        self.cancel.sleep(self.key_delay).await
    }
}
