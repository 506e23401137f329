use std::time::Duration;
use tracing::{debug, info};

use crate::cancellation::CancellationContext;
use crate::config::Configuration;
use crate::errors::AutomationError;
use crate::input::InputInjector;
use crate::locator::WindowLocator;
use crate::log_sink::LogSink;
use crate::platforms::Platform;

const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Live readout of the cursor position relative to the main window, used to
/// calibrate the click offsets.
///
/// Emits a replace event on the setup channel whenever the relative position
/// changes. Runs until cancelled; cancellation ends the probe normally.
pub async fn run_coordinate_probe(
    platform: &Platform,
    config: &Configuration,
    cancel: &CancellationContext,
    sink: &LogSink,
) -> Result<(), AutomationError> {
    let pattern = config.main_title_pattern()?;
    let injector = InputInjector::new(platform.input.clone(), cancel.clone(), sink.clone(), false);
    let locator = WindowLocator::new(
        platform.windows.clone(),
        injector,
        cancel.clone(),
        sink.clone(),
        config.key_delay,
    );

    sink.setup(format!("Looking for '{pattern}'...\n"));
    let main = match locator
        .resolve_single_window(&pattern, config.timing.resolve_timeout)
        .await
    {
        Ok(main) => main,
        Err(AutomationError::Aborted) => return Ok(()),
        Err(e) => return Err(e),
    };
    info!("Coordinate probe attached to '{}'", main.title);

    let mut last: Option<(i32, i32)> = None;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match platform.windows.cursor_position() {
            Ok(point) => {
                let relative = main.rect.relative(point);
                if last != Some(relative) {
                    sink.replace_setup(format!("x: {}\ny: {}\n", relative.0, relative.1));
                    last = Some(relative);
                }
            }
            Err(e) => debug!("Cursor position unavailable: {}", e),
        }
        if cancel.sleep(PROBE_INTERVAL).await.is_err() {
            break;
        }
    }
    debug!("Coordinate probe stopped");
    Ok(())
}
