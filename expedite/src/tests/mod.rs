mod engine_tests;
mod mock_platform;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::log_sink::{LogChannel, LogEvent, LogSink};

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// Sink that keeps every event for later assertions
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl RecordingSink {
    pub fn sink(&self) -> LogSink {
        let events = self.events.clone();
        LogSink::new(move |event| events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Output channel text, concatenated
    pub fn output(&self) -> String {
        self.events()
            .iter()
            .filter(|e| e.channel == LogChannel::Output)
            .map(|e| e.text().to_string())
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.output().contains(needle)
    }
}

/// Poll `condition` on the (usually paused) tokio clock
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
