//! User-facing log stream of a run.
//!
//! Diagnostics go through `tracing`; this sink carries the lines an operator
//! watches while the automation holds the keyboard and mouse.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Logical channel a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogChannel {
    /// Workflow progress
    Output,
    /// Setup diagnostics such as the live coordinate readout
    Setup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogKind {
    Append(String),
    /// Replace the whole buffer of the channel
    Replace(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub channel: LogChannel,
    pub kind: LogKind,
}

impl LogEvent {
    pub fn text(&self) -> &str {
        match &self.kind {
            LogKind::Append(text) | LogKind::Replace(text) => text,
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Append-only sink. Events are delivered in emission order.
#[derive(Clone)]
pub struct LogSink {
    emit: Arc<dyn Fn(LogEvent) + Send + Sync>,
}

impl LogSink {
    pub fn new(emit: impl Fn(LogEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink backed by an unbounded channel, for hosts that drain on their own loop
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            // Receiver gone means the host stopped listening; the run carries on.
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    /// Sink that drops everything
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn append(&self, text: impl Into<String>) {
        self.emit(LogChannel::Output, LogKind::Append(text.into()));
    }

    pub fn setup(&self, text: impl Into<String>) {
        self.emit(LogChannel::Setup, LogKind::Append(text.into()));
    }

    pub fn replace_setup(&self, text: impl Into<String>) {
        self.emit(LogChannel::Setup, LogKind::Replace(text.into()));
    }

    fn emit(&self, channel: LogChannel, kind: LogKind) {
        (self.emit)(LogEvent { channel, kind });
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}
