//! Wizard-driving desktop automation
//!
//! Drives a third-party desktop application through synthetic clicks and
//! keystrokes, one wizard pass per identifier. Window lookup, screen reading
//! and input go through the capability traits in [`platforms`], so the
//! orchestration can run against a scripted platform in tests.

pub mod cancellation;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod input;
pub mod locator;
pub mod log_sink;
pub mod platforms;
pub mod probe;
#[cfg(test)]
mod tests;
pub mod types;

pub use cancellation::CancellationContext;
pub use classifier::{
    classify_detections, BoundingBox, Classification, Detection, PixelGrid, ScreenClassifier,
    ScreenState,
};
pub use config::{
    ClassificationFailurePolicy, ClassifierConfig, Configuration, Settings, SettingsStore, Timing,
    UiPreferences,
};
pub use controller::{RunController, RunHandle, RunKind};
pub use coordinator::{PauseCoordinator, PauseReason, PauseStatus};
pub use engine::{run_workflow, RecordState, RunOutcome, RunRequest, RunStatus, WorkflowEngine};
pub use errors::AutomationError;
pub use input::InputInjector;
pub use locator::WindowLocator;
pub use log_sink::{LogChannel, LogEvent, LogKind, LogSink};
pub use platforms::{create_platform, InputDevice, Platform, ScreenReader, WindowSystem};
pub use probe::run_coordinate_probe;
pub use types::{Key, Offset, Point, TitlePattern, WindowHandle, WindowRect, WindowReference};
