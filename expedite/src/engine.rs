//! Per-record state machine driving the target application's wizard.
//!
//! Each record walks an explicit [`RecordState`] sequence. Every transition
//! is one call to [`WorkflowEngine::step`], so wait points, pauses and
//! cancellation checks are visible in one place.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::cancellation::CancellationContext;
use crate::classifier::{ScreenClassifier, ScreenState};
use crate::config::{ClassificationFailurePolicy, Configuration};
use crate::coordinator::{PauseCoordinator, PauseReason};
use crate::errors::AutomationError;
use crate::input::InputInjector;
use crate::locator::WindowLocator;
use crate::log_sink::LogSink;
use crate::platforms::Platform;
use crate::types::{Key, TitlePattern, WindowReference};

const PRIMARY_ACTION_LABEL: &str = "Primary action";
const SECONDARY_TAB_LABEL: &str = "Secondary tab";
const FIELD_LABEL: &str = "Identifier field";

/// Ordered identifiers plus the configuration snapshot of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub identifiers: Vec<String>,
    pub config: Configuration,
}

impl RunRequest {
    /// Trims every identifier and drops blank ones, keeping order
    pub fn new<I, S>(identifiers: I, config: Configuration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let identifiers = identifiers
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        Self {
            identifiers,
            config,
        }
    }

    /// One identifier per line
    pub fn from_lines(text: &str, config: Configuration) -> Self {
        Self::new(text.lines(), config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub processed: usize,
    pub elapsed: Duration,
    pub status: RunStatus,
}

/// Windows bound for the remainder of a record once the wizard is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub main: WindowReference,
    pub wizard: WindowReference,
}

/// Where a correction pause continues once the popup is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterCorrection {
    /// The popup showed up before the page could be classified
    Classify,
    FixedKeySequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    Resolve,
    Trigger { main: WindowReference },
    AwaitWizard { main: WindowReference },
    NavigateToField(Session),
    EnterIdentifier(Session),
    Advance(Session),
    ClassifyScreen(Session),
    AutoProceed(Session),
    PausedForSubjectChoice(Session),
    ValidatePostAdvance(Session),
    PausedForCorrection {
        session: Session,
        observed: usize,
        then: AfterCorrection,
    },
    FixedKeySequence(Session),
    Complete,
}

impl RecordState {
    pub fn name(&self) -> &'static str {
        match self {
            RecordState::Resolve => "Resolve",
            RecordState::Trigger { .. } => "Trigger",
            RecordState::AwaitWizard { .. } => "AwaitWizard",
            RecordState::NavigateToField(_) => "NavigateToField",
            RecordState::EnterIdentifier(_) => "EnterIdentifier",
            RecordState::Advance(_) => "Advance",
            RecordState::ClassifyScreen(_) => "ClassifyScreen",
            RecordState::AutoProceed(_) => "AutoProceed",
            RecordState::PausedForSubjectChoice(_) => "PausedForSubjectChoice",
            RecordState::ValidatePostAdvance(_) => "ValidatePostAdvance",
            RecordState::PausedForCorrection { .. } => "PausedForCorrection",
            RecordState::FixedKeySequence(_) => "FixedKeySequence",
            RecordState::Complete => "Complete",
        }
    }
}

enum KeyStep {
    Log(&'static str),
    Press(Key),
    Settle,
}

/// Keys that finish the wizard once the subject is selected
const FIXED_KEY_SEQUENCE: &[KeyStep] = &[
    KeyStep::Log("Enter"),
    KeyStep::Press(Key::Enter),
    KeyStep::Log("Tab"),
    KeyStep::Press(Key::Tab),
    KeyStep::Log("Enter"),
    KeyStep::Press(Key::Enter),
    KeyStep::Log("Enter (popup)"),
    KeyStep::Press(Key::Enter),
    KeyStep::Log("Tab x4 + Enter"),
    KeyStep::Press(Key::Tab),
    KeyStep::Press(Key::Tab),
    KeyStep::Press(Key::Tab),
    KeyStep::Press(Key::Tab),
    KeyStep::Press(Key::Enter),
    KeyStep::Log("Enter"),
    KeyStep::Press(Key::Enter),
    KeyStep::Log("Enter"),
    KeyStep::Press(Key::Enter),
    KeyStep::Settle,
    KeyStep::Log("Enter"),
    KeyStep::Press(Key::Enter),
];

/// Process identifiers against the target application.
///
/// The outcome is also reported through `sink`. An empty identifier list
/// performs no window or input operation.
pub async fn run_workflow(
    platform: &Platform,
    request: RunRequest,
    cancel: CancellationContext,
    coordinator: Arc<PauseCoordinator>,
    sink: LogSink,
) -> RunOutcome {
    if request.identifiers.is_empty() {
        sink.append("No identifiers provided.\n");
        return RunOutcome {
            processed: 0,
            elapsed: Duration::ZERO,
            status: RunStatus::Completed,
        };
    }

    let engine = match WorkflowEngine::new(platform, request.config, cancel, coordinator, sink.clone())
    {
        Ok(engine) => engine,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            sink.append(format!("Error: {e}\n"));
            return RunOutcome {
                processed: 0,
                elapsed: Duration::ZERO,
                status: RunStatus::Failed(e.to_string()),
            };
        }
    };
    engine.run(&request.identifiers).await
}

pub struct WorkflowEngine {
    config: Configuration,
    main_pattern: TitlePattern,
    wizard_pattern: TitlePattern,
    locator: WindowLocator,
    injector: InputInjector,
    classifier: ScreenClassifier,
    coordinator: Arc<PauseCoordinator>,
    cancel: CancellationContext,
    sink: LogSink,
}

impl WorkflowEngine {
    pub fn new(
        platform: &Platform,
        config: Configuration,
        cancel: CancellationContext,
        coordinator: Arc<PauseCoordinator>,
        sink: LogSink,
    ) -> Result<Self, AutomationError> {
        config.validate()?;
        let main_pattern = config.main_title_pattern()?;
        let wizard_pattern = config.wizard_title_pattern()?;
        let injector = InputInjector::new(
            platform.input.clone(),
            cancel.clone(),
            sink.clone(),
            config.debug_actions,
        );
        let locator = WindowLocator::new(
            platform.windows.clone(),
            injector.clone(),
            cancel.clone(),
            sink.clone(),
            config.key_delay,
        );
        let classifier = ScreenClassifier::new(platform.screen.clone(), config.classifier.clone());
        Ok(Self {
            config,
            main_pattern,
            wizard_pattern,
            locator,
            injector,
            classifier,
            coordinator,
            cancel,
            sink,
        })
    }

    /// Run every identifier in order and report the terminal status
    pub async fn run(&self, identifiers: &[String]) -> RunOutcome {
        let started = Instant::now();
        let mut processed = 0;
        let result = self.run_records(identifiers, &mut processed).await;
        let elapsed = started.elapsed();

        let status = match result {
            Ok(()) => {
                info!("Processed {} identifiers in {:?}", processed, elapsed);
                self.sink.append("All users processed.\n");
                self.sink
                    .append(format!("Total users processed: {processed}\n"));
                self.sink.append(format!(
                    "Total processing time: {:.1} seconds\n",
                    elapsed.as_secs_f64()
                ));
                RunStatus::Completed
            }
            Err(AutomationError::Aborted) => {
                info!("Run aborted after {} identifiers", processed);
                self.sink.append("Stopped.\n");
                self.sink
                    .append(format!("Users processed before stop: {processed}\n"));
                RunStatus::Aborted
            }
            Err(e) => {
                error!("Run failed after {} identifiers: {}", processed, e);
                self.sink.append(format!("Error: {e}\n"));
                self.sink
                    .append(format!("Users processed before error: {processed}\n"));
                RunStatus::Failed(e.to_string())
            }
        };
        self.coordinator.clear();

        RunOutcome {
            processed,
            elapsed,
            status,
        }
    }

    async fn run_records(
        &self,
        identifiers: &[String],
        processed: &mut usize,
    ) -> Result<(), AutomationError> {
        self.sink.append("Connecting to application...\n");
        self.sink.append("(Press ABORT anytime to stop)\n\n");
        let main = self
            .locator
            .resolve_single_window(&self.main_pattern, self.config.timing.resolve_timeout)
            .await?;
        self.sink.append(format!("Connected: {}\n", main.title));

        for (index, identifier) in identifiers.iter().enumerate() {
            self.cancel.check()?;
            self.process_record(identifier).await?;
            *processed += 1;
            if index + 1 < identifiers.len() {
                self.cancel.sleep(self.config.between_records_delay).await?;
            }
        }
        Ok(())
    }

    /// Drive one identifier from `Resolve` to `Complete`
    #[instrument(level = "info", skip(self))]
    pub async fn process_record(&self, identifier: &str) -> Result<(), AutomationError> {
        let mut state = RecordState::Resolve;
        loop {
            debug!(state = state.name(), "Entering state");
            state = self.step(identifier, state).await?;
            if state == RecordState::Complete {
                self.sink.append(format!("Completed {identifier}\n\n"));
                return Ok(());
            }
        }
    }

    /// Execute one state and return the next
    pub async fn step(
        &self,
        identifier: &str,
        state: RecordState,
    ) -> Result<RecordState, AutomationError> {
        self.cancel.check()?;
        match state {
            RecordState::Resolve => self.resolve(identifier).await,
            RecordState::Trigger { main } => self.trigger(main).await,
            RecordState::AwaitWizard { main } => self.await_wizard(main).await,
            RecordState::NavigateToField(session) => {
                self.navigate_to_field(identifier, session).await
            }
            RecordState::EnterIdentifier(session) => {
                self.enter_identifier(identifier, session).await
            }
            RecordState::Advance(session) => self.advance(session).await,
            RecordState::ClassifyScreen(session) => self.classify_screen(session).await,
            RecordState::AutoProceed(session) => Ok(RecordState::ValidatePostAdvance(session)),
            RecordState::PausedForSubjectChoice(session) => {
                self.pause_for_subject_choice(identifier, session).await
            }
            RecordState::ValidatePostAdvance(session) => self.validate_post_advance(session).await,
            RecordState::PausedForCorrection {
                session,
                observed,
                then,
            } => self.pause_for_correction(session, observed, then).await,
            RecordState::FixedKeySequence(session) => self.fixed_key_sequence(session).await,
            RecordState::Complete => Ok(RecordState::Complete),
        }
    }

    async fn resolve(&self, identifier: &str) -> Result<RecordState, AutomationError> {
        let main = self
            .locator
            .resolve_single_window(&self.main_pattern, self.config.timing.resolve_timeout)
            .await?;
        self.sink.append(format!("Processing {identifier}\n"));
        Ok(RecordState::Trigger { main })
    }

    async fn trigger(&self, main: WindowReference) -> Result<RecordState, AutomationError> {
        self.focus_tolerant(&main)?;
        self.cancel.sleep(self.config.timing.focus_settle).await?;
        self.injector
            .click_primary(&main, self.config.primary_action_offset, PRIMARY_ACTION_LABEL)?;
        self.cancel.sleep(self.config.click_delay).await?;
        Ok(RecordState::AwaitWizard { main })
    }

    async fn await_wizard(&self, main: WindowReference) -> Result<RecordState, AutomationError> {
        self.sink.append("Waiting for wizard window...\n");
        let timing = &self.config.timing;
        let wizard = self
            .locator
            .wait_for_window(&self.wizard_pattern, timing.wizard_attempts, timing.wizard_interval)
            .await
            .map_err(|e| match e {
                AutomationError::Timeout(_) => AutomationError::Timeout(format!(
                    "Wizard window did not appear after {} attempts",
                    timing.wizard_attempts
                )),
                other => other,
            })?;
        self.sink.append(format!(
            "Wizard window found at ({}, {})\n",
            wizard.rect.left, wizard.rect.top
        ));
        Ok(RecordState::NavigateToField(Session { main, wizard }))
    }

    async fn navigate_to_field(
        &self,
        identifier: &str,
        session: Session,
    ) -> Result<RecordState, AutomationError> {
        self.sink.append("Clicking secondary tab\n");
        self.injector
            .click(&session.main, self.config.secondary_tab_offset, SECONDARY_TAB_LABEL)?;
        self.cancel.sleep(self.config.click_delay).await?;

        self.sink
            .append(format!("Clicking identifier field and entering {identifier}\n"));
        self.injector
            .click(&session.main, self.config.field_offset, FIELD_LABEL)?;
        self.cancel.sleep(self.config.click_delay).await?;
        Ok(RecordState::EnterIdentifier(session))
    }

    async fn enter_identifier(
        &self,
        identifier: &str,
        session: Session,
    ) -> Result<RecordState, AutomationError> {
        self.injector.type_text(identifier)?;
        self.cancel.sleep(self.config.key_delay).await?;
        Ok(RecordState::Advance(session))
    }

    async fn advance(&self, session: Session) -> Result<RecordState, AutomationError> {
        self.sink.append("Next via Enter\n");
        self.focus_tolerant(&session.wizard)?;
        self.injector.press_key(Key::Enter)?;
        self.cancel.sleep(self.config.key_delay).await?;
        Ok(RecordState::ClassifyScreen(session))
    }

    async fn classify_screen(&self, session: Session) -> Result<RecordState, AutomationError> {
        let attempts = self.config.timing.classify_attempts;
        let mut last = ScreenState::TitleMissing;

        for attempt in 1..=attempts {
            let wizard = self.locator.refresh(&session.wizard);
            let classification = self.classifier.classify_region(wizard.rect).await;
            self.cancel.check()?;
            last = classification.state;
            debug!(attempt, state = %last, "Wizard page classification");

            match classification.state {
                ScreenState::SingleSubject => {
                    self.injector
                        .log_action(format!("Single subject ({} words)", classification.word_count));
                    return Ok(RecordState::AutoProceed(session));
                }
                ScreenState::MultipleSubjects => {
                    self.injector.log_action(format!(
                        "Multiple subjects ({} words)",
                        classification.word_count
                    ));
                    return Ok(RecordState::PausedForSubjectChoice(session));
                }
                ScreenState::ClassificationFailed => {
                    let reason = classification.failure.unwrap_or_default();
                    return Ok(match self.config.on_classification_failure {
                        ClassificationFailurePolicy::Proceed => {
                            warn!("Classification failed, proceeding: {}", reason);
                            self.sink.append(format!(
                                "WARNING: could not read the wizard page ({reason}); assuming a single match and continuing\n"
                            ));
                            RecordState::AutoProceed(session)
                        }
                        ClassificationFailurePolicy::Pause => {
                            warn!("Classification failed, pausing: {}", reason);
                            self.sink.append(format!(
                                "WARNING: could not read the wizard page ({reason}); pausing for confirmation\n"
                            ));
                            RecordState::PausedForSubjectChoice(session)
                        }
                    });
                }
                ScreenState::TitleMissing | ScreenState::LabelMissing => {
                    // A rejected identifier keeps the page from advancing.
                    let count = self.locator.count_process_windows(session.main.process_id);
                    if count > self.config.expected_window_count {
                        return Ok(RecordState::PausedForCorrection {
                            session,
                            observed: count,
                            then: AfterCorrection::Classify,
                        });
                    }
                    if attempt < attempts {
                        self.cancel.sleep(self.config.timing.classify_interval).await?;
                    }
                }
            }
        }

        Err(AutomationError::Timeout(format!(
            "Wizard page was not recognised after {attempts} attempts (last state: {last})"
        )))
    }

    async fn pause_for_subject_choice(
        &self,
        identifier: &str,
        session: Session,
    ) -> Result<RecordState, AutomationError> {
        self.sink.append(format!(
            "\nPAUSED: Several matches for {identifier}. Select the correct person in the wizard, then press Resume.\n(No keys or clicks are sent while paused.)\n\n"
        ));
        self.wait_for_operator(PauseReason::SubjectChoice).await?;
        self.sink.append("Resumed.\n");
        self.focus_tolerant(&session.wizard)?;
        self.cancel.sleep(self.config.timing.focus_settle).await?;
        Ok(RecordState::ValidatePostAdvance(session))
    }

    async fn validate_post_advance(&self, session: Session) -> Result<RecordState, AutomationError> {
        let timing = &self.config.timing;
        let deadline = Instant::now() + timing.validation_window;
        let mut last = 0;
        let mut max = 0;

        // The popup can take a moment to appear, so an early baseline
        // reading does not end the observation.
        while Instant::now() < deadline {
            self.cancel.check()?;
            last = self.locator.count_process_windows(session.main.process_id);
            max = max.max(last);
            if last > self.config.expected_window_count {
                return Ok(RecordState::PausedForCorrection {
                    session,
                    observed: last,
                    then: AfterCorrection::FixedKeySequence,
                });
            }
            self.cancel.sleep(timing.window_poll_interval).await?;
        }

        self.injector
            .log_action(format!("Target windows after Enter: last={last}, max={max}"));
        Ok(RecordState::FixedKeySequence(session))
    }

    async fn pause_for_correction(
        &self,
        session: Session,
        mut observed: usize,
        then: AfterCorrection,
    ) -> Result<RecordState, AutomationError> {
        let expected = self.config.expected_window_count;

        loop {
            self.sink.append(format!(
                "\nPAUSED: Pop-up detected ({observed} windows, expected {expected}). Fix the entry in the application, then press Resume.\n(No keys or clicks are sent while paused.)\n\n"
            ));
            self.wait_for_operator(PauseReason::Correction).await?;

            observed = self.wait_for_baseline(session.main.process_id).await?;
            if observed == expected {
                self.sink.append("Resumed.\n");
                if let Err(e) = self.injector.focus(&session.wizard) {
                    if e.is_abort() {
                        return Err(e);
                    }
                    debug!("Wizard focus failed, falling back to main: {}", e);
                    self.focus_tolerant(&session.main)?;
                }
                self.cancel.sleep(self.config.timing.focus_settle).await?;
                break;
            }
            self.sink.append(format!(
                "Pop-up still open ({observed} windows). Pausing again.\n"
            ));
        }

        Ok(match then {
            AfterCorrection::Classify => RecordState::ClassifyScreen(session),
            AfterCorrection::FixedKeySequence => RecordState::FixedKeySequence(session),
        })
    }

    async fn fixed_key_sequence(&self, session: Session) -> Result<RecordState, AutomationError> {
        for step in FIXED_KEY_SEQUENCE {
            match step {
                KeyStep::Log(label) => self.sink.append(format!("{label}\n")),
                KeyStep::Press(key) => {
                    self.injector.press_key(*key)?;
                    self.cancel.sleep(self.config.key_delay).await?;
                }
                KeyStep::Settle => {
                    let multiplier = self.config.timing.final_wait_multiplier;
                    self.sink
                        .append(format!("Waiting (key_delay x {multiplier})\n"));
                    let settle = self.config.key_delay.checked_mul(multiplier).ok_or_else(|| {
                        AutomationError::InvalidArgument(format!(
                            "key_delay x {multiplier} does not fit in a duration"
                        ))
                    })?;
                    self.cancel.sleep(settle).await?;
                }
            }
        }
        debug!(wizard = %session.wizard.handle, "Wizard sequence sent");
        Ok(RecordState::Complete)
    }

    /// Hand control to the operator and block until resumed or aborted
    async fn wait_for_operator(&self, reason: PauseReason) -> Result<(), AutomationError> {
        self.coordinator.request_pause(reason)?;
        let resumed = self.coordinator.await_resume(&self.cancel).await;
        self.coordinator.clear();
        resumed
    }

    /// Poll the owner's window count until it is back at baseline or
    /// `recovery_timeout` elapses. Returns the last count seen.
    async fn wait_for_baseline(&self, process_id: u32) -> Result<usize, AutomationError> {
        let timing = &self.config.timing;
        let expected = self.config.expected_window_count;
        let deadline = Instant::now() + timing.recovery_timeout;
        loop {
            self.cancel.check()?;
            let count = self.locator.count_process_windows(process_id);
            if count == expected || Instant::now() >= deadline {
                return Ok(count);
            }
            self.cancel.sleep(timing.window_poll_interval).await?;
        }
    }

    /// Focus failures are tolerated here; only an abort propagates
    fn focus_tolerant(&self, window: &WindowReference) -> Result<(), AutomationError> {
        match self.injector.focus(window) {
            Err(e) if e.is_abort() => Err(e),
            Err(e) => {
                debug!("Focus on '{}' failed: {}", window.title, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
