use std::sync::Arc;
use std::time::Duration;

use super::mock_platform::{
    multiple_subjects_page, single_subject_page, InputEvent, MockDesktop, MockWindow,
};
use super::{init_tracing, wait_until, RecordingSink};
use crate::cancellation::CancellationContext;
use crate::config::{ClassificationFailurePolicy, Configuration};
use crate::coordinator::{PauseCoordinator, PauseReason, PauseStatus};
use crate::engine::{run_workflow, RunOutcome, RunRequest, RunStatus};
use crate::types::{Key, Point};

struct Harness {
    desktop: Arc<MockDesktop>,
    cancel: CancellationContext,
    coordinator: Arc<PauseCoordinator>,
    log: RecordingSink,
}

impl Harness {
    fn new() -> Self {
        init_tracing();
        Self {
            desktop: MockDesktop::new(),
            cancel: CancellationContext::new(),
            coordinator: Arc::new(PauseCoordinator::new()),
            log: RecordingSink::default(),
        }
    }

    fn spawn(&self, ids: &[&str], config: Configuration) -> tokio::task::JoinHandle<RunOutcome> {
        let platform = self.desktop.platform();
        let request = RunRequest::new(ids.iter().copied(), config);
        let cancel = self.cancel.clone();
        let coordinator = self.coordinator.clone();
        let sink = self.log.sink();
        tokio::spawn(async move { run_workflow(&platform, request, cancel, coordinator, sink).await })
    }

    async fn run(&self, ids: &[&str], config: Configuration) -> RunOutcome {
        self.spawn(ids, config).await.unwrap()
    }

    async fn wait_for_pause(&self, reason: PauseReason, count: usize) {
        let coordinator = self.coordinator.clone();
        wait_until(move || {
            coordinator.pause_count() == count
                && coordinator.status() == PauseStatus::Paused(reason)
        })
        .await;
    }
}

/// Keys the wizard receives after the identifier is typed
const WIZARD_KEYS: [Key; 13] = [
    Key::Enter,
    Key::Enter,
    Key::Tab,
    Key::Enter,
    Key::Enter,
    Key::Tab,
    Key::Tab,
    Key::Tab,
    Key::Tab,
    Key::Enter,
    Key::Enter,
    Key::Enter,
    Key::Enter,
];

#[test]
fn test_run_request_trims_and_drops_blank_lines() {
    let request = RunRequest::from_lines("  alice1 \n\n\t\nbob22\r\n   \ncarol3", Configuration::default());
    assert_eq!(request.identifiers, vec!["alice1", "bob22", "carol3"]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_list_touches_nothing() {
    let h = Harness::new();
    let outcome = h.run(&["", "   "], Configuration::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 0);
    let events = h.log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].text(), "No identifiers provided.\n");
    assert_eq!(h.desktop.operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_two_records_complete() {
    let h = Harness::new();
    let outcome = h.run(&["alice1", "bob22"], Configuration::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 2);
    assert_eq!(h.coordinator.pause_count(), 0);

    let output = h.log.output();
    assert!(output.contains("Connected: Area Access Manager"));
    assert!(output.contains("Processing alice1"));
    assert!(output.contains("Wizard window found at (300, 200)"));
    assert!(output.contains("Completed bob22"));
    assert!(output.contains("All users processed."));
    assert!(output.contains("Total users processed: 2"));
    let seconds = output
        .lines()
        .find_map(|line| line.strip_prefix("Total processing time: "))
        .and_then(|rest| rest.strip_suffix(" seconds"))
        .unwrap();
    assert_eq!(seconds.split_once('.').unwrap().1.len(), 1);
    assert!(output.contains("[ACTION 01]"));
    let typed: Vec<_> = h
        .desktop
        .events()
        .into_iter()
        .filter_map(|e| match e {
            InputEvent::Text(text) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(typed, vec!["alice1", "bob22"]);
}

#[tokio::test(start_paused = true)]
async fn test_record_input_sequence() {
    let h = Harness::new();
    let mut config = Configuration::default();
    config.debug_actions = false;
    let outcome = h.run(&["alice1"], config).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!h.log.contains("[ACTION"));

    let events = h.desktop.events();
    let clicks: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            InputEvent::Click(point) => Some(*point),
            _ => None,
        })
        .collect();
    // Offsets are relative to the main window at (100, 50).
    assert_eq!(
        clicks,
        vec![
            Point { x: 565, y: 109 },
            Point { x: 750, y: 350 },
            Point { x: 1180, y: 494 },
        ]
    );

    let typed_at = events
        .iter()
        .position(|e| *e == InputEvent::Text("alice1".to_string()))
        .unwrap();
    let keys_after: Vec<_> = events[typed_at..]
        .iter()
        .filter_map(|e| match e {
            InputEvent::Key(key) => Some(*key),
            _ => None,
        })
        .collect();
    assert_eq!(keys_after, WIZARD_KEYS.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_multiple_subjects_pauses_once() {
    let h = Harness::new();
    h.desktop
        .with(|s| s.pages.insert("bob22".to_string(), multiple_subjects_page()));
    let run = h.spawn(&["alice1", "bob22"], Configuration::default());

    h.wait_for_pause(PauseReason::SubjectChoice, 1).await;
    assert!(h.log.contains("PAUSED: Several matches for bob22"));
    let frozen = h.desktop.events().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.desktop.events().len(), frozen);

    assert!(h.coordinator.resume());
    let outcome = run.await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 2);
    assert_eq!(h.coordinator.pause_count(), 1);

    // Enter is not re-sent after the operator picks a subject.
    let events = h.desktop.events();
    let typed_at = events
        .iter()
        .position(|e| *e == InputEvent::Text("bob22".to_string()))
        .unwrap();
    let keys_after = events[typed_at..]
        .iter()
        .filter(|e| matches!(e, InputEvent::Key(_)))
        .count();
    assert_eq!(keys_after, WIZARD_KEYS.len());
}

#[tokio::test(start_paused = true)]
async fn test_popup_pauses_until_window_count_recovers() {
    let h = Harness::new();
    h.desktop
        .with(|s| s.popup_for.insert("alice1".to_string()));
    let run = h.spawn(&["alice1", "bob22"], Configuration::default());

    h.wait_for_pause(PauseReason::Correction, 1).await;
    assert!(h.log.contains("Pop-up detected (3 windows"));
    let frozen = h.desktop.events().len();

    // Resuming while the popup is still open pauses again.
    assert!(h.coordinator.resume());
    h.wait_for_pause(PauseReason::Correction, 2).await;
    assert!(h.log.contains("Pop-up still open (3 windows)"));
    assert_eq!(h.desktop.events().len(), frozen);
    assert!(!h.log.contains("Completed alice1"));

    h.desktop.dismiss_popup();
    assert!(h.coordinator.resume());
    let outcome = run.await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 2);
    assert_eq!(h.coordinator.pause_count(), 2);
    assert!(h.log.contains("All users processed."));
}

#[tokio::test(start_paused = true)]
async fn test_popup_before_page_is_readable_pauses_then_reclassifies() {
    let h = Harness::new();
    h.desktop.with(|s| {
        s.default_page.clear();
        s.popup_for.insert("alice1".to_string());
    });
    let run = h.spawn(&["alice1"], Configuration::default());

    h.wait_for_pause(PauseReason::Correction, 1).await;
    assert!(h.log.contains("Pop-up detected (3 windows, expected 2)"));
    let frozen = h.desktop.events().len();

    h.desktop.dismiss_popup();
    h.desktop.with(|s| s.default_page = single_subject_page());
    assert!(h.coordinator.resume());
    let outcome = run.await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 1);
    assert_eq!(h.coordinator.pause_count(), 1);
    assert!(h.log.contains("Single subject"));
    let keys_after: Vec<_> = h.desktop.events()[frozen..]
        .iter()
        .filter_map(|e| match e {
            InputEvent::Key(key) => Some(*key),
            _ => None,
        })
        .collect();
    // Advance already pressed Enter before the pause.
    assert_eq!(keys_after, WIZARD_KEYS[1..].to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_refused_focus_does_not_stop_the_run() {
    let h = Harness::new();
    h.desktop.with(|s| s.refuse_focus = true);
    let outcome = h.run(&["alice1", "bob22"], Configuration::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.processed, 2);
    assert!(!h
        .desktop
        .events()
        .iter()
        .any(|e| matches!(e, InputEvent::Focus(_))));
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_between_records_delay() {
    let h = Harness::new();
    let mut config = Configuration::default();
    config.between_records_delay = Duration::from_secs(5);
    let run = h.spawn(&["alice1", "bob22"], config);

    let log = h.log.clone();
    wait_until(move || log.contains("Completed alice1")).await;
    let cancelled_at = tokio::time::Instant::now();
    h.cancel.cancel();
    let outcome = run.await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_millis(50));
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.processed, 1);
    assert!(h.log.contains("Stopped."));
    assert!(!h
        .desktop
        .events()
        .contains(&InputEvent::Text("bob22".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_paused() {
    let h = Harness::new();
    h.desktop
        .with(|s| s.pages.insert("alice1".to_string(), multiple_subjects_page()));
    let run = h.spawn(&["alice1"], Configuration::default());

    h.wait_for_pause(PauseReason::SubjectChoice, 1).await;
    let frozen = h.desktop.events().len();
    h.cancel.cancel();
    let outcome = run.await.unwrap();

    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(outcome.processed, 0);
    assert_eq!(h.desktop.events().len(), frozen);
    assert!(!h.coordinator.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_missing_wizard_fails_the_run() {
    let h = Harness::new();
    h.desktop.with(|s| s.windows = vec![MockWindow::main()]);
    let outcome = h.run(&["alice1"], Configuration::default()).await;

    match outcome.status {
        RunStatus::Failed(message) => assert!(message.contains("Wizard window did not appear")),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(h.log.contains("Error: "));
    assert!(h.log.contains("Users processed before error: 0"));
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_page_times_out() {
    let h = Harness::new();
    h.desktop.with(|s| s.default_page.clear());
    let outcome = h.run(&["alice1"], Configuration::default()).await;

    match outcome.status {
        RunStatus::Failed(message) => assert!(message.contains("title-missing")),
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_classification_failure_proceeds_by_default() {
    let h = Harness::new();
    h.desktop.with(|s| s.fail_detection = true);
    let outcome = h.run(&["alice1"], Configuration::default()).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(h.coordinator.pause_count(), 0);
    assert!(h.log.contains("assuming a single match"));
}

#[tokio::test(start_paused = true)]
async fn test_classification_failure_can_pause() {
    let h = Harness::new();
    h.desktop.with(|s| s.fail_detection = true);
    let mut config = Configuration::default();
    config.on_classification_failure = ClassificationFailurePolicy::Pause;
    let run = h.spawn(&["alice1"], config);

    h.wait_for_pause(PauseReason::SubjectChoice, 1).await;
    h.coordinator.resume();
    let outcome = run.await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_configuration_fails_before_any_input() {
    let h = Harness::new();
    let mut config = Configuration::default();
    config.main_window_title = "(unclosed".to_string();
    let outcome = h.run(&["alice1"], config).await;

    assert!(matches!(outcome.status, RunStatus::Failed(_)));
    assert_eq!(h.desktop.operations(), 0);
}
