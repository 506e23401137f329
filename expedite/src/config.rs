//! Run configuration and the persisted settings document

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::AutomationError;
use crate::types::{Offset, TitlePattern};

const SETTINGS_DIR: &str = "ExpeditedAccess";
const SETTINGS_FILE: &str = "settings.json";

/// Durations are stored in the settings document as (fractional) seconds
mod duration_secs {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {secs}"
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Longest wait any single setting may ask for
pub const MAX_SETTING_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound for `final_wait_multiplier`
pub const MAX_FINAL_WAIT_MULTIPLIER: u32 = 1000;

/// What the engine does when capture or text detection raises an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationFailurePolicy {
    /// Fail-open: continue as if a single subject matched
    #[default]
    Proceed,
    /// Hand control to the operator as for an ambiguous result
    Pause,
}

/// Constants of the anchor-relative screen classifier.
///
/// The distances were tuned against one observed layout of the target
/// application and are expected to need recalibration on others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Phrases identifying the subject-selection page title
    pub title_keywords: Vec<String>,
    /// Column header the result rows hang below
    pub primary_label: String,
    /// Used when the primary label is not recognised
    pub fallback_label: String,
    /// Height of the search window below the label, in screen units
    pub window_height: i32,
    /// Width of the search window starting at the label's left edge
    pub window_width: i32,
    /// OCR boxes sit slightly low; the window top is raised by this much
    pub vertical_tolerance: i32,
    /// Word count up to which the window holds a single result row
    pub max_single_words: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            title_keywords: vec![
                "Select Cardholder".to_string(),
                "Cardholder Search".to_string(),
            ],
            primary_label: "Cardholder Name".to_string(),
            fallback_label: "Name".to_string(),
            window_height: 40,
            window_width: 420,
            vertical_tolerance: 4,
            max_single_words: 2,
        }
    }
}

/// Fixed waits and attempt budgets of the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Pause after focusing a window before clicking into it
    #[serde(with = "duration_secs")]
    pub focus_settle: Duration,
    /// How long to wait for exactly one main window
    #[serde(with = "duration_secs")]
    pub resolve_timeout: Duration,
    pub wizard_attempts: u32,
    #[serde(with = "duration_secs")]
    pub wizard_interval: Duration,
    /// Observation window for the validation popup after advancing
    #[serde(with = "duration_secs")]
    pub validation_window: Duration,
    /// How long to wait for the popup to close after the operator resumes
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub window_poll_interval: Duration,
    pub classify_attempts: u32,
    #[serde(with = "duration_secs")]
    pub classify_interval: Duration,
    /// The last wizard page needs `key_delay * final_wait_multiplier` to settle
    pub final_wait_multiplier: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            focus_settle: Duration::from_millis(200),
            resolve_timeout: Duration::from_secs(15),
            wizard_attempts: 15,
            wizard_interval: Duration::from_secs(1),
            validation_window: Duration::from_millis(1500),
            recovery_timeout: Duration::from_secs(15),
            window_poll_interval: Duration::from_millis(50),
            classify_attempts: 20,
            classify_interval: Duration::from_millis(500),
            final_wait_multiplier: 10,
        }
    }
}

/// Immutable configuration snapshot captured when a run starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    #[serde(with = "duration_secs")]
    pub click_delay: Duration,
    #[serde(with = "duration_secs")]
    pub key_delay: Duration,
    #[serde(with = "duration_secs", alias = "between_users_delay")]
    pub between_records_delay: Duration,

    #[serde(alias = "assign_access_offset")]
    pub primary_action_offset: Offset,
    #[serde(alias = "tab_2_click_rel")]
    pub secondary_tab_offset: Offset,
    #[serde(alias = "netid_field_click_rel")]
    pub field_offset: Offset,

    pub debug_actions: bool,

    pub main_window_title: String,
    pub wizard_window_title: String,
    /// Visible top-level windows of the target process on an undisturbed wizard page
    pub expected_window_count: usize,
    pub on_classification_failure: ClassificationFailurePolicy,
    pub timing: Timing,
    pub classifier: ClassifierConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            click_delay: Duration::from_millis(50),
            key_delay: Duration::from_millis(50),
            between_records_delay: Duration::from_millis(50),
            primary_action_offset: Offset::new(465, 59),
            secondary_tab_offset: Offset::new(650, 300),
            field_offset: Offset::new(1080, 444),
            debug_actions: true,
            main_window_title: "Area Access Manager".to_string(),
            wizard_window_title: ".*Assignment Wizard.*".to_string(),
            expected_window_count: 2,
            on_classification_failure: ClassificationFailurePolicy::default(),
            timing: Timing::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<(), AutomationError> {
        for (name, offset) in [
            ("primary_action_offset", self.primary_action_offset),
            ("secondary_tab_offset", self.secondary_tab_offset),
            ("field_offset", self.field_offset),
        ] {
            if !offset.is_positive() {
                return Err(AutomationError::InvalidArgument(format!(
                    "{name} must be positive integers, got {offset}"
                )));
            }
        }
        self.main_title_pattern()?;
        self.wizard_title_pattern()?;
        if self.expected_window_count == 0 {
            return Err(AutomationError::InvalidArgument(
                "expected_window_count must be at least 1".to_string(),
            ));
        }
        if self.timing.wizard_attempts == 0 || self.timing.classify_attempts == 0 {
            return Err(AutomationError::InvalidArgument(
                "attempt budgets must be at least 1".to_string(),
            ));
        }
        self.check_durations()?;
        if self.timing.final_wait_multiplier > MAX_FINAL_WAIT_MULTIPLIER {
            return Err(AutomationError::InvalidArgument(format!(
                "final_wait_multiplier must be at most {MAX_FINAL_WAIT_MULTIPLIER}"
            )));
        }
        if self.timing.window_poll_interval.is_zero() {
            return Err(AutomationError::InvalidArgument(
                "window_poll_interval must be greater than zero".to_string(),
            ));
        }
        let classifier = &self.classifier;
        if classifier.title_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(AutomationError::InvalidArgument(
                "classifier.title_keywords must name at least one phrase".to_string(),
            ));
        }
        if classifier.window_height <= 0 || classifier.window_width <= 0 {
            return Err(AutomationError::InvalidArgument(
                "classifier search window must have a positive size".to_string(),
            ));
        }
        Ok(())
    }

    fn check_durations(&self) -> Result<(), AutomationError> {
        let timing = &self.timing;
        for (name, duration) in [
            ("click_delay", self.click_delay),
            ("key_delay", self.key_delay),
            ("between_records_delay", self.between_records_delay),
            ("timing.focus_settle", timing.focus_settle),
            ("timing.resolve_timeout", timing.resolve_timeout),
            ("timing.wizard_interval", timing.wizard_interval),
            ("timing.validation_window", timing.validation_window),
            ("timing.recovery_timeout", timing.recovery_timeout),
            ("timing.window_poll_interval", timing.window_poll_interval),
            ("timing.classify_interval", timing.classify_interval),
        ] {
            if duration > MAX_SETTING_DURATION {
                return Err(AutomationError::InvalidArgument(format!(
                    "{name} must be at most {} seconds, got {}",
                    MAX_SETTING_DURATION.as_secs(),
                    duration.as_secs_f64()
                )));
            }
        }
        Ok(())
    }

    pub fn main_title_pattern(&self) -> Result<TitlePattern, AutomationError> {
        TitlePattern::new(&self.main_window_title)
    }

    pub fn wizard_title_pattern(&self) -> Result<TitlePattern, AutomationError> {
        TitlePattern::new(&self.wizard_window_title)
    }
}

/// Host-side preferences stored next to the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiPreferences {
    pub show_setup_reminder: bool,
}

impl Default for UiPreferences {
    fn default() -> Self {
        Self {
            show_setup_reminder: true,
        }
    }
}

/// The whole settings document: configuration fields at top level plus `ui`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(flatten)]
    pub config: Configuration,
    pub ui: UiPreferences,
}

/// Reads and writes the settings document at a fixed path
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config directory (`%APPDATA%` on Windows),
    /// falling back to the home directory
    pub fn default_location() -> Self {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(SETTINGS_DIR).join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. A missing, unreadable or malformed document yields
    /// defaults so a broken file never prevents launching.
    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No settings file at {}, using defaults", self.path.display());
                Settings::default()
            }
            Err(e) => {
                debug!(
                    "Ignoring settings file {}: {}",
                    self.path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<Settings>, AutomationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.config.validate()?;
        Ok(Some(settings))
    }

    /// Write the settings, keeping keys of the existing document that this
    /// version does not know about.
    pub fn save(&self, settings: &Settings) -> Result<(), AutomationError> {
        settings.config.validate()?;
        let mut document = self.existing_document();
        let Value::Object(update) = serde_json::to_value(settings)? else {
            return Err(AutomationError::Internal(
                "settings did not serialize to an object".to_string(),
            ));
        };
        merge_objects(&mut document, update);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&Value::Object(document))?;
        fs::write(&self.path, text)?;
        info!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn save_config(&self, config: &Configuration) -> Result<(), AutomationError> {
        let mut settings = self.load();
        settings.config = config.clone();
        self.save(&settings)
    }

    pub fn save_ui(&self, ui: &UiPreferences) -> Result<(), AutomationError> {
        let mut settings = self.load();
        settings.ui = ui.clone();
        self.save(&settings)
    }

    fn existing_document(&self) -> Map<String, Value> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default()
    }
}

fn merge_objects(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_objects(existing, nested)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}
