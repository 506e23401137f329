//! Anchor-relative classification of the wizard's subject-selection page.
//!
//! The target application exposes no queryable state, so the page is read
//! back from pixels: the title locates the page, a column label anchors a
//! small search window, and the number of words inside that window tells a
//! single search result apart from several.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::ClassifierConfig;
use crate::errors::AutomationError;
use crate::platforms::ScreenReader;
use crate::types::{Point, WindowRect};

/// Axis-aligned box in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }
}

/// One recognised text span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub text: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            text: text.into(),
            confidence,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Captured pixels plus the screen position of their top-left corner
#[derive(Debug, Clone)]
pub struct PixelGrid {
    origin: Point,
    image: RgbaImage,
}

impl PixelGrid {
    pub fn new(origin: Point, image: RgbaImage) -> Self {
        Self { origin, image }
    }

    pub fn blank(region: WindowRect) -> Self {
        Self::new(
            Point {
                x: region.left,
                y: region.top,
            },
            RgbaImage::new(region.width.max(1) as u32, region.height.max(1) as u32),
        )
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenState {
    TitleMissing,
    LabelMissing,
    SingleSubject,
    MultipleSubjects,
    ClassificationFailed,
}

impl ScreenState {
    /// The page has not finished rendering (or is not the expected page yet)
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ScreenState::TitleMissing | ScreenState::LabelMissing)
    }
}

impl fmt::Display for ScreenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScreenState::TitleMissing => "title-missing",
            ScreenState::LabelMissing => "label-missing",
            ScreenState::SingleSubject => "single-subject",
            ScreenState::MultipleSubjects => "multiple-subjects",
            ScreenState::ClassificationFailed => "classification-failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: ScreenState,
    /// Title, label and in-window boxes that justified the state, in that order
    pub evidence: Vec<BoundingBox>,
    /// Search window used for the word count
    pub region: Option<BoundingBox>,
    pub word_count: usize,
    /// Error text when capture or detection failed
    pub failure: Option<String>,
}

impl Classification {
    fn with_state(state: ScreenState, evidence: Vec<BoundingBox>) -> Self {
        Self {
            state,
            evidence,
            region: None,
            word_count: 0,
            failure: None,
        }
    }

    pub fn failed(error: &AutomationError) -> Self {
        Self {
            failure: Some(error.to_string()),
            ..Self::with_state(ScreenState::ClassificationFailed, Vec::new())
        }
    }
}

/// Captures the wizard and classifies its current page
#[derive(Clone)]
pub struct ScreenClassifier {
    screen: Arc<dyn ScreenReader>,
    config: ClassifierConfig,
}

impl ScreenClassifier {
    pub fn new(screen: Arc<dyn ScreenReader>, config: ClassifierConfig) -> Self {
        Self { screen, config }
    }

    pub async fn capture_region(&self, region: WindowRect) -> Result<PixelGrid, AutomationError> {
        self.screen.capture_region(region).await
    }

    pub async fn detect_text(&self, grid: &PixelGrid) -> Result<Vec<Detection>, AutomationError> {
        self.screen.detect_text(grid).await
    }

    pub fn classify(&self, detections: &[Detection]) -> Classification {
        classify_detections(&self.config, detections)
    }

    /// Capture, detect and classify. Any capture or detection error becomes
    /// `ClassificationFailed` rather than propagating.
    #[instrument(level = "debug", skip(self))]
    pub async fn classify_region(&self, region: WindowRect) -> Classification {
        let detections = match self.capture_region(region).await {
            Ok(grid) => self.detect_text(&grid).await,
            Err(e) => Err(e),
        };
        match detections {
            Ok(detections) => {
                let classification = self.classify(&detections);
                debug!(
                    state = %classification.state,
                    words = classification.word_count,
                    detections = detections.len(),
                    "Classified wizard page"
                );
                classification
            }
            Err(e) => {
                let error = AutomationError::ClassificationFailure(e.to_string());
                warn!("{}", error);
                Classification::failed(&error)
            }
        }
    }
}

/// Classify a fixed set of detections. Deterministic for a given input.
pub fn classify_detections(config: &ClassifierConfig, detections: &[Detection]) -> Classification {
    // 1. Topmost detection carrying a title phrase.
    let title = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| {
            config
                .title_keywords
                .iter()
                .any(|keyword| phrase_matches(&d.text, keyword))
        })
        .min_by_key(|(_, d)| (d.bbox.y_min, d.bbox.x_min));
    let Some((title_index, title)) = title else {
        return Classification::with_state(ScreenState::TitleMissing, Vec::new());
    };

    // 2. First label strictly below the title, primary label preferred.
    let mut below: Vec<(usize, &Detection)> = detections
        .iter()
        .enumerate()
        .filter(|(i, d)| *i != title_index && d.bbox.y_min > title.bbox.y_max)
        .collect();
    below.sort_by_key(|(_, d)| (d.bbox.y_min, d.bbox.x_min));

    let label = below
        .iter()
        .find(|(_, d)| phrase_matches(&d.text, &config.primary_label))
        .or_else(|| {
            below
                .iter()
                .find(|(_, d)| phrase_matches(&d.text, &config.fallback_label))
        });
    let Some(&(label_index, label)) = label else {
        return Classification::with_state(ScreenState::LabelMissing, vec![title.bbox]);
    };

    // 3 + 4. Crop columns left of the label, then restrict to the window
    // hanging below the label's lower edge.
    let top = label.bbox.y_max - config.vertical_tolerance;
    let region = BoundingBox::new(
        label.bbox.x_min,
        top,
        label.bbox.x_min + config.window_width,
        top + config.window_height,
    );
    let in_window: Vec<&Detection> = detections
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != title_index && *i != label_index)
        .map(|(_, d)| d)
        .filter(|d| d.bbox.x_min >= label.bbox.x_min)
        .filter(|d| {
            d.bbox.y_min >= region.y_min
                && d.bbox.y_min <= region.y_max
                && d.bbox.x_min <= region.x_max
        })
        .collect();

    // 5. Up to `max_single_words` words is one result row.
    let word_count: usize = in_window.iter().map(|d| d.word_count()).sum();
    let state = if word_count <= config.max_single_words {
        ScreenState::SingleSubject
    } else {
        ScreenState::MultipleSubjects
    };

    let mut evidence = vec![title.bbox, label.bbox];
    evidence.extend(in_window.iter().map(|d| d.bbox));
    Classification {
        state,
        evidence,
        region: Some(region),
        word_count,
        failure: None,
    }
}

fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn word_close(seen: &str, expected: &str) -> bool {
    seen == expected || (expected.chars().count() >= 4 && edit_distance(seen, expected) <= 1)
}

/// Tolerant phrase match against OCR output.
///
/// Matches when consecutive words of `text` equal the phrase word by word,
/// allowing one edit per word of four or more letters, or when a multi-word
/// phrase appears with its spaces dropped.
pub fn phrase_matches(text: &str, phrase: &str) -> bool {
    let words = normalize(text);
    let target = normalize(phrase);
    if target.is_empty() || words.is_empty() {
        return false;
    }
    if target.len() > 1 && words.concat().contains(&target.concat()) {
        return true;
    }
    words.windows(target.len()).any(|window| {
        window
            .iter()
            .zip(target.iter())
            .all(|(seen, expected)| word_close(seen, expected))
    })
}
