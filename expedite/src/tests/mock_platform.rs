//! Scripted in-memory platform for driving the core without a desktop

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::classifier::{BoundingBox, Detection, PixelGrid};
use crate::errors::AutomationError;
use crate::platforms::{InputDevice, Platform, ScreenReader, WindowSystem};
use crate::types::{Key, Point, WindowHandle, WindowRect};

pub const TARGET_PID: u32 = 4242;
pub const MAIN: WindowHandle = WindowHandle(0x100);
pub const WIZARD: WindowHandle = WindowHandle(0x200);
pub const POPUP: WindowHandle = WindowHandle(0x300);

pub const MAIN_RECT: WindowRect = WindowRect {
    left: 100,
    top: 50,
    width: 1280,
    height: 800,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MockWindow {
    pub handle: WindowHandle,
    pub title: String,
    pub process_id: u32,
    pub rect: WindowRect,
    pub visible: bool,
}

impl MockWindow {
    pub fn new(handle: WindowHandle, title: &str, rect: WindowRect) -> Self {
        Self {
            handle,
            title: title.to_string(),
            process_id: TARGET_PID,
            rect,
            visible: true,
        }
    }

    pub fn main() -> Self {
        Self::new(MAIN, "Area Access Manager", MAIN_RECT)
    }

    pub fn wizard() -> Self {
        Self::new(
            WIZARD,
            "Cardholder Assignment Wizard",
            WindowRect {
                left: 300,
                top: 200,
                width: 700,
                height: 500,
            },
        )
    }

    pub fn popup() -> Self {
        Self::new(
            POPUP,
            "Invalid Entry",
            WindowRect {
                left: 500,
                top: 400,
                width: 300,
                height: 120,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Click(Point),
    Key(Key),
    Text(String),
    Focus(WindowHandle),
}

#[derive(Default)]
pub struct MockState {
    pub windows: Vec<MockWindow>,
    /// Consumed one per enumeration before falling back to `windows`
    pub enumeration_script: VecDeque<Vec<MockWindow>>,
    pub enumerations: usize,
    /// Every capability call, reads included
    pub operations: usize,
    pub events: Vec<InputEvent>,
    pub cursor_script: VecDeque<Point>,
    pub cursor: Option<Point>,
    /// Wizard page shown after typing a given identifier
    pub pages: HashMap<String, Vec<Detection>>,
    pub default_page: Vec<Detection>,
    /// Identifiers the application rejects with a popup on advance
    pub popup_for: HashSet<String>,
    pub fail_detection: bool,
    /// Every focus request is refused, as under the foreground lock
    pub refuse_focus: bool,
    popup_shown: HashSet<String>,
    last_typed: Option<String>,
}

impl MockState {
    fn current_windows(&mut self) -> Vec<MockWindow> {
        self.enumerations += 1;
        match self.enumeration_script.pop_front() {
            Some(scripted) => {
                self.windows = scripted.clone();
                scripted
            }
            None => self.windows.clone(),
        }
    }

    fn window(&self, handle: WindowHandle) -> Result<&MockWindow, AutomationError> {
        self.windows
            .iter()
            .find(|w| w.handle == handle)
            .ok_or_else(|| AutomationError::PlatformError(format!("no window {handle}")))
    }
}

pub struct MockDesktop {
    state: Mutex<MockState>,
}

impl MockDesktop {
    /// Main window and wizard open, every page showing a single subject
    pub fn new() -> Arc<Self> {
        let state = MockState {
            windows: vec![MockWindow::main(), MockWindow::wizard()],
            default_page: single_subject_page(),
            ..MockState::default()
        };
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform::from_backend(self.clone())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.with(|s| s.events.clone())
    }

    pub fn operations(&self) -> usize {
        self.with(|s| s.operations)
    }

    pub fn dismiss_popup(&self) {
        self.with(|s| s.windows.retain(|w| w.handle != POPUP));
    }

    pub fn keys(&self) -> Vec<Key> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InputEvent::Key(key) => Some(key),
                _ => None,
            })
            .collect()
    }
}

impl WindowSystem for MockDesktop {
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            Ok(s.current_windows().iter().map(|w| w.handle).collect())
        })
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        self.with(|s| {
            s.operations += 1;
            s.window(handle).map(|w| w.visible).unwrap_or(false)
        })
    }

    fn window_title(&self, handle: WindowHandle) -> Result<String, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.window(handle).map(|w| w.title.clone())
        })
    }

    fn owner_process_id(&self, handle: WindowHandle) -> Result<u32, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.window(handle).map(|w| w.process_id)
        })
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.window(handle).map(|w| w.rect)
        })
    }

    fn cursor_position(&self) -> Result<Point, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            if let Some(next) = s.cursor_script.pop_front() {
                s.cursor = Some(next);
            }
            s.cursor
                .ok_or_else(|| AutomationError::PlatformError("no cursor".to_string()))
        })
    }
}

impl InputDevice for MockDesktop {
    fn click_at(&self, point: Point) -> Result<(), AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.events.push(InputEvent::Click(point));
        });
        Ok(())
    }

    fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.events.push(InputEvent::Key(key));
            if key == Key::Enter {
                if let Some(id) = s.last_typed.clone() {
                    if s.popup_for.contains(&id) && s.popup_shown.insert(id) {
                        s.windows.push(MockWindow::popup());
                    }
                }
            }
        });
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.events.push(InputEvent::Text(text.to_string()));
            s.last_typed = Some(text.to_string());
        });
        Ok(())
    }

    fn focus_window(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        self.with(|s| {
            s.operations += 1;
            s.window(handle)?;
            if s.refuse_focus {
                return Err(AutomationError::PlatformError(format!(
                    "SetForegroundWindow refused window {handle}"
                )));
            }
            s.events.push(InputEvent::Focus(handle));
            Ok(())
        })
    }
}

#[async_trait::async_trait]
impl ScreenReader for MockDesktop {
    async fn capture_region(&self, region: WindowRect) -> Result<PixelGrid, AutomationError> {
        self.with(|s| s.operations += 1);
        Ok(PixelGrid::blank(region))
    }

    async fn detect_text(&self, _grid: &PixelGrid) -> Result<Vec<Detection>, AutomationError> {
        self.with(|s| {
            s.operations += 1;
            if s.fail_detection {
                return Err(AutomationError::PlatformError("OCR engine unavailable".to_string()));
            }
            Ok(s.last_typed
                .as_ref()
                .and_then(|id| s.pages.get(id))
                .unwrap_or(&s.default_page)
                .clone())
        })
    }
}

pub fn detection(text: &str, x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Detection {
    Detection::new(BoundingBox::new(x_min, y_min, x_max, y_max), text, 0.95)
}

pub fn single_subject_page() -> Vec<Detection> {
    vec![
        detection("Select Cardholder", 320, 210, 520, 230),
        detection("Cardholder Name", 340, 280, 480, 296),
        detection("Alice Smith", 340, 300, 450, 314),
    ]
}

pub fn multiple_subjects_page() -> Vec<Detection> {
    vec![
        detection("Select Cardholder", 320, 210, 520, 230),
        detection("Cardholder Name", 340, 280, 480, 296),
        detection("Bob Jones", 340, 300, 440, 314),
        detection("Bob Smith", 340, 318, 440, 332),
    ]
}
