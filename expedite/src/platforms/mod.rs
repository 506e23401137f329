use crate::classifier::{Detection, PixelGrid};
use crate::errors::AutomationError;
use crate::types::{Key, Point, WindowHandle, WindowRect};
use std::sync::Arc;

/// Windowing capabilities the core needs from the operating system
pub trait WindowSystem: Send + Sync {
    /// Handles of all top-level windows, in z-order
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, AutomationError>;

    fn is_visible(&self, handle: WindowHandle) -> bool;

    fn window_title(&self, handle: WindowHandle) -> Result<String, AutomationError>;

    fn owner_process_id(&self, handle: WindowHandle) -> Result<u32, AutomationError>;

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, AutomationError>;

    fn cursor_position(&self) -> Result<Point, AutomationError>;
}

/// Synthetic input delivered to the OS input queue
pub trait InputDevice: Send + Sync {
    /// Move the pointer to an absolute screen position and left-click
    fn click_at(&self, point: Point) -> Result<(), AutomationError>;

    fn press_key(&self, key: Key) -> Result<(), AutomationError>;

    fn type_text(&self, text: &str) -> Result<(), AutomationError>;

    /// Bring a window to the foreground so keystrokes reach it
    fn focus_window(&self, handle: WindowHandle) -> Result<(), AutomationError>;
}

/// Pixel capture and text detection
#[async_trait::async_trait]
pub trait ScreenReader: Send + Sync {
    /// Capture a screen region given in absolute coordinates
    async fn capture_region(&self, region: WindowRect) -> Result<PixelGrid, AutomationError>;

    /// Recognise text spans in a captured grid. Boxes are in screen coordinates.
    async fn detect_text(&self, grid: &PixelGrid) -> Result<Vec<Detection>, AutomationError>;
}

/// The capabilities bundle handed to a run
#[derive(Clone)]
pub struct Platform {
    pub windows: Arc<dyn WindowSystem>,
    pub input: Arc<dyn InputDevice>,
    pub screen: Arc<dyn ScreenReader>,
}

impl Platform {
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        input: Arc<dyn InputDevice>,
        screen: Arc<dyn ScreenReader>,
    ) -> Self {
        Self {
            windows,
            input,
            screen,
        }
    }

    /// Bundle a single value implementing every capability
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: WindowSystem + InputDevice + ScreenReader + 'static,
    {
        Self {
            windows: backend.clone(),
            input: backend.clone(),
            screen: backend,
        }
    }
}

#[cfg(target_os = "windows")]
pub mod windows;

/// Create the platform for the current operating system
pub fn create_platform() -> Result<Platform, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Platform::from_backend(Arc::new(windows::WindowsDesktop::new()?)))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "The target application only runs on Windows".to_string(),
        ))
    }
}
