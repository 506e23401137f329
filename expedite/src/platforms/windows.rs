//! Win32 implementation of the platform capabilities.
//!
//! Window enumeration and input go straight through `user32`; capture uses
//! `xcap` and text detection the WinRT `Windows.Media.Ocr` engine, which
//! reports per-word boxes.

use crate::classifier::{BoundingBox, Detection, PixelGrid};
use crate::errors::AutomationError;
use crate::platforms::{InputDevice, ScreenReader, WindowSystem};
use crate::types::{Key, Point, WindowHandle, WindowRect};
use std::ffi::c_void;
use tracing::{debug, warn};

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, KEYEVENTF_UNICODE, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY, VK_ESCAPE,
    VK_RETURN, VK_TAB,
};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, EnumWindows, GetCursorPos, GetSystemMetrics, GetWindowRect,
    GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId, IsIconic, IsWindowVisible,
    SetForegroundWindow, ShowWindow, SM_CXSCREEN, SM_CYSCREEN, SW_RESTORE,
};

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut c_void)
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam.0 as *mut Vec<WindowHandle>);
    handles.push(WindowHandle(hwnd.0 as isize));
    TRUE
}

pub struct WindowsDesktop;

impl WindowsDesktop {
    pub fn new() -> Result<Self, AutomationError> {
        Ok(Self)
    }

    fn send(inputs: &[INPUT]) -> Result<(), AutomationError> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(AutomationError::PlatformError(format!(
                "SendInput accepted {sent} of {} events",
                inputs.len()
            )));
        }
        Ok(())
    }

    fn mouse_input(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn key_input(vk: VIRTUAL_KEY, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }
}

impl WindowSystem for WindowsDesktop {
    fn enumerate_top_level_windows(&self) -> Result<Vec<WindowHandle>, AutomationError> {
        let mut handles: Vec<WindowHandle> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut handles as *mut Vec<WindowHandle> as isize),
            )
        }
        .map_err(|e| AutomationError::PlatformError(format!("EnumWindows failed: {e}")))?;
        Ok(handles)
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindowVisible(hwnd(handle)).as_bool() }
    }

    fn window_title(&self, handle: WindowHandle) -> Result<String, AutomationError> {
        let hwnd = hwnd(handle);
        let len = unsafe { GetWindowTextLengthW(hwnd) };
        if len <= 0 {
            return Ok(String::new());
        }
        let mut buffer = vec![0u16; len as usize + 1];
        let copied = unsafe { GetWindowTextW(hwnd, &mut buffer) };
        Ok(String::from_utf16_lossy(&buffer[..copied.max(0) as usize]))
    }

    fn owner_process_id(&self, handle: WindowHandle) -> Result<u32, AutomationError> {
        let mut pid = 0u32;
        let thread = unsafe { GetWindowThreadProcessId(hwnd(handle), Some(&mut pid)) };
        if thread == 0 {
            return Err(AutomationError::PlatformError(format!(
                "GetWindowThreadProcessId failed for window {handle}"
            )));
        }
        Ok(pid)
    }

    fn window_rect(&self, handle: WindowHandle) -> Result<WindowRect, AutomationError> {
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd(handle), &mut rect) }.map_err(|e| {
            AutomationError::PlatformError(format!("GetWindowRect failed for {handle}: {e}"))
        })?;
        Ok(WindowRect {
            left: rect.left,
            top: rect.top,
            width: rect.right - rect.left,
            height: rect.bottom - rect.top,
        })
    }

    fn cursor_position(&self) -> Result<Point, AutomationError> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point) }
            .map_err(|e| AutomationError::PlatformError(format!("GetCursorPos failed: {e}")))?;
        Ok(Point {
            x: point.x,
            y: point.y,
        })
    }
}

impl InputDevice for WindowsDesktop {
    fn click_at(&self, point: Point) -> Result<(), AutomationError> {
        fn to_absolute(x: i32, y: i32) -> (i32, i32) {
            let screen_w = unsafe { GetSystemMetrics(SM_CXSCREEN) }.max(1);
            let screen_h = unsafe { GetSystemMetrics(SM_CYSCREEN) }.max(1);
            let abs_x = ((x as f64 / screen_w as f64) * 65535.0).round() as i32;
            let abs_y = ((y as f64 / screen_h as f64) * 65535.0).round() as i32;
            (abs_x, abs_y)
        }
        let (abs_x, abs_y) = to_absolute(point.x, point.y);
        Self::send(&[
            Self::mouse_input(abs_x, abs_y, MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE),
            Self::mouse_input(0, 0, MOUSEEVENTF_LEFTDOWN),
            Self::mouse_input(0, 0, MOUSEEVENTF_LEFTUP),
        ])
    }

    fn press_key(&self, key: Key) -> Result<(), AutomationError> {
        let vk = match key {
            Key::Enter => VK_RETURN,
            Key::Tab => VK_TAB,
            Key::Escape => VK_ESCAPE,
        };
        Self::send(&[
            Self::key_input(vk, 0, KEYBD_EVENT_FLAGS(0)),
            Self::key_input(vk, 0, KEYEVENTF_KEYUP),
        ])
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        let mut inputs = Vec::with_capacity(text.len() * 4);
        for unit in text.encode_utf16() {
            inputs.push(Self::key_input(VIRTUAL_KEY(0), unit, KEYEVENTF_UNICODE));
            inputs.push(Self::key_input(
                VIRTUAL_KEY(0),
                unit,
                KEYEVENTF_UNICODE | KEYEVENTF_KEYUP,
            ));
        }
        if inputs.is_empty() {
            return Ok(());
        }
        Self::send(&inputs)
    }

    fn focus_window(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        let hwnd = hwnd(handle);
        unsafe {
            if IsIconic(hwnd).as_bool() {
                debug!("Window {} is minimized, restoring it", handle);
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            let _ = BringWindowToTop(hwnd);
            // Refused under the foreground lock when the caller is in the background
            if !SetForegroundWindow(hwnd).as_bool() {
                debug!("SetForegroundWindow refused window {}, continuing", handle);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScreenReader for WindowsDesktop {
    async fn capture_region(&self, region: WindowRect) -> Result<PixelGrid, AutomationError> {
        tokio::task::spawn_blocking(move || capture_blocking(region))
            .await
            .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))?
    }

    async fn detect_text(&self, grid: &PixelGrid) -> Result<Vec<Detection>, AutomationError> {
        let grid = grid.clone();
        tokio::task::spawn_blocking(move || recognize_blocking(&grid))
            .await
            .map_err(|e| AutomationError::PlatformError(format!("Task join error: {e}")))?
    }
}

fn capture_blocking(region: WindowRect) -> Result<PixelGrid, AutomationError> {
    let monitor = xcap::Monitor::from_point(region.left + 1, region.top + 1).map_err(|e| {
        AutomationError::PlatformError(format!("No monitor contains the capture region: {e}"))
    })?;
    let monitor_x = monitor
        .x()
        .map_err(|e| AutomationError::PlatformError(format!("Failed to get monitor x: {e}")))?;
    let monitor_y = monitor
        .y()
        .map_err(|e| AutomationError::PlatformError(format!("Failed to get monitor y: {e}")))?;
    let image = monitor
        .capture_image()
        .map_err(|e| AutomationError::PlatformError(format!("Failed to capture monitor: {e}")))?;

    let x = (region.left - monitor_x).clamp(0, image.width() as i32) as u32;
    let y = (region.top - monitor_y).clamp(0, image.height() as i32) as u32;
    let width = (region.width.max(0) as u32).min(image.width() - x);
    let height = (region.height.max(0) as u32).min(image.height() - y);
    if width == 0 || height == 0 {
        return Err(AutomationError::PlatformError(format!(
            "Capture region {region:?} lies outside the monitor"
        )));
    }

    let cropped = image::imageops::crop_imm(&image, x, y, width, height).to_image();
    Ok(PixelGrid::new(
        Point {
            x: monitor_x + x as i32,
            y: monitor_y + y as i32,
        },
        cropped,
    ))
}

fn recognize_blocking(grid: &PixelGrid) -> Result<Vec<Detection>, AutomationError> {
    use windows::Graphics::Imaging::{BitmapAlphaMode, BitmapPixelFormat, SoftwareBitmap};
    use windows::Media::Ocr::OcrEngine;
    use windows::Storage::Streams::DataWriter;

    fn winrt(context: &str) -> impl Fn(windows::core::Error) -> AutomationError + '_ {
        move |e| AutomationError::PlatformError(format!("{context}: {e}"))
    }

    // WinRT activation needs an initialized apartment on this blocking thread.
    let _ = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };

    let image = grid.image();
    let mut bgra = image.as_raw().clone();
    for pixel in bgra.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }

    let engine = OcrEngine::TryCreateFromUserProfileLanguages()
        .map_err(winrt("Failed to create OCR engine"))?;
    let writer = DataWriter::new().map_err(winrt("Failed to create data writer"))?;
    writer
        .WriteBytes(&bgra)
        .map_err(winrt("Failed to write pixel data"))?;
    let buffer = writer
        .DetachBuffer()
        .map_err(winrt("Failed to detach pixel buffer"))?;
    let bitmap = SoftwareBitmap::CreateCopyWithAlphaFromBuffer(
        &buffer,
        BitmapPixelFormat::Bgra8,
        image.width() as i32,
        image.height() as i32,
        BitmapAlphaMode::Premultiplied,
    )
    .map_err(winrt("Failed to create bitmap"))?;

    let result = engine
        .RecognizeAsync(&bitmap)
        .map_err(winrt("OCR recognition failed"))?
        .get()
        .map_err(winrt("OCR recognition failed"))?;

    let origin = grid.origin();
    let mut detections = Vec::new();
    for line in result.Lines().map_err(winrt("Failed to read OCR lines"))? {
        let text = match line.Text() {
            Ok(text) => text.to_string_lossy(),
            Err(e) => {
                warn!("Skipping OCR line without text: {}", e);
                continue;
            }
        };
        let mut bounds: Option<BoundingBox> = None;
        for word in line.Words().map_err(winrt("Failed to read OCR words"))? {
            let rect = word.BoundingRect().map_err(winrt("Failed to read word bounds"))?;
            let word_box = BoundingBox {
                x_min: origin.x + rect.X.floor() as i32,
                y_min: origin.y + rect.Y.floor() as i32,
                x_max: origin.x + (rect.X + rect.Width).ceil() as i32,
                y_max: origin.y + (rect.Y + rect.Height).ceil() as i32,
            };
            bounds = Some(match bounds {
                Some(current) => current.union(&word_box),
                None => word_box,
            });
        }
        if let Some(bbox) = bounds {
            // Windows OCR does not expose per-line confidence.
            detections.push(Detection::new(bbox, text, 1.0));
        }
    }
    debug!("OCR produced {} line detections", detections.len());
    Ok(detections)
}
