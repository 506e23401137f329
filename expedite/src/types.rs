//! Common geometry and window types shared by the platform layer and the core

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AutomationError;

/// A point in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// An offset relative to a window's top-left corner, stored as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Offset {
    pub x: i32,
    pub y: i32,
}

impl Offset {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_positive(&self) -> bool {
        self.x > 0 && self.y > 0
    }
}

impl From<[i32; 2]> for Offset {
    fn from(value: [i32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Offset> for [i32; 2] {
    fn from(value: Offset) -> Self {
        [value.x, value.y]
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen rectangle of a window at the time it was read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowRect {
    /// Absolute screen position of an offset inside this rectangle
    pub fn absolute(&self, offset: Offset) -> Point {
        Point {
            x: self.left + offset.x,
            y: self.top + offset.y,
        }
    }

    /// Cursor position expressed relative to the top-left corner
    pub fn relative(&self, point: Point) -> (i32, i32) {
        (point.x - self.left, point.y - self.top)
    }
}

/// Opaque native window handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A handle-bound reference to a live window.
///
/// Once resolved, a reference is never looked up by title again. The rectangle
/// is a snapshot taken at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowReference {
    pub handle: WindowHandle,
    pub process_id: u32,
    pub title: String,
    pub rect: WindowRect,
}

/// Title pattern with regex match semantics anchored at the start of the title
#[derive(Debug, Clone)]
pub struct TitlePattern {
    source: String,
    regex: Regex,
}

impl TitlePattern {
    pub fn new(pattern: &str) -> Result<Self, AutomationError> {
        let regex = Regex::new(&format!("^(?:{pattern})"))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, title: &str) -> bool {
        self.regex.is_match(title)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for TitlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Keys the workflow sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Tab,
    Escape,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Key::Enter => "enter",
            Key::Tab => "tab",
            Key::Escape => "esc",
        };
        f.write_str(name)
    }
}
