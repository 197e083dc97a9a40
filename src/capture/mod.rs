//! Screen capture and game window discovery.
//!
//! This module provides:
//! - Full-screen capture of the primary monitor (`ScreenCapture`)
//! - Window lookup by title substring and focusing (`WindowFocus`)

pub mod screenshot;
pub mod window;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use screenshot::MonitorCapture;
pub use window::{DesktopWindows, WindowInfo};

/// Takes full-screen screenshots.
pub trait ScreenCapture {
    /// Captures the screen to `destination` as PNG, creating parent
    /// directories and overwriting any existing file.
    fn capture_screenshot(&self, destination: &Path) -> Result<PathBuf>;
}

/// Finds and activates top-level windows.
pub trait WindowFocus {
    /// First visible window whose title contains `title_substring`.
    fn find_window(&self, title_substring: &str) -> Option<WindowInfo>;

    /// Brings the window to the foreground. Best-effort.
    fn focus(&self, window: &WindowInfo) -> bool;
}
