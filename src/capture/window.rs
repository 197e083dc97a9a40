//! Window discovery by title substring.

use tracing::{debug, warn};

use super::WindowFocus;

/// A top-level window found on the desktop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    /// Native window handle
    pub handle: isize,
    pub title: String,
}

/// Enumerates real desktop windows.
#[derive(Debug, Default)]
pub struct DesktopWindows;

impl WindowFocus for DesktopWindows {
    fn find_window(&self, title_substring: &str) -> Option<WindowInfo> {
        if title_substring.is_empty() {
            return None;
        }
        let found = platform::find_by_title(title_substring);
        match &found {
            Some(info) => debug!("Found window \"{}\" ({:#x})", info.title, info.handle),
            None => debug!("No window title contains \"{}\"", title_substring),
        }
        found
    }

    fn focus(&self, window: &WindowInfo) -> bool {
        let focused = platform::set_foreground(window);
        if !focused {
            warn!("Failed to focus window \"{}\" ({:#x})", window.title, window.handle);
        }
        focused
    }
}

/// True if `title` contains `substring`, ignoring case.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn title_matches(title: &str, substring: &str) -> bool {
    !substring.is_empty() && title.to_lowercase().contains(&substring.to_lowercase())
}

#[cfg(not(windows))]
mod platform {
    use super::WindowInfo;

    pub(super) fn find_by_title(_substring: &str) -> Option<WindowInfo> {
        None
    }

    pub(super) fn set_foreground(_window: &WindowInfo) -> bool {
        false
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;

    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, TRUE};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextLengthW, GetWindowTextW, IsWindowVisible, SetForegroundWindow,
    };

    use super::{title_matches, WindowInfo};

    pub(super) fn find_by_title(substring: &str) -> Option<WindowInfo> {
        struct EnumData<'a> {
            substring: &'a str,
            found: Option<WindowInfo>,
        }

        unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
            unsafe {
                let data = &mut *(lparam.0 as *mut EnumData);

                // Skip invisible windows
                if !IsWindowVisible(hwnd).as_bool() {
                    return TRUE;
                }

                let title_len = GetWindowTextLengthW(hwnd);
                if title_len <= 0 {
                    return TRUE;
                }
                let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
                let copied = GetWindowTextW(hwnd, &mut title_buf).max(0) as usize;
                let title = OsString::from_wide(&title_buf[..copied])
                    .to_string_lossy()
                    .to_string();

                if title_matches(&title, data.substring) {
                    data.found = Some(WindowInfo {
                        handle: hwnd.0 as isize,
                        title,
                    });
                    return BOOL(0); // Stop enumeration
                }

                TRUE
            }
        }

        let mut data = EnumData { substring, found: None };
        unsafe {
            // EnumWindows reports FALSE when the callback stops it early
            let _ = EnumWindows(Some(enum_callback), LPARAM(&mut data as *mut _ as isize));
        }
        data.found
    }

    pub(super) fn set_foreground(window: &WindowInfo) -> bool {
        let hwnd = HWND(window.handle as *mut _);
        unsafe { SetForegroundWindow(hwnd).as_bool() }
    }
}
