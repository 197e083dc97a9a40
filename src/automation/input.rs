//! Keyboard and mouse input simulation.
//!
//! Input goes through an [`InputSession`] created once at startup and shared
//! by reference. The Windows session uses SendInput, which simulates
//! hardware-level input that the game's input layer processes correctly.
//! The game window must be in the foreground.

use anyhow::{anyhow, Result};
use std::time::Duration;

/// Pause between repeated presses of the same key when none is given.
pub const DEFAULT_KEY_INTERVAL: Duration = Duration::from_millis(100);

/// Delay between press and release.
#[cfg_attr(not(windows), allow(dead_code))]
const HOLD_DURATION: Duration = Duration::from_millis(50);

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Synthetic input. Implementations report failures; callers decide whether
/// they matter.
pub trait InputSession {
    /// Presses and releases `key` `repeat` times, `interval` apart.
    fn press_key(&self, key: &str, repeat: u32, interval: Duration) -> Result<()>;

    /// A single quick key press.
    fn tap(&self, key: &str) -> Result<()> {
        self.press_key(key, 1, DEFAULT_KEY_INTERVAL)
    }

    /// Clicks `button`, first moving to absolute screen coordinates if given.
    #[allow(dead_code)]
    fn click(&self, button: MouseButton, at: Option<(i32, i32)>) -> Result<()>;
}

/// Maps a key name to a Windows virtual-key code.
///
/// Accepts single letters and digits (case-insensitive), `f1`..`f12` and a
/// few named keys.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn virtual_key_code(key: &str) -> Option<u16> {
    let lower = key.trim().to_ascii_lowercase();
    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return match c {
            'a'..='z' => Some(c.to_ascii_uppercase() as u16),
            '0'..='9' => Some(c as u16),
            _ => None,
        };
    }

    if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u16>().ok()) {
        return (1..=12).contains(&n).then(|| 0x70 + n - 1);
    }

    match lower.as_str() {
        "space" => Some(0x20),
        "enter" | "return" => Some(0x0D),
        "esc" | "escape" => Some(0x1B),
        "tab" => Some(0x09),
        "backspace" => Some(0x08),
        "shift" => Some(0x10),
        "ctrl" | "control" => Some(0x11),
        "alt" => Some(0x12),
        "left" => Some(0x25),
        "up" => Some(0x26),
        "right" => Some(0x27),
        "down" => Some(0x28),
        _ => None,
    }
}

/// The platform input session.
pub struct SystemInput {
    _private: (),
}

impl SystemInput {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for SystemInput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
        KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE, MAPVK_VK_TO_VSC,
        MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
        MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
        MOUSE_EVENT_FLAGS, MOUSEINPUT, VIRTUAL_KEY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN};

    fn send(inputs: &[INPUT]) -> Result<()> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(anyhow!(
                "SendInput delivered {} of {} events",
                sent,
                inputs.len()
            ));
        }
        Ok(())
    }

    fn key_event(vk: u16, scan: u16, up: bool) -> INPUT {
        let mut flags: KEYBD_EVENT_FLAGS = KEYEVENTF_SCANCODE;
        if up {
            flags |= KEYEVENTF_KEYUP;
        }
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: scan,
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        }
    }

    fn mouse_event(dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    dwFlags: flags,
                    ..Default::default()
                },
            },
        }
    }

    pub(super) fn press(key: &str) -> Result<()> {
        let vk = virtual_key_code(key).ok_or_else(|| anyhow!("Unknown key '{}'", key))?;
        let scan = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) } as u16;

        send(&[key_event(vk, scan, false)])?;
        std::thread::sleep(HOLD_DURATION);
        send(&[key_event(vk, scan, true)])
    }

    #[allow(dead_code)]
    pub(super) fn click(button: MouseButton, at: Option<(i32, i32)>) -> Result<()> {
        let (down, up) = match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        };

        let Some((x, y)) = at else {
            send(&[mouse_event(0, 0, down)])?;
            std::thread::sleep(HOLD_DURATION);
            return send(&[mouse_event(0, 0, up)]);
        };

        // Get screen dimensions for normalization
        let screen_width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let screen_height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        if screen_width <= 0 || screen_height <= 0 {
            return Err(anyhow!("Unable to read screen dimensions"));
        }

        // Normalize to 0-65535 range (required by MOUSEEVENTF_ABSOLUTE)
        let norm_x = ((x as i64 * 65535) / screen_width as i64) as i32;
        let norm_y = ((y as i64 * 65535) / screen_height as i64) as i32;
        let absolute = MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_MOVE;

        send(&[mouse_event(norm_x, norm_y, absolute)])?;
        std::thread::sleep(Duration::from_millis(100));
        send(&[mouse_event(norm_x, norm_y, down | absolute)])?;
        std::thread::sleep(HOLD_DURATION);
        send(&[mouse_event(norm_x, norm_y, up | absolute)])
    }
}

#[cfg(not(windows))]
mod platform {
    use super::*;

    pub(super) fn press(key: &str) -> Result<()> {
        Err(anyhow!("Cannot press '{}': input injection requires Windows", key))
    }

    #[allow(dead_code)]
    pub(super) fn click(_button: MouseButton, _at: Option<(i32, i32)>) -> Result<()> {
        Err(anyhow!("Cannot click: input injection requires Windows"))
    }
}

impl InputSession for SystemInput {
    fn press_key(&self, key: &str, repeat: u32, interval: Duration) -> Result<()> {
        for i in 0..repeat {
            platform::press(key)?;
            if i + 1 < repeat {
                std::thread::sleep(interval);
            }
        }
        Ok(())
    }

    fn click(&self, button: MouseButton, at: Option<(i32, i32)>) -> Result<()> {
        platform::click(button, at)
    }
}
