//! Control loop state machine.
//!
//! The machine sequences through: Starting → Healthy → LevelCheck → ZenCheck,
//! then waits out the healthcheck interval and returns to Healthy.
//! Every wait and retry checks the [`StopSignal`]. A failed check sends an
//! error notification and ends the loop; nothing resumes automatically.

use anyhow::Result;
use chrono::Local;
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::AudioPlayer;
use crate::automation::config::{secs, TrainerConfig};
use crate::automation::detection::{Detector, ScreenReader};
use crate::automation::input::InputSession;
use crate::capture::{ScreenCapture, WindowFocus};
use crate::notify::{self, Notifier, COIN_EMOJI};
use crate::ocr::{OcrError, OcrKind};

/// Screenshot used for startup and healthchecks.
const BASE_SCREENSHOT: &str = "screenshot_base.png";
const LEVEL_SCREENSHOT: &str = "screenshot_level.png";
const INVENTORY_SCREENSHOT: &str = "screenshot_inventory.png";

/// Control loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Waiting for the game to be visible (initial state)
    Starting,
    /// Running the healthcheck that opens each cycle
    Healthy,
    /// Reading the character level
    LevelCheck,
    /// Reading the zen balance
    ZenCheck,
    /// A check failed; the loop is over
    ErrorTerminal,
    /// Stop was requested
    Stopped,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::ErrorTerminal | CycleState::Stopped)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleState::Starting => write!(f, "Starting"),
            CycleState::Healthy => write!(f, "Healthcheck"),
            CycleState::LevelCheck => write!(f, "Level check"),
            CycleState::ZenCheck => write!(f, "Zen check"),
            CycleState::ErrorTerminal => write!(f, "Error"),
            CycleState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Cooperative cancellation shared between the loop and the signal handler.
///
/// Waits return as soon as a stop is requested.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    requested: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.wakeup.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `timeout` or until a stop is requested.
    /// Returns true if a stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .inner
            .wakeup
            .wait_timeout_while(guard, timeout, |_| !self.is_set());
        self.is_set()
    }
}

/// Everything the loop talks to outside itself.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub capture: &'a dyn ScreenCapture,
    pub input: &'a dyn InputSession,
    pub windows: &'a dyn WindowFocus,
    pub audio: &'a dyn AudioPlayer,
    pub notifier: &'a dyn Notifier,
    pub reader: &'a dyn ScreenReader,
}

/// Why a state did not complete.
enum Halt {
    Cancelled,
    /// The game never became visible
    NotStarted,
    /// A check failed; reported with the screenshot that showed it
    Failed { message: String, screenshot: PathBuf },
}

impl Halt {
    fn failed(message: impl Into<String>, screenshot: &Path) -> Self {
        Halt::Failed {
            message: message.into(),
            screenshot: screenshot.to_path_buf(),
        }
    }
}

/// Context for the control loop.
pub struct CycleContext<'a> {
    pub state: CycleState,
    /// Level read in the last completed level check
    pub previous_level: Option<u64>,
    pub cycles_completed: u64,
    config: &'a TrainerConfig,
    io: Collaborators<'a>,
    stop: StopSignal,
    cycle_started: Instant,
}

impl<'a> CycleContext<'a> {
    pub fn new(config: &'a TrainerConfig, io: Collaborators<'a>, stop: StopSignal) -> Self {
        Self {
            state: CycleState::Starting,
            previous_level: None,
            cycles_completed: 0,
            config,
            io,
            stop,
            cycle_started: Instant::now(),
        }
    }

    /// Executes one state and transitions to the next.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` once a terminal state is
    /// reached.
    pub fn step(&mut self) -> Result<bool> {
        if self.state.is_terminal() {
            return Ok(false);
        }
        if self.stop.is_set() {
            info!("Stop requested during {}", self.state);
            self.state = CycleState::Stopped;
            return Ok(false);
        }

        let outcome = match self.state {
            CycleState::Starting => self.start().map(|()| CycleState::Healthy),
            CycleState::Healthy => self.healthcheck().map(|()| CycleState::LevelCheck),
            CycleState::LevelCheck => self.level_check().map(|()| CycleState::ZenCheck),
            CycleState::ZenCheck => self
                .zen_check()
                .and_then(|()| self.finish_cycle())
                .map(|()| CycleState::Healthy),
            CycleState::ErrorTerminal | CycleState::Stopped => return Ok(false),
        };

        match outcome {
            Ok(next) => {
                debug!("{} -> {}", self.state, next);
                self.state = next;
                Ok(true)
            }
            Err(Halt::Cancelled) => {
                info!("Stop requested during {}", self.state);
                self.state = CycleState::Stopped;
                Ok(false)
            }
            Err(Halt::NotStarted) => {
                error!("Unable to start trainer ⚠️");
                self.state = CycleState::ErrorTerminal;
                Ok(false)
            }
            Err(Halt::Failed { message, screenshot }) => {
                self.report_failure(&message, &screenshot);
                self.state = CycleState::ErrorTerminal;
                Ok(false)
            }
        }
    }

    fn start(&mut self) -> Result<(), Halt> {
        self.focus_window();

        let attempts = self.config.timing.starting_attempts;
        let screenshot = self.screenshot_path(BASE_SCREENSHOT);
        for attempt in 1..=attempts {
            self.check_stop()?;
            info!("Starting trainer (attempt {}/{})", attempt, attempts);

            if self.capture_and_detect(&screenshot, Detector::Ingame) == Some(true) {
                info!("🚀 Trainer started");
                self.io.audio.play(&self.config.start_sound);
                return Ok(());
            }
            if attempt < attempts {
                self.pause(self.config.timing.starting_retry_delay())?;
            }
        }
        Err(Halt::NotStarted)
    }

    fn healthcheck(&mut self) -> Result<(), Halt> {
        self.cycle_started = Instant::now();
        info!(
            "Cycle {} started at {}",
            self.cycles_completed + 1,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        if self.config.window.focus_each_cycle {
            self.focus_window();
        }

        let screenshot = self.screenshot_path(BASE_SCREENSHOT);
        if self.capture_and_detect(&screenshot, Detector::Ingame) != Some(true) {
            return Err(Halt::failed("Character seems not to be in game", &screenshot));
        }
        if self.io.reader.detect(&screenshot, Detector::Dialog) {
            return Err(Halt::failed("Dialog window opened", &screenshot));
        }
        info!("Healthcheck passed");
        Ok(())
    }

    fn level_check(&mut self) -> Result<(), Halt> {
        let config = self.config;
        let key = &config.keys.character_menu;
        let screenshot = self.screenshot_path(LEVEL_SCREENSHOT);

        if !self.open_menu(key, Detector::Character, &screenshot)? {
            return Err(Halt::failed(
                "Unable to open character menu for level check",
                &screenshot,
            ));
        }

        let level = self
            .read_value(OcrKind::Level, &screenshot)?
            .ok_or_else(|| Halt::failed("Unable to find and parse character level", &screenshot))?;

        if let Some(milestone) =
            crossed_milestone(self.previous_level, level, &config.level_milestones)
        {
            info!("Level milestone {} reached", milestone);
            notify::send_info(
                self.io.notifier,
                &config.notification,
                &format!("Character reached level {level}"),
                None,
            );
        }
        self.previous_level = Some(level);

        if !self.close_menu(key, Detector::Character, &screenshot)? {
            return Err(Halt::failed(
                "Unable to close character menu after level check",
                &screenshot,
            ));
        }
        Ok(())
    }

    fn zen_check(&mut self) -> Result<(), Halt> {
        let config = self.config;
        let key = &config.keys.inventory;
        let screenshot = self.screenshot_path(INVENTORY_SCREENSHOT);

        if !self.open_menu(key, Detector::Inventory, &screenshot)? {
            return Err(Halt::failed("Unable to open inventory for zen check", &screenshot));
        }

        let zen = self
            .read_value(OcrKind::Currency, &screenshot)?
            .ok_or_else(|| Halt::failed("Unable to find and parse zen amount", &screenshot))?;

        if zen > config.currency_high_water {
            warn!("Zen {} is above {}", zen, config.currency_high_water);
            notify::send_info(
                self.io.notifier,
                &config.notification,
                "Character zen is reaching maximum value",
                Some(COIN_EMOJI),
            );
        }

        if !self.close_menu(key, Detector::Inventory, &screenshot)? {
            return Err(Halt::failed("Unable to close inventory after zen check", &screenshot));
        }
        Ok(())
    }

    /// Counts the cycle and sleeps out the rest of the healthcheck interval.
    fn finish_cycle(&mut self) -> Result<(), Halt> {
        self.cycles_completed += 1;
        let elapsed = self.cycle_started.elapsed();
        let remaining = remaining_interval(self.config.timing.healthcheck_interval(), elapsed);
        info!(
            "Cycle {} complete in {:.1}s, next healthcheck in {:.1}s",
            self.cycles_completed,
            elapsed.as_secs_f64(),
            remaining.as_secs_f64()
        );
        self.pause(remaining)
    }

    /// Presses `key` until `detector` sees the menu. Returns false if the
    /// retry budget runs out.
    fn open_menu(&self, key: &str, detector: Detector, screenshot: &Path) -> Result<bool, Halt> {
        let retries = self.config.timing.menu_open_retries;
        for attempt in 1..=retries {
            self.check_stop()?;
            self.send_key(key)?;
            if self.capture_and_detect(screenshot, detector) == Some(true) {
                info!("{} opened (attempt {}/{})", detector, attempt, retries);
                return Ok(true);
            }
            debug!("{} not visible yet (attempt {}/{})", detector, attempt, retries);
        }
        error!("{} did not open after {} attempts", detector, retries);
        Ok(false)
    }

    /// Presses `key` until `detector` no longer sees the menu.
    fn close_menu(&self, key: &str, detector: Detector, screenshot: &Path) -> Result<bool, Halt> {
        let retries = self.config.timing.menu_close_retries;
        for attempt in 1..=retries {
            self.check_stop()?;
            self.send_key(key)?;
            if self.capture_and_detect(screenshot, detector) == Some(false) {
                info!("{} closed (attempt {}/{})", detector, attempt, retries);
                return Ok(true);
            }
            debug!("{} still visible (attempt {}/{})", detector, attempt, retries);
        }
        error!("{} did not close after {} attempts", detector, retries);
        Ok(false)
    }

    /// Captures and reads `kind` until a value validates or attempts run out.
    ///
    /// A missing OCR engine ends the loop at once.
    fn read_value(&self, kind: OcrKind, screenshot: &Path) -> Result<Option<u64>, Halt> {
        let attempts = match kind {
            OcrKind::Level => self.config.timing.level_attempts,
            OcrKind::Currency => self.config.timing.currency_attempts,
        };
        for attempt in 1..=attempts {
            self.check_stop()?;
            if !self.capture(screenshot) {
                continue;
            }
            match self.io.reader.read(screenshot, kind) {
                Ok(Some(value)) => {
                    info!("Detected {}: {}", kind, value);
                    return Ok(Some(value));
                }
                Ok(None) => {
                    warn!("No valid {} value (attempt {}/{})", kind, attempt, attempts)
                }
                Err(e @ OcrError::EngineUnavailable(_)) => {
                    return Err(Halt::failed(format!("Unable to read {kind}: {e}"), screenshot));
                }
                Err(e) => warn!("{} OCR failed (attempt {}/{}): {}", kind, attempt, attempts, e),
            }
        }
        Ok(None)
    }

    /// Taps `key`, then waits the jittered post-key delay.
    fn send_key(&self, key: &str) -> Result<(), Halt> {
        let timing = &self.config.timing;
        let delay = jittered(timing.key_delay_secs, timing.key_delay_jitter_secs);
        debug!("Sending key '{}' with {:.3}s post-delay", key, delay.as_secs_f64());
        if let Err(e) = self.io.input.tap(key) {
            error!("Failed to send key '{}': {:#}", key, e);
        }
        self.pause(delay)
    }

    fn capture(&self, screenshot: &Path) -> bool {
        match self.io.capture.capture_screenshot(screenshot) {
            Ok(_) => true,
            Err(e) => {
                error!("Screenshot capture failed: {:#}", e);
                false
            }
        }
    }

    /// `None` if the screenshot could not be taken.
    fn capture_and_detect(&self, screenshot: &Path, detector: Detector) -> Option<bool> {
        self.capture(screenshot)
            .then(|| self.io.reader.detect(screenshot, detector))
    }

    fn focus_window(&self) {
        let title = &self.config.window.title_substring;
        if title.is_empty() {
            return;
        }
        match self.io.windows.find_window(title) {
            Some(window) => {
                if self.io.windows.focus(&window) {
                    debug!("Focused window \"{}\"", window.title);
                }
            }
            None => warn!("No window title contains \"{}\"", title),
        }
    }

    fn report_failure(&self, message: &str, screenshot: &Path) {
        error!("{}", message);
        let attachment = self.io.reader.error_attachment(screenshot);
        notify::send_error(
            self.io.notifier,
            &self.config.notification,
            message,
            attachment.as_deref(),
        );
    }

    fn check_stop(&self) -> Result<(), Halt> {
        if self.stop.is_set() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn pause(&self, duration: Duration) -> Result<(), Halt> {
        if self.stop.wait(duration) {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn screenshot_path(&self, name: &str) -> PathBuf {
        self.config.run_dir.join(name)
    }
}

/// Time left of `interval` once `elapsed` of it has been spent; zero when
/// the cycle overran.
pub fn remaining_interval(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Highest milestone `m` with `previous < m <= current`.
///
/// Nothing is reported without a previous reading.
pub fn crossed_milestone(previous: Option<u64>, current: u64, milestones: &[u64]) -> Option<u64> {
    let previous = previous?;
    milestones
        .iter()
        .copied()
        .filter(|&m| previous < m && m <= current)
        .max()
}

/// `base` seconds plus a uniform offset in `[-jitter, jitter]`, never negative.
pub fn jittered(base: f64, jitter: f64) -> Duration {
    let offset = if jitter > 0.0 {
        rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        0.0
    };
    secs(base + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::WindowInfo;
    use crate::automation::input::MouseButton;
    use anyhow::anyhow;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct FakeCapture {
        captures: Cell<u32>,
        fail: bool,
        stop_on_capture: Option<StopSignal>,
    }

    impl ScreenCapture for FakeCapture {
        fn capture_screenshot(&self, destination: &Path) -> Result<PathBuf> {
            self.captures.set(self.captures.get() + 1);
            if let Some(stop) = &self.stop_on_capture {
                stop.request();
            }
            if self.fail {
                return Err(anyhow!("no display"));
            }
            Ok(destination.to_path_buf())
        }
    }

    #[derive(Default)]
    struct FakeInput {
        keys: RefCell<Vec<String>>,
    }

    impl InputSession for FakeInput {
        fn press_key(&self, key: &str, _repeat: u32, _interval: Duration) -> Result<()> {
            self.keys.borrow_mut().push(key.to_string());
            Ok(())
        }

        fn click(&self, _button: MouseButton, _at: Option<(i32, i32)>) -> Result<()> {
            Ok(())
        }
    }

    struct NoWindows;

    impl WindowFocus for NoWindows {
        fn find_window(&self, _title_substring: &str) -> Option<WindowInfo> {
            None
        }

        fn focus(&self, _window: &WindowInfo) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct FakeAudio {
        played: RefCell<Vec<PathBuf>>,
    }

    impl AudioPlayer for FakeAudio {
        fn play(&self, path: &Path) {
            self.played.borrow_mut().push(path.to_path_buf());
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: RefCell<Vec<(String, bool)>>,
    }

    impl FakeNotifier {
        fn messages(&self) -> Vec<String> {
            self.sent.borrow().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    impl Notifier for FakeNotifier {
        fn send(&self, message: &str, attachment: Option<&Path>) -> bool {
            self.sent
                .borrow_mut()
                .push((message.to_string(), attachment.is_some()));
            true
        }
    }

    /// Replays scripted answers. The last detection answer of each detector
    /// repeats once its script runs out; reads default to "no value".
    #[derive(Default)]
    struct ScriptedReader {
        detections: RefCell<HashMap<Detector, VecDeque<bool>>>,
        detect_calls: Cell<u32>,
        readings: RefCell<VecDeque<Result<Option<u64>, OcrError>>>,
        read_calls: Cell<u32>,
    }

    impl ScriptedReader {
        fn script(&self, detector: Detector, answers: &[bool]) {
            self.detections
                .borrow_mut()
                .insert(detector, answers.iter().copied().collect());
        }

        fn readings(&self, readings: Vec<Result<Option<u64>, OcrError>>) {
            *self.readings.borrow_mut() = readings.into();
        }

        /// One clean cycle reading `level` and `zen`.
        fn healthy_cycle(&self, level: u64, zen: u64) {
            self.script(Detector::Ingame, &[true]);
            self.script(Detector::Dialog, &[false]);
            self.script(Detector::Character, &[true, false]);
            self.script(Detector::Inventory, &[true, false]);
            self.readings(vec![Ok(Some(level)), Ok(Some(zen))]);
        }
    }

    impl ScreenReader for ScriptedReader {
        fn detect(&self, _screenshot: &Path, detector: Detector) -> bool {
            self.detect_calls.set(self.detect_calls.get() + 1);
            let mut detections = self.detections.borrow_mut();
            match detections.get_mut(&detector) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(false),
                Some(queue) => queue.front().copied().unwrap_or(false),
                None => false,
            }
        }

        fn read(&self, _screenshot: &Path, _kind: OcrKind) -> Result<Option<u64>, OcrError> {
            self.read_calls.set(self.read_calls.get() + 1);
            self.readings.borrow_mut().pop_front().unwrap_or(Ok(None))
        }

        fn error_attachment(&self, _screenshot: &Path) -> Option<PathBuf> {
            Some(PathBuf::from("error_attachment.png"))
        }
    }

    #[derive(Default)]
    struct Harness {
        capture: FakeCapture,
        input: FakeInput,
        audio: FakeAudio,
        notifier: FakeNotifier,
        reader: ScriptedReader,
    }

    impl Harness {
        fn context<'a>(&'a self, config: &'a TrainerConfig, stop: StopSignal) -> CycleContext<'a> {
            let io = Collaborators {
                capture: &self.capture,
                input: &self.input,
                windows: &NoWindows,
                audio: &self.audio,
                notifier: &self.notifier,
                reader: &self.reader,
            };
            CycleContext::new(config, io, stop)
        }
    }

    fn fast_config() -> TrainerConfig {
        let mut config = TrainerConfig::default();
        config.run_dir = PathBuf::from("run");
        config.timing.starting_retry_delay_secs = 0.0;
        config.timing.healthcheck_interval_secs = 0.0;
        config.timing.key_delay_secs = 0.0;
        config.timing.key_delay_jitter_secs = 0.0;
        config.notification.user_id = "42".to_string();
        config.notification.character_name = "Hero".to_string();
        config
    }

    fn run_cycle(ctx: &mut CycleContext<'_>) {
        assert_eq!(ctx.state, CycleState::Healthy);
        for _ in 0..3 {
            assert!(ctx.step().unwrap(), "cycle stopped in {}", ctx.state);
        }
        assert_eq!(ctx.state, CycleState::Healthy);
    }

    /// Runs one full cycle with `key_delay` per key press and returns its
    /// wall time, from the healthcheck until the machine is back in it.
    fn timed_cycle(interval_secs: f64, key_delay_secs: f64) -> Duration {
        let mut config = fast_config();
        config.timing.healthcheck_interval_secs = interval_secs;
        config.timing.key_delay_secs = key_delay_secs;
        let harness = Harness::default();
        harness.reader.healthy_cycle(200, 1_000);

        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;
        let started = Instant::now();
        run_cycle(&mut ctx);
        let elapsed = started.elapsed();

        // Open and close for both menus.
        assert_eq!(harness.input.keys.borrow().len(), 4);
        assert_eq!(ctx.cycles_completed, 1);
        elapsed
    }

    #[test]
    fn test_interval_measured_from_cycle_start() {
        // 4 presses x 0.1s of work inside a 0.6s interval.
        let elapsed = timed_cycle(0.6, 0.1);
        assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(900), "{:?}", elapsed);
    }

    #[test]
    fn test_overrun_cycle_does_not_sleep() {
        // 4 presses x 0.15s of work against a 0.2s interval.
        let elapsed = timed_cycle(0.2, 0.15);
        assert!(elapsed >= Duration::from_millis(600), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(750), "{:?}", elapsed);
    }

    #[test]
    fn test_remaining_interval() {
        let interval = Duration::from_secs(180);
        assert_eq!(remaining_interval(interval, Duration::from_secs(30)), Duration::from_secs(150));
        assert_eq!(remaining_interval(interval, interval), Duration::ZERO);
        assert_eq!(remaining_interval(interval, Duration::from_secs(400)), Duration::ZERO);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CycleState::Healthy.to_string(), "Healthcheck");
        assert_eq!(CycleState::ZenCheck.to_string(), "Zen check");
        assert!(CycleState::Stopped.is_terminal());
        assert!(!CycleState::Starting.is_terminal());
    }

    #[test]
    fn test_starting_exhausts_attempts() {
        let mut config = fast_config();
        config.timing.starting_attempts = 3;
        let harness = Harness::default();
        harness.reader.script(Detector::Ingame, &[false]);

        let mut ctx = harness.context(&config, StopSignal::new());
        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(harness.capture.captures.get(), 3);
        assert_eq!(harness.reader.detect_calls.get(), 3);
        assert!(harness.audio.played.borrow().is_empty());
        assert!(harness.notifier.messages().is_empty());
        assert!(!ctx.step().unwrap());
    }

    #[test]
    fn test_starting_plays_cue() {
        let config = fast_config();
        let harness = Harness::default();
        harness.reader.script(Detector::Ingame, &[false, true]);

        let mut ctx = harness.context(&config, StopSignal::new());
        assert!(ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::Healthy);
        assert_eq!(harness.capture.captures.get(), 2);
        assert_eq!(*harness.audio.played.borrow(), vec![config.start_sound.clone()]);
    }

    #[test]
    fn test_stop_interrupts_start_retries() {
        let mut config = fast_config();
        config.timing.starting_retry_delay_secs = 60.0;
        let stop = StopSignal::new();
        let harness = Harness {
            capture: FakeCapture {
                stop_on_capture: Some(stop.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        harness.reader.script(Detector::Ingame, &[false]);

        let mut ctx = harness.context(&config, stop);
        let started = Instant::now();
        assert!(!ctx.step().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ctx.state, CycleState::Stopped);
        assert_eq!(harness.capture.captures.get(), 1);
    }

    #[test]
    fn test_stop_before_step() {
        let config = fast_config();
        let harness = Harness::default();
        let stop = StopSignal::new();
        stop.request();

        let mut ctx = harness.context(&config, stop);
        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::Stopped);
        assert_eq!(harness.capture.captures.get(), 0);
    }

    #[test]
    fn test_capture_failure_counts_as_miss() {
        let mut config = fast_config();
        config.timing.starting_attempts = 2;
        let harness = Harness {
            capture: FakeCapture {
                fail: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut ctx = harness.context(&config, StopSignal::new());
        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(harness.reader.detect_calls.get(), 0);
    }

    #[test]
    fn test_milestone_fires_once_per_crossing() {
        let config = fast_config();
        let harness = Harness::default();
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;
        ctx.previous_level = Some(140);

        harness.reader.healthy_cycle(160, 1000);
        run_cycle(&mut ctx);
        assert_eq!(
            harness.notifier.messages(),
            vec!["<@42> Hero. Character reached level 160 ⭐".to_string()]
        );
        assert_eq!(ctx.previous_level, Some(160));
        assert_eq!(ctx.cycles_completed, 1);
        assert_eq!(*harness.input.keys.borrow(), vec!["C", "C", "I", "I"]);

        harness.reader.healthy_cycle(170, 1000);
        run_cycle(&mut ctx);
        assert_eq!(harness.notifier.messages().len(), 1);
        assert_eq!(ctx.previous_level, Some(170));
        assert_eq!(ctx.cycles_completed, 2);
    }

    #[test]
    fn test_first_cycle_sends_no_milestone() {
        let config = fast_config();
        let harness = Harness::default();
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;

        harness.reader.healthy_cycle(390, 1000);
        run_cycle(&mut ctx);
        assert!(harness.notifier.messages().is_empty());
        assert_eq!(ctx.previous_level, Some(390));
    }

    #[test]
    fn test_zen_high_water_repeats_every_cycle() {
        let config = fast_config();
        let harness = Harness::default();
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;

        for _ in 0..2 {
            harness.reader.healthy_cycle(100, 1_950_000_000);
            run_cycle(&mut ctx);
        }
        let expected = "<@42> Hero. Character zen is reaching maximum value 🪙".to_string();
        assert_eq!(harness.notifier.messages(), vec![expected.clone(), expected]);
    }

    #[test]
    fn test_not_in_game_ends_loop() {
        let config = fast_config();
        let harness = Harness::default();
        harness.reader.script(Detector::Ingame, &[false]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;

        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(
            *harness.notifier.sent.borrow(),
            vec![(
                "<@42> Error for Hero. Character seems not to be in game ⚠️".to_string(),
                true
            )]
        );
    }

    #[test]
    fn test_dialog_open_ends_loop() {
        let config = fast_config();
        let harness = Harness::default();
        harness.reader.script(Detector::Ingame, &[true]);
        harness.reader.script(Detector::Dialog, &[true]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::Healthy;

        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(
            harness.notifier.messages(),
            vec!["<@42> Error for Hero. Dialog window opened ⚠️".to_string()]
        );
    }

    #[test]
    fn test_menu_that_never_opens_ends_loop() {
        let mut config = fast_config();
        config.timing.menu_open_retries = 4;
        let harness = Harness::default();
        harness.reader.script(Detector::Character, &[false]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::LevelCheck;

        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(*harness.input.keys.borrow(), vec!["C"; 4]);
        assert_eq!(harness.reader.read_calls.get(), 0);
        assert_eq!(
            harness.notifier.messages(),
            vec!["<@42> Error for Hero. Unable to open character menu for level check ⚠️"
                .to_string()]
        );
    }

    #[test]
    fn test_menu_that_never_closes_keeps_level() {
        let mut config = fast_config();
        config.timing.menu_close_retries = 2;
        let harness = Harness::default();
        harness.reader.script(Detector::Character, &[true]);
        harness.reader.readings(vec![Ok(Some(200))]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::LevelCheck;

        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.previous_level, Some(200));
        assert_eq!(harness.input.keys.borrow().len(), 3);
        assert_eq!(
            harness.notifier.messages(),
            vec!["<@42> Error for Hero. Unable to close character menu after level check ⚠️"
                .to_string()]
        );
    }

    #[test]
    fn test_unreadable_level_uses_attempt_budget() {
        let mut config = fast_config();
        config.timing.level_attempts = 3;
        let harness = Harness::default();
        harness.reader.script(Detector::Character, &[true]);
        harness.reader.readings(vec![
            Ok(None),
            Err(OcrError::EngineFailed("garbled".to_string())),
            Ok(None),
            Ok(Some(5)),
        ]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::LevelCheck;
        ctx.previous_level = Some(120);

        assert!(!ctx.step().unwrap());
        assert_eq!(harness.reader.read_calls.get(), 3);
        assert_eq!(ctx.previous_level, Some(120));
        assert_eq!(
            harness.notifier.messages(),
            vec!["<@42> Error for Hero. Unable to find and parse character level ⚠️".to_string()]
        );
    }

    #[test]
    fn test_missing_ocr_engine_aborts_immediately() {
        let config = fast_config();
        let harness = Harness::default();
        harness.reader.script(Detector::Inventory, &[true]);
        harness
            .reader
            .readings(vec![Err(OcrError::EngineUnavailable("tesseract".to_string()))]);
        let mut ctx = harness.context(&config, StopSignal::new());
        ctx.state = CycleState::ZenCheck;

        assert!(!ctx.step().unwrap());
        assert_eq!(ctx.state, CycleState::ErrorTerminal);
        assert_eq!(harness.reader.read_calls.get(), 1);
        let messages = harness.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("OCR engine unavailable"));
    }

    #[test]
    fn test_crossed_milestone() {
        let milestones = [150, 280, 380];
        assert_eq!(crossed_milestone(Some(140), 160, &milestones), Some(150));
        assert_eq!(crossed_milestone(Some(160), 170, &milestones), None);
        assert_eq!(crossed_milestone(Some(149), 150, &milestones), Some(150));
        assert_eq!(crossed_milestone(Some(150), 150, &milestones), None);
        assert_eq!(crossed_milestone(Some(100), 390, &milestones), Some(380));
        assert_eq!(crossed_milestone(None, 390, &milestones), None);
    }

    #[test]
    fn test_jittered_stays_in_bounds() {
        for _ in 0..100 {
            let delay = jittered(2.0, 0.5);
            assert!(delay >= Duration::from_secs_f64(1.5));
            assert!(delay <= Duration::from_secs_f64(2.5));
        }
        assert_eq!(jittered(0.1, 0.0), Duration::from_secs_f64(0.1));
        assert_eq!(jittered(0.0, 0.0), Duration::ZERO);
    }

    #[test]
    fn test_stop_signal_wait_times_out() {
        let stop = StopSignal::new();
        assert!(!stop.wait(Duration::from_millis(10)));
        assert!(!stop.is_set());
    }

    #[test]
    fn test_stop_signal_wakes_waiter() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.request();
        });

        let started = Instant::now();
        assert!(stop.wait(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
