//! Trainer
//!
//! Watches a game character's training session: checks that the game is in
//! front, reads the character level and zen balance from screenshots, and
//! posts Discord notifications on milestones and problems. Diagnostic flags
//! run a single check against sample screenshots and exit.

mod audio;
mod automation;
mod capture;
mod diagnostics;
mod notify;
mod ocr;
mod paths;
mod vision;

use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::diagnostics::Diagnostic;
use crate::notify::DiscordNotifier;

const LOG_FILE_NAME: &str = "trainer.log";

#[derive(Parser, Debug)]
#[command(name = "trainer", version)]
#[command(about = "Automated training monitor with Discord notifications")]
struct Args {
    /// Config file (defaults to config.json next to the executable)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Send a plain test notification and exit
    #[arg(long)]
    test_notification: bool,

    /// Send a test notification with a screenshot attachment and exit
    #[arg(long)]
    test_notification_img: bool,

    /// Read the level from vision/screenshot_level.png and exit
    #[arg(long)]
    test_get_level: bool,

    /// Run the dialog detector on vision/screenshot_dialog.png and exit
    #[arg(long)]
    test_dialog: bool,

    /// Run the in-game detector on vision/screenshot_level.png and exit
    #[arg(long)]
    test_ingame: bool,

    /// Run the inventory detector on vision/screenshot_inventory.png and exit
    #[arg(long)]
    test_inventory: bool,

    /// Run the character menu detector on vision/screenshot_level.png and exit
    #[arg(long)]
    test_character: bool,

    /// Search image-find-test/needle.png in image-find-test/screenshot.png and exit
    #[arg(long)]
    test_image_find: bool,

    /// Read zen from vision/screenshot_inventory.png and exit
    #[arg(long)]
    test_zen: bool,
}

impl Args {
    /// The first diagnostic flag set, in declaration order.
    fn diagnostic(&self) -> Option<Diagnostic> {
        [
            (self.test_notification, Diagnostic::Notification),
            (self.test_notification_img, Diagnostic::NotificationImage),
            (self.test_get_level, Diagnostic::Level),
            (self.test_dialog, Diagnostic::Dialog),
            (self.test_ingame, Diagnostic::Ingame),
            (self.test_inventory, Diagnostic::Inventory),
            (self.test_character, Diagnostic::Character),
            (self.test_image_find, Diagnostic::ImageFind),
            (self.test_zen, Diagnostic::Zen),
        ]
        .into_iter()
        .find_map(|(set, diagnostic)| set.then_some(diagnostic))
    }
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Console output plus an append-only `logs/trainer.log`.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_logging() -> FilterHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "trainer=info".into());
    let (filter, handle) = reload::Layer::new(filter);

    let file_layer = std::fs::create_dir_all(paths::get_logs_dir())
        .and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths::get_logs_dir().join(LOG_FILE_NAME))
        })
        .map_err(|e| eprintln!("Log file unavailable: {}", e))
        .ok()
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    handle
}

fn apply_log_level(handle: &FilterHandle, level: &str) {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    match EnvFilter::try_new(format!("trainer={level}")) {
        Ok(filter) => {
            if let Err(e) = handle.reload(filter) {
                warn!("Failed to apply log level '{}': {}", level, e);
            }
        }
        Err(e) => warn!("Invalid log level '{}': {}", level, e),
    }
}

/// Records panics in the log before the default hook runs.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("[PANIC]{} {}", location, msg);
        default_hook(panic_info);
    }));
}

/// The screen capture API needs the WinRT runtime on this thread.
#[cfg(windows)]
fn init_platform() -> anyhow::Result<()> {
    unsafe {
        windows::Win32::System::WinRT::RoInitialize(
            windows::Win32::System::WinRT::RO_INIT_MULTITHREADED,
        )?
    };
    Ok(())
}

#[cfg(not(windows))]
fn init_platform() -> anyhow::Result<()> {
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let log_handle = init_logging();
    install_panic_hook();

    let config = automation::load_config(args.config.as_deref());
    apply_log_level(&log_handle, &config.log_level);

    if let Err(e) = paths::ensure_directories(&config.output_dirs()) {
        error!("Failed to create output directories: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(diagnostic) = args.diagnostic() {
        let notifier = DiscordNotifier::new(&config.notification);
        return ExitCode::from(diagnostics::run(diagnostic, &config, &notifier));
    }

    if let Err(e) = init_platform() {
        error!("Failed to initialize platform APIs: {:#}", e);
        return ExitCode::FAILURE;
    }

    match automation::run(&config) {
        Ok(state) => {
            info!("Trainer exited ({})", state);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Trainer encountered an error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
