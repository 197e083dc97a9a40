//! Automation runner - main entry point for the control loop.
//!
//! Builds the real collaborators, starts the signal listener thread and
//! steps the state machine until it reaches a terminal state.

use anyhow::{Context, Result};
use std::thread;
use tracing::{error, info};

use crate::audio::SystemAudio;
use crate::automation::config::TrainerConfig;
use crate::automation::detection::VisionPipeline;
use crate::automation::input::SystemInput;
use crate::automation::state::{Collaborators, CycleContext, CycleState, StopSignal};
use crate::capture::{DesktopWindows, MonitorCapture};
use crate::notify::DiscordNotifier;

/// Runs the loop until it is stopped or a check fails.
///
/// Returns the terminal state.
pub fn run(config: &TrainerConfig) -> Result<CycleState> {
    let stop = StopSignal::new();
    spawn_signal_listener(stop.clone())?;

    let capture = MonitorCapture;
    let input = SystemInput::new();
    let windows = DesktopWindows;
    let audio = SystemAudio;
    let notifier = DiscordNotifier::new(&config.notification);
    let reader = VisionPipeline::new(config);

    let io = Collaborators {
        capture: &capture,
        input: &input,
        windows: &windows,
        audio: &audio,
        notifier: &notifier,
        reader: &reader,
    };

    info!("Starting trainer loop (Ctrl+C to stop)");
    info!("Run directory: {}", config.run_dir.display());

    Ok(run_until_done(CycleContext::new(config, io, stop)))
}

/// Steps `ctx` until it reports completion.
pub fn run_until_done(mut ctx: CycleContext<'_>) -> CycleState {
    loop {
        match ctx.step() {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                error!("Trainer error: {:#}", e);
                ctx.state = CycleState::ErrorTerminal;
                break;
            }
        }
    }

    match ctx.state {
        CycleState::Stopped => info!(
            "Trainer stopped after {} completed cycles",
            ctx.cycles_completed
        ),
        CycleState::ErrorTerminal => error!(
            "Trainer ended with an error after {} completed cycles",
            ctx.cycles_completed
        ),
        state => info!("Trainer ended in state {}", state),
    }
    ctx.state
}

/// Requests a stop when the process receives Ctrl+C (or SIGTERM on Unix).
fn spawn_signal_listener(stop: StopSignal) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(shutdown_signal());
            info!("Shutdown signal received, stopping after the current step...");
            stop.request();
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
