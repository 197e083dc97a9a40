//! Audio cues played through the platform's command-line player.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Fire-and-forget sound playback.
pub trait AudioPlayer {
    fn play(&self, path: &Path);
}

/// Spawns a player process and does not wait for it.
#[derive(Debug, Default)]
pub struct SystemAudio;

impl AudioPlayer for SystemAudio {
    fn play(&self, path: &Path) {
        if !path.exists() {
            warn!("Audio file not found: {}", path.display());
            return;
        }

        debug!("Playing audio: {}", path.display());
        if spawn_reaped(player_commands(path)).is_none() {
            warn!("No audio player available for {}", path.display());
        }
    }
}

/// Starts the first command that spawns. A background thread waits on the
/// child so it does not linger as a zombie.
fn spawn_reaped(commands: Vec<Command>) -> Option<JoinHandle<()>> {
    for mut command in commands {
        match command.stdout(Stdio::null()).stderr(Stdio::null()).spawn() {
            Ok(mut child) => {
                return Some(std::thread::spawn(move || {
                    if let Err(e) = child.wait() {
                        debug!("Audio player did not exit cleanly: {}", e);
                    }
                }));
            }
            Err(e) => debug!("Player {:?} unavailable: {}", command.get_program(), e),
        }
    }
    None
}

/// Candidate player invocations, in order of preference.
fn player_commands(path: &Path) -> Vec<Command> {
    if cfg!(windows) {
        let escaped = path.display().to_string().replace('\'', "''");
        let script = format!(
            "Add-Type -AssemblyName presentationCore; \
             $p = New-Object System.Windows.Media.MediaPlayer; \
             $p.Open([uri]'{escaped}'); $p.Play(); \
             Start-Sleep -Milliseconds 500; \
             while ($p.NaturalDuration.HasTimeSpan -and $p.Position -lt $p.NaturalDuration.TimeSpan) {{ Start-Sleep -Milliseconds 200 }}"
        );
        let mut command = Command::new("powershell");
        command.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
        vec![command]
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("afplay");
        command.arg(path);
        vec![command]
    } else {
        let mut ffplay = Command::new("ffplay");
        ffplay.args(["-nodisp", "-autoexit", "-loglevel", "quiet"]).arg(path);
        let mut paplay = Command::new("paplay");
        paplay.arg(path);
        vec![ffplay, paplay]
    }
}
