//! Outbound alerts through a Discord webhook.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::automation::config::NotificationConfig;

const USER_AGENT: &str = concat!("trainer/", env!("CARGO_PKG_VERSION"));

pub const STAR_EMOJI: &str = "⭐";
pub const COIN_EMOJI: &str = "🪙";
pub const WARNING_ICON: &str = "⚠️";

/// Delivers a message, optionally with an image.
pub trait Notifier {
    /// Returns whether the message was accepted. Failures are logged, never raised.
    fn send(&self, message: &str, attachment: Option<&Path>) -> bool;
}

/// Posts to a Discord webhook.
pub struct DiscordNotifier {
    webhook_url: String,
    username: Option<String>,
    client: Option<Client>,
}

impl DiscordNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| error!("Failed to build HTTP client: {}", e))
            .ok();

        Self {
            webhook_url: config.webhook_url.trim().to_string(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            client,
        }
    }

    fn post(&self, message: &str, attachment: Option<&Path>) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("HTTP client unavailable"))?;

        let mut payload = json!({ "content": message });
        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }

        let request = client.post(&self.webhook_url);
        let request = match attachment {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!("Attachment file not found: {}", path.display()));
                }
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read attachment {}", path.display()))?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "attachment.png".to_string());
                let part = Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/octet-stream")?;
                let form = Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                request.multipart(form)
            }
            None => request.json(&payload),
        };

        let response = request.send().context("Unable to reach Discord webhook")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Discord webhook failed with HTTP {}: {}", status, body));
        }
        Ok(())
    }
}

impl Notifier for DiscordNotifier {
    fn send(&self, message: &str, attachment: Option<&Path>) -> bool {
        if self.webhook_url.is_empty() {
            warn!("Discord webhook URL not configured; message dropped: {}", message);
            return false;
        }
        match self.post(message, attachment) {
            Ok(()) => true,
            Err(e) => {
                error!("{:#}", e);
                false
            }
        }
    }
}

fn mention(config: &NotificationConfig) -> String {
    format!("<@{}>", config.user_id)
}

/// `<@UID> NAME. MESSAGE EMOJI`, defaulting to a star.
pub fn info_message(config: &NotificationConfig, message: &str, emoji: Option<&str>) -> String {
    format!(
        "{} {}. {} {}",
        mention(config),
        config.character_name,
        message,
        emoji.unwrap_or(STAR_EMOJI)
    )
}

/// `<@UID> Error for NAME. MESSAGE ⚠️`
pub fn error_message(config: &NotificationConfig, message: &str) -> String {
    format!(
        "{} Error for {}. {} {}",
        mention(config),
        config.character_name,
        message,
        WARNING_ICON
    )
}

/// Message of the plain notification test.
pub fn test_message(config: &NotificationConfig) -> String {
    format!(
        "{} {} has reached level 000 {}",
        mention(config),
        config.character_name,
        STAR_EMOJI
    )
}

/// Message of the image notification test.
pub fn issue_message(config: &NotificationConfig) -> String {
    format!(
        "{} Routine for character {} has encountered an issue {}.",
        mention(config),
        config.character_name,
        WARNING_ICON
    )
}

/// Sends an informational message and logs the outcome.
pub fn send_info(
    notifier: &dyn Notifier,
    config: &NotificationConfig,
    message: &str,
    emoji: Option<&str>,
) -> bool {
    let success = notifier.send(&info_message(config, message, emoji), None);
    if success {
        info!("Discord info message sent: {}", message);
    } else {
        error!("Failed to send Discord info message: {}", message);
    }
    success
}

/// Sends an error message with an optional screenshot crop and logs the outcome.
pub fn send_error(
    notifier: &dyn Notifier,
    config: &NotificationConfig,
    message: &str,
    attachment: Option<&Path>,
) -> bool {
    let success = notifier.send(&error_message(config, message), attachment);
    if success {
        info!("Discord error message sent: {}", message);
    } else {
        error!("Failed to send Discord error message: {}", message);
    }
    success
}
