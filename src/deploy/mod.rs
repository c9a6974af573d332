use std::time::Duration;

use crate::console::ConsoleSession;
use crate::error::LabError;
use crate::models::DeviceConfig;
use crate::utils::truncate_lines;

/// Push a device's command sequence over an open console and return the
/// transcript. Responses are not interpreted: a command the device rejected
/// still counts as sent.
pub async fn apply(
    session: &mut ConsoleSession,
    config: &DeviceConfig,
    settle: Duration,
    quiet: Duration,
) -> Result<String, LabError> {
    // Banner and anything left from boot
    let mut transcript = session.read_available(quiet).await?;

    for command in config.commands() {
        session.send_line(command, settle).await?;
    }
    transcript.push_str(&session.read_available(quiet).await?);
    if !session.is_open() {
        tracing::warn!("{} closed its console right after the last command", config.device());
    }

    tracing::debug!(
        "{} ({}) transcript after {} commands:\n{}",
        config.device(),
        config.role(),
        config.commands().len(),
        truncate_lines(&transcript, 40)
    );
    Ok(transcript)
}
