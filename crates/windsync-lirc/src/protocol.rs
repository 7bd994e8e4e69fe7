//! lircd command lines.

use crate::LircError;

/// Command that turns the fans off.
pub const OFF_COMMAND: &str = "OFF";

/// Highest IR emitter channel on supported transmitters.
pub const MAX_CHANNEL: u8 = 4;

/// Line that fires `command` once on `remote`.
pub fn send_once_line(remote: &str, command: &str) -> String {
    format!("SEND_ONCE {} {}\n", remote, command)
}

/// Line that enables exactly `channels` on the transmitter.
pub fn set_transmitters_line(channels: &[u8]) -> Result<String, LircError> {
    if channels.is_empty() {
        return Err(LircError::NoChannels);
    }
    if let Some(&bad) = channels.iter().find(|c| !(1..=MAX_CHANNEL).contains(*c)) {
        return Err(LircError::InvalidChannel(bad));
    }

    let list: Vec<String> = channels.iter().map(u8::to_string).collect();
    Ok(format!("SET_TRANSMITTERS {}\n", list.join(" ")))
}

/// Split a wind-track command into the atomic commands it sends.
///
/// `"LOW,SWING"` fires `LOW` then `SWING`. Empty pieces are skipped.
pub fn split_commands(commands: &str) -> impl Iterator<Item = &str> {
    commands
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
}
