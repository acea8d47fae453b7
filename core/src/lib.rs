use std::time::Duration;

use errors::DirectoryError;

pub mod config;
pub mod errors;
pub mod logger;
pub mod protocol;
pub mod state;

/// Get the config directory for freetunes.
///
/// | Platform | Value                                                            |
/// | -------- | ---------------------------------------------------------------- |
/// | Linux    | `$XDG_CONFIG_HOME/freetunes` or `$HOME/.config/freetunes`        |
/// | macOS    | `$HOME/Library/Application Support/com.freetunes.freetunes`      |
/// | Windows  | `{FOLDERID_RoamingAppData}\freetunes\freetunes\config`           |
///
/// # Errors
///
/// This function will return an error if the config directory could not be found.
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, DirectoryError> {
    directories::ProjectDirs::from("com", "freetunes", "freetunes")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or(DirectoryError::Config)
}

/// Format a duration as `HH:MM:SS.mm`, used for log timestamps.
#[must_use]
#[inline]
pub fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = duration.as_secs_f32() % 60.;

    format!("{hours:02}:{minutes:02}:{seconds:05.2}")
}

/// Format a playback position in seconds as `M:SS`, the way the player panel shows it.
///
/// Negative and non-finite inputs are shown as `0:00`.
#[must_use]
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_time(seconds: f64) -> String {
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };

    format!("{}:{:02}", seconds / 60, seconds % 60)
}
