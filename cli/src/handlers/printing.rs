//! Handles displaying session state in a human readable format.

use std::fmt::Write;

use freetunes_core::{
    config::Settings,
    format_time,
    state::{PlaybackState, SessionStatus, SongMetadata, StateSession},
};

pub fn settings(settings: &Settings) -> Result<String, std::fmt::Error> {
    let client = &settings.client;
    let mut output = String::new();

    writeln!(output, "Client:")?;
    writeln!(output, "\tServer URL: {}", client.server_url)?;
    writeln!(output, "\tSignaling URL: {}", client.wss_url)?;
    writeln!(output, "\tStatic Prefix: {}", client.static_prefix)?;
    writeln!(output, "\tQuery Suffix: {:?}", client.query_suffix)?;
    writeln!(output, "\tConnect Timeout: {}s", client.connect_timeout_secs)?;
    writeln!(output, "\tManifest Timeout: {}s", client.manifest_timeout_secs)?;
    match &client.token_file {
        Some(path) => writeln!(output, "\tToken File: {}", path.display())?,
        None => writeln!(output, "\tToken File: none")?,
    }
    writeln!(output, "\tLog Level: {}", client.log_level)?;

    Ok(output)
}

#[must_use]
pub fn metadata(metadata: &SongMetadata) -> String {
    format!("Now playing: {} by {}", metadata.title, metadata.artist)
}

#[must_use]
pub fn status(state: &StateSession) -> String {
    match (&state.status, &state.locator) {
        (SessionStatus::Searching, _) => match &state.query {
            Some(query) => format!("Searching for {query:?}..."),
            None => "Searching...".to_string(),
        },
        (SessionStatus::Buffering | SessionStatus::Ready, Some(locator)) => {
            format!("{}: {locator}", state.status)
        }
        (SessionStatus::ChannelClosed, _) => {
            "Channel Closed: the song could not be found, try another search".to_string()
        }
        (status, _) => status.to_string(),
    }
}

#[must_use]
pub fn progress(playback: &PlaybackState) -> String {
    format!(
        "{} {} / {}",
        if playback.is_playing { ">" } else { "||" },
        format_time(playback.current_time),
        format_time(playback.duration),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use freetunes_core::state::MediaErrorKind;
    use pretty_assertions::assert_str_eq;
    use rstest::rstest;

    #[test]
    fn test_settings() {
        let output = settings(&Settings::default()).unwrap();
        assert_str_eq!(
            output,
            "Client:\n\tServer URL: http://localhost:8000\n\tSignaling URL: ws://localhost:8000/ws\n\tStatic Prefix: static\n\tQuery Suffix: \" song\"\n\tConnect Timeout: 10s\n\tManifest Timeout: 20s\n\tToken File: none\n\tLog Level: INFO\n"
        );
    }

    #[test]
    fn test_metadata() {
        assert_str_eq!(
            metadata(&SongMetadata::new("lofi beats", "A")),
            "Now playing: lofi beats by A"
        );
    }

    #[rstest]
    #[case::searching(
        StateSession {
            status: SessionStatus::Searching,
            query: Some("lofi song".into()),
            ..Default::default()
        },
        "Searching for \"lofi song\"..."
    )]
    #[case::buffering(
        StateSession {
            status: SessionStatus::Buffering,
            locator: Some("abc.m3u8".into()),
            ..Default::default()
        },
        "Buffering: abc.m3u8"
    )]
    #[case::closed(
        StateSession {
            status: SessionStatus::ChannelClosed,
            ..Default::default()
        },
        "Channel Closed: the song could not be found, try another search"
    )]
    #[case::failed(
        StateSession {
            status: SessionStatus::Failed(MediaErrorKind::Network),
            locator: Some("abc.m3u8".into()),
            ..Default::default()
        },
        "Failed (Network)"
    )]
    fn test_status(#[case] state: StateSession, #[case] expected: &str) {
        assert_str_eq!(status(&state), expected);
    }

    #[rstest]
    #[case(
        PlaybackState { is_playing: true, current_time: 12.4, duration: 185.0 },
        "> 0:12 / 3:05"
    )]
    #[case(
        PlaybackState { is_playing: false, current_time: 0.0, duration: 0.0 },
        "|| 0:00 / 0:00"
    )]
    fn test_progress(#[case] playback: PlaybackState, #[case] expected: &str) {
        assert_str_eq!(progress(&playback), expected);
    }
}
