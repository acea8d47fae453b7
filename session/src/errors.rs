use std::time::Duration;

use freetunes_core::state::MediaErrorKind;
use thiserror::Error;
use url::Url;

/// Errors that can occur while opening a signaling channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Timed out connecting after {0:?}")]
    Timeout(Duration),
    #[error("Failed to send frame: {0}")]
    Send(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connection refused: {0}")]
    Refused(String),
}

/// Errors that can occur in the media pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid base url {url:?}: {source}")]
    InvalidBase {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid locator {locator:?}: {source}")]
    InvalidLocator {
        locator: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} responded with {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
    #[error("Timed out loading the stream after {0:?}")]
    Timeout(Duration),
    #[error("Failed to parse playlist: {0}")]
    Parse(String),
    #[error("Master playlist has no playable variants")]
    NoVariants,
    #[error("Media playlist has no segments")]
    EmptyPlaylist,
    #[error("Encrypted streams are not supported (segment {0})")]
    Encrypted(String),
    #[error("Unsupported segment container: {0}")]
    UnsupportedContainer(String),
}

impl PipelineError {
    /// The category this error is reported under when it's fatal.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> MediaErrorKind {
        match self {
            Self::Request(_) | Self::Status { .. } | Self::Timeout(_) => MediaErrorKind::Network,
            Self::Parse(_) | Self::NoVariants | Self::EmptyPlaylist => MediaErrorKind::Media,
            Self::UnsupportedContainer(_) => MediaErrorKind::Mux,
            Self::Encrypted(_) => MediaErrorKind::KeySystem,
            Self::InvalidBase { .. } | Self::InvalidLocator { .. } => MediaErrorKind::Other,
        }
    }
}

/// Errors returned to the UI by the session coordinator.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Search query is empty.")]
    EmptyQuery,
    #[error("The stream is not ready to play yet.")]
    NotReady,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_str_eq};
    use rstest::rstest;

    #[rstest]
    #[case(PipelineError::Timeout(Duration::from_secs(2)), MediaErrorKind::Network)]
    #[case(PipelineError::Parse("bad".into()), MediaErrorKind::Media)]
    #[case(PipelineError::NoVariants, MediaErrorKind::Media)]
    #[case(PipelineError::EmptyPlaylist, MediaErrorKind::Media)]
    #[case(PipelineError::UnsupportedContainer("seg.webm".into()), MediaErrorKind::Mux)]
    #[case(PipelineError::Encrypted("seg0.ts".into()), MediaErrorKind::KeySystem)]
    #[case(
        PipelineError::InvalidLocator { locator: "::".into(), source: url::ParseError::EmptyHost },
        MediaErrorKind::Other
    )]
    fn test_pipeline_error_kind(#[case] error: PipelineError, #[case] expected: MediaErrorKind) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn test_status_error_kind() {
        let error = PipelineError::Status {
            url: Url::parse("http://localhost/static/a.m3u8").unwrap(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        assert_eq!(error.kind(), MediaErrorKind::Network);
        assert_str_eq!(
            error.to_string(),
            "http://localhost/static/a.m3u8 responded with 404 Not Found"
        );
    }

    #[rstest]
    #[case(SessionError::EmptyQuery.to_string(), "Search query is empty.")]
    #[case(SessionError::NotReady.to_string(), "The stream is not ready to play yet.")]
    #[case(ChannelError::Refused("nope".into()).to_string(), "Connection refused: nope")]
    #[case(
        ChannelError::Timeout(Duration::from_secs(10)).to_string(),
        "Timed out connecting after 10s"
    )]
    fn test_error_messages(#[case] message: String, #[case] expected: &str) {
        assert_str_eq!(message, expected);
    }
}
