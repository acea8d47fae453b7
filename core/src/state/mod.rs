//! Observable state of a streaming session.
//!
//! These are the types the session coordinator publishes to its UI collaborators,
//! none of them are authoritative for the playback element itself.

use serde::{Deserialize, Serialize};
use strum::Display;

/// Song details announced by the backend, may arrive before or after the asset is ready.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SongMetadata {
    pub title: String,
    pub artist: String,
}

impl SongMetadata {
    #[must_use]
    #[inline]
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }
}

/// Categories of fatal decoder failures.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum MediaErrorKind {
    /// fetching the manifest or a playlist failed
    Network,
    /// the manifest could not be understood, or it describes nothing playable
    Media,
    /// the segments use a container we can't demux
    Mux,
    /// the stream is encrypted
    KeySystem,
    Other,
}

/// Where a session currently is in its lifecycle.
///
/// Metadata is tracked separately in [`StateSession::metadata`], it can arrive in any of these.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SessionStatus {
    /// No session, either nothing was searched yet or the last one was reset.
    #[default]
    Idle,
    /// The channel is open (or opening) and the asset is not ready yet.
    Searching,
    /// The backend announced a locator, the media pipeline is loading it.
    Buffering,
    /// The media pipeline signaled the stream is playable.
    Ready,
    /// The channel closed (or never opened) before an asset was announced.
    ChannelClosed,
    /// The media pipeline hit a fatal error.
    Failed(MediaErrorKind),
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Searching => write!(f, "Searching"),
            Self::Buffering => write!(f, "Buffering"),
            Self::Ready => write!(f, "Ready"),
            Self::ChannelClosed => write!(f, "Channel Closed"),
            Self::Failed(kind) => write!(f, "Failed ({kind})"),
        }
    }
}

/// Playback position as reported by the playback element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    /// seconds
    pub current_time: f64,
    /// seconds, `0.0` while unknown
    pub duration: f64,
}

impl PlaybackState {
    /// How far into the song we are, in `[0, 1]`. `0.0` while the duration is unknown.
    #[must_use]
    #[inline]
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Snapshot of the current session, published after every change.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StateSession {
    /// The normalized query that started this session.
    pub query: Option<String>,
    /// Whether the UI should show a loading indicator.
    pub loading: bool,
    pub metadata: Option<SongMetadata>,
    /// The locator of the asset, only set once the backend explicitly marked it ready.
    pub locator: Option<String>,
    /// Whether the stream is playable, play controls stay disabled until this is set.
    pub media_ready: bool,
    pub status: SessionStatus,
    pub playback: PlaybackState,
}
