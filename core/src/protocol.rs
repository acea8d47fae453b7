//! The signaling protocol spoken over the per-search WebSocket.
//!
//! Outbound, the client sends an [`AuthFrame`] followed by the raw query text.
//! Inbound, the backend pushes JSON objects that are classified into [`ChannelEvent`]s:
//!
//! ```json
//! {"artist": "A", "song": "lofi beats", "id": "...", "hls": false, "liked": false}
//! {"hls": true, "file": "abc/abc.m3u8"}
//! ```
//!
//! `hls: true` means `file` holds the locator of a playable asset, `hls: false` means the
//! asset is not ready yet, and a frame without `hls` only carries metadata (if anything).

use serde::{Deserialize, Serialize};

use crate::{errors::ProtocolError, state::SongMetadata};

/// The first frame sent on every channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    #[serde(rename = "type")]
    kind: AuthKind,
    /// Opaque access token, `null` when the user isn't logged in.
    pub token: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AuthKind {
    Auth,
}

impl AuthFrame {
    #[must_use]
    #[inline]
    pub const fn new(token: Option<String>) -> Self {
        Self {
            kind: AuthKind::Auth,
            token,
        }
    }

    /// Serialize the frame for the wire.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails, which can't happen for this type in practice.
    #[inline]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The raw shape of an inbound frame, every field is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub hls: Option<bool>,
    #[serde(default)]
    pub file: Option<String>,
    /// keep-alive frames are `{"type": "ping"}`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// the auth acknowledgement is `{"status": "auth_ok"}`
    #[serde(default)]
    pub status: Option<String>,
}

/// Readiness of the transcoded asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetStatus {
    /// The backend is still transcoding.
    NotReady,
    /// The asset can be fetched from the given (relative) locator.
    Ready(String),
}

/// What a channel reports to the session coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Metadata(SongMetadata),
    AssetStatus(AssetStatus),
    /// The connection is gone, emitted exactly once per channel.
    Closed,
}

impl ServerFrame {
    /// Turn the frame into the events it carries, metadata first.
    ///
    /// # Errors
    ///
    /// Fails if the frame claims the asset is ready without naming it.
    pub fn into_events(self) -> Result<Vec<ChannelEvent>, ProtocolError> {
        let mut events = Vec::with_capacity(2);

        match (self.artist, self.song) {
            (Some(artist), Some(song)) if !artist.is_empty() && !song.is_empty() => {
                events.push(ChannelEvent::Metadata(SongMetadata::new(song, artist)));
            }
            _ => {}
        }

        match self.hls {
            Some(true) => match self.file {
                Some(file) if !file.trim().is_empty() => {
                    events.push(ChannelEvent::AssetStatus(AssetStatus::Ready(file)));
                }
                _ => return Err(ProtocolError::ReadyWithoutLocator),
            },
            Some(false) => events.push(ChannelEvent::AssetStatus(AssetStatus::NotReady)),
            None => {}
        }

        Ok(events)
    }
}

/// Parse an inbound text frame into the events it carries.
///
/// Frames that carry nothing of interest (keep-alives, acknowledgements, `{}`) produce no events.
///
/// # Errors
///
/// Fails if the frame is not a JSON object, or if it's malformed.
/// Callers are expected to log and drop such frames.
pub fn parse_frame(text: &str) -> Result<Vec<ChannelEvent>, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }

    let frame: ServerFrame = serde_json::from_value(value)?;
    frame.into_events()
}
