//! The playback element the session coordinator drives.
//!
//! Only the coordinator writes to the element, and only on behalf of the live session.

use std::time::Duration;

use tokio::time::Instant;
use url::Url;

use crate::pipeline::hls::MediaStream;

/// What gets assigned to a playback element.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaSource {
    /// A plain media file, assigned directly.
    Direct(Url),
    /// A parsed adaptive stream.
    Stream(MediaStream),
}

impl MediaSource {
    #[must_use]
    #[inline]
    pub const fn url(&self) -> &Url {
        match self {
            Self::Direct(url) => url,
            Self::Stream(stream) => &stream.manifest_url,
        }
    }

    /// Total duration, if the source knows it up front.
    #[must_use]
    #[inline]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Direct(_) => None,
            Self::Stream(stream) => Some(stream.duration()),
        }
    }
}

/// The interface of a media element, modeled on what an audio tag offers.
pub trait PlaybackElement: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    /// Playback position in seconds.
    fn current_time(&self) -> f64;
    fn set_current_time(&mut self, seconds: f64);
    /// Duration in seconds, `NaN` while unknown.
    fn duration(&self) -> f64;
    /// Assign (or with `None`, clear) the source, this also resets the position.
    fn set_source(&mut self, source: Option<MediaSource>);
    fn has_source(&self) -> bool;
    /// Reset the element to the start of its current source, paused.
    fn load(&mut self);
}

/// A playback element with no audio output, playback is simulated with a clock.
///
/// Used by the CLI and in tests, the position advances while "playing" and stops at the end of
/// the source (when the duration is known).
#[derive(Debug, Default)]
pub struct HeadlessElement {
    source: Option<MediaSource>,
    /// position at the time `playing_since` was set (or the current position while paused)
    position: f64,
    playing_since: Option<Instant>,
}

impl HeadlessElement {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    #[inline]
    pub const fn source(&self) -> Option<&MediaSource> {
        self.source.as_ref()
    }

    fn known_duration(&self) -> Option<f64> {
        self.source
            .as_ref()
            .and_then(MediaSource::duration)
            .map(|d| d.as_secs_f64())
    }

    fn ended(&self) -> bool {
        self.known_duration()
            .is_some_and(|duration| self.current_time() >= duration)
    }

    /// freeze the position at its current value
    fn settle(&mut self) {
        self.position = self.current_time();
        self.playing_since = None;
    }
}

impl PlaybackElement for HeadlessElement {
    fn play(&mut self) {
        if self.source.is_none() || (self.playing_since.is_some() && !self.ended()) {
            return;
        }
        if self.ended() {
            self.position = 0.0;
        }
        self.playing_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        self.settle();
    }

    fn is_paused(&self) -> bool {
        self.playing_since.is_none() || self.ended()
    }

    fn current_time(&self) -> f64 {
        let position = self.playing_since.map_or(self.position, |since| {
            self.position + since.elapsed().as_secs_f64()
        });
        self.known_duration()
            .map_or(position, |duration| position.min(duration))
    }

    fn set_current_time(&mut self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        self.position = self
            .known_duration()
            .map_or(seconds, |duration| seconds.min(duration));
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
    }

    fn duration(&self) -> f64 {
        self.known_duration().unwrap_or(f64::NAN)
    }

    fn set_source(&mut self, source: Option<MediaSource>) {
        self.source = source;
        self.load();
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn load(&mut self) {
        self.position = 0.0;
        self.playing_since = None;
    }
}
