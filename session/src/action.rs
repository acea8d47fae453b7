//! The intents UI collaborators send to the session coordinator.
#![allow(clippy::module_name_repetitions)]

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Start a new session for the given (raw) query, tearing down the current one.
    Search(String),
    /// Tear down the current session.
    Reset,
    /// Control the playback element.
    Playback(PlaybackAction),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackAction {
    /// Toggle play/pause
    Toggle,
    /// Seek relative to the current position, in seconds (negative to rewind).
    Skip(f64),
    /// Seek to a fraction of the duration, as in a click on the progress bar.
    SeekFraction(f64),
}
