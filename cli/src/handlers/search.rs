//! Streams one search to completion, rendering the session state as it changes.

use std::fmt::Write;

use anyhow::anyhow;
use freetunes_core::{
    config::ClientSettings,
    state::{MediaErrorKind, SessionStatus, SongMetadata, StateSession},
};
use freetunes_session::{
    SessionCoordinator,
    action::{PlaybackAction, SessionAction},
    element::HeadlessElement,
    termination::{Interrupted, create_termination},
    token_source,
};
use log::debug;
use tokio::sync::mpsc::unbounded_channel;

use super::printing;

/// How a search ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The stream is ready (and we weren't asked to play it).
    Ready,
    /// The song played to the end.
    Finished,
    /// The backend closed the channel without ever announcing an asset.
    NotFound,
    Failed(MediaErrorKind),
    Interrupted,
}

/// What to do after rendering a state update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// Start playback.
    Play,
    Done(Outcome),
}

/// Renders only what changed between state updates.
#[derive(Debug)]
pub struct Watcher {
    play: bool,
    metadata: Option<SongMetadata>,
    status: SessionStatus,
    /// whole seconds of the last rendered progress
    progress: Option<(bool, u64)>,
    /// whether playback was requested
    started: bool,
    /// whether the element was seen playing
    played: bool,
}

impl Watcher {
    #[must_use]
    pub const fn new(play: bool) -> Self {
        Self {
            play,
            metadata: None,
            status: SessionStatus::Idle,
            progress: None,
            started: false,
            played: false,
        }
    }

    /// Render a state update.
    ///
    /// # Errors
    ///
    /// Fails if writing to `out` fails.
    pub fn update<W: Write>(
        &mut self,
        state: &StateSession,
        out: &mut W,
    ) -> Result<Step, std::fmt::Error> {
        if state.metadata.is_some() && state.metadata != self.metadata {
            self.metadata.clone_from(&state.metadata);
            if let Some(metadata) = &self.metadata {
                writeln!(out, "{}", printing::metadata(metadata))?;
            }
        }

        if state.status != self.status {
            self.status = state.status;
            writeln!(out, "{}", printing::status(state))?;

            match state.status {
                SessionStatus::Ready if !self.play => return Ok(Step::Done(Outcome::Ready)),
                SessionStatus::Ready if !self.started => {
                    self.started = true;
                    return Ok(Step::Play);
                }
                SessionStatus::ChannelClosed => return Ok(Step::Done(Outcome::NotFound)),
                SessionStatus::Failed(kind) => return Ok(Step::Done(Outcome::Failed(kind))),
                _ => {}
            }
        }

        if !self.started || !state.media_ready {
            return Ok(Step::Continue);
        }

        let playback = &state.playback;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let second = playback.current_time.max(0.0) as u64;
        if self.progress != Some((playback.is_playing, second)) {
            self.progress = Some((playback.is_playing, second));
            writeln!(out, "{}", printing::progress(playback))?;
        }

        if playback.is_playing {
            self.played = true;
        } else if self.played
            && playback.duration > 0.0
            && playback.current_time >= playback.duration
        {
            return Ok(Step::Done(Outcome::Finished));
        }

        Ok(Step::Continue)
    }
}

/// Search for `query` and follow the session until it's ready (or, with `play`, until the song
/// ends), or until interrupted.
///
/// # Errors
///
/// Fails if the session can't be set up, or if the song can't be streamed.
pub async fn run<W1: Write + Send, W2: Write + Send>(
    settings: &ClientSettings,
    token: Option<String>,
    query: &str,
    play: bool,
    stdout: &mut W1,
    stderr: &mut W2,
) -> anyhow::Result<()> {
    let token_source = token_source(settings, token);
    let (mut coordinator, mut state_rx) =
        SessionCoordinator::from_settings(settings, HeadlessElement::new(), token_source)?;

    let (mut terminator, interrupt_rx) = create_termination();
    let mut interrupts = terminator.subscribe();
    let (action_tx, action_rx) = unbounded_channel();

    let session = tokio::spawn(async move { coordinator.main_loop(action_rx, interrupt_rx).await });

    action_tx.send(SessionAction::Search(query.to_string()))?;

    let mut watcher = Watcher::new(play);
    let outcome = loop {
        tokio::select! {
            Some(state) = state_rx.recv() => match watcher.update(&state, stdout)? {
                Step::Continue => {}
                Step::Play => action_tx.send(SessionAction::Playback(PlaybackAction::Toggle))?,
                Step::Done(outcome) => break outcome,
            },
            Ok(interrupted) = interrupts.recv() => {
                debug!("Interrupted by {interrupted:?}");
                break Outcome::Interrupted;
            },
            else => break Outcome::Interrupted,
        }
    };

    // stops the session, unless a signal already did
    if let Err(e) = terminator.terminate(Interrupted::UserInt) {
        debug!("Session already stopped: {e}");
    }
    session.await?;

    match outcome {
        Outcome::Ready | Outcome::Finished => Ok(()),
        Outcome::Interrupted => {
            writeln!(stderr, "Interrupted")?;
            Ok(())
        }
        Outcome::NotFound => Err(anyhow!(
            "The backend closed the channel before the song was ready"
        )),
        Outcome::Failed(kind) => Err(anyhow!("Streaming failed with a {kind} error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freetunes_core::state::PlaybackState;
    use pretty_assertions::{assert_eq, assert_str_eq};

    fn state(status: SessionStatus) -> StateSession {
        StateSession {
            status,
            query: Some("lofi song".into()),
            loading: !matches!(status, SessionStatus::Ready | SessionStatus::ChannelClosed),
            media_ready: status == SessionStatus::Ready,
            locator: matches!(status, SessionStatus::Buffering | SessionStatus::Ready)
                .then(|| "abc.m3u8".to_string()),
            ..Default::default()
        }
    }

    fn playing(current_time: f64, is_playing: bool) -> StateSession {
        StateSession {
            playback: PlaybackState {
                is_playing,
                current_time,
                duration: 25.5,
            },
            ..state(SessionStatus::Ready)
        }
    }

    #[test]
    fn test_ready_without_play() {
        let mut watcher = Watcher::new(false);
        let mut out = String::new();

        assert_eq!(watcher.update(&StateSession::default(), &mut out), Ok(Step::Continue));
        assert_eq!(watcher.update(&state(SessionStatus::Searching), &mut out), Ok(Step::Continue));
        let with_metadata = StateSession {
            metadata: Some(SongMetadata::new("lofi song", "A")),
            ..state(SessionStatus::Searching)
        };
        assert_eq!(watcher.update(&with_metadata, &mut out), Ok(Step::Continue));
        // the same state again renders nothing
        assert_eq!(watcher.update(&with_metadata, &mut out), Ok(Step::Continue));
        assert_eq!(watcher.update(&state(SessionStatus::Buffering), &mut out), Ok(Step::Continue));
        assert_eq!(
            watcher.update(&state(SessionStatus::Ready), &mut out),
            Ok(Step::Done(Outcome::Ready))
        );

        assert_str_eq!(
            out,
            "Searching for \"lofi song\"...\nNow playing: lofi song by A\nBuffering: abc.m3u8\nReady: abc.m3u8\n"
        );
    }

    #[test]
    fn test_play_until_the_end() {
        let mut watcher = Watcher::new(true);
        let mut out = String::new();

        assert_eq!(watcher.update(&state(SessionStatus::Buffering), &mut out), Ok(Step::Continue));
        assert_eq!(watcher.update(&state(SessionStatus::Ready), &mut out), Ok(Step::Play));
        assert_eq!(watcher.update(&playing(0.0, true), &mut out), Ok(Step::Continue));
        assert_eq!(watcher.update(&playing(0.4, true), &mut out), Ok(Step::Continue));
        assert_eq!(watcher.update(&playing(1.2, true), &mut out), Ok(Step::Continue));
        assert_eq!(
            watcher.update(&playing(25.5, false), &mut out),
            Ok(Step::Done(Outcome::Finished))
        );

        assert_str_eq!(
            out,
            "Buffering: abc.m3u8\nReady: abc.m3u8\n> 0:00 / 0:25\n> 0:01 / 0:25\n|| 0:25 / 0:25\n"
        );
    }

    #[test]
    fn test_pause_before_the_end_keeps_going() {
        let mut watcher = Watcher::new(true);
        let mut out = String::new();

        watcher.update(&state(SessionStatus::Ready), &mut out).unwrap();
        watcher.update(&playing(3.0, true), &mut out).unwrap();
        assert_eq!(watcher.update(&playing(3.0, false), &mut out), Ok(Step::Continue));
    }

    #[test]
    fn test_not_found() {
        let mut watcher = Watcher::new(true);
        let mut out = String::new();

        watcher.update(&state(SessionStatus::Searching), &mut out).unwrap();
        assert_eq!(
            watcher.update(&state(SessionStatus::ChannelClosed), &mut out),
            Ok(Step::Done(Outcome::NotFound))
        );
    }

    #[test]
    fn test_failed() {
        let mut watcher = Watcher::new(false);
        let mut out = String::new();

        assert_eq!(
            watcher.update(&state(SessionStatus::Failed(MediaErrorKind::Mux)), &mut out),
            Ok(Step::Done(Outcome::Failed(MediaErrorKind::Mux)))
        );
        assert_str_eq!(out, "Failed (Mux)\n");
    }
}
