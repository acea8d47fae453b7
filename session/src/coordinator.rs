//! The session coordinator.
//!
//! Owns the signaling channel, the media pipeline, and the playback element, and is the only
//! thing that changes any of them. A session starts with [`SessionCoordinator::submit_search`]
//! and ends with the next search or a [`SessionCoordinator::reset`], every session gets a new
//! [`Generation`] and events from any other generation are ignored.
//!
//! The observable [`StateSession`] is published to UI collaborators after every change.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use freetunes_core::{
    config::ClientSettings,
    protocol::{AssetStatus, AuthFrame, ChannelEvent},
    state::{PlaybackState, SessionStatus, SongMetadata, StateSession},
};
use log::{debug, error, info, trace, warn};
use tokio::sync::{
    broadcast,
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tracing::instrument;

use crate::{
    action::{PlaybackAction, SessionAction},
    channel::{Connector, OpenRequest, SignalingChannel, WsConnector},
    element::PlaybackElement,
    errors::{ChannelError, PipelineError, SessionError},
    events::{Envelope, EventSender, Generation, MediaEvent, SessionEvent},
    pipeline::{DecoderLoader, MediaPipeline, hls::HlsDecoderLoader},
    termination::Interrupted,
    token::TokenSource,
};

pub const TICK_RATE: Duration = Duration::from_millis(100);

/// A channel that is still connecting, dropping it abandons the connection.
type PendingOpen<Ch> = Pin<Box<dyn Future<Output = Result<Ch, ChannelError>> + Send>>;

/// Wait for the pending open, if there is one.
async fn opening<Ch>(pending: &mut Option<PendingOpen<Ch>>) -> Result<Ch, ChannelError> {
    match pending {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

/// Derive the query sent to the backend: whitespace is trimmed and collapsed, then `suffix`
/// is appended.
///
/// # Errors
///
/// Fails if nothing is left of the query after trimming.
pub fn normalize_query(query: &str, suffix: &str) -> Result<String, SessionError> {
    let words = query.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() {
        return Err(SessionError::EmptyQuery);
    }
    Ok(format!("{}{suffix}", words.join(" ")))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Where signaling channels connect to.
    pub wss_url: String,
    /// Appended to every normalized query.
    pub query_suffix: String,
}

impl From<&ClientSettings> for SessionOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            wss_url: settings.wss_url.clone(),
            query_suffix: settings.query_suffix.clone(),
        }
    }
}

pub struct SessionCoordinator<C: Connector, L: DecoderLoader, E: PlaybackElement> {
    connector: C,
    pipeline: MediaPipeline<L>,
    element: E,
    token_source: Arc<dyn TokenSource>,
    options: SessionOptions,

    generation: Generation,
    /// the current session's channel, while it's connecting
    pending_open: Option<PendingOpen<C::Channel>>,
    channel: Option<C::Channel>,
    state: StateSession,
    /// the last snapshot sent to `state_tx`
    published: Option<StateSession>,

    events_tx: UnboundedSender<Envelope>,
    events_rx: UnboundedReceiver<Envelope>,
    state_tx: UnboundedSender<StateSession>,
}

impl<E: PlaybackElement> SessionCoordinator<WsConnector, HlsDecoderLoader, E> {
    /// Create a coordinator talking to the backend described by `settings`.
    ///
    /// # Errors
    ///
    /// Fails if the server url is invalid, or the HTTP client can't be created.
    pub fn from_settings(
        settings: &ClientSettings,
        element: E,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<(Self, UnboundedReceiver<StateSession>), PipelineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()?;
        let loader = HlsDecoderLoader::new(client, settings.manifest_timeout());
        let pipeline = MediaPipeline::new(loader, &settings.server_url, &settings.static_prefix)?;
        let connector = WsConnector::new(settings.connect_timeout());

        Ok(Self::new(
            connector,
            pipeline,
            element,
            token_source,
            SessionOptions::from(settings),
        ))
    }
}

impl<C: Connector, L: DecoderLoader, E: PlaybackElement> SessionCoordinator<C, L, E> {
    /// Create a new coordinator, and return the receiver for listening to state updates.
    #[must_use]
    pub fn new(
        connector: C,
        pipeline: MediaPipeline<L>,
        element: E,
        token_source: Arc<dyn TokenSource>,
        options: SessionOptions,
    ) -> (Self, UnboundedReceiver<StateSession>) {
        let (state_tx, state_rx) = unbounded_channel();
        let (events_tx, events_rx) = unbounded_channel();

        let coordinator = Self {
            connector,
            pipeline,
            element,
            token_source,
            options,
            generation: Generation::default(),
            pending_open: None,
            channel: None,
            state: StateSession::default(),
            published: None,
            events_tx,
            events_rx,
            state_tx,
        };

        (coordinator, state_rx)
    }

    #[must_use]
    #[inline]
    pub const fn state(&self) -> &StateSession {
        &self.state
    }

    #[must_use]
    #[inline]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    #[inline]
    pub const fn element(&self) -> &E {
        &self.element
    }

    /// Whether the current session still has an open channel.
    #[must_use]
    pub fn channel_is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(SignalingChannel::is_open)
    }

    /// Whether the current session's channel is still connecting.
    #[must_use]
    #[inline]
    pub const fn is_connecting(&self) -> bool {
        self.pending_open.is_some()
    }

    /// Send the current state to listeners, if it changed since the last time.
    fn publish(&mut self) {
        if self.published.as_ref() == Some(&self.state) {
            return;
        }
        self.published = Some(self.state.clone());
        if self.state_tx.send(self.state.clone()).is_err() {
            trace!("No one is listening for state updates");
        }
    }

    /// Tear down the current session (if any): the element is paused and cleared, the decoder
    /// destroyed, and the channel closed.
    ///
    /// Safe to call at any time, calling it twice is the same as calling it once.
    #[instrument(skip(self), fields(generation = %self.generation))]
    pub fn reset(&mut self) {
        self.element.pause();
        self.element.set_source(None);
        self.element.load();
        self.element.set_current_time(0.0);

        self.pipeline.destroy(&mut self.element);

        if self.pending_open.take().is_some() {
            debug!("Abandoning the channel of session {}", self.generation);
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }

        // anything still in flight from the old session is now stale
        self.generation = self.generation.next();
        self.state = StateSession::default();
        self.publish();
    }

    /// Start a new session for `query`, tearing down the current one first, and wait for its
    /// channel to open.
    ///
    /// A channel that fails to open is not an error here, the session just ends up
    /// [`SessionStatus::ChannelClosed`].
    ///
    /// # Errors
    ///
    /// Fails if the query is empty, in which case the current session is left untouched.
    #[instrument(skip(self))]
    pub async fn submit_search(&mut self, query: &str) -> Result<(), SessionError> {
        self.start_search(query)?;
        if let Some(open) = self.pending_open.take() {
            let opened = open.await;
            self.on_opened(opened);
        }
        Ok(())
    }

    /// Start a new session for `query`, tearing down the current one first.
    ///
    /// The channel is left connecting, [`Self::main_loop`] picks it up once it's open. Until
    /// then the session can still be reset or replaced, which abandons the connection.
    ///
    /// # Errors
    ///
    /// Fails if the query is empty, in which case the current session is left untouched.
    pub fn start_search(&mut self, query: &str) -> Result<(), SessionError> {
        let query = normalize_query(query, &self.options.query_suffix)?;

        self.reset();
        info!("Searching for {query:?} (session {})", self.generation);
        self.state.query = Some(query.clone());
        self.state.loading = true;
        self.state.status = SessionStatus::Searching;
        self.publish();

        let request = OpenRequest {
            url: self.options.wss_url.clone(),
            auth: AuthFrame::new(self.token_source.token()),
            query,
        };
        let events = EventSender::new(self.generation, self.events_tx.clone());
        let connector = self.connector.clone();
        self.pending_open = Some(Box::pin(async move { connector.open(request, events).await }));

        Ok(())
    }

    /// The current session's channel finished connecting.
    fn on_opened(&mut self, opened: Result<C::Channel, ChannelError>) {
        match opened {
            Ok(channel) => self.channel = Some(channel),
            Err(e) => {
                error!("Failed to open the signaling channel: {e}");
                self.state.loading = false;
                self.state.status = SessionStatus::ChannelClosed;
                self.publish();
            }
        }
    }

    /// Handle every event that's already waiting, then publish.
    pub fn process_pending_events(&mut self) {
        while let Ok(envelope) = self.events_rx.try_recv() {
            self.handle_envelope(envelope);
        }
        self.publish();
    }

    fn handle_envelope(&mut self, Envelope { generation, event }: Envelope) {
        if generation != self.generation {
            debug!("Dropping event from stale session {generation}: {event:?}");
            return;
        }

        match event {
            SessionEvent::Channel(event) => self.on_channel_event(event),
            SessionEvent::Media { attachment, event } => self.on_media_event(attachment, event),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Metadata(metadata) => self.on_metadata(metadata),
            ChannelEvent::AssetStatus(AssetStatus::NotReady) => self.on_not_ready(),
            ChannelEvent::AssetStatus(AssetStatus::Ready(locator)) => self.on_ready(locator),
            ChannelEvent::Closed => self.on_closed(),
        }
    }

    fn on_metadata(&mut self, metadata: SongMetadata) {
        debug!("Now playing {} by {}", metadata.title, metadata.artist);
        self.state.metadata = Some(metadata);
    }

    fn on_not_ready(&mut self) {
        debug!("Asset is not ready yet, waiting for the backend");
        self.pipeline.destroy(&mut self.element);
        self.state.loading = true;
        self.state.locator = None;
        self.state.media_ready = false;
        self.state.status = SessionStatus::Searching;
        self.state.playback = PlaybackState::default();
    }

    fn on_ready(&mut self, locator: String) {
        if self.pipeline.is_attached_to(&locator) {
            debug!("{locator} is already attached");
            return;
        }

        let events = EventSender::new(self.generation, self.events_tx.clone());
        let attached = self.pipeline.attach(&locator, &mut self.element, &events);

        self.state.locator = Some(locator);
        self.state.loading = true;
        self.state.media_ready = false;
        self.state.playback = PlaybackState::default();
        self.state.status = match attached {
            Ok(_) => SessionStatus::Buffering,
            Err(e) => {
                error!("Failed to attach the asset: {e}");
                SessionStatus::Failed(e.kind())
            }
        };
    }

    fn on_closed(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }

        if self.state.locator.is_none() {
            warn!("Channel closed before the asset was ready");
            self.state.loading = false;
            self.state.status = SessionStatus::ChannelClosed;
        } else {
            debug!("Channel closed, the asset is already known");
        }
    }

    fn on_media_event(&mut self, attachment: u64, event: MediaEvent) {
        match event {
            MediaEvent::Ready(source) => {
                let duration = source.duration();
                if !self.pipeline.bind(attachment, source, &mut self.element) {
                    return;
                }
                info!("Stream is ready to play");
                self.state.media_ready = true;
                self.state.loading = false;
                self.state.status = SessionStatus::Ready;
                self.state.playback.duration = duration.map_or(0.0, |d| d.as_secs_f64());
            }
            MediaEvent::FatalError(kind) => {
                if !self
                    .pipeline
                    .on_fatal_error(attachment, kind, &mut self.element)
                {
                    return;
                }
                self.state.media_ready = false;
                self.state.loading = true;
                self.state.status = SessionStatus::Failed(kind);
                self.state.playback = PlaybackState::default();
            }
        }
    }

    /// Toggle between playing and paused, returns whether the element is now playing.
    ///
    /// # Errors
    ///
    /// Fails if the stream isn't ready.
    pub fn toggle_playback(&mut self) -> Result<bool, SessionError> {
        if !self.state.media_ready {
            return Err(SessionError::NotReady);
        }

        if self.element.is_paused() {
            self.element.play();
        } else {
            self.element.pause();
        }
        self.time_update();

        Ok(self.state.playback.is_playing)
    }

    /// Seek `seconds` relative to the current position, clamped to the stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream isn't ready.
    pub fn skip(&mut self, seconds: f64) -> Result<(), SessionError> {
        if !self.state.media_ready {
            return Err(SessionError::NotReady);
        }
        if !seconds.is_finite() {
            return Ok(());
        }

        let target = (self.element.current_time() + seconds).max(0.0);
        let duration = self.state.playback.duration;
        let target = if duration > 0.0 {
            target.min(duration)
        } else {
            target
        };

        self.element.set_current_time(target);
        self.time_update();
        Ok(())
    }

    /// Seek to `fraction` of the duration, ignored while the duration is unknown.
    ///
    /// # Errors
    ///
    /// Fails if the stream isn't ready.
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<(), SessionError> {
        if !self.state.media_ready {
            return Err(SessionError::NotReady);
        }
        let duration = self.state.playback.duration;
        if duration <= 0.0 || !fraction.is_finite() {
            return Ok(());
        }

        self.element
            .set_current_time(fraction.clamp(0.0, 1.0) * duration);
        self.time_update();
        Ok(())
    }

    /// Copy the element's playback position into the state.
    pub fn time_update(&mut self) {
        let duration = self.element.duration();
        self.state.playback = PlaybackState {
            is_playing: !self.element.is_paused(),
            current_time: self.element.current_time(),
            duration: if duration.is_finite() && duration > 0.0 {
                duration
            } else {
                self.state.playback.duration
            },
        };
        self.publish();
    }

    fn handle_action(&mut self, action: SessionAction) {
        match action {
            SessionAction::Search(query) => {
                if let Err(e) = self.start_search(&query) {
                    warn!("Search rejected: {e}");
                }
            }
            SessionAction::Reset => self.reset(),
            SessionAction::Playback(action) => {
                let result = match action {
                    PlaybackAction::Toggle => self.toggle_playback().map(|_| ()),
                    PlaybackAction::Skip(seconds) => self.skip(seconds),
                    PlaybackAction::SeekFraction(fraction) => self.seek_fraction(fraction),
                };
                if let Err(e) = result {
                    warn!("Ignoring {action:?}: {e}");
                }
            }
        }
    }

    /// Drive the session until interrupted, or until the action channel closes.
    ///
    /// The session is reset on the way out.
    pub async fn main_loop(
        &mut self,
        mut action_rx: UnboundedReceiver<SessionAction>,
        mut interrupt_rx: broadcast::Receiver<Interrupted>,
    ) -> Interrupted {
        // the initial state once
        self.published = None;
        self.publish();

        let mut ticker = tokio::time::interval(TICK_RATE);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                // Handle the actions coming from the UI
                action = action_rx.recv() => match action {
                    Some(action) => self.handle_action(action),
                    None => break Interrupted::UserInt,
                },
                Some(envelope) = self.events_rx.recv() => {
                    self.handle_envelope(envelope);
                    self.process_pending_events();
                },
                opened = opening(&mut self.pending_open) => {
                    self.pending_open = None;
                    self.on_opened(opened);
                },
                _ = ticker.tick() => self.time_update(),
                // Catch and handle interrupt signal to gracefully shutdown
                Ok(interrupted) = interrupt_rx.recv() => {
                    break interrupted;
                }
            }
        };

        info!("Shutting down the session ({result:?})");
        self.reset();
        result
    }
}
