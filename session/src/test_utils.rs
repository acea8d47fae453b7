//! In-memory connectors and decoders, for driving the coordinator in tests.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use freetunes_core::{
    protocol::{AuthFrame, ChannelEvent},
    state::MediaErrorKind,
};
use url::Url;

use crate::{
    channel::{Connector, OpenRequest, SignalingChannel, dispatch_frame},
    element::MediaSource,
    errors::ChannelError,
    events::{EventSender, Generation, MediaEvent, MediaEventSender},
    pipeline::{
        Decoder, DecoderLoader,
        hls::{Container, MediaStream, Segment},
    },
};

/// A stream of three `.ts` segments, 25.5 seconds in total.
#[must_use]
pub fn sample_stream(manifest_url: Url) -> MediaStream {
    let segments = [10_000, 10_000, 5_500]
        .into_iter()
        .enumerate()
        .map(|(i, millis)| Segment {
            url: manifest_url
                .join(&format!("seg{i}.ts"))
                .unwrap_or_else(|_| manifest_url.clone()),
            duration: Duration::from_millis(millis),
        })
        .collect();

    MediaStream {
        playlist_url: manifest_url.clone(),
        manifest_url,
        bandwidth: None,
        target_duration: Duration::from_secs(10),
        segments,
        container: Container::Ts,
        end_list: true,
    }
}

#[derive(Debug, Default)]
struct Counter {
    live: usize,
    max_live: usize,
    destroyed: usize,
}

impl Counter {
    fn opened(&mut self) {
        self.live += 1;
        self.max_live = self.max_live.max(self.live);
    }

    fn closed(&mut self) {
        self.live -= 1;
        self.destroyed += 1;
    }
}

/// What a [`MockConnector`] was asked to open.
#[derive(Clone, Debug)]
pub struct Connection {
    pub generation: Generation,
    pub url: String,
    pub auth: AuthFrame,
    pub query: String,
    events: EventSender,
}

#[derive(Debug, Default)]
struct ConnectorState {
    connections: Vec<Connection>,
    counter: Counter,
    fail_next: bool,
}

/// A connector whose channels are fed by the test, frame by frame.
///
/// Frames can be pushed on any connection at any time, including ones that were closed, so
/// tests can simulate late deliveries.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next `open` fail.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    #[must_use]
    pub fn connections(&self) -> Vec<Connection> {
        self.lock().connections.clone()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Channels currently open.
    #[must_use]
    pub fn live(&self) -> usize {
        self.lock().counter.live
    }

    /// The most channels that were ever open at the same time.
    #[must_use]
    pub fn max_live(&self) -> usize {
        self.lock().counter.max_live
    }

    /// Deliver a text frame on the `index`th connection.
    pub fn push(&self, index: usize, frame: &str) {
        let events = self.lock().connections[index].events.clone();
        dispatch_frame(frame, &events);
    }

    /// Have the backend close the `index`th connection.
    pub fn close_remote(&self, index: usize) {
        let events = self.lock().connections[index].events.clone();
        events.channel(ChannelEvent::Closed);
    }
}

impl Connector for MockConnector {
    type Channel = MockChannel;

    async fn open(
        &self,
        request: OpenRequest,
        events: EventSender,
    ) -> Result<Self::Channel, ChannelError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(ChannelError::Refused(request.url));
        }

        state.connections.push(Connection {
            generation: events.generation(),
            url: request.url,
            auth: request.auth,
            query: request.query,
            events,
        });
        state.counter.opened();
        drop(state);

        Ok(MockChannel {
            state: self.state.clone(),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct MockChannel {
    state: Arc<Mutex<ConnectorState>>,
    open: bool,
}

impl SignalingChannel for MockChannel {
    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .counter
                .closed();
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    loads: Vec<(Url, MediaEventSender)>,
    counter: Counter,
}

/// A decoder loader whose decoders only report what the test tells them to.
#[derive(Clone, Debug)]
pub struct MockDecoderLoader {
    state: Arc<Mutex<LoaderState>>,
    supported: bool,
}

impl Default for MockDecoderLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDecoderLoader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            supported: true,
        }
    }

    /// A loader for an environment without adaptive streaming support.
    #[must_use]
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Urls of every load, in order.
    #[must_use]
    pub fn loads(&self) -> Vec<Url> {
        self.lock().loads.iter().map(|(url, _)| url.clone()).collect()
    }

    #[must_use]
    pub fn load_count(&self) -> usize {
        self.lock().loads.len()
    }

    /// Decoders currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.lock().counter.live
    }

    #[must_use]
    pub fn max_live(&self) -> usize {
        self.lock().counter.max_live
    }

    #[must_use]
    pub fn destroyed(&self) -> usize {
        self.lock().counter.destroyed
    }

    /// Have the `index`th decoder report its stream as parsed.
    pub fn ready(&self, index: usize) {
        let (url, events) = self.lock().loads[index].clone();
        events.send(MediaEvent::Ready(MediaSource::Stream(sample_stream(url))));
    }

    /// Have the `index`th decoder fail.
    pub fn fail(&self, index: usize, kind: MediaErrorKind) {
        let events = self.lock().loads[index].1.clone();
        events.send(MediaEvent::FatalError(kind));
    }
}

impl DecoderLoader for MockDecoderLoader {
    type Decoder = MockDecoder;

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn load(&self, url: Url, events: MediaEventSender) -> Self::Decoder {
        let mut state = self.lock();
        state.loads.push((url, events));
        state.counter.opened();

        MockDecoder {
            state: self.state.clone(),
            live: true,
        }
    }
}

#[derive(Debug)]
pub struct MockDecoder {
    state: Arc<Mutex<LoaderState>>,
    live: bool,
}

impl Decoder for MockDecoder {
    fn destroy(&mut self) {
        if std::mem::take(&mut self.live) {
            self.state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .counter
                .closed();
        }
    }
}

impl Drop for MockDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}
