//! The media pipeline: turns an asset locator into something the playback element can play.
//!
//! At most one decoder is attached at any time, attaching always destroys the previous one
//! first. Each attachment gets a fresh id, which tags every event its decoder produces.

pub mod hls;

use freetunes_core::state::MediaErrorKind;
use log::{debug, error, info};
use url::Url;

use crate::{
    element::{MediaSource, PlaybackElement},
    errors::PipelineError,
    events::{EventSender, MediaEvent, MediaEventSender},
};

/// A running decoder.
pub trait Decoder: Send {
    /// Stop the decoder and release its resources. Must be idempotent.
    fn destroy(&mut self);
}

/// Creates decoders for adaptive streams.
pub trait DecoderLoader: Send {
    type Decoder: Decoder;

    /// Whether adaptive streams can be decoded at all, if not every asset is played directly.
    fn is_supported(&self) -> bool {
        true
    }

    /// Start loading the stream at `url`.
    ///
    /// The decoder reports exactly one [`MediaEvent`] through `events`, unless destroyed first.
    fn load(&self, url: Url, events: MediaEventSender) -> Self::Decoder;
}

/// How an asset is played.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Through a decoder (HLS manifests).
    Adaptive,
    /// Assigned straight to the element.
    Direct,
}

#[derive(Debug)]
struct Attachment<D> {
    id: u64,
    locator: String,
    url: Url,
    strategy: Strategy,
    decoder: Option<D>,
    /// whether the element's source was set from this attachment
    bound: bool,
}

pub struct MediaPipeline<L: DecoderLoader> {
    loader: L,
    base: Url,
    static_prefix: String,
    last_attachment: u64,
    active: Option<Attachment<L::Decoder>>,
}

impl<L: DecoderLoader> MediaPipeline<L> {
    /// Create a pipeline resolving locators against `server_url`.
    ///
    /// # Errors
    ///
    /// Fails if `server_url` is not a valid url.
    pub fn new(loader: L, server_url: &str, static_prefix: &str) -> Result<Self, PipelineError> {
        let mut base = Url::parse(server_url).map_err(|source| PipelineError::InvalidBase {
            url: server_url.to_string(),
            source,
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            loader,
            base,
            static_prefix: static_prefix.trim_matches('/').to_string(),
            last_attachment: 0,
            active: None,
        })
    }

    /// Resolve an asset locator to the url it's served from: `<server>/<static prefix>/<locator>`.
    ///
    /// Absolute http(s) locators are used as they are.
    ///
    /// # Errors
    ///
    /// Fails if the result is not a valid url.
    pub fn resolve(&self, locator: &str) -> Result<Url, PipelineError> {
        let locator = locator.trim();
        let invalid = |source| PipelineError::InvalidLocator {
            locator: locator.to_string(),
            source,
        };

        if locator.starts_with("http://") || locator.starts_with("https://") {
            return Url::parse(locator).map_err(invalid);
        }

        let relative = locator.trim_start_matches('/');
        let path = if self.static_prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{relative}", self.static_prefix)
        };
        self.base.join(&path).map_err(invalid)
    }

    #[must_use]
    pub fn strategy_for(&self, url: &Url) -> Strategy {
        let adaptive = std::path::Path::new(url.path())
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("m3u8"));

        if adaptive && self.loader.is_supported() {
            Strategy::Adaptive
        } else {
            Strategy::Direct
        }
    }

    /// Attach the asset at `locator`, destroying whatever was attached before.
    ///
    /// Returns the id of the new attachment. Readiness is reported later through `events`.
    ///
    /// # Errors
    ///
    /// Fails if the locator can't be resolved, in which case nothing is attached.
    pub fn attach(
        &mut self,
        locator: &str,
        element: &mut impl PlaybackElement,
        events: &EventSender,
    ) -> Result<u64, PipelineError> {
        self.destroy(element);

        let url = self.resolve(locator)?;
        let strategy = self.strategy_for(&url);
        self.last_attachment += 1;
        let id = self.last_attachment;
        let media_events = events.media(id);

        info!("Attaching {url} ({strategy:?}, attachment {id})");
        let decoder = match strategy {
            Strategy::Adaptive => Some(self.loader.load(url.clone(), media_events)),
            Strategy::Direct => {
                media_events.send(MediaEvent::Ready(MediaSource::Direct(url.clone())));
                None
            }
        };

        self.active = Some(Attachment {
            id,
            locator: locator.to_string(),
            url,
            strategy,
            decoder,
            bound: false,
        });
        Ok(id)
    }

    /// Hand a ready source to the element, if `attachment` is still the active one.
    ///
    /// The element's source is only ever set once per attachment.
    /// Returns `false` for a stale attachment.
    pub fn bind(
        &mut self,
        attachment: u64,
        source: MediaSource,
        element: &mut impl PlaybackElement,
    ) -> bool {
        match self.active.as_mut() {
            Some(active) if active.id == attachment => {
                if !active.bound {
                    element.set_source(Some(source));
                    active.bound = true;
                }
                true
            }
            _ => {
                debug!("Ignoring source from stale attachment {attachment}");
                false
            }
        }
    }

    /// Handle a fatal decoder error: the decoder is destroyed and the element detached.
    ///
    /// Returns `false` (and does nothing) for a stale attachment.
    pub fn on_fatal_error(
        &mut self,
        attachment: u64,
        kind: MediaErrorKind,
        element: &mut impl PlaybackElement,
    ) -> bool {
        let Some(active) = self.active.as_ref().filter(|active| active.id == attachment) else {
            debug!("Ignoring {kind} error from stale attachment {attachment}");
            return false;
        };

        match kind {
            MediaErrorKind::Network => error!("Fatal network error while loading {}", active.url),
            MediaErrorKind::Media => error!("Fatal media error in {}", active.url),
            MediaErrorKind::Mux => error!("Can't demux the segments of {}", active.url),
            MediaErrorKind::KeySystem => error!("Can't decrypt {}", active.url),
            MediaErrorKind::Other => error!("Fatal error while playing {}", active.url),
        }

        self.destroy(element);
        true
    }

    /// Destroy the active decoder (if any) and detach it from the element. Idempotent.
    pub fn destroy(&mut self, element: &mut impl PlaybackElement) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if let Some(decoder) = active.decoder.as_mut() {
            decoder.destroy();
        }
        if active.bound {
            element.set_source(None);
        }
        debug!("Destroyed attachment {} ({})", active.id, active.url);
    }

    /// Whether the asset at `locator` is the one currently attached.
    #[must_use]
    pub fn is_attached_to(&self, locator: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.locator == locator)
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn strategy(&self) -> Option<Strategy> {
        self.active.as_ref().map(|active| active.strategy)
    }

    #[must_use]
    pub const fn loader(&self) -> &L {
        &self.loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        element::HeadlessElement,
        events::{Envelope, Generation, SessionEvent},
        test_utils::{MockDecoderLoader, sample_stream},
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn pipeline(loader: MockDecoderLoader) -> MediaPipeline<MockDecoderLoader> {
        MediaPipeline::new(loader, "http://localhost:8000", "static").unwrap()
    }

    fn events() -> (EventSender, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (EventSender::new(Generation::default(), tx), rx)
    }

    #[rstest]
    #[case("abc/abc.m3u8", "http://localhost:8000/static/abc/abc.m3u8")]
    #[case("/abc.m3u8", "http://localhost:8000/static/abc.m3u8")]
    #[case("  song.mp3 ", "http://localhost:8000/static/song.mp3")]
    #[case("https://cdn.example.com/x.m3u8", "https://cdn.example.com/x.m3u8")]
    fn test_resolve(#[case] locator: &str, #[case] expected: &str) {
        let pipeline = pipeline(MockDecoderLoader::new());
        assert_eq!(pipeline.resolve(locator).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("http://localhost:8000/", "/static/", "x.m3u8", "http://localhost:8000/static/x.m3u8")]
    #[case(
        "http://localhost:8000/api",
        "static",
        "x.m3u8",
        "http://localhost:8000/api/static/x.m3u8"
    )]
    #[case("http://localhost:8000", "", "x.m3u8", "http://localhost:8000/x.m3u8")]
    fn test_resolve_with_other_bases(
        #[case] server: &str,
        #[case] prefix: &str,
        #[case] locator: &str,
        #[case] expected: &str,
    ) {
        let pipeline = MediaPipeline::new(MockDecoderLoader::new(), server, prefix).unwrap();
        assert_eq!(pipeline.resolve(locator).unwrap().as_str(), expected);
    }

    #[test]
    fn test_invalid_base() {
        let result = MediaPipeline::new(MockDecoderLoader::new(), "not a url", "static");
        assert!(matches!(result, Err(PipelineError::InvalidBase { .. })));
    }

    #[rstest]
    #[case::manifest("abc.m3u8", true, Strategy::Adaptive)]
    #[case::uppercase_manifest("ABC.M3U8", true, Strategy::Adaptive)]
    #[case::unsupported("abc.m3u8", false, Strategy::Direct)]
    #[case::plain_file("abc.mp3", true, Strategy::Direct)]
    fn test_strategy(#[case] locator: &str, #[case] supported: bool, #[case] expected: Strategy) {
        let loader = if supported {
            MockDecoderLoader::new()
        } else {
            MockDecoderLoader::unsupported()
        };
        let pipeline = pipeline(loader);
        let url = pipeline.resolve(locator).unwrap();
        assert_eq!(pipeline.strategy_for(&url), expected);
    }

    #[test]
    fn test_direct_attach_is_ready_immediately() {
        let mut pipeline = pipeline(MockDecoderLoader::new());
        let mut element = HeadlessElement::new();
        let (events, mut rx) = events();

        let id = pipeline.attach("song.mp3", &mut element, &events).unwrap();

        assert_eq!(pipeline.strategy(), Some(Strategy::Direct));
        assert_eq!(pipeline.loader().load_count(), 0);
        assert_eq!(
            rx.try_recv().unwrap().event,
            SessionEvent::Media {
                attachment: id,
                event: MediaEvent::Ready(MediaSource::Direct(
                    Url::parse("http://localhost:8000/static/song.mp3").unwrap()
                )),
            }
        );
    }

    #[test]
    fn test_attach_destroys_the_previous_decoder() {
        let loader = MockDecoderLoader::new();
        let mut pipeline = pipeline(loader.clone());
        let mut element = HeadlessElement::new();
        let (events, _rx) = events();

        let first = pipeline.attach("a.m3u8", &mut element, &events).unwrap();
        let second = pipeline.attach("b.m3u8", &mut element, &events).unwrap();

        assert_ne!(first, second);
        assert_eq!(loader.load_count(), 2);
        assert_eq!(loader.live(), 1);
        assert_eq!(loader.max_live(), 1);
        assert!(pipeline.is_attached_to("b.m3u8"));
        assert!(!pipeline.is_attached_to("a.m3u8"));
    }

    #[test]
    fn test_bind_sets_the_source_once() {
        let mut pipeline = pipeline(MockDecoderLoader::new());
        let mut element = HeadlessElement::new();
        let (events, _rx) = events();

        let id = pipeline.attach("a.m3u8", &mut element, &events).unwrap();
        let url = pipeline.resolve("a.m3u8").unwrap();
        let source = MediaSource::Stream(sample_stream(url));

        assert!(pipeline.bind(id, source.clone(), &mut element));
        element.set_current_time(4.0);
        // a second bind doesn't reassign (and so doesn't rewind) the element
        assert!(pipeline.bind(id, source, &mut element));
        assert!((element.current_time() - 4.0).abs() < f64::EPSILON);

        assert!(!pipeline.bind(
            id + 1,
            MediaSource::Direct(Url::parse("http://localhost:8000/x.mp3").unwrap()),
            &mut element
        ));
    }

    #[test]
    fn test_fatal_error_tears_down() {
        let loader = MockDecoderLoader::new();
        let mut pipeline = pipeline(loader.clone());
        let mut element = HeadlessElement::new();
        let (events, _rx) = events();

        let id = pipeline.attach("a.m3u8", &mut element, &events).unwrap();
        let url = pipeline.resolve("a.m3u8").unwrap();
        pipeline.bind(id, MediaSource::Stream(sample_stream(url)), &mut element);

        assert!(!pipeline.on_fatal_error(id + 1, MediaErrorKind::Network, &mut element));
        assert!(pipeline.is_attached());

        assert!(pipeline.on_fatal_error(id, MediaErrorKind::Network, &mut element));
        assert!(!pipeline.is_attached());
        assert!(!element.has_source());
        assert_eq!(loader.live(), 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let loader = MockDecoderLoader::new();
        let mut pipeline = pipeline(loader.clone());
        let mut element = HeadlessElement::new();
        let (events, _rx) = events();

        pipeline.attach("a.m3u8", &mut element, &events).unwrap();
        pipeline.destroy(&mut element);
        pipeline.destroy(&mut element);

        assert!(!pipeline.is_attached());
        assert_eq!(loader.live(), 0);
        assert_eq!(loader.destroyed(), 1);
    }

    #[test]
    fn test_failed_attach_leaves_nothing_attached() {
        let mut pipeline =
            MediaPipeline::new(MockDecoderLoader::new(), "http://localhost:8000", "static")
                .unwrap();
        let mut element = HeadlessElement::new();
        let (events, _rx) = events();

        pipeline.attach("a.m3u8", &mut element, &events).unwrap();
        let result = pipeline.attach("https://[::1", &mut element, &events);

        assert!(matches!(result, Err(PipelineError::InvalidLocator { .. })));
        assert!(!pipeline.is_attached());
    }
}
