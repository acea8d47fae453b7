//! Adaptive (HLS) streams: fetching and parsing playlists.
//!
//! A manifest can either be a master playlist, in which case the highest-bandwidth variant is
//! selected and its media playlist fetched, or a media playlist directly.

use std::time::Duration;

use hls_m3u8::{Decryptable, MasterPlaylist, MediaPlaylist, tags::VariantStream};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tracing::instrument;
use url::Url;

use super::{Decoder, DecoderLoader};
use crate::{
    element::MediaSource,
    errors::PipelineError,
    events::{MediaEvent, MediaEventSender},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub url: Url,
    pub duration: Duration,
}

/// Container format of the segments, detected from their extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Container {
    /// MPEG-2 Transport Stream
    Ts,
    /// Fragmented MP4
    Fmp4,
    /// Raw ADTS audio
    Aac,
    Mp3,
}

impl Container {
    fn detect(uri: &str) -> Result<Self, PipelineError> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "ts" | "m2ts" => Ok(Self::Ts),
            "mp4" | "m4s" | "m4a" => Ok(Self::Fmp4),
            "aac" => Ok(Self::Aac),
            "mp3" => Ok(Self::Mp3),
            _ => Err(PipelineError::UnsupportedContainer(uri.to_string())),
        }
    }
}

/// A parsed, playable adaptive stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaStream {
    /// The url the stream was requested from.
    pub manifest_url: Url,
    /// The media playlist the segments come from, same as `manifest_url` without a master playlist.
    pub playlist_url: Url,
    /// Advertised bandwidth of the selected variant.
    pub bandwidth: Option<u64>,
    pub target_duration: Duration,
    pub segments: Vec<Segment>,
    pub container: Container,
    /// Whether the playlist is complete (`#EXT-X-ENDLIST`).
    pub end_list: bool,
}

impl MediaStream {
    /// Total duration of all segments.
    #[must_use]
    #[inline]
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|segment| segment.duration).sum()
    }
}

/// A variant of a master playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub url: Url,
    pub bandwidth: u64,
}

#[must_use]
#[inline]
pub fn is_master_playlist(text: &str) -> bool {
    text.contains("#EXT-X-STREAM-INF")
}

/// Parse a master playlist and select the variant with the highest bandwidth.
///
/// # Errors
///
/// Fails if the playlist can't be parsed, or has no (resolvable) variants.
pub fn select_variant(text: &str, manifest_url: &Url) -> Result<Variant, PipelineError> {
    let master =
        MasterPlaylist::try_from(text).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let (uri, bandwidth) = master
        .variant_streams
        .iter()
        .filter_map(|variant| match variant {
            VariantStream::ExtXStreamInf {
                uri, stream_data, ..
            } => Some((uri.to_string(), stream_data.bandwidth())),
            VariantStream::ExtXIFrame { .. } => None,
        })
        .max_by_key(|(_, bandwidth)| *bandwidth)
        .ok_or(PipelineError::NoVariants)?;

    let url = manifest_url
        .join(&uri)
        .map_err(|source| PipelineError::InvalidLocator {
            locator: uri,
            source,
        })?;

    Ok(Variant { url, bandwidth })
}

/// Parse a media playlist into a [`MediaStream`].
///
/// # Errors
///
/// Fails if the playlist can't be parsed, is empty, is encrypted, or if its segments are in a
/// container that can't be played.
pub fn parse_media_playlist(
    text: &str,
    manifest_url: Url,
    playlist_url: Url,
    bandwidth: Option<u64>,
) -> Result<MediaStream, PipelineError> {
    let playlist =
        MediaPlaylist::try_from(text).map_err(|e| PipelineError::Parse(e.to_string()))?;

    let mut segments = Vec::new();
    for segment in playlist.segments.values() {
        let uri = segment.uri().to_string();
        if !segment.keys().is_empty() {
            return Err(PipelineError::Encrypted(uri));
        }
        let url = playlist_url
            .join(&uri)
            .map_err(|source| PipelineError::InvalidLocator {
                locator: uri.clone(),
                source,
            })?;
        segments.push(Segment {
            url,
            duration: segment.duration.duration(),
        });
    }

    let first = segments.first().ok_or(PipelineError::EmptyPlaylist)?;
    let container = Container::detect(first.url.path())?;

    Ok(MediaStream {
        manifest_url,
        playlist_url,
        bandwidth,
        target_duration: playlist.target_duration,
        segments,
        container,
        end_list: text.contains("#EXT-X-ENDLIST"),
    })
}

async fn fetch_text(client: &reqwest::Client, url: &Url) -> Result<String, PipelineError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Status {
            url: url.clone(),
            status,
        });
    }
    Ok(response.text().await?)
}

/// Fetch the manifest at `url` (and the selected variant, if it's a master playlist).
///
/// # Errors
///
/// Fails if any request fails or any playlist is unusable.
#[instrument(skip(client))]
pub async fn load_stream(
    client: &reqwest::Client,
    url: Url,
) -> Result<MediaStream, PipelineError> {
    let text = fetch_text(client, &url).await?;

    if is_master_playlist(&text) {
        let variant = select_variant(&text, &url)?;
        debug!("Selected variant {} ({} bps)", variant.url, variant.bandwidth);
        let media = fetch_text(client, &variant.url).await?;
        parse_media_playlist(&media, url, variant.url, Some(variant.bandwidth))
    } else {
        parse_media_playlist(&text, url.clone(), url, None)
    }
}

/// Loads adaptive streams over HTTP.
#[derive(Clone, Debug)]
pub struct HlsDecoderLoader {
    client: reqwest::Client,
    timeout: Duration,
}

impl HlsDecoderLoader {
    #[must_use]
    #[inline]
    pub const fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl DecoderLoader for HlsDecoderLoader {
    type Decoder = HlsDecoder;

    fn load(&self, url: Url, events: MediaEventSender) -> Self::Decoder {
        let client = self.client.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let load = load_stream(&client, url.clone());
            let result = match tokio::time::timeout(timeout, load).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout(timeout)),
            };

            let event = match result {
                Ok(stream) => {
                    info!(
                        "Stream {url} is ready ({} segments, {:?})",
                        stream.segments.len(),
                        stream.duration()
                    );
                    MediaEvent::Ready(MediaSource::Stream(stream))
                }
                Err(e) => {
                    error!("Failed to load stream {url}: {e}");
                    MediaEvent::FatalError(e.kind())
                }
            };

            if !events.send(event) {
                warn!("Session ended before stream {url} finished loading");
            }
        });

        HlsDecoder {
            handle: Some(handle),
        }
    }
}

/// A stream being loaded, destroying it stops the load.
#[derive(Debug)]
pub struct HlsDecoder {
    handle: Option<JoinHandle<()>>,
}

impl Decoder for HlsDecoder {
    fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for HlsDecoder {
    fn drop(&mut self) {
        self.destroy();
    }
}
