//! The signaling channel: one WebSocket per search.
//!
//! Opening a channel sends the auth frame followed by the raw query, after that the backend
//! pushes frames until it closes the connection. Every inbound text frame is parsed and the
//! resulting [`ChannelEvent`]s forwarded to the coordinator, tagged with the session they belong
//! to. Malformed frames are logged and dropped, they never end the channel.

use std::{future::Future, time::Duration};

use freetunes_core::protocol::{AuthFrame, ChannelEvent, parse_frame};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::oneshot,
    task::JoinHandle,
};
use tokio_tungstenite::{WebSocketStream, connect_async, tungstenite::Message};
use tracing::instrument;

use crate::{errors::ChannelError, events::EventSender};

/// Everything needed to open a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenRequest {
    pub url: String,
    pub auth: AuthFrame,
    /// The normalized query, sent verbatim after the auth frame.
    pub query: String,
}

/// An open signaling channel.
pub trait SignalingChannel: Send {
    /// Close the channel, no further events are delivered afterwards. Idempotent.
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Opens signaling channels.
///
/// Connectors are cloned into every pending open, so the coordinator can keep running (and
/// cancel the open) while a connection is being established.
pub trait Connector: Clone + Send + Sync + 'static {
    type Channel: SignalingChannel + 'static;

    /// Connect, then send the auth frame and the query, in that order.
    ///
    /// Events received on the channel are delivered through `events` until it's closed.
    fn open(
        &self,
        request: OpenRequest,
        events: EventSender,
    ) -> impl Future<Output = Result<Self::Channel, ChannelError>> + Send;
}

/// Forward the events carried by an inbound text frame.
///
/// Returns `false` if the coordinator is gone.
pub fn dispatch_frame(text: &str, events: &EventSender) -> bool {
    match parse_frame(text) {
        Ok(parsed) => parsed.into_iter().all(|event| events.channel(event)),
        Err(e) => {
            warn!("Dropping malformed frame {text:?}: {e}");
            true
        }
    }
}

/// Opens channels over WebSockets.
#[derive(Clone, Debug)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    #[inline]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    type Channel = ChannelTask;

    #[instrument(skip_all, fields(url = %request.url, generation = %events.generation()))]
    async fn open(
        &self,
        request: OpenRequest,
        events: EventSender,
    ) -> Result<Self::Channel, ChannelError> {
        let connect = connect_async(request.url.as_str());
        let (mut ws, _) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| ChannelError::Timeout(self.connect_timeout))?
            .map_err(|e| ChannelError::Connect(Box::new(e)))?;

        ws.send(Message::text(request.auth.to_json()?))
            .await
            .map_err(|e| ChannelError::Send(Box::new(e)))?;
        ws.send(Message::text(request.query))
            .await
            .map_err(|e| ChannelError::Send(Box::new(e)))?;
        info!(
            "Channel to {} open for session {}",
            request.url,
            events.generation()
        );

        Ok(ChannelTask::spawn(ws, events))
    }
}

/// A channel whose inbound frames are pumped by a background task.
#[derive(Debug)]
pub struct ChannelTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ChannelTask {
    /// Start pumping frames from `ws` into `events`.
    pub fn spawn<S>(ws: WebSocketStream<S>, events: EventSender) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(pump(ws, events, shutdown_rx));

        Self {
            shutdown: Some(shutdown_tx),
            handle,
        }
    }
}

impl SignalingChannel for ChannelTask {
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            // the pump may already have stopped on its own
            let _ = shutdown.send(());
        }
    }

    fn is_open(&self) -> bool {
        self.shutdown.is_some() && !self.handle.is_finished()
    }
}

impl Drop for ChannelTask {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward inbound frames until either side closes the connection.
///
/// `Closed` is reported only when the remote end goes away, a local shutdown is silent.
async fn pump<S>(
    mut ws: WebSocketStream<S>,
    events: EventSender,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                if let Err(e) = ws.close(None).await {
                    debug!("Error closing channel: {e}");
                }
                debug!("Channel for session {} closed locally", events.generation());
                return;
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !dispatch_frame(text.as_str(), &events) {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Remote closed the channel: {frame:?}");
                    break;
                }
                // binary frames, pings and pongs carry nothing we use
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Channel error: {e}");
                    break;
                }
                None => break,
            }
        }
    }

    events.channel(ChannelEvent::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Envelope, Generation, SessionEvent};
    use freetunes_core::{protocol::AssetStatus, state::SongMetadata};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::{
        net::TcpListener,
        sync::mpsc::{UnboundedReceiver, unbounded_channel},
    };
    use tokio_tungstenite::accept_async;

    fn events() -> (EventSender, UnboundedReceiver<Envelope>) {
        let (tx, rx) = unbounded_channel();
        (EventSender::new(Generation::default().next(), tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Envelope>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|envelope| envelope.event)
            .collect()
    }

    #[rstest]
    #[case::malformed("not json at all", vec![])]
    #[case::ping(r#"{"type":"ping"}"#, vec![])]
    #[case::metadata(
        r#"{"artist":"A","song":"S","hls":false}"#,
        vec![
            SessionEvent::Channel(ChannelEvent::Metadata(SongMetadata::new("S", "A"))),
            SessionEvent::Channel(ChannelEvent::AssetStatus(AssetStatus::NotReady)),
        ]
    )]
    fn test_dispatch_frame(#[case] text: &str, #[case] expected: Vec<SessionEvent>) {
        let (events, mut rx) = events();
        assert!(dispatch_frame(text, &events));
        assert_eq!(drain(&mut rx), expected);
    }

    #[test]
    fn test_dispatch_frame_without_coordinator() {
        let (events, rx) = events();
        drop(rx);
        assert!(!dispatch_frame(r#"{"hls":false}"#, &events));
    }

    /// Accept one connection, record what the client sends first, then play `script` back.
    async fn backend(script: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();

            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => received.push(text.as_str().to_string()),
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            for frame in script {
                ws.send(Message::text(frame)).await.unwrap();
            }
            ws.close(None).await.unwrap();
            // let the close handshake finish
            while let Some(Ok(_)) = ws.next().await {}
            received
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_ws_channel_end_to_end() {
        let (url, server) = backend(vec![
            r#"{"status":"auth_ok"}"#,
            r#"{"artist":"A","song":"lofi beats song","id":"xyz","hls":false,"liked":false}"#,
            "No valid video ID found, aborting.",
            r#"{"type":"ping"}"#,
            r#"{"hls":true,"file":"abc/abc.m3u8"}"#,
        ])
        .await;
        let (events, mut rx) = events();
        let generation = events.generation();

        let connector = WsConnector::new(Duration::from_secs(5));
        let request = OpenRequest {
            url,
            auth: AuthFrame::new(Some("tok".into())),
            query: "lofi beats song".into(),
        };
        let _channel = connector.open(request, events).await.unwrap();

        let mut received = Vec::new();
        while let Some(envelope) = rx.recv().await {
            assert_eq!(envelope.generation, generation);
            let closed = envelope.event == SessionEvent::Channel(ChannelEvent::Closed);
            received.push(envelope.event);
            if closed {
                break;
            }
        }

        assert_eq!(
            received,
            vec![
                SessionEvent::Channel(ChannelEvent::Metadata(SongMetadata::new(
                    "lofi beats song",
                    "A"
                ))),
                SessionEvent::Channel(ChannelEvent::AssetStatus(AssetStatus::NotReady)),
                SessionEvent::Channel(ChannelEvent::AssetStatus(AssetStatus::Ready(
                    "abc/abc.m3u8".into()
                ))),
                SessionEvent::Channel(ChannelEvent::Closed),
            ]
        );

        // auth strictly before the query
        assert_eq!(
            server.await.unwrap(),
            vec![
                r#"{"type":"auth","token":"tok"}"#.to_string(),
                "lofi beats song".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_local_close_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            // read until the client goes away
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (events, mut rx) = events();
        let connector = WsConnector::new(Duration::from_secs(5));
        let request = OpenRequest {
            url,
            auth: AuthFrame::new(None),
            query: "q song".into(),
        };
        let mut channel = connector.open(request, events).await.unwrap();
        assert!(channel.is_open());

        channel.close();
        channel.close();
        assert!(!channel.is_open());

        server.await.unwrap();
        // the pump held the last sender
        drop(channel);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        drop(listener);

        let (events, _rx) = events();
        let connector = WsConnector::new(Duration::from_secs(5));
        let request = OpenRequest {
            url,
            auth: AuthFrame::new(None),
            query: "q song".into(),
        };

        let result = connector.open(request, events).await;
        assert!(matches!(result, Err(ChannelError::Connect(_))));
    }
}
