//! Messages flowing from the channel and decoder tasks into the session coordinator.
//!
//! Every message is tagged with the [`Generation`] of the session that produced it, and media
//! messages additionally with the id of the decoder attachment. The coordinator drops anything
//! that doesn't match what is currently live, so a torn-down channel or decoder can never touch
//! the state of the session that replaced it.
#![allow(clippy::module_name_repetitions)]

use std::fmt::Display;

use freetunes_core::{protocol::ChannelEvent, state::MediaErrorKind};
use log::trace;
use tokio::sync::mpsc::UnboundedSender;

use crate::element::MediaSource;

/// Identifies one session, advanced on every search and every reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    #[must_use]
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a decoder reports about the stream it was asked to load.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaEvent {
    /// The stream is parsed and playable, this is the only trigger for readiness.
    Ready(MediaSource),
    /// The decoder gave up, it has already released its own resources.
    FatalError(MediaErrorKind),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    Media { attachment: u64, event: MediaEvent },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub generation: Generation,
    pub event: SessionEvent,
}

/// A handle given to channels so they can report events for one specific session.
#[derive(Clone, Debug)]
pub struct EventSender {
    generation: Generation,
    tx: UnboundedSender<Envelope>,
}

impl EventSender {
    #[must_use]
    #[inline]
    pub const fn new(generation: Generation, tx: UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    #[inline]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Send an event to the coordinator.
    ///
    /// Returns `false` if the coordinator is gone, which senders treat as a signal to stop.
    #[inline]
    pub fn send(&self, event: SessionEvent) -> bool {
        let envelope = Envelope {
            generation: self.generation,
            event,
        };
        if let Err(e) = self.tx.send(envelope) {
            trace!("Coordinator is gone, dropping {:?}", e.0.event);
            return false;
        }
        true
    }

    #[inline]
    pub fn channel(&self, event: ChannelEvent) -> bool {
        self.send(SessionEvent::Channel(event))
    }

    /// A sender for the decoder of one specific attachment.
    #[must_use]
    #[inline]
    pub fn media(&self, attachment: u64) -> MediaEventSender {
        MediaEventSender {
            inner: self.clone(),
            attachment,
        }
    }
}

/// A handle given to decoders, tags events with both the session and the attachment.
#[derive(Clone, Debug)]
pub struct MediaEventSender {
    inner: EventSender,
    attachment: u64,
}

impl MediaEventSender {
    #[must_use]
    #[inline]
    pub const fn attachment(&self) -> u64 {
        self.attachment
    }

    #[must_use]
    #[inline]
    pub const fn generation(&self) -> Generation {
        self.inner.generation
    }

    #[inline]
    pub fn send(&self, event: MediaEvent) -> bool {
        self.inner.send(SessionEvent::Media {
            attachment: self.attachment,
            event,
        })
    }
}
