//! Event sinks.
//!
//! The streamer pushes every [`UiEvent`] into an [`EventSink`]. Closures are
//! sinks, and [`ChannelSink`] forwards into an unbounded tokio channel so a
//! consumer task can run the event processor elsewhere.

use strand_core::UiEvent;
use tokio::sync::mpsc;

use crate::errors::{Result, StreamError};

/// Destination for emitted events.
pub trait EventSink {
    /// Deliver one event.
    fn send(&mut self, event: UiEvent) -> Result<()>;
}

impl<F> EventSink for F
where
    F: FnMut(UiEvent),
{
    fn send(&mut self, event: UiEvent) -> Result<()> {
        self(event);
        Ok(())
    }
}

/// Sink backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    /// Wrap a sender.
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, event: UiEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| StreamError::Sink)
    }
}
