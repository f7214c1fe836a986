//! The four event sources drained by the scheduler each frame.
//!
//! Each source has its own channel and its own buffer. [`EventChannels::poll`]
//! does one non-blocking selection across all of them and returns at most one
//! event. When several are ready the pick is random, so no source can
//! permanently starve another within a frame.

use crossbeam_channel::{Receiver, Sender, never, select};
use quarry_mesh::BuildCompletion;
use quarry_net::{NetworkLink, ProtocolError};
use tracing::info;

/// Work queued from any thread to run on the scheduler thread.
pub type DeferredCallback = Box<dyn FnOnce() + Send + 'static>;

/// Thread-safe handle for queueing [`DeferredCallback`]s.
#[derive(Clone)]
pub struct DeferredSender {
    pub(crate) tx: Sender<DeferredCallback>,
}

impl DeferredSender {
    /// Queue `f` to run on the scheduler thread during the next drain phase,
    /// before that frame's render submission. Returns `false` once the
    /// scheduler is gone.
    pub fn enqueue_deferred<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }
}

/// One event taken from a source.
pub enum FrameEvent<P> {
    /// A fatal protocol error.
    Fatal(ProtocolError),
    Packet(P),
    Completion(BuildCompletion),
    Deferred(DeferredCallback),
}

/// Identifies one of the four sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventSource {
    Errors,
    Packets,
    Completions,
    Deferred,
}

/// Result of a single [`EventChannels::poll`].
pub enum Polled<P> {
    Event(FrameEvent<P>),
    /// Every sender for this source is gone. Close it and poll again.
    Closed(EventSource),
    /// Nothing is ready right now.
    Empty,
}

/// Receiving ends of all four sources, owned by the scheduler.
pub struct EventChannels<P> {
    errors: Receiver<ProtocolError>,
    packets: Receiver<P>,
    completions: Receiver<BuildCompletion>,
    deferred: Receiver<DeferredCallback>,
    deferred_tx: Sender<DeferredCallback>,
}

impl<P> EventChannels<P> {
    /// Wire the network link and the completion receiver together with a
    /// fresh deferred-callback queue.
    pub fn new(link: NetworkLink<P>, completions: Receiver<BuildCompletion>) -> Self {
        let (deferred_tx, deferred) = crossbeam_channel::unbounded();
        Self {
            errors: link.errors,
            packets: link.packets,
            completions,
            deferred,
            deferred_tx,
        }
    }

    pub fn deferred_sender(&self) -> DeferredSender {
        DeferredSender {
            tx: self.deferred_tx.clone(),
        }
    }

    /// Take one ready event from any source without blocking.
    pub fn poll(&self) -> Polled<P> {
        select! {
            recv(self.errors) -> msg => match msg {
                Ok(err) => Polled::Event(FrameEvent::Fatal(err)),
                Err(_) => Polled::Closed(EventSource::Errors),
            },
            recv(self.packets) -> msg => match msg {
                Ok(packet) => Polled::Event(FrameEvent::Packet(packet)),
                Err(_) => Polled::Closed(EventSource::Packets),
            },
            recv(self.completions) -> msg => match msg {
                Ok(done) => Polled::Event(FrameEvent::Completion(done)),
                Err(_) => Polled::Closed(EventSource::Completions),
            },
            recv(self.deferred) -> msg => match msg {
                Ok(f) => Polled::Event(FrameEvent::Deferred(f)),
                Err(_) => Polled::Closed(EventSource::Deferred),
            },
            default => Polled::Empty,
        }
    }

    /// Stop polling a disconnected source. A closed receiver is always
    /// "ready", so it is swapped for one that never is.
    pub fn close(&mut self, source: EventSource) {
        info!(?source, "event source disconnected");
        match source {
            EventSource::Errors => self.errors = never(),
            EventSource::Packets => self.packets = never(),
            EventSource::Completions => self.completions = never(),
            EventSource::Deferred => self.deferred = never(),
        }
    }

    /// Completions waiting to be drained.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Packets waiting to be drained.
    pub fn pending_packets(&self) -> usize {
        self.packets.len()
    }
}
