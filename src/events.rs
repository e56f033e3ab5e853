//! Mailbox types for the single-consumer link loop.
//!
//! Transport callbacks, capture buffers and output-device completions are
//! all turned into [`LinkEvent`]s and delivered to one loop that owns the
//! connection. Each event is stamped with the [`AttemptId`] of the
//! connection attempt that produced it, so late events from a superseded
//! attempt can be recognised and dropped.

use tokio::sync::mpsc;

pub type AttemptId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Transport(TransportEvent),
    /// Raw microphone samples from the processing unit.
    Captured(Vec<f32>),
    /// The output device finished playing emission `seq`.
    EmissionFinished { seq: u64 },
}

#[derive(Debug)]
pub struct Envelope {
    pub attempt: AttemptId,
    pub event: LinkEvent,
}

/// Sending half of the link mailbox, bound to one connection attempt.
///
/// Cheap to clone and safe to use from device threads.
#[derive(Debug, Clone)]
pub struct EventSink {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSink {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Returns `false` once the link loop has gone away.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.tx
            .send(Envelope {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }

    pub fn transport(&self, event: TransportEvent) -> bool {
        self.emit(LinkEvent::Transport(event))
    }
}

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    Client,
    Server,
}

/// Notifications delivered to whoever mounts the link.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Connected,
    Closed(CloseCause),
    Error(String),
    /// The server rejected the link as expired; the whole client should be rebuilt.
    ReloadRequired,
}
