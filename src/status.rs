//! Read-only status flags for whoever mounts the link.

use serde::Serialize;
use tokio::sync::watch;

use crate::connection::Connection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub is_connected: bool,
    pub is_playing: bool,
    pub is_recording: bool,
}

impl LinkStatus {
    /// Derives the flags from the current attempt, if any.
    pub fn of(conn: Option<&Connection>) -> Self {
        match conn {
            Some(c) => LinkStatus {
                is_connected: c.is_open(),
                is_playing: c.is_open() && c.playback().is_playing(),
                is_recording: c.is_open() && c.capture().is_attached(),
            },
            None => LinkStatus::default(),
        }
    }
}

/// Publishes status changes; receivers only wake when a flag actually flips.
pub struct StatusPublisher {
    tx: watch::Sender<LinkStatus>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkStatus::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LinkStatus {
        *self.tx.borrow()
    }

    pub fn publish(&self, status: LinkStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            log::debug!("Status: {:?}", status);
            *current = status;
            true
        });
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
