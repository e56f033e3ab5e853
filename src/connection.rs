//! One connection attempt and its state machine.
//!
//! A fresh [`Connection`] is built for every `connect`/`reconnect`; it owns
//! the transport handle, the acquired capture stream and the per-attempt
//! capture pipeline and playback queue. Teardown is guarded by the state
//! value itself: only the first `begin_close` out of `Connecting`/`Open`
//! succeeds, every later request is a no-op.

use crate::audio::capture::CapturePipeline;
use crate::audio::device::StreamHandle;
use crate::audio::playback::PlaybackQueue;
use crate::error::{LinkError, Result};
use crate::events::{AttemptId, CloseCause};
use crate::net_link::TransportHandle;
use crate::protocol::OutboundFrame;

/// Invoked once when a reconnect reaches `Open`.
pub type SuccessCallback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosingByClient,
    ClosingByServer,
    Closed,
}

impl ConnectionState {
    /// `Connecting` or `Open`: a transport exists and teardown has not started.
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }

    pub fn is_closing_or_closed(self) -> bool {
        matches!(
            self,
            ConnectionState::ClosingByClient
                | ConnectionState::ClosingByServer
                | ConnectionState::Closed
        )
    }
}

pub struct Connection {
    id: AttemptId,
    state: ConnectionState,
    transport: Option<Box<dyn TransportHandle>>,
    stream: Option<StreamHandle>,
    capture: CapturePipeline,
    playback: PlaybackQueue,
    processor_loaded: bool,
    output_open: bool,
    visualizer_attached: bool,
    stop_pending: bool,
    in_flight: Option<u64>,
    on_open: Option<SuccessCallback>,
}

impl Connection {
    pub fn new(id: AttemptId, capture: CapturePipeline, playback: PlaybackQueue) -> Self {
        Self {
            id,
            state: ConnectionState::Idle,
            transport: None,
            stream: None,
            capture,
            playback,
            processor_loaded: false,
            output_open: false,
            visualizer_attached: false,
            stop_pending: false,
            in_flight: None,
            on_open: None,
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn capture(&self) -> &CapturePipeline {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CapturePipeline {
        &mut self.capture
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackQueue {
        &mut self.playback
    }

    // ---- transitions ----

    /// `Idle → Connecting`.
    pub fn begin_connecting(&mut self) -> bool {
        if self.state != ConnectionState::Idle {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        true
    }

    /// `Connecting → Open`.
    pub fn mark_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.transition(ConnectionState::Open);
        true
    }

    /// Claims the teardown. Returns `true` for exactly one caller per attempt.
    pub fn begin_close(&mut self, cause: CloseCause) -> bool {
        if self.state.is_closing_or_closed() {
            return false;
        }
        let next = match cause {
            CloseCause::Client => ConnectionState::ClosingByClient,
            CloseCause::Server => ConnectionState::ClosingByServer,
        };
        self.transition(next);
        true
    }

    pub fn finish_close(&mut self) {
        self.transition(ConnectionState::Closed);
    }

    /// Marks an attempt that failed before its transport existed.
    pub fn abandon(&mut self) {
        self.transition(ConnectionState::Closed);
    }

    fn transition(&mut self, next: ConnectionState) {
        log::info!("Connection #{}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    // ---- owned resources ----

    pub fn set_transport(&mut self, transport: Box<dyn TransportHandle>) {
        self.transport = Some(transport);
    }

    pub fn take_transport(&mut self) -> Option<Box<dyn TransportHandle>> {
        self.transport.take()
    }

    pub fn stream(&self) -> Option<&StreamHandle> {
        self.stream.as_ref()
    }

    pub fn set_stream(&mut self, stream: StreamHandle) {
        self.stream = Some(stream);
    }

    pub fn take_stream(&mut self) -> Option<StreamHandle> {
        self.stream.take()
    }

    pub fn processor_loaded(&self) -> bool {
        self.processor_loaded
    }

    pub fn set_processor_loaded(&mut self, loaded: bool) {
        self.processor_loaded = loaded;
    }

    pub fn output_open(&self) -> bool {
        self.output_open
    }

    pub fn set_output_open(&mut self, open: bool) {
        self.output_open = open;
    }

    pub fn visualizer_attached(&self) -> bool {
        self.visualizer_attached
    }

    pub fn set_visualizer_attached(&mut self, attached: bool) {
        self.visualizer_attached = attached;
    }

    // ---- per-connection flags ----

    pub fn stop_pending(&self) -> bool {
        self.stop_pending
    }

    pub fn set_stop_pending(&mut self) {
        self.stop_pending = true;
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn set_in_flight(&mut self, seq: Option<u64>) {
        self.in_flight = seq;
    }

    pub fn set_on_open(&mut self, callback: Option<SuccessCallback>) {
        self.on_open = callback;
    }

    pub fn take_on_open(&mut self) -> Option<SuccessCallback> {
        self.on_open.take()
    }

    /// Drops buffered audio and per-connection flags.
    pub fn reset_buffers(&mut self) {
        self.capture.detach();
        self.playback.clear();
        self.stop_pending = false;
        self.in_flight = None;
        self.on_open = None;
    }

    /// Serializes and sends one frame.
    pub fn send_frame(&mut self, frame: &OutboundFrame) -> Result<()> {
        let text = frame.to_text()?;
        match self.transport.as_mut() {
            Some(transport) => transport.send(text),
            None => Err(LinkError::NotConnected),
        }
    }
}
