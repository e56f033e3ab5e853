//! The link controller.
//!
//! [`VoiceLink`] is the single owner of the current [`Connection`]. All
//! transport callbacks, microphone buffers and output-device completions
//! arrive as [`Envelope`]s on one mailbox and are handled strictly in order,
//! so the playback queue and the connection state never need a lock.
//!
//! ```text
//! mic ─▶ SampleProcessor ─▶ Captured ─▶ CapturePipeline ─▶ mu-law ─▶ media frame
//! transport ─▶ Message ─▶ parse ─▶ decode/resample ─▶ PlaybackQueue
//! OutputDevice ─▶ EmissionFinished ─▶ tick ─▶ OutputDevice
//! ```

use tokio::sync::{mpsc, watch};

use crate::audio::capture::CapturePipeline;
use crate::audio::chunk::AudioChunk;
use crate::audio::codec;
use crate::audio::device::{
    CaptureConstraints, CaptureDevice, OutputDevice, ProcessorSpec, SampleProcessor, Visualizer,
};
use crate::audio::playback::PlaybackQueue;
use crate::config::Config;
use crate::connection::{Connection, ConnectionState, SuccessCallback};
use crate::error::{LinkError, Result};
use crate::events::{
    AttemptId, CloseCause, Envelope, EventSink, LinkEvent, Notification, TransportEvent,
};
use crate::net_link::Connector;
use crate::protocol::{self, InboundFrame, OutboundFrame};
use crate::status::{LinkStatus, StatusPublisher};

/// External collaborators the link drives.
pub struct Devices {
    pub connector: Box<dyn Connector>,
    pub capture: Box<dyn CaptureDevice>,
    pub processor: Box<dyn SampleProcessor>,
    pub output: Box<dyn OutputDevice>,
    pub visualizer: Option<Box<dyn Visualizer>>,
}

pub enum Command {
    Connect,
    Disconnect,
    Reconnect(Option<SuccessCallback>),
    StartRecording,
    StopRecording,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shut down on request.
    Stopped,
    /// The server expired the link; rebuild everything and start over.
    Reload,
}

/// Control surface usable from any task.
#[derive(Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
}

impl LinkHandle {
    pub fn connect(&self) -> bool {
        self.send(Command::Connect)
    }

    pub fn disconnect(&self) -> bool {
        self.send(Command::Disconnect)
    }

    pub fn reconnect(&self, on_success: Option<SuccessCallback>) -> bool {
        self.send(Command::Reconnect(on_success))
    }

    pub fn start_recording(&self) -> bool {
        self.send(Command::StartRecording)
    }

    pub fn stop_recording(&self) -> bool {
        self.send(Command::StopRecording)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected
    }

    pub fn is_playing(&self) -> bool {
        self.status().is_playing
    }

    pub fn is_recording(&self) -> bool {
        self.status().is_recording
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).is_ok()
    }
}

pub struct VoiceLink {
    config: Config,
    devices: Devices,
    events_tx: mpsc::UnboundedSender<Envelope>,
    events_rx: mpsc::UnboundedReceiver<Envelope>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    notify: mpsc::UnboundedSender<Notification>,
    status: StatusPublisher,
    conn: Option<Connection>,
    next_attempt: AttemptId,
    reload_requested: bool,
}

impl VoiceLink {
    pub fn new(
        config: Config,
        devices: Devices,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            config,
            devices,
            events_tx,
            events_rx,
            commands_tx,
            commands_rx,
            notify,
            status: StatusPublisher::new(),
            conn: None,
            next_attempt: 0,
            reload_requested: false,
        }
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            commands: self.commands_tx.clone(),
            status: self.status.subscribe(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> LinkStatus {
        self.status.current()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map(Connection::state)
            .unwrap_or(ConnectionState::Idle)
    }

    /// The current (possibly closed) attempt.
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested
    }

    // ======================== Control surface ========================

    pub async fn connect(&mut self) -> Result<()> {
        self.open_attempt(None).await
    }

    /// Idempotent; only the first teardown request of an attempt does anything.
    pub fn disconnect(&mut self) {
        if !self.teardown(CloseCause::Client) {
            log::debug!("disconnect: no live connection");
        }
    }

    /// Tears down whatever exists and starts a brand-new attempt.
    /// `on_success` runs once the new transport reaches `Open`.
    pub async fn reconnect(&mut self, on_success: Option<SuccessCallback>) -> Result<()> {
        self.teardown(CloseCause::Client);
        self.conn = None;
        self.publish_status();
        self.open_attempt(on_success).await
    }

    pub async fn start_recording(&mut self) -> Result<()> {
        let constraints = self.capture_constraints();
        let spec = ProcessorSpec {
            chunk_duration_ms: self.config.chunk_duration_ms,
            sample_rate: self.config.capture_sample_rate,
        };
        let events_tx = self.events_tx.clone();

        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            return Err(LinkError::NotConnected);
        };
        if conn.capture().is_attached() {
            return Ok(());
        }

        if conn.stream().is_none() {
            let stream = self
                .devices
                .capture
                .acquire(&constraints)
                .await
                .map_err(as_acquisition_error)?;
            conn.set_stream(stream);
        }
        let Some(stream) = conn.stream().cloned() else {
            return Err(LinkError::CaptureAcquisition("no capture stream".into()));
        };

        let sink = EventSink::new(conn.id(), events_tx);
        self.devices
            .processor
            .load(&stream, spec, sink)
            .await
            .map_err(|e| match e {
                LinkError::ProcessorLoad(_) => e,
                other => LinkError::ProcessorLoad(other.to_string()),
            })?;
        conn.set_processor_loaded(true);
        conn.capture_mut().attach();

        if let Some(visualizer) = self.devices.visualizer.as_mut() {
            if !conn.visualizer_attached() {
                visualizer.attach(&stream);
                conn.set_visualizer_attached(true);
            }
        }

        log::info!(
            "Recording started: stream #{}, {}Hz, {} samples per chunk",
            stream.id,
            stream.sample_rate,
            conn.capture().chunk_len()
        );
        self.publish_status();
        Ok(())
    }

    /// Detaches the capture pipeline and releases the microphone.
    pub fn stop_recording(&mut self) {
        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            return;
        };
        if !conn.capture().is_attached() && conn.stream().is_none() {
            return;
        }
        stop_capture(&mut self.devices, conn);
        detach_visualizer(&mut self.devices, conn);
        release_stream(&mut self.devices, conn);
        log::info!("Recording stopped");
        self.publish_status();
    }

    // ======================== Event loop ========================

    /// Runs until shut down or until the server expires the link.
    pub async fn run(mut self) -> RunOutcome {
        log::info!("Link loop started. State: {:?}", self.state());
        loop {
            if self.reload_requested {
                return RunOutcome::Reload;
            }
            tokio::select! {
                Some(cmd) = self.commands_rx.recv() => {
                    if let Some(outcome) = self.execute(cmd).await {
                        return outcome;
                    }
                }
                Some(envelope) = self.events_rx.recv() => {
                    self.handle_event(envelope).await;
                }
                else => return RunOutcome::Stopped,
            }
        }
    }

    async fn execute(&mut self, cmd: Command) -> Option<RunOutcome> {
        let result = match cmd {
            Command::Connect => self.connect().await,
            Command::Disconnect => {
                self.disconnect();
                Ok(())
            }
            Command::Reconnect(on_success) => self.reconnect(on_success).await,
            Command::StartRecording => self.start_recording().await,
            Command::StopRecording => {
                self.stop_recording();
                Ok(())
            }
            Command::Shutdown => {
                self.disconnect();
                return Some(RunOutcome::Stopped);
            }
        };
        if let Err(e) = result {
            log::error!("Command failed: {}", e);
            let _ = self.notify.send(Notification::Error(e.to_string()));
        }
        None
    }

    /// Delivers an event on behalf of the current attempt.
    pub async fn dispatch(&mut self, event: LinkEvent) {
        let Some(attempt) = self.conn.as_ref().map(Connection::id) else {
            return;
        };
        self.handle_event(Envelope { attempt, event }).await;
    }

    pub async fn handle_event(&mut self, envelope: Envelope) {
        let current = self.conn.as_ref().map(Connection::id);
        if current != Some(envelope.attempt) {
            log::debug!(
                "Dropping event from superseded attempt #{} (current {:?})",
                envelope.attempt,
                current
            );
            return;
        }

        match envelope.event {
            LinkEvent::Transport(TransportEvent::Opened) => self.on_transport_open().await,
            LinkEvent::Transport(TransportEvent::Message(text)) => self.on_message(&text),
            LinkEvent::Transport(TransportEvent::Closed { code, reason }) => {
                self.on_transport_closed(code, &reason)
            }
            LinkEvent::Transport(TransportEvent::Error(err)) => self.on_transport_error(&err),
            LinkEvent::Captured(samples) => self.on_captured(&samples),
            LinkEvent::EmissionFinished { seq } => self.on_emission_finished(seq),
        }
        self.publish_status();
    }

    // ======================== Connection lifecycle ========================

    async fn open_attempt(&mut self, on_open: Option<SuccessCallback>) -> Result<()> {
        if let Some(conn) = &self.conn {
            if conn.state().is_live() {
                log::warn!(
                    "connect ignored: attempt #{} is already {:?}",
                    conn.id(),
                    conn.state()
                );
                return Ok(());
            }
        }

        self.next_attempt += 1;
        let id = self.next_attempt;
        let mut conn = Connection::new(
            id,
            CapturePipeline::new(self.config.capture_sample_rate, self.config.chunk_duration_ms),
            PlaybackQueue::new(self.config.playback_sample_rate, self.config.playback_buffer_ms),
        );
        conn.set_on_open(on_open);
        conn.begin_connecting();

        let constraints = self.capture_constraints();
        match self.devices.capture.acquire(&constraints).await {
            Ok(stream) => {
                log::info!(
                    "Capture stream #{} acquired: {}Hz, {}ch",
                    stream.id,
                    stream.sample_rate,
                    stream.channels
                );
                conn.set_stream(stream);
            }
            Err(e) => {
                log::error!("Capture device acquisition failed: {}", e);
                conn.abandon();
                self.conn = Some(conn);
                self.publish_status();
                return Err(as_acquisition_error(e));
            }
        }

        let sink = EventSink::new(id, self.events_tx.clone());
        match self.devices.connector.open(&self.config.ws_url, sink) {
            Ok(transport) => conn.set_transport(transport),
            Err(e) => {
                log::error!("Failed to open transport to {}: {}", self.config.ws_url, e);
                release_stream(&mut self.devices, &mut conn);
                conn.abandon();
                self.conn = Some(conn);
                self.publish_status();
                return Err(e);
            }
        }

        self.conn = Some(conn);
        self.publish_status();
        Ok(())
    }

    async fn on_transport_open(&mut self) {
        let events_tx = self.events_tx.clone();
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        if !conn.mark_open() {
            log::debug!("Open event ignored in state {:?}", conn.state());
            return;
        }
        let _ = self.notify.send(Notification::Connected);

        match self.devices.output.open(EventSink::new(conn.id(), events_tx)) {
            Ok(()) => conn.set_output_open(true),
            Err(e) => {
                log::error!("Output device failed to open: {}", e);
                let _ = self.notify.send(Notification::Error(e.to_string()));
            }
        }

        // A processor failure leaves the link up; outbound audio just never starts.
        if let Err(e) = self.start_recording().await {
            log::error!("Outbound audio unavailable: {}", e);
            let _ = self.notify.send(Notification::Error(e.to_string()));
        }

        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        send_or_report(&self.notify, conn, &OutboundFrame::Start);
        let on_open = conn.take_on_open();

        self.tick_playback();

        if let Some(callback) = on_open {
            callback();
        }
    }

    fn on_transport_closed(&mut self, code: Option<u16>, reason: &str) {
        if reason == self.config.expired_link_reason {
            log::warn!("Link expired (code {:?}); requesting full reload", code);
            if self.teardown_inner(CloseCause::Server, false) {
                self.reload_requested = true;
                let _ = self.notify.send(Notification::ReloadRequired);
            }
            return;
        }
        log::info!("Transport closed (code {:?}, reason {:?})", code, reason);
        self.teardown(CloseCause::Server);
    }

    fn on_transport_error(&mut self, err: &str) {
        log::error!("Transport error: {}", err);
        if self.teardown(CloseCause::Server) {
            let _ = self.notify.send(Notification::Error(err.to_string()));
        }
    }

    fn teardown(&mut self, cause: CloseCause) -> bool {
        self.teardown_inner(cause, true)
    }

    /// Releases every resource of the current attempt, once.
    fn teardown_inner(&mut self, cause: CloseCause, announce: bool) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        if !conn.begin_close(cause) {
            return false;
        }
        let devices = &mut self.devices;

        stop_capture(devices, conn);

        if let Some(mut transport) = conn.take_transport() {
            transport.close();
        }

        if conn.output_open() {
            devices.output.close();
            conn.set_output_open(false);
        }
        detach_visualizer(devices, conn);

        release_stream(devices, conn);

        conn.reset_buffers();
        conn.finish_close();
        log::info!("Connection #{} torn down ({:?})", conn.id(), cause);

        if announce {
            let _ = self.notify.send(Notification::Closed(cause));
        }
        self.publish_status();
        true
    }

    // ======================== Inbound ========================

    fn on_message(&mut self, text: &str) {
        let frame = match protocol::parse_inbound(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping malformed frame: {}", e);
                return;
            }
        };
        let default_rate = self.config.inbound_default_sample_rate;
        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            log::debug!("Frame received while not open; dropped");
            return;
        };

        let mut stop_received = false;
        match frame {
            InboundFrame::Media {
                payload,
                sample_rate,
            } => match codec::decode_inbound(&payload) {
                Ok(samples) => {
                    let local_rate = conn.playback().sample_rate();
                    let chunk = AudioChunk::new(samples, sample_rate.unwrap_or(default_rate))
                        .resampled(local_rate);
                    conn.playback_mut().enqueue(chunk);
                }
                Err(e) => log::warn!("Dropping undecodable media frame: {}", e),
            },
            InboundFrame::Barge => {
                if let Some(playing) = conn.playback_mut().barge() {
                    send_or_report(&self.notify, conn, &OutboundFrame::playing(playing));
                }
                if conn.output_open() {
                    self.devices.output.interrupt(conn.playback().epoch());
                }
            }
            InboundFrame::EndOfConversation => {
                send_or_report(&self.notify, conn, &OutboundFrame::EndOfConversation);
            }
            InboundFrame::Stop => {
                log::info!(
                    "Stop received; closing after {} queued samples drain",
                    conn.playback().queued_samples()
                );
                conn.set_stop_pending();
                conn.playback_mut().flush();
                stop_received = true;
            }
            InboundFrame::Unknown(event) => {
                log::debug!("Ignoring unknown event {:?}", event);
            }
        }

        if stop_received {
            self.tick_playback();
        }
    }

    // ======================== Outbound ========================

    fn on_captured(&mut self, samples: &[f32]) {
        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            return;
        };
        for captured in conn.capture_mut().push(samples) {
            let payload = codec::encode_outbound(&captured.chunk);
            send_or_report(
                &self.notify,
                conn,
                &OutboundFrame::media(payload, captured.timestamp_ms),
            );
        }
    }

    // ======================== Playback ========================

    fn on_emission_finished(&mut self, seq: u64) {
        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            return;
        };
        if conn.in_flight() != Some(seq) {
            log::debug!("Ignoring completion of emission {}", seq);
            return;
        }
        conn.set_in_flight(None);
        self.tick_playback();
    }

    /// Hands the next emission to the output device. Only ever one in flight.
    ///
    /// Without a working output nothing can drain the queue, so a pending
    /// stop closes right away and a failed schedule ends the connection.
    fn tick_playback(&mut self) {
        let Some(conn) = self.conn.as_mut().filter(|c| c.is_open()) else {
            return;
        };
        if !conn.output_open() {
            if conn.stop_pending() {
                log::info!("Stop received with no output device; closing");
                self.teardown(CloseCause::Server);
            }
            return;
        }
        if conn.in_flight().is_some() {
            return;
        }

        let emission = conn.playback_mut().tick();
        if let Some(playing) = emission.playing_changed {
            log::info!("Playback {}", if playing { "started" } else { "stopped" });
            send_or_report(&self.notify, conn, &OutboundFrame::playing(playing));
        }

        if conn.stop_pending() && conn.playback().is_idle() {
            log::info!("Playback drained after stop; closing");
            self.teardown(CloseCause::Server);
            return;
        }

        let seq = emission.seq;
        match self.devices.output.schedule(emission) {
            Ok(()) => conn.set_in_flight(Some(seq)),
            Err(e) => {
                log::error!("Failed to schedule emission {}: {}; closing", seq, e);
                if conn.playback().is_playing() {
                    send_or_report(&self.notify, conn, &OutboundFrame::playing(false));
                }
                let _ = self.notify.send(Notification::Error(e.to_string()));
                self.teardown(CloseCause::Server);
            }
        }
    }

    // ======================== Helpers ========================

    fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            device: self.config.capture_device.clone(),
            sample_rate: self.config.capture_sample_rate,
            channels: self.config.capture_channels,
        }
    }

    fn publish_status(&self) {
        self.status.publish(LinkStatus::of(self.conn.as_ref()));
    }
}

fn as_acquisition_error(e: LinkError) -> LinkError {
    match e {
        LinkError::CaptureAcquisition(_) => e,
        other => LinkError::CaptureAcquisition(other.to_string()),
    }
}

fn send_or_report(
    notify: &mpsc::UnboundedSender<Notification>,
    conn: &mut Connection,
    frame: &OutboundFrame,
) {
    if let Err(e) = conn.send_frame(frame) {
        log::warn!("Failed to send frame: {}", e);
        let _ = notify.send(Notification::Error(e.to_string()));
    }
}

fn stop_capture(devices: &mut Devices, conn: &mut Connection) {
    if conn.processor_loaded() {
        devices.processor.unload();
        conn.set_processor_loaded(false);
    }
    conn.capture_mut().detach();
}

fn detach_visualizer(devices: &mut Devices, conn: &mut Connection) {
    if !conn.visualizer_attached() {
        return;
    }
    if let Some(visualizer) = devices.visualizer.as_mut() {
        visualizer.detach();
    }
    conn.set_visualizer_attached(false);
}

fn release_stream(devices: &mut Devices, conn: &mut Connection) {
    if let Some(stream) = conn.take_stream() {
        devices.capture.release(stream);
    }
}
