mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{CHUNK, Harness, RATE, THRESHOLD, test_config};
use voxlink::audio::EmissionKind;
use voxlink::connection::ConnectionState;
use voxlink::events::{Envelope, LinkEvent, TransportEvent};
use voxlink::{CloseCause, LinkError, LinkStatus, Notification};

#[tokio::test]
async fn opening_wires_everything_and_sends_start() {
    let mut h = Harness::new();
    h.link.connect().await.unwrap();
    assert_eq!(h.link.state(), ConnectionState::Connecting);
    assert_eq!(h.rig.journal(), ["capture.acquire", "transport.open"]);

    h.transport(TransportEvent::Opened).await;
    assert_eq!(h.link.state(), ConnectionState::Open);
    assert_eq!(
        h.rig.journal()[2..],
        ["output.open", "processor.load", "visualizer.attach"]
    );
    assert_eq!(h.rig.sent_events(), ["start"]);
    assert_eq!(h.drain_notes(), [Notification::Connected]);
    assert_eq!(
        h.link.status(),
        LinkStatus {
            is_connected: true,
            is_playing: false,
            is_recording: true,
        }
    );
    // the first tick goes out right away
    assert_eq!(h.rig.kinds(), [EmissionKind::Silence]);
}

#[tokio::test]
async fn playback_waits_for_the_buffer_threshold() {
    let mut h = Harness::new();
    h.open().await;

    h.server_media(CHUNK, Some(RATE)).await;
    h.server_media(CHUNK, Some(RATE)).await;
    h.finish_emission().await;
    assert_eq!(h.rig.last_emission().kind, EmissionKind::Silence);
    assert!(h.rig.playing_notices().is_empty());

    h.server_media(CHUNK, Some(RATE)).await;
    h.finish_emission().await;
    let emission = h.rig.last_emission();
    assert_eq!(emission.kind, EmissionKind::Audio);
    assert!(emission.chunk.len() >= THRESHOLD);
    assert_eq!(h.rig.playing_notices(), [true]);
    assert!(h.link.status().is_playing);

    h.finish_emission().await;
    assert_eq!(h.rig.last_emission().kind, EmissionKind::Silence);
    assert_eq!(h.rig.playing_notices(), [true, false]);
    assert!(!h.link.status().is_playing);
}

#[tokio::test]
async fn barge_clears_queue_and_interrupts_output() {
    let mut h = Harness::new();
    h.open().await;
    for _ in 0..4 {
        h.server_media(CHUNK, Some(RATE)).await;
    }
    h.finish_emission().await;
    assert_eq!(h.rig.playing_notices(), [true]);
    assert_eq!(
        h.link.connection().unwrap().playback().queued_samples(),
        CHUNK
    );

    h.server(r#"{"event":"barge"}"#).await;
    assert_eq!(h.rig.playing_notices(), [true, false]);
    assert_eq!(h.rig.count("output.interrupt"), 1);
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 0);

    // completion of the interrupted emission only yields silence
    h.finish_emission().await;
    assert_eq!(h.rig.last_emission().kind, EmissionKind::Silence);
    assert_eq!(h.rig.playing_notices(), [true, false]);
}

#[tokio::test]
async fn barge_while_idle_sends_no_notice() {
    let mut h = Harness::new();
    h.open().await;
    h.server(r#"{"event":"BARGE"}"#).await;
    assert!(h.rig.playing_notices().is_empty());
    assert_eq!(h.link.state(), ConnectionState::Open);
}

#[tokio::test]
async fn end_of_conversation_is_echoed() {
    let mut h = Harness::new();
    h.open().await;
    h.server(r#"{"event":"EOC"}"#).await;
    assert_eq!(h.rig.sent_events(), ["start", "EOC"]);
}

#[tokio::test]
async fn stop_drains_playback_before_closing() {
    let mut h = Harness::new();
    h.open().await;
    for _ in 0..3 {
        h.server_media(CHUNK, Some(RATE)).await;
    }
    h.finish_emission().await;
    h.server_media(CHUNK, Some(RATE)).await;
    h.server(r#"{"event":"stop"}"#).await;
    assert_eq!(h.link.state(), ConnectionState::Open);

    // the tail still plays
    h.finish_emission().await;
    let tail = h.rig.last_emission();
    assert_eq!(tail.kind, EmissionKind::Audio);
    assert_eq!(tail.chunk.len(), CHUNK);
    assert_eq!(h.link.state(), ConnectionState::Open);

    h.finish_emission().await;
    assert_eq!(h.rig.playing_notices(), [true, false]);
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain_notes(),
        [Notification::Connected, Notification::Closed(CloseCause::Server)]
    );
    for entry in [
        "processor.unload",
        "transport.close",
        "output.close",
        "visualizer.detach",
        "capture.release",
    ] {
        assert_eq!(h.rig.count(entry), 1, "{entry}");
    }
    assert_eq!(h.link.status(), LinkStatus::default());
}

#[tokio::test]
async fn stop_with_nothing_queued_closes_on_next_tick() {
    let mut h = Harness::new();
    h.open().await;
    h.server(r#"{"event":"stop"}"#).await;
    assert_eq!(h.link.state(), ConnectionState::Open);
    h.finish_emission().await;
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert!(h.rig.playing_notices().is_empty());
}

#[tokio::test]
async fn captured_audio_is_chunked_and_sent_as_mulaw() {
    let mut h = Harness::new();
    h.open().await;
    h.rig.clear_sent();

    h.captured(CHUNK - 1).await;
    assert!(h.rig.sent_events().is_empty());
    h.captured(1).await;
    h.captured(CHUNK + 10).await;

    let frames = h.rig.sent_json();
    assert_eq!(frames.len(), 2);
    let mut last_ts = 0;
    for frame in &frames {
        assert_eq!(frame["event"], "media");
        let payload = frame["media"]["payload"].as_str().unwrap();
        let bytes = base64_len(payload);
        assert_eq!(bytes, CHUNK);
        let ts = frame["media"]["timestamp"].as_u64().unwrap();
        assert!(ts >= last_ts);
        last_ts = ts;
    }

    h.link.stop_recording();
    assert!(!h.link.status().is_recording);
    assert_eq!(h.rig.count("capture.release"), 1);
    h.captured(CHUNK).await;
    assert_eq!(h.rig.sent_json().len(), 2);
}

fn base64_len(payload: &str) -> usize {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .unwrap()
        .len()
}

#[tokio::test]
async fn recording_can_be_restarted() {
    let mut h = Harness::new();
    h.open().await;
    h.link.stop_recording();
    h.link.start_recording().await.unwrap();
    assert!(h.link.status().is_recording);
    assert_eq!(h.rig.count("capture.acquire"), 2);
    assert_eq!(h.rig.count("processor.load"), 2);
}

#[tokio::test]
async fn start_recording_requires_an_open_link() {
    let mut h = Harness::new();
    assert!(matches!(
        h.link.start_recording().await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn inbound_media_is_resampled_to_the_output_rate() {
    let mut h = Harness::new();
    h.open().await;
    h.server_media(1_600, Some(RATE * 2)).await;
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 800);

    // no declared rate means the configured default, here equal to the output rate
    h.server_media(1_600, None).await;
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 2_400);
}

#[tokio::test]
async fn bad_frames_are_dropped_without_closing() {
    let mut h = Harness::new();
    h.open().await;
    h.server("not json at all").await;
    h.server(r#"{"event":"media"}"#).await;
    h.server(r#"{"event":"media","media":{"payload":"AAA"}}"#).await;
    h.server(r#"{"event":"mark","name":"x"}"#).await;
    assert_eq!(h.link.state(), ConnectionState::Open);
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 0);
    assert_eq!(h.rig.sent_events(), ["start"]);
}

#[tokio::test]
async fn teardown_happens_once() {
    let mut h = Harness::new();
    h.open().await;
    h.link.disconnect();
    h.link.disconnect();
    h.transport(TransportEvent::Error("reset by peer".into())).await;
    h.transport(TransportEvent::Closed {
        code: Some(1000),
        reason: String::new(),
    })
    .await;

    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain_notes(),
        [Notification::Connected, Notification::Closed(CloseCause::Client)]
    );
    assert_eq!(h.rig.count("transport.close"), 1);
    assert_eq!(h.rig.count("capture.release"), 1);
    assert_eq!(h.rig.count("output.close"), 1);
}

#[tokio::test]
async fn transport_error_closes_as_server() {
    let mut h = Harness::new();
    h.open().await;
    h.transport(TransportEvent::Error("reset by peer".into())).await;
    assert_eq!(
        h.drain_notes(),
        [
            Notification::Connected,
            Notification::Closed(CloseCause::Server),
            Notification::Error("reset by peer".into()),
        ]
    );
    h.link.disconnect();
    assert!(h.drain_notes().is_empty());
}

#[tokio::test]
async fn disconnect_while_connecting_releases_capture() {
    let mut h = Harness::new();
    h.link.connect().await.unwrap();
    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(h.rig.count("capture.release"), 1);
    assert_eq!(h.rig.count("output.close"), 0);

    // a late open for the closed attempt changes nothing
    h.transport(TransportEvent::Opened).await;
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert!(h.rig.sent_events().is_empty());
}

#[tokio::test]
async fn events_from_superseded_attempts_are_ignored() {
    let mut h = Harness::new();
    h.open().await;
    let old = h.link.connection().unwrap().id();

    h.link.reconnect(None).await.unwrap();
    let new = h.link.connection().unwrap().id();
    assert_ne!(old, new);
    assert_eq!(h.link.state(), ConnectionState::Connecting);

    h.link
        .handle_event(Envelope {
            attempt: old,
            event: LinkEvent::Transport(TransportEvent::Opened),
        })
        .await;
    h.link
        .handle_event(Envelope {
            attempt: old,
            event: LinkEvent::Transport(TransportEvent::Error("late".into())),
        })
        .await;
    assert_eq!(h.link.state(), ConnectionState::Connecting);

    h.link
        .handle_event(Envelope {
            attempt: new,
            event: LinkEvent::Transport(TransportEvent::Opened),
        })
        .await;
    assert_eq!(h.link.state(), ConnectionState::Open);
}

#[tokio::test]
async fn reconnect_runs_callback_once_open() {
    let mut h = Harness::new();
    h.open().await;
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    h.link
        .reconnect(Some(Box::new(move || flag.store(true, Ordering::SeqCst))))
        .await
        .unwrap();
    assert!(!fired.load(Ordering::SeqCst));

    h.transport(TransportEvent::Opened).await;
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(
        h.drain_notes(),
        [
            Notification::Connected,
            Notification::Closed(CloseCause::Client),
            Notification::Connected,
        ]
    );
}

#[tokio::test]
async fn capture_failure_aborts_before_transport() {
    let mut h = Harness::new();
    h.rig.fail_acquire.store(true, Ordering::SeqCst);
    let err = h.link.connect().await.unwrap_err();
    assert!(matches!(err, LinkError::CaptureAcquisition(_)));
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(h.rig.count("transport.open"), 0);
    assert!(h.drain_notes().is_empty());

    // the next attempt is allowed once the device is back
    h.rig.fail_acquire.store(false, Ordering::SeqCst);
    h.open().await;
    assert_eq!(h.link.state(), ConnectionState::Open);
}

#[tokio::test]
async fn connector_failure_releases_capture() {
    let mut h = Harness::new();
    h.rig.fail_connect.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.link.connect().await,
        Err(LinkError::Transport(_))
    ));
    assert_eq!(h.rig.count("capture.release"), 1);
    assert_eq!(h.link.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn processor_failure_keeps_the_link_up() {
    let mut h = Harness::new();
    h.rig.fail_load.store(true, Ordering::SeqCst);
    h.open().await;

    assert_eq!(h.link.state(), ConnectionState::Open);
    assert_eq!(h.rig.sent_events(), ["start"]);
    let notes = h.drain_notes();
    assert_eq!(notes[0], Notification::Connected);
    assert!(matches!(notes[1], Notification::Error(_)));
    assert!(!h.link.status().is_recording);

    // playback still works
    for _ in 0..3 {
        h.server_media(CHUNK, Some(RATE)).await;
    }
    h.finish_emission().await;
    assert_eq!(h.rig.playing_notices(), [true]);
}

#[tokio::test]
async fn expired_link_requests_reload_without_close_notice() {
    let mut h = Harness::new();
    h.open().await;
    h.transport(TransportEvent::Closed {
        code: Some(4000),
        reason: test_config().expired_link_reason,
    })
    .await;

    assert!(h.link.reload_requested());
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain_notes(),
        [Notification::Connected, Notification::ReloadRequired]
    );
    assert_eq!(h.rig.count("capture.release"), 1);
}

#[tokio::test]
async fn server_close_tears_down() {
    let mut h = Harness::new();
    h.open().await;
    h.transport(TransportEvent::Closed {
        code: Some(1001),
        reason: "going away".into(),
    })
    .await;
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(
        h.drain_notes(),
        [Notification::Connected, Notification::Closed(CloseCause::Server)]
    );
}

#[tokio::test]
async fn stale_completions_do_not_double_tick() {
    let mut h = Harness::new();
    h.open().await;
    let first = h.rig.last_emission().seq;
    h.finish_emission().await;
    assert_eq!(h.rig.emissions().len(), 2);

    // replaying the old completion must not schedule anything
    h.link
        .dispatch(LinkEvent::EmissionFinished { seq: first })
        .await;
    assert_eq!(h.rig.emissions().len(), 2);
}

#[tokio::test]
async fn barge_then_media_keeps_only_new_audio() {
    let mut h = Harness::new();
    h.open().await;
    h.server_media(CHUNK, Some(RATE)).await;
    h.server_media(CHUNK, Some(RATE)).await;

    h.server(r#"{"event":"barge"}"#).await;
    h.server_media(100, Some(RATE)).await;
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 100);

    // the device learns the new epoch; the silence in flight predates it
    assert_eq!(*h.rig.interrupts.lock().unwrap(), [1]);
    assert!(h.rig.last_emission().superseded_by(1));
    h.finish_emission().await;
    assert_eq!(h.rig.last_emission().epoch, 1);
}

#[tokio::test]
async fn stop_closes_when_output_never_opened() {
    let mut h = Harness::new();
    h.rig.fail_output_open.store(true, Ordering::SeqCst);
    h.open().await;
    assert_eq!(h.link.state(), ConnectionState::Open);
    assert!(h.rig.emissions().is_empty());

    h.server_media(CHUNK, Some(RATE)).await;
    h.server(r#"{"event":"stop"}"#).await;
    assert_eq!(h.link.state(), ConnectionState::Closed);

    let notes = h.drain_notes();
    assert_eq!(notes[0], Notification::Connected);
    assert!(matches!(notes[1], Notification::Error(_)));
    assert_eq!(notes[2], Notification::Closed(CloseCause::Server));
    assert_eq!(h.rig.count("output.close"), 0);
    assert_eq!(h.rig.count("capture.release"), 1);
}

#[tokio::test]
async fn failed_schedule_ends_the_connection() {
    let mut h = Harness::new();
    h.open().await;
    for _ in 0..3 {
        h.server_media(CHUNK, Some(RATE)).await;
    }
    h.server(r#"{"event":"stop"}"#).await;
    h.rig.fail_schedule.store(true, Ordering::SeqCst);

    h.finish_emission().await;
    assert_eq!(h.link.state(), ConnectionState::Closed);
    assert_eq!(h.rig.playing_notices(), [true, false]);
    let notes = h.drain_notes();
    assert!(matches!(notes[1], Notification::Error(_)));
    assert_eq!(notes[2], Notification::Closed(CloseCause::Server));
    assert_eq!(h.rig.count("output.close"), 1);
}

#[tokio::test]
async fn implausible_declared_rate_is_dropped() {
    let mut h = Harness::new();
    h.open().await;
    h.server_media(2_000, Some(1)).await;
    assert_eq!(h.link.connection().unwrap().playback().queued_samples(), 0);
    assert_eq!(h.link.state(), ConnectionState::Open);
}
