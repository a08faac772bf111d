//! End-to-end publishing against the in-process server

mod support;

use std::time::{Duration, Instant};

use rtmp_push::amf::AmfValue;
use rtmp_push::error::{code, Error};
use rtmp_push::protocol::RtmpMessage;
use rtmp_push::{ClientConfig, ConnectionState, Metadata, Publisher, SessionManager};

use support::{aac_frame, eventually, inter_frame, keyframe, media, FakeServer, Mode};

fn hd() -> Metadata {
    Metadata::from_raw(1280, 720, 2_000_000, 30, 44100, 2).unwrap()
}

fn config() -> ClientConfig {
    ClientConfig::default()
        .setup_timeout(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(2))
}

#[test]
fn test_publish_scenario() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();

    let handle = manager.open(&server.url("stream")).unwrap();
    assert_ne!(handle, 0);
    assert_eq!(manager.state(handle).unwrap(), ConnectionState::MetadataPending);

    manager.set_metadata(handle, hd()).unwrap();
    assert_eq!(manager.state(handle).unwrap(), ConnectionState::Streaming);

    manager.send_video(handle, &keyframe(2000), 0, true).unwrap();
    manager.send_audio(handle, &aac_frame(), 0).unwrap();
    manager.send_video(handle, &inter_frame(500), 33_000, false).unwrap();

    // Sequence headers + 2 video frames, sequence header + 1 audio frame
    assert!(server.wait_for(Duration::from_secs(5), |msgs| media(msgs) == (3, 2)));

    assert!(eventually(Duration::from_secs(5), || {
        manager.stats(handle).unwrap().frames_sent == 3
    }));
    let stats = manager.stats(handle).unwrap();
    assert!(stats.bytes_sent > 0);
    assert!(stats.loss_percent <= 100);

    manager.close(handle).unwrap();
    assert!(manager.is_empty());

    let close_seen = server.wait_for(Duration::from_secs(5), |msgs| {
        msgs.iter()
            .any(|m| matches!(m, RtmpMessage::Command(cmd) if cmd.name == "deleteStream"))
    });
    assert!(close_seen);
}

#[test]
fn test_wire_order_and_metadata() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();

    let handle = manager.open(&server.url("order")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();
    manager.send_video(handle, &keyframe(100), 0, true).unwrap();
    assert!(server.wait_for(Duration::from_secs(5), |msgs| media(msgs).0 == 2));
    manager.close(handle).unwrap();

    let messages = server.received();
    let names: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            RtmpMessage::Command(cmd) => Some(cmd.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        &names[..5],
        &["connect", "releaseStream", "FCPublish", "createStream", "publish"]
    );

    // onMetaData precedes the first video message and carries the snapshot
    let metadata_at = messages
        .iter()
        .position(|m| matches!(m, RtmpMessage::Data(_)))
        .unwrap();
    let video_at = messages
        .iter()
        .position(|m| matches!(m, RtmpMessage::Video { .. }))
        .unwrap();
    assert!(metadata_at < video_at);

    match &messages[metadata_at] {
        RtmpMessage::Data(values) => {
            assert_eq!(values[0].as_str(), Some("@setDataFrame"));
            assert_eq!(values[1].as_str(), Some("onMetaData"));
            match &values[2] {
                AmfValue::EcmaArray(props) | AmfValue::Object(props) => {
                    assert_eq!(props.get("width").and_then(AmfValue::as_number), Some(1280.0));
                    assert_eq!(props.get("height").and_then(AmfValue::as_number), Some(720.0));
                    assert_eq!(props.get("videodatarate").and_then(AmfValue::as_number), Some(2000.0));
                    assert_eq!(props.get("framerate").and_then(AmfValue::as_number), Some(30.0));
                    assert_eq!(props.get("audiosamplerate").and_then(AmfValue::as_number), Some(44100.0));
                    assert_eq!(props.get("audiochannels").and_then(AmfValue::as_number), Some(2.0));
                }
                other => panic!("Expected metadata object, got {:?}", other),
            }
        }
        other => panic!("Expected data message, got {:?}", other),
    }

    // AVC sequence header first, then the key frame
    match &messages[video_at] {
        RtmpMessage::Video { payload, .. } => assert_eq!(&payload[..2], &[0x17, 0x00]),
        other => panic!("Expected video, got {:?}", other),
    }
}

#[test]
fn test_handles_are_independent() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();

    let first = manager.open(&server.url("one")).unwrap();
    let second = manager.open(&server.url("two")).unwrap();
    assert_ne!(first, 0);
    assert_ne!(second, 0);
    assert_ne!(first, second);

    manager.close(first).unwrap();
    assert_eq!(manager.stats(first).unwrap_err().code(), code::INVALID_HANDLE);

    manager.set_metadata(second, hd()).unwrap();
    manager.send_audio(second, &aac_frame(), 0).unwrap();
    assert!(manager.stats(second).is_ok());
    manager.close(second).unwrap();
}

#[test]
fn test_media_before_metadata_is_rejected() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("early")).unwrap();

    let err = manager.send_video(handle, &keyframe(10), 0, true).unwrap_err();
    assert_eq!(err.code(), code::NOT_CONNECTED);
    let err = manager.send_audio(handle, &aac_frame(), 0).unwrap_err();
    assert_eq!(err.code(), code::NOT_CONNECTED);
    assert_eq!(manager.stats(handle).unwrap().queue_depth, 0);

    manager.close(handle).unwrap();
}

#[test]
fn test_metadata_rules() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("meta")).unwrap();

    manager.set_metadata(handle, hd()).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    let other = Metadata::from_raw(640, 360, 800_000, 30, 44100, 2).unwrap();
    assert_eq!(manager.set_metadata(handle, other).unwrap_err().code(), code::INVALID_ARGUMENT);

    manager.close(handle).unwrap();
}

#[test]
fn test_close_invalidates_handle() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("close")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    manager.close(handle).unwrap();

    let err = manager.send_video(handle, &keyframe(10), 0, true).unwrap_err();
    assert_eq!(err.code(), code::INVALID_HANDLE);
    assert_eq!(manager.send_audio(handle, &aac_frame(), 0).unwrap_err().code(), code::INVALID_HANDLE);
    assert_eq!(manager.close(handle).unwrap_err().code(), code::INVALID_HANDLE);

    // A new session may reuse the slot but never the handle
    let next = manager.open(&server.url("close2")).unwrap();
    assert_ne!(next, handle);
    assert_eq!(manager.stats(handle).unwrap_err().code(), code::INVALID_HANDLE);
    manager.close(next).unwrap();
}

#[test]
fn test_bytes_sent_never_decreases() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("bytes")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    let mut last = manager.stats(handle).unwrap().bytes_sent;
    assert!(last > 0);
    manager.send_video(handle, &keyframe(1000), 0, true).unwrap();
    for i in 1..30i64 {
        manager.send_video(handle, &inter_frame(800), i * 33_333, false).unwrap();
        let bytes = manager.stats(handle).unwrap().bytes_sent;
        assert!(bytes >= last);
        last = bytes;
    }
    manager.close(handle).unwrap();
}

#[test]
fn test_zero_copy_send() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("zero")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    let mut buffer = vec![0xEEu8; 16];
    buffer.extend_from_slice(&keyframe(300));
    let addr = buffer.as_ptr() as i64;
    let size = (buffer.len() - 16) as i64;

    for (addr, size) in [(0, size), (addr, 0), (addr, -5)] {
        let err = unsafe { manager.send_video_zero_copy(handle, addr, 16, size, 0, true) }.unwrap_err();
        assert_eq!(err.code(), code::BUFFER_ERROR);
    }
    assert_eq!(manager.stats(handle).unwrap().queue_depth, 0);
    assert_eq!(media(&server.received()), (0, 0));

    unsafe { manager.send_video_zero_copy(handle, addr, 16, size, 0, true) }.unwrap();
    // The bytes were copied; the caller may reuse its buffer at once
    buffer.fill(0);
    assert!(server.wait_for(Duration::from_secs(5), |msgs| media(msgs).0 == 2));

    let audio = aac_frame();
    unsafe { manager.send_audio_zero_copy(handle, audio.as_ptr() as i64, 0, audio.len() as i64, 0) }
        .unwrap();
    assert!(server.wait_for(Duration::from_secs(5), |msgs| media(msgs).1 == 2));

    manager.close(handle).unwrap();
}

#[test]
fn test_server_rejects_publish() {
    let server = FakeServer::start(Mode::Reject);
    let manager = SessionManager::new(config()).unwrap();

    match manager.open(&server.url("bad")) {
        Err(Error::ServerRejected { command, code }) => {
            assert_eq!(command, "publish");
            assert_eq!(code, "NetStream.Publish.BadName");
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert!(manager.is_empty());
}

#[test]
fn test_queue_full_under_stalled_transport() {
    let server = FakeServer::start(Mode::Stall);
    let manager = SessionManager::new(
        config()
            .queue_capacity(4)
            .shutdown_timeout(Duration::from_millis(300)),
    )
    .unwrap();
    let handle = manager.open(&server.url("stall")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    let frame = keyframe(256 * 1024);
    let mut queue_full = false;
    for i in 0..400i64 {
        match manager.send_video(handle, &frame, i * 33_333, true) {
            Ok(()) => {}
            Err(Error::QueueFull { capacity }) => {
                assert_eq!(capacity, 4);
                queue_full = true;
                break;
            }
            Err(other) => panic!("Expected QueueFull, got {:?}", other),
        }
    }
    assert!(queue_full);

    let started = Instant::now();
    manager.close(handle).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(manager.stats(handle).unwrap_err().code(), code::INVALID_HANDLE);
}

#[test]
fn test_transport_failure_reported_on_next_send() {
    let server = FakeServer::start(Mode::Hangup);
    let manager = SessionManager::new(config()).unwrap();
    let handle = manager.open(&server.url("hangup")).unwrap();
    manager.set_metadata(handle, hd()).unwrap();

    manager.send_video(handle, &keyframe(500), 0, true).unwrap();

    // The worker notices the reset on its own
    assert!(eventually(Duration::from_secs(5), || {
        manager.state(handle).unwrap() == ConnectionState::Failed
    }));

    let err = manager.send_video(handle, &inter_frame(200), 33_000, false).unwrap_err();
    assert_eq!(err.code(), code::TRANSPORT_ERROR);
    let err = manager.send_audio(handle, &aac_frame(), 33_000).unwrap_err();
    assert_eq!(err.code(), code::TRANSPORT_ERROR);
    assert_eq!(manager.stats(handle).unwrap().queue_depth, 0);

    let started = Instant::now();
    manager.close(handle).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(manager.state(handle).unwrap_err().code(), code::INVALID_HANDLE);
}

#[test]
fn test_publisher_closes_on_drop() {
    let server = FakeServer::start(Mode::Accept);
    let manager = SessionManager::new(config()).unwrap();

    let handle = {
        let publisher = Publisher::open(&manager, &server.url("raii")).unwrap();
        publisher.set_metadata(hd()).unwrap();
        publisher.send_audio(&aac_frame(), 0).unwrap();
        assert_eq!(publisher.state().unwrap(), ConnectionState::Streaming);
        publisher.handle()
    };

    assert!(manager.is_empty());
    assert_eq!(manager.close(handle).unwrap_err().code(), code::INVALID_HANDLE);
}
