//! In-process RTMP ingest server for integration tests
//!
//! Runs on its own thread and runtime so the library's blocking calls can be
//! made from plain `#[test]` functions.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rtmp_push::amf::{AmfObject, AmfValue};
use rtmp_push::protocol::constants::*;
use rtmp_push::protocol::{ChunkDecoder, ChunkEncoder, Command, Handshake, HandshakeRole, RtmpMessage};

/// How the server treats publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accept the publish and read everything
    Accept,
    /// Answer `publish` with an error status
    Reject,
    /// Accept the publish, then stop reading
    Stall,
    /// Accept the publish, then drop the connection on the first video message
    Hangup,
}

pub struct FakeServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<RtmpMessage>>>,
}

impl FakeServer {
    pub fn start(mode: Mode) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = TcpListener::from_std(listener).unwrap();
                while let Ok((socket, _)) = listener.accept().await {
                    let log = log.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, mode, log).await;
                    });
                }
            });
        });

        Self { addr, received }
    }

    pub fn url(&self, stream_key: &str) -> String {
        format!("rtmp://{}/live/{}", self.addr, stream_key)
    }

    pub fn received(&self) -> Vec<RtmpMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Poll until `pred` holds for the received messages
    pub fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[RtmpMessage]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred(&self.received.lock().unwrap()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

/// Poll `check` until it holds or `timeout` passes
pub fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn status(level: &str, code: &str) -> AmfValue {
    AmfValue::Object(
        AmfObject::new()
            .with("level", level)
            .with("code", code)
            .with("description", code),
    )
}

struct Peer {
    socket: TcpStream,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    buf: BytesMut,
    received: u64,
    acked: u64,
    window: u32,
}

impl Peer {
    async fn recv(&mut self) -> std::io::Result<Option<RtmpMessage>> {
        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(raw)) => {
                    return Ok(RtmpMessage::from_raw(&raw).ok());
                }
                Ok(None) => {}
                Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
            }
            let n = self.socket.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            self.received += n as u64;
        }
    }

    async fn send(&mut self, msg: RtmpMessage, stream_id: u32) -> std::io::Result<()> {
        let mut out = BytesMut::new();
        self.encoder.encode(&msg.to_raw(stream_id), &mut out);
        self.socket.write_all(&out).await
    }

    async fn ack_if_due(&mut self) -> std::io::Result<()> {
        if self.window > 0 && self.received - self.acked >= self.window as u64 {
            self.acked = self.received;
            self.send(RtmpMessage::Acknowledgement(self.received as u32), 0)
                .await?;
        }
        Ok(())
    }
}

async fn serve(mut socket: TcpStream, mode: Mode, log: Arc<Mutex<Vec<RtmpMessage>>>) -> std::io::Result<()> {
    let mut handshake = Handshake::new(HandshakeRole::Server);
    let mut c0c1 = vec![0u8; handshake.bytes_needed()];
    socket.read_exact(&mut c0c1).await?;
    let reply = handshake
        .process(&mut Bytes::from(c0c1))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?
        .unwrap_or_default();
    socket.write_all(&reply).await?;
    let mut c2 = vec![0u8; handshake.bytes_needed()];
    socket.read_exact(&mut c2).await?;

    let mut peer = Peer {
        socket,
        decoder: ChunkDecoder::new(),
        encoder: ChunkEncoder::new(),
        buf: BytesMut::new(),
        received: 0,
        acked: 0,
        window: 0,
    };

    loop {
        let Some(msg) = peer.recv().await? else {
            continue;
        };
        log.lock().unwrap().push(msg.clone());

        match msg {
            RtmpMessage::SetChunkSize(size) => {
                let _ = peer.decoder.set_chunk_size(size);
            }
            RtmpMessage::WindowAckSize(size) => peer.window = size,
            RtmpMessage::Video { .. } if mode == Mode::Hangup => return Ok(()),
            RtmpMessage::Command(cmd) => {
                if on_command(&mut peer, cmd, mode).await? && mode == Mode::Stall {
                    // Keep the socket open without reading from it
                    std::future::pending::<()>().await;
                }
            }
            _ => {}
        }
        peer.ack_if_due().await?;
    }
}

/// Answer one command; returns true once publishing started
async fn on_command(peer: &mut Peer, cmd: Command, mode: Mode) -> std::io::Result<bool> {
    match cmd.name.as_str() {
        CMD_CONNECT => {
            peer.send(RtmpMessage::WindowAckSize(DEFAULT_WINDOW_ACK_SIZE), 0)
                .await?;
            peer.send(
                RtmpMessage::SetPeerBandwidth {
                    size: DEFAULT_WINDOW_ACK_SIZE,
                    limit_type: BANDWIDTH_LIMIT_DYNAMIC,
                },
                0,
            )
            .await?;
            let reply = Command::new(CMD_RESULT, cmd.transaction_id)
                .with_object(AmfValue::Object(AmfObject::new().with("fmsVer", "FMS/3,0,1,123")))
                .with_arg(status("status", "NetConnection.Connect.Success"));
            peer.send(RtmpMessage::Command(reply), 0).await?;
        }
        CMD_CREATE_STREAM => {
            let reply = Command::new(CMD_RESULT, cmd.transaction_id).with_arg(1u32);
            peer.send(RtmpMessage::Command(reply), 0).await?;
        }
        CMD_PUBLISH => {
            let info = match mode {
                Mode::Reject => status("error", "NetStream.Publish.BadName"),
                _ => status("status", NS_PUBLISH_START),
            };
            let reply = Command::new(CMD_ON_STATUS, 0.0).with_arg(info);
            peer.send(RtmpMessage::Command(reply), 1).await?;
            return Ok(mode != Mode::Reject);
        }
        _ => {}
    }
    Ok(false)
}

/// SPS + PPS + IDR slice with `payload` bytes of slice data
pub fn keyframe(payload: usize) -> Vec<u8> {
    let mut frame = vec![
        0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, 0xE9, 0x02, //
        0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, //
        0, 0, 0, 1, 0x65,
    ];
    frame.resize(frame.len() + payload, 0x11);
    frame
}

/// Non-IDR slice
pub fn inter_frame(payload: usize) -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0x41];
    frame.resize(frame.len() + payload, 0x22);
    frame
}

/// Raw AAC frame
pub fn aac_frame() -> Vec<u8> {
    vec![0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C]
}

pub fn media(messages: &[RtmpMessage]) -> (usize, usize) {
    let video = messages
        .iter()
        .filter(|m| matches!(m, RtmpMessage::Video { .. }))
        .count();
    let audio = messages
        .iter()
        .filter(|m| matches!(m, RtmpMessage::Audio { .. }))
        .count();
    (video, audio)
}
