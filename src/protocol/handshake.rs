//! RTMP handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! Only the simple handshake is implemented. Ingest servers that offer the
//! digest variant fall back to it when C1 carries a zero version field.
//!
//! [`Handshake`] is a sans-io state machine usable by either side;
//! [`client_handshake`] drives the client role over an async transport and
//! reports how long the server took to answer, which seeds the latency
//! estimate.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which end of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Nothing sent yet
    Initial,
    /// Waiting for C0C1 (server) or S0S1S2 (client)
    AwaitingPeerPacket,
    /// Server only: waiting for C2
    AwaitingPeerEcho,
    Done,
}

/// Simple-handshake state machine
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
    /// Our C1/S1, kept to check the peer's echo
    our_packet: Option<[u8; HANDSHAKE_SIZE]>,
    /// Whether the peer echoed our packet faithfully
    echo_matched: bool,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
            our_packet: None,
            echo_matched: false,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Whether the peer's echo (S2 or C2) carried our random bytes back.
    ///
    /// Mismatches are tolerated, several servers fill S2 with garbage.
    pub fn echo_matched(&self) -> bool {
        self.echo_matched
    }

    /// Bytes the peer must send before [`process`](Self::process) can advance
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::AwaitingPeerPacket, HandshakeRole::Client) => 1 + HANDSHAKE_SIZE * 2,
            (HandshakeState::AwaitingPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::AwaitingPeerEcho, _) => HANDSHAKE_SIZE,
            _ => 0,
        }
    }

    /// Start the handshake.
    ///
    /// The client gets C0C1 to send; the server gets nothing and waits.
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.state != HandshakeState::Initial {
            return None;
        }
        self.state = HandshakeState::AwaitingPeerPacket;

        match self.role {
            HandshakeRole::Client => {
                let c1 = generate_packet();
                self.our_packet = Some(c1);

                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&c1);
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Feed peer bytes.
    ///
    /// Returns `Ok(None)` while more data is needed (nothing is consumed),
    /// otherwise consumes the peer packet and returns what to send back, if
    /// anything: S0S1S2 for a server receiving C0C1, C2 for a client
    /// receiving S0S1S2.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        if data.remaining() < self.bytes_needed() {
            return Ok(None);
        }

        match (self.state, self.role) {
            (HandshakeState::AwaitingPeerPacket, HandshakeRole::Client) => {
                check_version(data.get_u8())?;
                let s1 = take_packet(data);
                let s2 = take_packet(data);
                self.echo_matched = self.matches_our_packet(&s2);
                self.state = HandshakeState::Done;
                Ok(Some(Bytes::copy_from_slice(&generate_echo(&s1))))
            }
            (HandshakeState::AwaitingPeerPacket, HandshakeRole::Server) => {
                check_version(data.get_u8())?;
                let c1 = take_packet(data);
                let s1 = generate_packet();
                self.our_packet = Some(s1);

                let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
                response.put_u8(RTMP_VERSION);
                response.put_slice(&s1);
                response.put_slice(&generate_echo(&c1));

                self.state = HandshakeState::AwaitingPeerEcho;
                Ok(Some(response.freeze()))
            }
            (HandshakeState::AwaitingPeerEcho, _) => {
                let c2 = take_packet(data);
                self.echo_matched = self.matches_our_packet(&c2);
                self.state = HandshakeState::Done;
                Ok(None)
            }
            _ => Err(HandshakeError::OutOfSequence.into()),
        }
    }

    fn matches_our_packet(&self, echo: &[u8; HANDSHAKE_SIZE]) -> bool {
        self.our_packet
            .as_ref()
            .map(|ours| ours[8..] == echo[8..])
            .unwrap_or(false)
    }
}

/// Result of a completed client handshake
#[derive(Debug, Clone, Copy)]
pub struct HandshakeOutcome {
    /// Time between sending C0C1 and receiving S0S1S2
    pub round_trip: Duration,
    pub echo_matched: bool,
}

/// Run the client side of the handshake over `stream`
pub async fn client_handshake<S>(stream: &mut S) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = Handshake::new(HandshakeRole::Client);
    let c0c1 = handshake
        .generate_initial()
        .ok_or(HandshakeError::OutOfSequence)?;

    let started = Instant::now();
    stream.write_all(&c0c1).await?;
    stream.flush().await?;

    let mut response = vec![0u8; handshake.bytes_needed()];
    stream.read_exact(&mut response).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::Handshake(HandshakeError::ConnectionClosed),
        _ => e.into(),
    })?;
    let round_trip = started.elapsed();

    let mut response = Bytes::from(response);
    let c2 = handshake
        .process(&mut response)?
        .ok_or(HandshakeError::OutOfSequence)?;
    stream.write_all(&c2).await?;
    stream.flush().await?;

    tracing::debug!(
        rtt_ms = round_trip.as_millis() as u64,
        echo_matched = handshake.echo_matched(),
        "Handshake complete"
    );

    Ok(HandshakeOutcome {
        round_trip,
        echo_matched: handshake.echo_matched(),
    })
}

fn check_version(version: u8) -> Result<()> {
    // Some servers answer with values above 3; anything below is pre-RTMP
    if version < RTMP_VERSION {
        return Err(HandshakeError::InvalidVersion(version).into());
    }
    Ok(())
}

fn take_packet(data: &mut Bytes) -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    data.copy_to_slice(&mut packet);
    packet
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// C1/S1: timestamp(4) zero(4) random(1528)
fn generate_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    // Not cryptographic, the simple handshake only needs distinct bytes
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let mut seed = (timestamp as u64) << 32 | nanos | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

/// C2/S2: the peer's packet with bytes 4..8 replaced by our read time
fn generate_echo(peer_packet: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer_packet;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
