//! Publishing connection
//!
//! Opens the transport, runs the handshake and the publish command sequence:
//!
//! ```text
//! Window Ack Size, Set Chunk Size
//! connect(app, tcUrl)              → _result
//! releaseStream(key), FCPublish(key)
//! createStream                     → _result(stream id)
//! publish(key, "live")             → onStatus(NetStream.Publish.Start)
//! ```
//!
//! The resulting [`Connection`] also handles the protocol control traffic the
//! server keeps sending while media flows (chunk size changes, window
//! acknowledgements, pings).

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::config::{ClientConfig, RtmpUrl};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::handshake::client_handshake;
use crate::protocol::{
    ChunkDecoder, ChunkWriter, Command, RawMessage, RtmpMessage, UserControlEvent, WriteReport,
};
use crate::stats::{RttEstimator, StatsCollector};

/// Connect to `url` and start publishing.
///
/// Every failure is reported as a setup error (handshake failure or server
/// rejection).
pub async fn connect(
    url: &RtmpUrl,
    config: &ClientConfig,
    stats: Arc<StatsCollector>,
) -> Result<Connection<TcpStream>> {
    let setup = async {
        let socket = tokio::time::timeout(config.connect_timeout, TcpStream::connect(url.addr()))
            .await
            .map_err(|_| Error::Timeout("connect"))??;
        socket.set_nodelay(config.tcp_nodelay)?;
        tracing::debug!(addr = %url.addr(), "TCP connected");

        Connection::establish(socket, url, config, stats).await
    };
    setup.await.map_err(Error::into_setup)
}

/// An established publishing connection
pub struct Connection<S> {
    reader: ReadHalf<S>,
    writer: ChunkWriter<WriteHalf<S>>,
    decoder: ChunkDecoder,
    read_buf: BytesMut,

    /// Message stream returned by createStream
    stream_id: u32,
    stream_key: String,
    next_transaction: f64,

    /// Our receive window as announced to the peer
    window_ack_size: u32,
    /// Window after which the peer wants an acknowledgement (0 = none)
    peer_window: u32,
    bytes_received: u64,
    last_ack_sent: u64,

    stats: Arc<StatsCollector>,
    rtt: RttEstimator,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Handshake and publish over an already connected transport
    pub async fn establish(
        mut stream: S,
        url: &RtmpUrl,
        config: &ClientConfig,
        stats: Arc<StatsCollector>,
    ) -> Result<Self> {
        let outcome = tokio::time::timeout(config.handshake_timeout, client_handshake(&mut stream))
            .await
            .map_err(|_| Error::Timeout("handshake"))??;

        let (reader, writer) = tokio::io::split(stream);
        let mut rtt = RttEstimator::new();
        rtt.seed(outcome.round_trip);
        stats.set_latency(outcome.round_trip);

        let mut conn = Connection {
            reader,
            writer: ChunkWriter::new(writer, config.write_timeout, config.write_retries),
            decoder: ChunkDecoder::new(),
            read_buf: BytesMut::with_capacity(64 * 1024),
            stream_id: 0,
            stream_key: url.stream_key.clone(),
            next_transaction: 1.0,
            window_ack_size: config.window_ack_size,
            peer_window: 0,
            bytes_received: 0,
            last_ack_sent: 0,
            stats,
            rtt,
        };
        conn.publish(url, config).await?;
        Ok(conn)
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    async fn publish(&mut self, url: &RtmpUrl, config: &ClientConfig) -> Result<()> {
        self.send_message(&RtmpMessage::WindowAckSize(config.window_ack_size), 0)
            .await?;
        let report = self.writer.set_chunk_size(config.chunk_size).await?;
        self.record(report, false);

        let tx = self.transaction();
        self.send_command(Command::connect(tx, &url.app, &url.tc_url, &config.flash_ver), 0)
            .await?;
        self.await_result(tx, CMD_CONNECT, config.command_timeout)
            .await?;
        tracing::debug!(app = %url.app, "Connected");

        let key = self.stream_key.clone();
        let tx = self.transaction();
        self.send_command(Command::release_stream(tx, &key), 0).await?;
        let tx = self.transaction();
        self.send_command(Command::fc_publish(tx, &key), 0).await?;

        let tx = self.transaction();
        self.send_command(Command::create_stream(tx), 0).await?;
        let reply = self
            .await_result(tx, CMD_CREATE_STREAM, config.command_timeout)
            .await?;
        self.stream_id = reply
            .arguments
            .iter()
            .find_map(|v| v.as_number())
            .filter(|id| *id >= 1.0 && *id <= u32::MAX as f64)
            .map(|id| id as u32)
            .ok_or_else(|| {
                ProtocolError::UnexpectedMessage("createStream reply without a stream id".into())
            })?;

        let tx = self.transaction();
        self.send_command(Command::publish(tx, &key), self.stream_id)
            .await?;
        self.await_publish_start(tx, config.command_timeout)
            .await?;

        tracing::info!(
            stream_id = self.stream_id,
            stream_key = %key,
            "Publishing"
        );
        Ok(())
    }

    /// Best-effort FCUnpublish + deleteStream
    pub async fn unpublish(&mut self) -> Result<()> {
        let key = self.stream_key.clone();
        let tx = self.transaction();
        self.send_command(Command::fc_unpublish(tx, &key), 0).await?;
        let tx = self.transaction();
        self.send_command(Command::delete_stream(tx, self.stream_id), 0)
            .await?;
        self.writer.shutdown().await
    }

    fn transaction(&mut self) -> f64 {
        let tx = self.next_transaction;
        self.next_transaction += 1.0;
        tx
    }

    /// Write a message prepared elsewhere (media, metadata)
    pub async fn send(&mut self, msg: &RawMessage, sync: bool, frame: bool) -> Result<WriteReport> {
        let report = self.writer.send(msg, sync).await?;
        self.record(report, frame);
        Ok(report)
    }

    pub async fn send_message(&mut self, msg: &RtmpMessage, stream_id: u32) -> Result<WriteReport> {
        let report = self.writer.write_message(msg, stream_id).await?;
        self.record(report, false);
        Ok(report)
    }

    async fn send_command(&mut self, cmd: Command, stream_id: u32) -> Result<WriteReport> {
        tracing::trace!(command = %cmd.name, transaction_id = cmd.transaction_id, "Sending command");
        self.send_message(&RtmpMessage::Command(cmd), stream_id).await
    }

    fn record(&mut self, report: WriteReport, frame: bool) {
        self.stats.record_write(report, frame);
        self.rtt.on_write(self.stats.bytes_sent(), Instant::now());
    }

    /// Read the next complete message.
    ///
    /// Cancel safe: bytes are only consumed once a whole message is decoded.
    pub async fn read_message(&mut self) -> Result<RtmpMessage> {
        loop {
            if let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                return RtmpMessage::from_raw(&raw);
            }
            let n = self.reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "server closed the connection").into());
            }
            self.bytes_received += n as u64;
        }
    }

    /// Apply protocol control messages.
    ///
    /// Returns the message back if it is not protocol control (commands,
    /// data, media).
    pub async fn handle_control(&mut self, msg: RtmpMessage) -> Result<Option<RtmpMessage>> {
        let passthrough = match msg {
            RtmpMessage::SetChunkSize(size) => {
                self.decoder.set_chunk_size(size)?;
                tracing::debug!(chunk_size = size, "Incoming chunk size changed");
                None
            }
            RtmpMessage::Abort(csid) => {
                self.decoder.abort(csid);
                None
            }
            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(window = size, "Peer window acknowledgement size");
                self.peer_window = size;
                None
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                tracing::debug!(size = size, limit_type = limit_type, "Peer bandwidth");
                if size != self.window_ack_size {
                    self.window_ack_size = size;
                    self.send_message(&RtmpMessage::WindowAckSize(size), 0).await?;
                }
                None
            }
            RtmpMessage::Acknowledgement(sequence) => {
                if let Some(rtt) = self.rtt.on_ack(sequence, Instant::now()) {
                    self.stats.set_latency(rtt);
                    tracing::trace!(sequence = sequence, rtt_ms = rtt.as_millis() as u64, "Acknowledgement");
                }
                None
            }
            RtmpMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.send_message(
                    &RtmpMessage::UserControl(UserControlEvent::PingResponse(timestamp)),
                    0,
                )
                .await?;
                None
            }
            RtmpMessage::UserControl(event) => {
                tracing::debug!(event = ?event, "User control event");
                None
            }
            other => Some(other),
        };

        self.acknowledge_if_due().await?;
        Ok(passthrough)
    }

    async fn acknowledge_if_due(&mut self) -> Result<()> {
        if self.peer_window == 0 || self.bytes_received - self.last_ack_sent < self.peer_window as u64 {
            return Ok(());
        }
        self.last_ack_sent = self.bytes_received;
        // Sequence numbers wrap at 32 bits
        self.send_message(&RtmpMessage::Acknowledgement(self.bytes_received as u32), 0)
            .await?;
        Ok(())
    }

    /// Next command from the server, handling control traffic on the way
    async fn next_command(&mut self) -> Result<Command> {
        loop {
            let msg = self.read_message().await?;
            match self.handle_control(msg).await? {
                Some(RtmpMessage::Command(cmd)) => return Ok(cmd),
                Some(other) => tracing::trace!(message = ?other, "Ignoring message during setup"),
                None => {}
            }
        }
    }

    async fn await_result(&mut self, tx: f64, command: &str, limit: Duration) -> Result<Command> {
        let wait = async {
            loop {
                let cmd = self.next_command().await?;
                if cmd.transaction_id != tx {
                    tracing::trace!(command = %cmd.name, "Ignoring reply");
                    continue;
                }
                if cmd.is_error() {
                    return Err(rejected(command, &cmd));
                }
                if cmd.name == CMD_RESULT {
                    return Ok(cmd);
                }
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| Error::Timeout("command reply"))?
    }

    async fn await_publish_start(&mut self, tx: f64, limit: Duration) -> Result<()> {
        let wait = async {
            loop {
                let cmd = self.next_command().await?;
                if cmd.name == CMD_ON_STATUS {
                    if cmd.is_error() {
                        return Err(rejected(CMD_PUBLISH, &cmd));
                    }
                    if cmd.status_code() == Some(NS_PUBLISH_START) {
                        return Ok(());
                    }
                } else if cmd.transaction_id == tx && cmd.is_error() {
                    return Err(rejected(CMD_PUBLISH, &cmd));
                }
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| Error::Timeout("publish"))?
    }
}

fn rejected(command: &str, reply: &Command) -> Error {
    let code = reply.status_code().unwrap_or(reply.name.as_str()).to_string();
    tracing::warn!(command = command, code = %code, "Server rejected command");
    Error::ServerRejected {
        command: command.to_string(),
        code,
    }
}
