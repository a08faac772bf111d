//! Client configuration

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::constants::*;

/// Publisher configuration options
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect must complete within this time
    pub connect_timeout: Duration,

    /// C0/C1 → S0/S1/S2 → C2 must complete within this time
    pub handshake_timeout: Duration,

    /// Wait for each `_result` / `onStatus` reply
    pub command_timeout: Duration,

    /// Per attempt timeout of a transport write
    pub write_timeout: Duration,

    /// How long `close` waits for the worker before aborting it
    pub shutdown_timeout: Duration,

    /// Messages the send queue holds before `QueueFull`
    pub queue_capacity: usize,

    /// Outgoing chunk size requested after the handshake
    pub chunk_size: u32,

    /// Window acknowledgement size announced to the server
    pub window_ack_size: u32,

    /// Transient write failures retried before the session fails
    pub write_retries: u32,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// `flashVer` sent in the connect command
    pub flash_ver: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
            queue_capacity: 256,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            write_retries: 3,
            tcp_nodelay: true, // Important for low latency
            flash_ver: "FMLE/3.0 (compatible; rtmp-push)".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connect, handshake and command timeouts at once
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.handshake_timeout = timeout;
        self.command_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set send queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set chunk size
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }
}

/// Parsed `rtmp://host[:port]/app[/...]/stream` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpUrl {
    pub host: String,
    pub port: u16,
    /// Application name, everything between the host and the stream key
    pub app: String,
    /// Stream key (last path segment, query string kept)
    pub stream_key: String,
    /// `tcUrl` for the connect command
    pub tc_url: String,
}

impl RtmpUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())?;
        if url.scheme() != "rtmp" {
            return Err(Error::InvalidArgument(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidArgument("missing host".into()))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let segments: Vec<&str> = url
            .path()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let (stream, app) = match segments.split_last() {
            Some((stream, app)) if !app.is_empty() => (*stream, app.join("/")),
            _ => {
                return Err(Error::InvalidArgument(
                    "url must name an app and a stream key".into(),
                ))
            }
        };

        let stream_key = match url.query() {
            Some(query) => format!("{}?{}", stream, query),
            None => stream.to_string(),
        };

        let tc_url = match url.port() {
            Some(port) => format!("rtmp://{}:{}/{}", host, port, app),
            None => format!("rtmp://{}/{}", host, app),
        };

        Ok(Self {
            host,
            port,
            app,
            stream_key,
            tc_url,
        })
    }

    /// `host:port` for the TCP connect (IPv6 hosts keep their brackets)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
