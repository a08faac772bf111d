//! Session worker
//!
//! One task per session owns the connection. It writes queued messages in
//! order, answers the server's control traffic and watches for failures
//! reported by the server. Callers never touch the socket.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use super::state::{ConnectionState, SessionState};
use crate::client::Connection;
use crate::error::{Error, Result};
use crate::media::Packet;
use crate::protocol::constants::{CMD_ERROR, CMD_ON_STATUS};
use crate::protocol::{Command, RtmpMessage};
use crate::stats::StatsCollector;

/// One queue entry: everything produced by a single send call
#[derive(Debug)]
pub struct Outgoing {
    pub packets: Vec<Packet>,
}

/// State shared between a session's callers and its worker
#[derive(Debug, Default)]
pub struct Shared {
    pub state: SessionState,
    pub stats: Arc<StatsCollector>,
}

/// Worker entry point. Returns once the session is closed or failed.
pub async fn run<S>(
    mut conn: Connection<S>,
    mut rx: mpsc::Receiver<Outgoing>,
    mut shutdown: oneshot::Receiver<()>,
    shared: Arc<Shared>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match drive(&mut conn, &mut rx, &mut shutdown, &shared.stats).await {
        Ok(()) => {
            rx.close();
            if let Err(err) = finish(&mut conn, &mut rx, &shared.stats).await {
                tracing::debug!(error = %err, "Unclean shutdown");
            }
            shared.state.transition(ConnectionState::Closed);
            tracing::info!(bytes_sent = shared.stats.bytes_sent(), "Session closed");
        }
        Err(err) => {
            tracing::error!(error = %err, "Session failed");
            shared.state.fail(err);
            rx.close();
            while rx.try_recv().is_ok() {
                shared.stats.queue_pop(1);
            }
        }
    }
}

async fn drive<S>(
    conn: &mut Connection<S>,
    rx: &mut mpsc::Receiver<Outgoing>,
    shutdown: &mut oneshot::Receiver<()>,
    stats: &StatsCollector,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = &mut *shutdown => return Ok(()),

            item = rx.recv() => match item {
                Some(outgoing) => write(conn, outgoing, stats).await?,
                None => return Ok(()),
            },

            msg = conn.read_message() => {
                if let Some(msg) = conn.handle_control(msg?).await? {
                    on_message(msg)?;
                }
            }
        }
    }
}

async fn write<S>(conn: &mut Connection<S>, outgoing: Outgoing, stats: &StatsCollector) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stats.queue_pop(1);
    for packet in &outgoing.packets {
        conn.send(&packet.message, packet.sync, packet.is_frame())
            .await?;
    }
    Ok(())
}

/// Flush what is still queued, then unpublish
async fn finish<S>(
    conn: &mut Connection<S>,
    rx: &mut mpsc::Receiver<Outgoing>,
    stats: &StatsCollector,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(outgoing) = rx.recv().await {
        write(conn, outgoing, stats).await?;
    }
    conn.unpublish().await
}

fn on_message(msg: RtmpMessage) -> Result<()> {
    match msg {
        RtmpMessage::Command(cmd) => on_command(cmd),
        other => {
            tracing::trace!(message = ?other, "Ignoring message");
            Ok(())
        }
    }
}

fn on_command(cmd: Command) -> Result<()> {
    if cmd.name == CMD_ERROR || (cmd.name == CMD_ON_STATUS && cmd.is_error()) {
        let code = cmd.status_code().unwrap_or(cmd.name.as_str()).to_string();
        return Err(Error::ServerRejected {
            command: cmd.name,
            code,
        });
    }
    tracing::debug!(command = %cmd.name, code = ?cmd.status_code(), "Server message");
    Ok(())
}
