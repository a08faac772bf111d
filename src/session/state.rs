//! Session state machine
//!
//! Tracks a publishing session from open to teardown:
//!
//! ```text
//! Uninitialized → Handshaking → MetadataPending → Streaming → Closing → Closed
//!                      └──────────────┴──────────────┴────────→ Failed
//! ```
//!
//! Failed and Closed are terminal. A failure keeps the error that caused it
//! so later calls can report it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, transport not opened yet
    Uninitialized,
    /// TCP connect, handshake and publish commands in progress
    Handshaking,
    /// Publishing, waiting for metadata before media
    MetadataPending,
    /// Metadata sent, media accepted
    Streaming,
    /// Close requested, worker draining
    Closing,
    /// Torn down
    Closed,
    /// Setup failed, the server rejected us or the transport broke
    Failed,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Uninitialized => "Uninitialized",
            ConnectionState::Handshaking => "Handshaking",
            ConnectionState::MetadataPending => "MetadataPending",
            ConnectionState::Streaming => "Streaming",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Uninitialized, Handshaking) => true,
            (Handshaking, MetadataPending) => true,
            (MetadataPending, Streaming) => true,
            (Handshaking | MetadataPending | Streaming, Closing) => true,
            (Closing, Closed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    failure: Option<Error>,
}

/// Shared, thread-safe session state
#[derive(Debug)]
pub struct SessionState {
    inner: Mutex<Inner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Uninitialized,
                failure: None,
            }),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> ConnectionState {
        self.lock().state
    }

    /// Move to `next`. Returns false (and stays put) if the move is not allowed.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            tracing::trace!(from = inner.state.name(), to = next.name(), "Ignoring state transition");
            return false;
        }
        tracing::debug!(from = inner.state.name(), to = next.name(), "Session state");
        inner.state = next;
        true
    }

    /// Enter Failed, keeping the first error seen
    pub fn fail(&self, err: Error) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = ConnectionState::Failed;
        inner.failure.get_or_insert(err);
        true
    }

    /// The error that failed the session, if it failed
    pub fn failure(&self) -> Option<Error> {
        self.lock().failure.clone()
    }

    /// Error for an operation that needs `required`, or Ok if we are in it
    pub fn require(&self, required: ConnectionState) -> Result<()> {
        let inner = self.lock();
        match inner.state {
            state if state == required => Ok(()),
            ConnectionState::Failed => Err(inner
                .failure
                .clone()
                .unwrap_or(Error::NotConnected(ConnectionState::Failed.name()))),
            state => Err(Error::NotConnected(state.name())),
        }
    }
}
