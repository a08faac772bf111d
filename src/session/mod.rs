//! Publishing sessions
//!
//! A session is one connection publishing one stream. The manager maps
//! handles to sessions; each session has a state machine, a bounded send
//! queue and a worker task that owns the socket.

pub mod manager;
pub mod state;
pub mod worker;

pub use manager::SessionManager;
pub use state::{ConnectionState, SessionState};
