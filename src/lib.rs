//! Authenticated TCP command gateway.
//!
//! One JSON object per read/write over a plain TCP connection: a token
//! handshake, then a per-session command loop with dual timeout
//! enforcement, a keyword classifier routing dangerous commands through
//! an operator approval gate, and a fixed worker pool draining a shared
//! connection queue.

pub mod approval;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
