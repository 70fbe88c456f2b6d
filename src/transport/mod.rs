//! Transport module - TCP connections to job servers.
//!
//! Provides the per-connection send/receive regions and non-blocking
//! read/write steps used by sessions.

mod connection;

pub use connection::Connection;
