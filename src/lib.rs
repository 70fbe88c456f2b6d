//! # gearman-client
//!
//! Asynchronous client and worker for the Gearman job queue protocol.
//!
//! A [`Client`] submits jobs to one or more job servers and collects their
//! results; a [`Worker`] registers functions with the servers and executes
//! the jobs they assign.
//!
//! ## Architecture
//!
//! - **Protocol**: 12-byte packet headers (`\0REQ` / `\0RES`, type, length)
//!   with NUL-separated payload components
//! - **Session**: one non-blocking TCP connection per job server with a FIFO
//!   of requests awaiting replies
//! - **Task**: state machine of one request, `NEW → SUBMITTED → RUNNING →
//!   FINISHED`
//! - **Orchestrators**: [`Client`] and [`Worker`] drive their sessions and
//!   route packets
//!
//! ## Example
//!
//! ```no_run
//! use gearman_client::{Client, Job, ServerAddress};
//!
//! #[tokio::main]
//! async fn main() -> gearman_client::Result<()> {
//!     let mut client = Client::new();
//!     client.add_server(ServerAddress::default())?;
//!
//!     let result = client.execute(&Job::new("reverse", "Hello World")).await?;
//!     println!("{}", String::from_utf8_lossy(result.results()));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod protocol;
pub mod session;
pub mod task;
pub mod transport;
pub mod worker;

mod client;

pub use client::{Client, RunState};
pub use config::{ClientConfig, ConnectionConfig, ServerAddress, WorkerConfig};
pub use error::{GearmanError, Result};
pub use job::{Job, JobHandle, JobResult, JobStatus};
pub use protocol::JobPriority;
pub use worker::{JobContext, Worker};
