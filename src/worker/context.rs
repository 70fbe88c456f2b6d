//! Job context for worker functions.
//!
//! Provides methods for reporting progress while a function runs:
//! - `send_data` - WORK_DATA chunk
//! - `send_warning` - WORK_WARNING
//! - `send_status` - WORK_STATUS numerator / denominator
//! - `send_exception` - WORK_EXCEPTION
//!
//! # Example
//!
//! ```ignore
//! fn count(ctx: &JobContext) -> FunctionResult {
//!     for i in 0..10u64 {
//!         ctx.send_status(i, 10)?;
//!     }
//!     Ok(JobResult::success("done"))
//! }
//! ```

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{GearmanError, Result};
use crate::protocol::{Magic, Packet, PacketType};

/// Context passed to worker functions.
///
/// Progress packets are queued to the worker loop, which forwards them to
/// the job server that assigned the job. Sending fails once the worker
/// stopped listening, e.g. after the job timed out.
#[derive(Debug, Clone)]
pub struct JobContext {
    handle: Bytes,
    function: String,
    unique_id: Option<String>,
    data: Bytes,
    events: mpsc::UnboundedSender<Packet>,
}

impl JobContext {
    pub(crate) fn new(
        handle: Bytes,
        function: impl Into<String>,
        unique_id: Option<String>,
        data: Bytes,
        events: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            handle,
            function: function.into(),
            unique_id,
            data,
            events,
        }
    }

    /// Create a context outside a worker, returning the receiving end of its
    /// progress packets.
    pub fn detached(
        handle: Bytes,
        function: impl Into<String>,
        data: Bytes,
    ) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(handle, function, None, data, tx), rx)
    }

    /// Job handle assigned by the server.
    #[inline]
    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    #[inline]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Client supplied unique id, when the job came with JOB_ASSIGN_UNIQ.
    #[inline]
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Send a partial result.
    pub fn send_data(&self, data: impl AsRef<[u8]>) -> Result<()> {
        self.send(PacketType::WorkData, data.as_ref())
    }

    pub fn send_warning(&self, warning: impl AsRef<[u8]>) -> Result<()> {
        self.send(PacketType::WorkWarning, warning.as_ref())
    }

    /// Report completion as `numerator / denominator`.
    pub fn send_status(&self, numerator: u64, denominator: u64) -> Result<()> {
        let numerator = numerator.to_string();
        let denominator = denominator.to_string();
        let packet = Packet::from_components(
            Magic::Request,
            PacketType::WorkStatus,
            &[self.handle.as_ref(), numerator.as_bytes(), denominator.as_bytes()],
        )?;
        self.push(packet)
    }

    /// Report an exception. The job still ends with the function's result.
    pub fn send_exception(&self, message: impl AsRef<[u8]>) -> Result<()> {
        self.send(PacketType::WorkException, message.as_ref())
    }

    fn send(&self, packet_type: PacketType, body: &[u8]) -> Result<()> {
        let packet = Packet::from_components(Magic::Request, packet_type, &[self.handle.as_ref(), body])?;
        self.push(packet)
    }

    fn push(&self, packet: Packet) -> Result<()> {
        self.events
            .send(packet)
            .map_err(|_| GearmanError::Shutdown)
    }
}
