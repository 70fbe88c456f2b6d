//! Job model shared by the client and the worker.
//!
//! - [`Job`]: a unit of work to submit (function, unique id, payload,
//!   priority, background flag).
//! - [`JobHandle`]: server-assigned handle plus the server that issued it.
//! - [`JobResult`]: accumulated outcome of one job. Clients build it from
//!   WORK_* packets; worker functions return one.
//! - [`JobStatus`]: answer to GET_STATUS.

use std::fmt;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::config::ServerAddress;
use crate::error::{GearmanError, Result};
use crate::protocol::{JobPriority, Magic, Packet, PacketType, COMPONENT_SEPARATOR};

/// A job to submit.
///
/// # Example
///
/// ```
/// use gearman_client::{Job, JobPriority};
///
/// let job = Job::new("reverse", "Hello World")
///     .with_priority(JobPriority::High)
///     .with_unique_id("greeting-1");
///
/// assert_eq!(job.function(), "reverse");
/// assert!(!job.is_background());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    function: String,
    unique_id: String,
    data: Bytes,
    priority: JobPriority,
    background: bool,
}

impl Job {
    /// Create a normal-priority, attached job with a random unique id.
    pub fn new(function: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            function: function.into(),
            unique_id: Uuid::new_v4().to_string(),
            data: data.into(),
            priority: JobPriority::Normal,
            background: false,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Detach the client from the job once the server has queued it.
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    #[inline]
    pub fn function(&self) -> &str {
        &self.function
    }

    #[inline]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    #[inline]
    pub fn is_background(&self) -> bool {
        self.background
    }

    /// The SUBMIT_JOB* request for this job.
    pub fn to_packet(&self) -> Result<Packet> {
        Packet::from_components(
            Magic::Request,
            PacketType::submission(self.priority, self.background),
            &[
                self.function.as_bytes(),
                self.unique_id.as_bytes(),
                self.data.as_ref(),
            ],
        )
    }
}

/// Server-assigned job handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    handle: Bytes,
    server: ServerAddress,
}

impl JobHandle {
    pub fn new(handle: impl Into<Bytes>, server: ServerAddress) -> Self {
        Self {
            handle: handle.into(),
            server,
        }
    }

    /// Raw handle bytes as sent by the server.
    #[inline]
    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    #[inline]
    pub fn handle_bytes(&self) -> Bytes {
        self.handle.clone()
    }

    /// Job server that issued the handle.
    #[inline]
    pub fn server(&self) -> &ServerAddress {
        &self.server
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", String::from_utf8_lossy(&self.handle), self.server)
    }
}

/// Outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobResult {
    handle: Bytes,
    succeeded: bool,
    results: BytesMut,
    warnings: BytesMut,
    exceptions: BytesMut,
    numerator: u64,
    denominator: u64,
}

impl JobResult {
    /// Successful result carrying `data`.
    pub fn success(data: impl AsRef<[u8]>) -> Self {
        Self {
            succeeded: true,
            results: BytesMut::from(data.as_ref()),
            ..Default::default()
        }
    }

    /// Failed result.
    pub fn failure() -> Self {
        Self::default()
    }

    pub(crate) fn pending(handle: Bytes) -> Self {
        Self {
            handle,
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl AsRef<[u8]>) -> Self {
        self.warnings.extend_from_slice(warning.as_ref());
        self
    }

    pub fn with_exception(mut self, exception: impl AsRef<[u8]>) -> Self {
        self.exceptions.extend_from_slice(exception.as_ref());
        self
    }

    pub fn with_status(mut self, numerator: u64, denominator: u64) -> Self {
        self.numerator = numerator;
        self.denominator = denominator;
        self
    }

    #[inline]
    pub fn handle(&self) -> &[u8] {
        &self.handle
    }

    #[inline]
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// WORK_DATA chunks followed by the WORK_COMPLETE payload.
    #[inline]
    pub fn results(&self) -> &[u8] {
        &self.results
    }

    #[inline]
    pub fn warnings(&self) -> &[u8] {
        &self.warnings
    }

    #[inline]
    pub fn exceptions(&self) -> &[u8] {
        &self.exceptions
    }

    #[inline]
    pub fn numerator(&self) -> u64 {
        self.numerator
    }

    #[inline]
    pub fn denominator(&self) -> u64 {
        self.denominator
    }

    /// Fold one WORK_* packet into the result; `Ok(true)` once terminal.
    pub(crate) fn apply(&mut self, packet: &Packet) -> Result<bool> {
        let (_, rest) = split_handle(packet);
        match packet.packet_type() {
            PacketType::WorkData => {
                self.results.extend_from_slice(&rest);
                Ok(false)
            }
            PacketType::WorkWarning => {
                self.warnings.extend_from_slice(&rest);
                Ok(false)
            }
            PacketType::WorkStatus => {
                let parts = packet.components(3)?;
                self.numerator = parse_decimal(&parts[1], "numerator")?;
                self.denominator = parse_decimal(&parts[2], "denominator")?;
                Ok(false)
            }
            PacketType::WorkComplete => {
                self.results.extend_from_slice(&rest);
                self.succeeded = true;
                Ok(true)
            }
            PacketType::WorkException => {
                self.exceptions.extend_from_slice(&rest);
                self.succeeded = false;
                Ok(true)
            }
            PacketType::WorkFail => {
                self.succeeded = false;
                Ok(true)
            }
            other => Err(GearmanError::MalformedPayload(format!(
                "{other} is not a work update"
            ))),
        }
    }
}

/// Answer to a GET_STATUS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobStatus {
    /// The server knows the handle.
    pub known: bool,
    /// A worker is executing the job.
    pub running: bool,
    pub numerator: u64,
    pub denominator: u64,
}

impl JobStatus {
    /// Parse a STATUS_RES payload.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.packet_type() != PacketType::StatusRes {
            return Err(GearmanError::MalformedPayload(format!(
                "expected STATUS_RES, got {}",
                packet.packet_type()
            )));
        }
        let parts = packet.components(5)?;
        Ok(Self {
            known: parts[1].as_ref() == b"1",
            running: parts[2].as_ref() == b"1",
            numerator: parse_decimal(&parts[3], "numerator")?,
            denominator: parse_decimal(&parts[4], "denominator")?,
        })
    }
}

/// Split a payload at its first NUL into `(handle, rest)`.
pub(crate) fn split_handle(packet: &Packet) -> (Bytes, Bytes) {
    let mut payload = packet.payload_bytes();
    match payload.iter().position(|b| *b == COMPONENT_SEPARATOR) {
        Some(pos) => {
            let handle = payload.split_to(pos);
            let rest = payload.split_off(1);
            (handle, rest)
        }
        None => (payload, Bytes::new()),
    }
}

/// Parse an ASCII decimal field; an empty field reads as zero.
pub(crate) fn parse_decimal(field: &[u8], what: &str) -> Result<u64> {
    if field.is_empty() {
        return Ok(0);
    }
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            GearmanError::MalformedPayload(format!(
                "{what} is not a decimal number: {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}
