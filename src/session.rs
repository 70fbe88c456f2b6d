//! One connection to one job server.
//!
//! A session owns its [`Connection`] and the FIFO of tasks awaiting a direct
//! reply. [`Session::drive_io`] is the single mutating step: flush, read, and
//! classify at most one packet.
//!
//! ```text
//!              init()               close()
//! Uninitialized ──────► Initialized ───────► Closed (terminal)
//! ```
//!
//! Transport failures (I/O errors, end of stream, framing errors) close the
//! session before the error is returned.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, warn};

use crate::config::{ConnectionConfig, ServerAddress};
use crate::error::{GearmanError, Result};
use crate::protocol::{Packet, PacketType};
use crate::task::{ResponseHandler, Task, TaskId, TaskState};
use crate::transport::Connection;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Closed,
}

/// Outcome of one `drive_io` step that produced a packet.
#[derive(Debug)]
pub enum SessionEvent {
    /// Reply to the request at the head of the reply queue.
    Reply { task_id: TaskId, packet: Packet },
    /// Server-initiated packet, or one that answers no outstanding request.
    Unsolicited(Packet),
}

pub struct Session {
    address: ServerAddress,
    config: ConnectionConfig,
    connection: Option<Connection>,
    state: SessionState,
    awaiting: VecDeque<(TaskId, PacketType)>,
}

impl Session {
    /// Create an uninitialized session.
    pub fn new(address: ServerAddress, config: ConnectionConfig) -> Self {
        Self {
            address,
            config,
            connection: None,
            state: SessionState::Uninitialized,
            awaiting: VecDeque::new(),
        }
    }

    #[inline]
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Initialized
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Number of tasks waiting for a direct reply.
    #[inline]
    pub fn awaiting_replies(&self) -> usize {
        self.awaiting.len()
    }

    /// Open the TCP connection.
    pub async fn init(&mut self) -> Result<()> {
        match self.state {
            SessionState::Initialized => {
                return Err(GearmanError::SessionAlreadyInitialized(self.to_string()))
            }
            SessionState::Closed => return Err(GearmanError::SessionClosed(self.to_string())),
            SessionState::Uninitialized => {}
        }

        let connection = Connection::connect(&self.address, &self.config).await?;
        self.connection = Some(connection);
        self.state = SessionState::Initialized;
        debug!(server = %self.address, "session opened");
        Ok(())
    }

    /// Close the connection. The session can not be reinitialized.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {
                Err(GearmanError::SessionNotInitialized(self.to_string()))
            }
            SessionState::Closed => Err(GearmanError::SessionClosed(self.to_string())),
            SessionState::Initialized => {
                self.teardown();
                Ok(())
            }
        }
    }

    /// Flush queued bytes, then close.
    pub async fn close_gracefully(&mut self) -> Result<()> {
        if self.state == SessionState::Initialized {
            if let Some(connection) = self.connection.as_mut() {
                if let Err(e) = connection.shutdown().await {
                    debug!(server = %self.address, error = %e, "flush on close failed");
                }
            }
        }
        self.close()
    }

    /// Queue a task's request and fire its NEW transition.
    ///
    /// A task that now awaits a reply joins the reply queue.
    pub fn submit_task<H: ResponseHandler>(&mut self, task: &mut Task<H>) -> Result<()> {
        let request = task.request().clone();
        self.write(Some(&request))?;

        if task.handle_packet(&request)? == TaskState::Submitted {
            self.awaiting.push_back((task.id(), request.packet_type()));
        }
        Ok(())
    }

    /// Queue a packet that expects no reply.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        self.write(Some(packet)).map(|_| ())
    }

    /// Flush, read, and classify at most one packet. Never blocks.
    pub fn drive_io(&mut self) -> Result<Option<SessionEvent>> {
        self.write(None)?;

        let read = self.connection_mut()?.read();
        let packet = match read {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.fail(e)),
        };

        if let Some(&(task_id, request)) = self.awaiting.front() {
            if packet.is_response() && packet.packet_type().is_reply_to(request) {
                self.awaiting.pop_front();
                return Ok(Some(SessionEvent::Reply { task_id, packet }));
            }
        }
        Ok(Some(SessionEvent::Unsolicited(packet)))
    }

    /// Wait until `drive_io` can make progress.
    pub async fn ready(&self) -> Result<()> {
        match (&self.connection, self.state) {
            (Some(connection), SessionState::Initialized) => connection.ready().await,
            _ => Err(self.lifecycle_error()),
        }
    }

    /// Check if bytes are waiting to be written.
    pub fn has_pending_writes(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(Connection::has_pending_writes)
    }

    /// Oversized packets are refused without closing the session.
    fn write(&mut self, packet: Option<&Packet>) -> Result<usize> {
        let connection = self.connection_mut()?;
        if let Some(packet) = packet {
            connection.check_outbound(packet)?;
        }
        let written = connection.write(packet);
        written.map_err(|e| self.fail(e))
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        if self.state != SessionState::Initialized {
            return Err(self.lifecycle_error());
        }
        match self.connection.as_mut() {
            Some(connection) => Ok(connection),
            None => Err(GearmanError::SessionNotInitialized(self.address.to_string())),
        }
    }

    fn lifecycle_error(&self) -> GearmanError {
        match self.state {
            SessionState::Closed => GearmanError::SessionClosed(self.to_string()),
            _ => GearmanError::SessionNotInitialized(self.to_string()),
        }
    }

    fn fail(&mut self, error: GearmanError) -> GearmanError {
        warn!(server = %self.address, error = %error, "closing session after transport failure");
        self.teardown();
        error
    }

    fn teardown(&mut self) {
        self.connection = None;
        self.awaiting.clear();
        self.state = SessionState::Closed;
        debug!(server = %self.address, "session closed");
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("state", &self.state)
            .field("awaiting", &self.awaiting.len())
            .finish()
    }
}
