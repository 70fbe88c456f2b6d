//! Request lifecycle.
//!
//! A [`Task`] wraps one outgoing request and tracks it against the packets
//! delivered to it:
//!
//! ```text
//! NEW ──request──► SUBMITTED ──response──► RUNNING ──handler done──► FINISHED
//!  │                                        │
//!  └──request, no reply expected──► FINISHED └──no handler / error──► EXCEPTION
//! ```
//!
//! Each delivery loops until no further transition applies. The delivery
//! that enters `EXCEPTION` returns an error, as does every later one.

use std::fmt;

use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::{GearmanError, Result};
use crate::protocol::Packet;

/// Unique task identifier.
pub type TaskId = Uuid;

/// Task lifecycle state, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    New,
    Submitted,
    Running,
    Finished,
    Exception,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::New => "NEW",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Finished => "FINISHED",
            TaskState::Exception => "EXCEPTION",
        };
        f.write_str(name)
    }
}

/// Consumes the response packets of a task.
pub trait ResponseHandler {
    /// Handle one response; `Ok(true)` means the exchange is complete.
    fn handle_response(&mut self, packet: &Packet) -> Result<bool>;
}

impl<F> ResponseHandler for F
where
    F: FnMut(&Packet) -> Result<bool>,
{
    fn handle_response(&mut self, packet: &Packet) -> Result<bool> {
        self(packet)
    }
}

/// Handler type of tasks that never see a response.
#[derive(Debug)]
pub enum NoResponse {}

impl ResponseHandler for NoResponse {
    fn handle_response(&mut self, _packet: &Packet) -> Result<bool> {
        match *self {}
    }
}

/// One outstanding request.
pub struct Task<H> {
    id: TaskId,
    request: Packet,
    handler: Option<H>,
    state: TaskState,
}

impl<H: ResponseHandler> Task<H> {
    /// Create a task; fails with `NotARequest` unless `request` is a request.
    pub fn new(request: Packet, handler: Option<H>) -> Result<Self> {
        if !request.is_request() {
            return Err(GearmanError::NotARequest(request.to_string()));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            request,
            handler,
            state: TaskState::New,
        })
    }

    /// Create a task with a response handler.
    pub fn with_handler(request: Packet, handler: H) -> Result<Self> {
        Self::new(request, Some(handler))
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn request(&self) -> &Packet {
        &self.request
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn handler(&self) -> Option<&H> {
        self.handler.as_ref()
    }

    #[inline]
    pub fn handler_mut(&mut self) -> Option<&mut H> {
        self.handler.as_mut()
    }

    /// Consume the task, returning its handler.
    pub fn into_handler(self) -> Option<H> {
        self.handler
    }

    /// Deliver a packet and advance the state machine.
    pub fn handle_packet(&mut self, packet: &Packet) -> Result<TaskState> {
        loop {
            match self.state {
                TaskState::New => {
                    if packet.is_request() {
                        if self.request.packet_type().requires_response() {
                            self.change_state(TaskState::Submitted);
                        } else {
                            self.change_state(TaskState::Finished);
                        }
                    }
                    break;
                }
                TaskState::Submitted => {
                    if !packet.is_response() {
                        break;
                    }
                    self.change_state(TaskState::Running);
                }
                TaskState::Running => {
                    if !packet.is_response() {
                        break;
                    }
                    let Some(handler) = self.handler.as_mut() else {
                        warn!(task = %self.id, request = %self.request, "response arrived for a task without a handler");
                        self.change_state(TaskState::Exception);
                        return Err(GearmanError::TaskFailed(format!(
                            "{} has no response handler for {}",
                            self, packet
                        )));
                    };
                    match handler.handle_response(packet) {
                        Ok(true) => self.change_state(TaskState::Finished),
                        Ok(false) => {}
                        Err(e) => {
                            self.change_state(TaskState::Exception);
                            return Err(GearmanError::TaskFailed(format!("{self}: {e}")));
                        }
                    }
                    break;
                }
                TaskState::Finished => break,
                TaskState::Exception => {
                    return Err(GearmanError::TaskFailed(format!(
                        "{self} already failed while driving {}",
                        self.request
                    )));
                }
            }
        }
        Ok(self.state)
    }

    fn change_state(&mut self, next: TaskState) {
        if next != self.state {
            trace!(task = %self.id, from = %self.state, to = %next, "task state change");
            self.state = next;
        }
    }
}

impl Task<NoResponse> {
    /// Create a task for a request that expects no reply.
    pub fn fire_and_forget(request: Packet) -> Result<Self> {
        Self::new(request, None)
    }
}

impl<H> fmt::Display for Task<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {} ({})", self.id, self.request.packet_type())
    }
}

impl<H> fmt::Debug for Task<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;
    use bytes::Bytes;

    fn submit() -> Packet {
        Packet::request(PacketType::SubmitJob, Bytes::from_static(b"reverse\0uid\0abc"))
    }

    fn created() -> Packet {
        Packet::response(PacketType::JobCreated, Bytes::from_static(b"H:1"))
    }

    #[test]
    fn test_new_requires_request_packet() {
        let result = Task::fire_and_forget(created());
        assert!(matches!(result, Err(GearmanError::NotARequest(_))));
    }

    #[test]
    fn test_fire_and_forget_finishes_on_submit() {
        let request = Packet::request(PacketType::CanDo, Bytes::from_static(b"reverse"));
        let mut task = Task::fire_and_forget(request.clone()).unwrap();
        assert_eq!(task.state(), TaskState::New);
        assert_eq!(task.handle_packet(&request).unwrap(), TaskState::Finished);
        assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::Finished);
    }

    #[test]
    fn test_response_moves_to_running_when_handler_not_done() {
        let mut task = Task::with_handler(submit(), |_: &Packet| -> Result<bool> { Ok(false) }).unwrap();
        assert_eq!(task.handle_packet(&submit()).unwrap(), TaskState::Submitted);
        assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::Running);
        for _ in 0..5 {
            assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::Running);
        }
    }

    #[test]
    fn test_response_finishes_when_handler_done() {
        let mut calls = 0;
        let mut task = Task::with_handler(submit(), |_: &Packet| -> Result<bool> {
            calls += 1;
            Ok(true)
        })
        .unwrap();
        task.handle_packet(&submit()).unwrap();
        assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::Finished);
        assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::Finished);
        drop(task);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_submitted_ignores_requests() {
        let mut task = Task::with_handler(submit(), |_: &Packet| -> Result<bool> { Ok(true) }).unwrap();
        task.handle_packet(&submit()).unwrap();
        assert_eq!(task.handle_packet(&submit()).unwrap(), TaskState::Submitted);
    }

    #[test]
    fn test_new_ignores_responses() {
        let mut task = Task::with_handler(submit(), |_: &Packet| -> Result<bool> { Ok(true) }).unwrap();
        assert_eq!(task.handle_packet(&created()).unwrap(), TaskState::New);
    }

    #[test]
    fn test_missing_handler_enters_exception() {
        let mut task = Task::<NoResponse>::new(submit(), None).unwrap();
        task.handle_packet(&submit()).unwrap();
        assert!(matches!(
            task.handle_packet(&created()),
            Err(GearmanError::TaskFailed(_))
        ));
        assert_eq!(task.state(), TaskState::Exception);
        assert!(task.handle_packet(&created()).is_err());
    }

    #[test]
    fn test_handler_error_enters_exception() {
        let mut task = Task::with_handler(submit(), |p: &Packet| -> Result<bool> {
            Err(GearmanError::MalformedPayload(p.to_string()))
        })
        .unwrap();
        task.handle_packet(&submit()).unwrap();
        let err = task.handle_packet(&created()).unwrap_err();
        assert!(err.to_string().contains("Malformed payload"));
        assert_eq!(task.state(), TaskState::Exception);
    }

    #[test]
    fn test_state_ordering() {
        assert!(TaskState::New < TaskState::Submitted);
        assert!(TaskState::Running < TaskState::Finished);
        assert!(TaskState::Finished < TaskState::Exception);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::fire_and_forget(submit()).unwrap();
        let b = Task::fire_and_forget(submit()).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
