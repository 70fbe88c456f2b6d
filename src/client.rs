//! Client orchestrator.
//!
//! The [`Client`] keeps one lazily opened [`Session`] per registered job
//! server and drives them itself: every public operation writes its request,
//! then alternates between `drive_io` and readiness waits until the reply
//! arrives or its deadline expires.
//!
//! ```text
//! submit(job) ─► random session ─► SUBMIT_JOB* ─► JOB_CREATED ─► JobHandle
//!                                                      │
//!          WORK_DATA / WORK_STATUS / WORK_COMPLETE ... ─┴─► jobs[handle]
//! ```
//!
//! A deadline never retracts a request. A job whose JOB_CREATED arrives late
//! is still tracked and shows up in [`Client::drain_job_events`].
//!
//! # Example
//!
//! ```no_run
//! use gearman_client::{Client, Job, ServerAddress};
//!
//! # async fn run() -> gearman_client::Result<()> {
//! let mut client = Client::new();
//! client.add_server(ServerAddress::default())?;
//!
//! let result = client.execute(&Job::new("reverse", "Hello World")).await?;
//! assert_eq!(result.results(), b"dlroW olleH");
//!
//! client.shutdown(None).await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::future::select_all;
use rand::seq::IteratorRandom;
use tracing::{debug, warn};

use crate::config::{ClientConfig, ServerAddress};
use crate::error::{GearmanError, Result};
use crate::job::{split_handle, Job, JobHandle, JobResult, JobStatus};
use crate::protocol::{Packet, PacketType};
use crate::session::{Session, SessionEvent};
use crate::task::{ResponseHandler, Task, TaskId, TaskState};

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Reply expected by an outstanding client request.
enum Exchange {
    Submit {
        background: bool,
        handle: Option<Bytes>,
    },
    Status(Option<JobStatus>),
    Echo(Option<Bytes>),
}

impl ResponseHandler for Exchange {
    fn handle_response(&mut self, packet: &Packet) -> Result<bool> {
        match self {
            Exchange::Submit { handle, .. } => {
                *handle = Some(packet.payload_bytes());
            }
            Exchange::Status(status) => {
                *status = Some(JobStatus::from_packet(packet)?);
            }
            Exchange::Echo(data) => {
                *data = Some(packet.payload_bytes());
            }
        }
        Ok(true)
    }
}

struct PendingTask {
    task: Task<Exchange>,
    server: ServerAddress,
    /// The caller stopped waiting; drop the task once it finishes.
    detached: bool,
}

/// Gearman client.
pub struct Client {
    config: ClientConfig,
    sessions: HashMap<ServerAddress, Session>,
    tasks: HashMap<TaskId, PendingTask>,
    jobs: HashMap<JobHandle, JobResult>,
    finished: HashMap<JobHandle, JobResult>,
    /// Updates not yet drained, dropped once their job's result is collected.
    updated: Vec<(JobHandle, Packet)>,
    state: RunState,
}

impl Client {
    /// Create a client with default configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            tasks: HashMap::new(),
            jobs: HashMap::new(),
            finished: HashMap::new(),
            updated: Vec::new(),
            state: RunState::Running,
        }
    }

    #[inline]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[inline]
    pub fn run_state(&self) -> RunState {
        self.state
    }

    /// Register a job server. The connection is opened on first use.
    ///
    /// Returns `false` if the server was already registered.
    pub fn add_server(&mut self, address: ServerAddress) -> Result<bool> {
        self.ensure_running()?;
        if self.sessions.contains_key(&address) {
            return Ok(false);
        }
        debug!(server = %address, "job server registered");
        let session = Session::new(address.clone(), self.config.connection.clone());
        self.sessions.insert(address, session);
        Ok(true)
    }

    /// Unregister a job server, dropping every request and job routed to it.
    pub fn remove_server(&mut self, address: &ServerAddress) -> Result<()> {
        let mut session = self
            .sessions
            .remove(address)
            .ok_or_else(|| GearmanError::UnknownServer(address.to_string()))?;
        if session.is_initialized() {
            session.close()?;
        }
        self.forget_server(address);
        debug!(server = %address, "job server removed");
        Ok(())
    }

    pub fn has_server(&self, address: &ServerAddress) -> bool {
        self.sessions.contains_key(address)
    }

    pub fn servers(&self) -> Vec<ServerAddress> {
        self.sessions.keys().cloned().collect()
    }

    /// Submit a job and wait for the server to acknowledge it.
    ///
    /// Fails with `Timeout` if JOB_CREATED does not arrive within the submit
    /// timeout. The request stays live; a late acknowledgement is delivered
    /// through [`Client::drain_job_events`].
    pub async fn submit(&mut self, job: &Job) -> Result<JobHandle> {
        self.ensure_running()?;
        let request = job.to_packet()?;
        let server = self.pick_server()?;
        let task = Task::with_handler(
            request,
            Exchange::Submit {
                background: job.is_background(),
                handle: None,
            },
        )?;

        let id = self.start_task(&server, task).await?;
        debug!(task = %id, server = %server, function = job.function(), "job submitted");
        self.await_task(id, self.config.submit_timeout, "JOB_CREATED")
            .await?;

        match self.take_handler(id) {
            Some(Exchange::Submit {
                handle: Some(handle),
                ..
            }) => Ok(JobHandle::new(handle, server)),
            _ => Err(GearmanError::InvalidState(
                "submission finished without a job handle".into(),
            )),
        }
    }

    /// Submit an attached job and wait for its terminal result.
    pub async fn execute(&mut self, job: &Job) -> Result<JobResult> {
        if job.is_background() {
            return Err(GearmanError::InvalidState(
                "background jobs report no result".into(),
            ));
        }
        let handle = self.submit(job).await?;
        self.wait_for_job(&handle, None).await
    }

    /// Drive the job's session until the job reaches a terminal state.
    pub async fn wait_for_job(
        &mut self,
        handle: &JobHandle,
        timeout: Option<Duration>,
    ) -> Result<JobResult> {
        let wait = self.drive_until_finished(handle);
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| GearmanError::Timeout(format!("result of {handle}")))?,
            None => wait.await,
        }
    }

    /// Remove and return the result of a finished job.
    pub fn take_result(&mut self, handle: &JobHandle) -> Option<JobResult> {
        let result = self.finished.remove(handle)?;
        self.release_events(handle);
        Some(result)
    }

    /// Ask the issuing server for the status of a job.
    pub async fn job_status(&mut self, handle: &JobHandle) -> Result<JobStatus> {
        self.ensure_running()?;
        let request = Packet::request(PacketType::GetStatus, handle.handle_bytes());
        let task = Task::with_handler(request, Exchange::Status(None))?;

        let id = self.start_task(handle.server(), task).await?;
        self.await_task(id, self.config.request_timeout, "STATUS_RES")
            .await?;

        match self.take_handler(id) {
            Some(Exchange::Status(Some(status))) => Ok(status),
            _ => Err(GearmanError::InvalidState(
                "status request finished without STATUS_RES".into(),
            )),
        }
    }

    /// Round-trip `data` through a randomly chosen job server.
    pub async fn echo(&mut self, data: impl Into<Bytes>) -> Result<Bytes> {
        self.ensure_running()?;
        let server = self.pick_server()?;
        let request = Packet::request(PacketType::EchoReq, data.into());
        let task = Task::with_handler(request, Exchange::Echo(None))?;

        let id = self.start_task(&server, task).await?;
        self.await_task(id, self.config.request_timeout, "ECHO_RES")
            .await?;

        match self.take_handler(id) {
            Some(Exchange::Echo(Some(data))) => Ok(data),
            _ => Err(GearmanError::InvalidState(
                "echo finished without ECHO_RES".into(),
            )),
        }
    }

    /// Drive every open session without blocking and return the packets
    /// that updated tracked jobs since the last call.
    ///
    /// Packets of jobs whose result was already collected are not returned.
    pub fn drain_job_events(&mut self) -> Vec<Packet> {
        if self.state == RunState::Terminated {
            return Vec::new();
        }
        for server in self.open_servers() {
            if let Err(e) = self.drive_session(&server) {
                warn!(server = %server, error = %e, "error while driving client I/O");
            }
        }
        std::mem::take(&mut self.updated)
            .into_iter()
            .map(|(_, packet)| packet)
            .collect()
    }

    /// Number of job updates waiting for `drain_job_events`.
    #[inline]
    pub fn pending_event_count(&self) -> usize {
        self.updated.len()
    }

    /// Number of attached jobs that have not reached a terminal state.
    #[inline]
    pub fn active_job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Stop accepting work, wait for attached jobs (up to `deadline`), then
    /// close every session.
    ///
    /// Returns `true` if no attached job was left unfinished.
    pub async fn shutdown(&mut self, deadline: Option<Duration>) -> bool {
        if self.state != RunState::Running {
            return self.jobs.is_empty();
        }
        self.state = RunState::ShuttingDown;
        debug!(active = self.jobs.len(), "client shutting down");

        let drained = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.drive_until_idle())
                .await
                .unwrap_or(false),
            None => self.drive_until_idle().await,
        };
        self.shutdown_now();
        drained
    }

    /// Close every session immediately and discard tracked state.
    pub fn shutdown_now(&mut self) {
        if self.state == RunState::Terminated {
            return;
        }
        for (server, session) in self.sessions.iter_mut() {
            if session.is_initialized() {
                if let Err(e) = session.close() {
                    debug!(server = %server, error = %e, "session close failed");
                }
            }
        }
        self.sessions.clear();
        self.tasks.clear();
        self.jobs.clear();
        self.finished.clear();
        self.updated.clear();
        self.state = RunState::Terminated;
        debug!("client terminated");
    }

    /// No longer accepting work.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.state != RunState::Running
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state == RunState::Terminated
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state == RunState::Running {
            Ok(())
        } else {
            Err(GearmanError::Shutdown)
        }
    }

    fn pick_server(&self) -> Result<ServerAddress> {
        self.sessions
            .keys()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(GearmanError::NoServers)
    }

    fn open_servers(&self) -> Vec<ServerAddress> {
        self.sessions
            .iter()
            .filter(|(_, session)| session.is_initialized())
            .map(|(server, _)| server.clone())
            .collect()
    }

    async fn session(&mut self, server: &ServerAddress) -> Result<&mut Session> {
        let session = self
            .sessions
            .get_mut(server)
            .ok_or_else(|| GearmanError::UnknownServer(server.to_string()))?;
        if !session.is_initialized() {
            session.init().await?;
        }
        Ok(session)
    }

    async fn start_task(&mut self, server: &ServerAddress, mut task: Task<Exchange>) -> Result<TaskId> {
        let submitted = self.session(server).await?.submit_task(&mut task);
        if let Err(e) = submitted {
            // Oversized requests are refused before they touch the wire.
            if !matches!(e, GearmanError::PayloadTooLarge { .. }) {
                self.reset_session(server);
            }
            return Err(e);
        }

        let id = task.id();
        self.tasks.insert(
            id,
            PendingTask {
                task,
                server: server.clone(),
                detached: false,
            },
        );
        Ok(id)
    }

    fn take_handler(&mut self, id: TaskId) -> Option<Exchange> {
        self.tasks.remove(&id).and_then(|p| p.task.into_handler())
    }

    async fn await_task(&mut self, id: TaskId, timeout: Duration, reply: &str) -> Result<()> {
        match tokio::time::timeout(timeout, self.drive_until_running(id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.tasks.remove(&id);
                Err(e)
            }
            Err(_) => {
                if let Some(pending) = self.tasks.get_mut(&id) {
                    pending.detached = true;
                }
                warn!(task = %id, "timed out waiting for {reply}");
                Err(GearmanError::Timeout(reply.to_string()))
            }
        }
    }

    async fn drive_until_running(&mut self, id: TaskId) -> Result<()> {
        loop {
            let server = match self.tasks.get(&id) {
                Some(pending) if pending.task.state() >= TaskState::Running => return Ok(()),
                Some(pending) => pending.server.clone(),
                None => {
                    return Err(GearmanError::TaskFailed(format!(
                        "task {id} was dropped with its session"
                    )))
                }
            };

            self.drive_session(&server)?;

            let waiting = self
                .tasks
                .get(&id)
                .is_some_and(|pending| pending.task.state() < TaskState::Running);
            if waiting {
                self.wait_ready(&server).await?;
            }
        }
    }

    async fn drive_until_finished(&mut self, handle: &JobHandle) -> Result<JobResult> {
        loop {
            if let Some(result) = self.finished.remove(handle) {
                self.release_events(handle);
                return Ok(result);
            }
            if !self.jobs.contains_key(handle) {
                return Err(GearmanError::UnknownJob(handle.to_string()));
            }

            self.drive_session(handle.server())?;

            if self.jobs.contains_key(handle) {
                self.wait_ready(handle.server()).await?;
            }
        }
    }

    async fn drive_until_idle(&mut self) -> bool {
        while !self.jobs.is_empty() {
            for server in self.open_servers() {
                if let Err(e) = self.drive_session(&server) {
                    warn!(server = %server, error = %e, "error while draining jobs");
                }
            }
            if self.jobs.is_empty() {
                break;
            }
            if let Err(e) = self.wait_any_ready().await {
                debug!(error = %e, "no session left to wait on");
                return false;
            }
        }
        true
    }

    async fn wait_ready(&self, server: &ServerAddress) -> Result<()> {
        match self.sessions.get(server) {
            Some(session) if session.is_initialized() => session.ready().await,
            _ => Ok(()),
        }
    }

    async fn wait_any_ready(&self) -> Result<()> {
        let waits: Vec<_> = self
            .sessions
            .values()
            .filter(|session| session.is_initialized())
            .map(|session| Box::pin(session.ready()))
            .collect();
        if waits.is_empty() {
            return Err(GearmanError::NoServers);
        }
        select_all(waits).await.0
    }

    /// Drive one session until it has no complete packet left.
    fn drive_session(&mut self, server: &ServerAddress) -> Result<()> {
        loop {
            let event = match self.sessions.get_mut(server) {
                Some(session) if session.is_initialized() => session.drive_io(),
                _ => return Ok(()),
            };
            match event {
                Ok(Some(event)) => self.dispatch(server, event)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.reset_session(server);
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&mut self, server: &ServerAddress, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Reply { task_id, packet } => self.handle_reply(server, task_id, packet),
            SessionEvent::Unsolicited(packet) => self.handle_unsolicited(server, packet),
        }
    }

    fn handle_reply(&mut self, server: &ServerAddress, task_id: TaskId, packet: Packet) -> Result<()> {
        let Some(pending) = self.tasks.get_mut(&task_id) else {
            debug!(task = %task_id, packet = %packet, "reply for a forgotten task");
            return Ok(());
        };

        let state = match pending.task.handle_packet(&packet) {
            Ok(state) => state,
            Err(e) => {
                self.tasks.remove(&task_id);
                return Err(e);
            }
        };
        if state != TaskState::Finished {
            return Ok(());
        }

        let detached = pending.detached;
        let created = match pending.task.handler() {
            Some(Exchange::Submit {
                background: false,
                handle: Some(handle),
            }) => Some(handle.clone()),
            _ => None,
        };

        if let Some(handle) = created {
            let key = JobHandle::new(handle.clone(), server.clone());
            self.jobs.insert(key.clone(), JobResult::pending(handle));
            self.updated.push((key, packet));
        }
        if detached {
            self.tasks.remove(&task_id);
        }
        Ok(())
    }

    fn handle_unsolicited(&mut self, server: &ServerAddress, packet: Packet) -> Result<()> {
        let packet_type = packet.packet_type();

        if packet.is_response() && packet_type.is_work_update() {
            let (handle, _) = split_handle(&packet);
            let key = JobHandle::new(handle, server.clone());
            let Some(result) = self.jobs.get_mut(&key) else {
                debug!(job = %key, packet = %packet, "update for an untracked job");
                return Ok(());
            };

            let done = result.apply(&packet)?;
            self.updated.push((key.clone(), packet));
            if done {
                if let Some(result) = self.jobs.remove(&key) {
                    self.finished.insert(key, result);
                }
            }
            return Ok(());
        }

        if packet_type == PacketType::Error {
            let (code, text) = split_handle(&packet);
            let code = String::from_utf8_lossy(&code).into_owned();
            let text = String::from_utf8_lossy(&text).into_owned();
            warn!(server = %server, code = %code, text = %text, "job server error, closing session");
            self.drop_session(server);
            return Err(GearmanError::Remote { code, text });
        }

        warn!(server = %server, packet = %packet, "unexpected packet, closing session");
        self.drop_session(server);
        Err(GearmanError::InvalidState(format!(
            "unexpected {packet_type} from {server}"
        )))
    }

    /// Remove a server after a protocol-level failure.
    fn drop_session(&mut self, server: &ServerAddress) {
        if let Some(mut session) = self.sessions.remove(server) {
            if session.is_initialized() {
                let _ = session.close();
            }
        }
        self.forget_server(server);
        if self.sessions.is_empty() {
            warn!("no job server sessions left, shutting client down");
            self.shutdown_now();
        }
    }

    /// Replace a session after a transport failure; the next request
    /// reconnects.
    fn reset_session(&mut self, server: &ServerAddress) {
        if let Some(session) = self.sessions.get_mut(server) {
            if session.is_initialized() {
                let _ = session.close();
            }
            *session = Session::new(server.clone(), self.config.connection.clone());
        }
        self.forget_server(server);
    }

    fn forget_server(&mut self, server: &ServerAddress) {
        self.tasks.retain(|_, pending| &pending.server != server);
        self.jobs.retain(|handle, _| handle.server() != server);
        self.updated.retain(|(handle, _)| handle.server() != server);
    }

    fn release_events(&mut self, handle: &JobHandle) {
        self.updated.retain(|(key, _)| key != handle);
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
