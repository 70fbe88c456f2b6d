//! Worker orchestrator.
//!
//! A [`Worker`] registers functions with one or more job servers, grabs
//! assigned jobs and runs them on blocking threads:
//!
//! ```text
//! GRAB_JOB ─► JOB_ASSIGN ─► queue ─► spawn_blocking(function) ─► WORK_COMPLETE
//!    │                                      │
//!    └─► NO_JOB ─► PRE_SLEEP ─► NOOP ─┐      └─► WORK_DATA / WORK_STATUS ...
//!    ▲                                │
//!    └────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gearman_client::worker::{JobContext, Worker};
//! use gearman_client::{JobResult, ServerAddress};
//!
//! # async fn run() -> gearman_client::Result<()> {
//! let mut worker = Worker::new();
//! worker.register_function("reverse", |ctx: &JobContext| {
//!     let mut data = ctx.data().to_vec();
//!     data.reverse();
//!     Ok(JobResult::success(data))
//! })?;
//! worker.add_server(ServerAddress::default()).await?;
//!
//! let stop = worker.stop_token();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.cancel();
//! });
//! worker.work().await?;
//! worker.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod context;
mod function;

pub use context::JobContext;
pub use function::{
    BoxError, FunctionDefinition, FunctionFactory, FunctionRegistry, FunctionResult,
    GearmanFunction,
};

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use futures::future::select_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::{ServerAddress, WorkerConfig};
use crate::error::{GearmanError, Result};
use crate::job::{split_handle, JobResult};
use crate::protocol::{Magic, Packet, PacketType};
use crate::session::{Session, SessionEvent};
use crate::task::{Task, TaskId};

type ReplyHandler = fn(&Packet) -> Result<bool>;

fn reply_received(_: &Packet) -> Result<bool> {
    Ok(true)
}

struct WorkerSession {
    session: Session,
    /// GRAB_JOB or PRE_SLEEP waiting for its reply.
    outstanding: Option<Task<ReplyHandler>>,
}

/// A job taken off the wire, bound to a fresh function instance.
struct AssignedJob {
    server: ServerAddress,
    handle: Bytes,
    function_name: String,
    unique_id: Option<String>,
    data: Bytes,
    function: Box<dyn GearmanFunction>,
    timeout: Option<Duration>,
}

enum Outcome {
    Returned(JobResult),
    Failed(String),
}

/// Gearman worker.
pub struct Worker {
    config: WorkerConfig,
    registry: FunctionRegistry,
    sessions: HashMap<ServerAddress, WorkerSession>,
    queue: VecDeque<AssignedJob>,
    stop: CancellationToken,
    running: bool,
}

impl Worker {
    /// Create a worker with default configuration.
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    pub fn with_config(config: WorkerConfig) -> Self {
        Self {
            config,
            registry: FunctionRegistry::new(),
            sessions: HashMap::new(),
            queue: VecDeque::new(),
            stop: CancellationToken::new(),
            running: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[inline]
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Change the worker id and announce it to every open session.
    pub fn set_worker_id(&mut self, id: impl Into<String>) {
        self.config.worker_id = id.into();
        let packet = self.client_id_packet();
        self.broadcast(&packet);
    }

    /// Connect to a job server, announce the worker id and every registered
    /// function, then ask for a job.
    ///
    /// Returns `false` if the server was already registered.
    pub async fn add_server(&mut self, address: ServerAddress) -> Result<bool> {
        if self.sessions.contains_key(&address) {
            return Ok(false);
        }

        let mut session = Session::new(address.clone(), self.config.connection.clone());
        session.init().await?;
        session.send(&self.client_id_packet())?;
        for definition in self.registry.definitions() {
            session.send(&can_do_packet(definition)?)?;
        }

        let mut entry = WorkerSession {
            session,
            outstanding: None,
        };
        submit_outstanding(&mut entry, PacketType::GrabJob)?;
        debug!(server = %address, functions = self.registry.len(), "registered with job server");
        self.sessions.insert(address, entry);
        Ok(true)
    }

    /// Disconnect from a job server.
    pub async fn remove_server(&mut self, address: &ServerAddress) -> Result<()> {
        let Some(mut entry) = self.sessions.remove(address) else {
            return Err(GearmanError::UnknownServer(address.to_string()));
        };
        self.queue.retain(|job| &job.server != address);
        if entry.session.is_initialized() {
            entry.session.close_gracefully().await?;
        }
        Ok(())
    }

    pub fn has_server(&self, address: &ServerAddress) -> bool {
        self.sessions.contains_key(address)
    }

    pub fn servers(&self) -> Vec<ServerAddress> {
        self.sessions.keys().cloned().collect()
    }

    /// Register a closure under `name` and announce it with CAN_DO.
    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&JobContext) -> FunctionResult + Send + Sync + 'static,
    {
        let name = name.into();
        self.registry.register_fn(name.clone(), None, f);
        self.announce(&name)
    }

    /// Register a closure whose executions are bounded by `timeout`.
    ///
    /// The server is told the timeout with CAN_DO_TIMEOUT.
    pub fn register_function_with_timeout<F>(
        &mut self,
        name: impl Into<String>,
        timeout: Duration,
        f: F,
    ) -> Result<()>
    where
        F: Fn(&JobContext) -> FunctionResult + Send + Sync + 'static,
    {
        let name = name.into();
        self.registry.register_fn(name.clone(), Some(timeout), f);
        self.announce(&name)
    }

    /// Register a factory producing one function instance per job.
    pub fn register_function_factory(
        &mut self,
        name: impl Into<String>,
        timeout: Option<Duration>,
        factory: impl FunctionFactory + 'static,
    ) -> Result<()> {
        let name = name.into();
        self.registry
            .register(FunctionDefinition::new(name.clone(), timeout, factory));
        self.announce(&name)
    }

    /// Unregister a function and send CANT_DO. Returns `false` if it was
    /// not registered.
    pub fn unregister_function(&mut self, name: &str) -> Result<bool> {
        if self.registry.unregister(name).is_none() {
            return Ok(false);
        }
        let packet = Packet::request(PacketType::CantDo, Bytes::copy_from_slice(name.as_bytes()));
        self.broadcast(&packet);
        Ok(true)
    }

    /// Unregister every function and send RESET_ABILITIES.
    pub fn unregister_all(&mut self) {
        self.registry.clear();
        self.broadcast(&Packet::request(PacketType::ResetAbilities, Bytes::new()));
    }

    /// Registered function names, sorted.
    pub fn registered_functions(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Token that stops a running [`Worker::work`] loop when cancelled.
    ///
    /// A token cancelled before `work` starts is replaced, so fetch it again
    /// for each run.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Ask the work loop to return after the current iteration.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Grab and execute jobs until stopped.
    pub async fn work(&mut self) -> Result<()> {
        if self.running {
            return Err(GearmanError::InvalidState(
                "worker loop is already running".to_string(),
            ));
        }
        if self.stop.is_cancelled() {
            self.stop = CancellationToken::new();
        }

        self.running = true;
        debug!(worker = %self.config.worker_id, servers = self.sessions.len(), "work loop started");
        let result = self.run_loop().await;
        self.running = false;
        debug!(worker = %self.config.worker_id, "work loop stopped");
        result
    }

    /// Stop, drop queued jobs and close every session.
    pub async fn shutdown(&mut self) {
        self.stop.cancel();
        self.queue.clear();
        for (address, mut entry) in self.sessions.drain() {
            if entry.session.is_initialized() {
                if let Err(e) = entry.session.close_gracefully().await {
                    debug!(server = %address, error = %e, "close failed");
                }
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        while !self.stop.is_cancelled() {
            self.ensure_outstanding();

            if self.queue.is_empty() {
                let stop = self.stop.clone();
                let poll = self.config.poll_interval;
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::timeout(poll, wait_any_ready(&self.sessions)) => {}
                }
            }

            for address in self.servers() {
                self.drive_session(&address)?;
            }

            if let Some(job) = self.queue.pop_front() {
                self.execute(job).await;
            }
        }
        Ok(())
    }

    /// Every open session with no GRAB_JOB or PRE_SLEEP in flight gets a
    /// fresh GRAB_JOB.
    fn ensure_outstanding(&mut self) {
        let mut failed = Vec::new();
        for (address, entry) in self.sessions.iter_mut() {
            if entry.outstanding.is_none() && entry.session.is_initialized() {
                if let Err(e) = submit_outstanding(entry, PacketType::GrabJob) {
                    warn!(server = %address, error = %e, "failed to request a job");
                    failed.push(address.clone());
                }
            }
        }
        for address in failed {
            self.drop_session(&address);
        }
    }

    fn drive_session(&mut self, address: &ServerAddress) -> Result<()> {
        loop {
            let event = match self.sessions.get_mut(address) {
                Some(entry) if entry.session.is_initialized() => entry.session.drive_io(),
                _ => return Ok(()),
            };
            match event {
                Ok(Some(SessionEvent::Reply { task_id, packet })) => {
                    self.handle_reply(address, task_id, packet)?
                }
                Ok(Some(SessionEvent::Unsolicited(packet))) => {
                    self.handle_unsolicited(address, packet)
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(server = %address, error = %e, "lost job server");
                    self.drop_session(address);
                    return Ok(());
                }
            }
        }
    }

    fn handle_reply(&mut self, address: &ServerAddress, task_id: TaskId, packet: Packet) -> Result<()> {
        let Some(entry) = self.sessions.get_mut(address) else {
            return Ok(());
        };
        match entry.outstanding.take() {
            Some(mut task) if task.id() == task_id => {
                task.handle_packet(&packet)?;
            }
            other => {
                entry.outstanding = other;
                debug!(server = %address, packet = %packet, "reply for a forgotten request");
                return Ok(());
            }
        }

        match packet.packet_type() {
            PacketType::JobAssign | PacketType::JobAssignUniq => self.assign(address, &packet),
            PacketType::NoJob => {
                trace!(server = %address, "no job, going to sleep");
                if let Some(entry) = self.sessions.get_mut(address) {
                    if let Err(e) = submit_outstanding(entry, PacketType::PreSleep) {
                        warn!(server = %address, error = %e, "failed to send PRE_SLEEP");
                        self.drop_session(address);
                    }
                }
            }
            PacketType::Noop => trace!(server = %address, "woken up"),
            other => debug!(server = %address, packet_type = %other, "unexpected reply"),
        }
        Ok(())
    }

    fn handle_unsolicited(&mut self, address: &ServerAddress, packet: Packet) {
        match packet.packet_type() {
            PacketType::Noop => {
                trace!(server = %address, "woken up while a request is in flight");
            }
            PacketType::JobAssign | PacketType::JobAssignUniq => {
                debug!(server = %address, packet = %packet, "assignment outside a grab");
                self.assign(address, &packet);
            }
            PacketType::Error => {
                let (code, text) = split_handle(&packet);
                warn!(
                    server = %address,
                    code = %String::from_utf8_lossy(&code),
                    text = %String::from_utf8_lossy(&text),
                    "job server error, closing session"
                );
                self.drop_session(address);
            }
            _ => warn!(server = %address, packet = %packet, "dropping unexpected packet"),
        }
    }

    /// Bind a JOB_ASSIGN(_UNIQ) to a new function instance and queue it.
    fn assign(&mut self, address: &ServerAddress, packet: &Packet) {
        let parsed = match packet.packet_type() {
            PacketType::JobAssignUniq => packet.components(4).map(|mut parts| {
                let data = parts.pop().unwrap_or_default();
                let unique = parts.pop().unwrap_or_default();
                (parts, Some(unique), data)
            }),
            _ => packet.components(3).map(|mut parts| {
                let data = parts.pop().unwrap_or_default();
                (parts, None, data)
            }),
        };
        let (parts, unique, data) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(server = %address, error = %e, "dropping malformed assignment");
                return;
            }
        };
        let (handle, function_name) = match parts.as_slice() {
            [handle, function] => (
                handle.clone(),
                String::from_utf8_lossy(function).into_owned(),
            ),
            _ => return,
        };

        let Some((function, timeout)) = self.registry.instantiate(&function_name) else {
            warn!(server = %address, function = %function_name, "assigned a function that is not registered");
            self.send_to(address, work_packet(PacketType::WorkFail, &handle, None));
            return;
        };

        trace!(server = %address, function = %function_name, handle = ?handle, "job assigned");
        self.queue.push_back(AssignedJob {
            server: address.clone(),
            handle,
            function_name,
            unique_id: unique.map(|u| String::from_utf8_lossy(&u).into_owned()),
            data,
            function,
            timeout,
        });
    }

    /// Run one job on a blocking thread, forwarding its progress packets
    /// live, then report the outcome.
    async fn execute(&mut self, job: AssignedJob) {
        let AssignedJob {
            server,
            handle,
            function_name,
            unique_id,
            data,
            mut function,
            timeout,
        } = job;

        let (tx, mut events) = mpsc::unbounded_channel();
        let ctx = JobContext::new(handle.clone(), function_name.clone(), unique_id, data, tx);
        let mut running = tokio::task::spawn_blocking(move || function.execute(&ctx));
        let deadline = timeout.map(|t| Instant::now() + t);

        let outcome = loop {
            tokio::select! {
                Some(packet) = events.recv() => {
                    self.send_to(&server, Some(packet));
                }
                joined = &mut running => break match joined {
                    Ok(Ok(result)) => Outcome::Returned(result),
                    Ok(Err(e)) => Outcome::Failed(e.to_string()),
                    Err(e) if e.is_panic() => Outcome::Failed(panic_message(e.into_panic())),
                    Err(e) => Outcome::Failed(e.to_string()),
                },
                _ = sleep_until(deadline) => {
                    break Outcome::Failed(format!("{function_name} timed out"));
                }
            }
        };
        while let Ok(packet) = events.try_recv() {
            self.send_to(&server, Some(packet));
        }

        match outcome {
            Outcome::Returned(result) if result.succeeded() => {
                if !result.warnings().is_empty() {
                    self.send_to(
                        &server,
                        work_packet(PacketType::WorkWarning, &handle, Some(result.warnings())),
                    );
                }
                let complete = work_packet(PacketType::WorkComplete, &handle, Some(result.results()));
                if !self.send_to(&server, complete) {
                    let message = format!("{function_name} result exceeds the maximum payload size");
                    self.report_failure(&server, &handle, message.as_bytes());
                }
            }
            Outcome::Returned(result) => {
                let message = if result.exceptions().is_empty() {
                    format!("{function_name} returned a failed result").into_bytes()
                } else {
                    result.exceptions().to_vec()
                };
                self.report_failure(&server, &handle, &message);
            }
            Outcome::Failed(message) => {
                warn!(server = %server, function = %function_name, error = %message, "function failed");
                self.report_failure(&server, &handle, message.as_bytes());
            }
        }
    }

    fn report_failure(&mut self, server: &ServerAddress, handle: &Bytes, message: &[u8]) {
        self.send_to(
            server,
            work_packet(PacketType::WorkException, handle, Some(message)),
        );
        self.send_to(server, work_packet(PacketType::WorkFail, handle, None));
    }

    /// Returns `false` only when the packet was refused for its size.
    fn send_to(&mut self, address: &ServerAddress, packet: Option<Packet>) -> bool {
        let Some(packet) = packet else {
            return true;
        };
        let sent = match self.sessions.get_mut(address) {
            Some(entry) if entry.session.is_initialized() => entry.session.send(&packet),
            _ => {
                debug!(server = %address, packet = %packet, "session gone, dropping packet");
                return true;
            }
        };
        match sent {
            Ok(()) => true,
            Err(e @ GearmanError::PayloadTooLarge { .. }) => {
                warn!(server = %address, packet = %packet, error = %e, "packet not sent");
                false
            }
            Err(e) => {
                warn!(server = %address, error = %e, "failed to send work update");
                self.drop_session(address);
                true
            }
        }
    }

    fn broadcast(&mut self, packet: &Packet) {
        for address in self.servers() {
            self.send_to(&address, Some(packet.clone()));
        }
    }

    /// Send CAN_DO or CAN_DO_TIMEOUT for `name` to every session.
    fn announce(&mut self, name: &str) -> Result<()> {
        let Some(definition) = self.registry.get(name) else {
            return Ok(());
        };
        let packet = can_do_packet(definition)?;
        self.broadcast(&packet);
        Ok(())
    }

    fn client_id_packet(&self) -> Packet {
        Packet::request(
            PacketType::SetClientId,
            Bytes::copy_from_slice(self.config.worker_id.as_bytes()),
        )
    }

    fn drop_session(&mut self, address: &ServerAddress) {
        if let Some(mut entry) = self.sessions.remove(address) {
            if entry.session.is_initialized() {
                let _ = entry.session.close();
            }
        }
        self.queue.retain(|job| &job.server != address);
        if self.sessions.is_empty() {
            error!("no job server sessions left");
        }
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve once any open session can make progress.
async fn wait_any_ready(sessions: &HashMap<ServerAddress, WorkerSession>) {
    let waits: Vec<_> = sessions
        .values()
        .filter(|entry| entry.session.is_initialized())
        .map(|entry| Box::pin(entry.session.ready()))
        .collect();
    if waits.is_empty() {
        return std::future::pending().await;
    }
    // An error here resurfaces from drive_io.
    let _ = select_all(waits).await;
}

fn submit_outstanding(entry: &mut WorkerSession, packet_type: PacketType) -> Result<()> {
    let mut task = Task::with_handler(
        Packet::request(packet_type, Bytes::new()),
        reply_received as ReplyHandler,
    )?;
    entry.session.submit_task(&mut task)?;
    entry.outstanding = Some(task);
    Ok(())
}

fn can_do_packet(definition: &FunctionDefinition) -> Result<Packet> {
    match definition.timeout_secs() {
        Some(secs) => Packet::from_components(
            Magic::Request,
            PacketType::CanDoTimeout,
            &[definition.name().as_bytes(), secs.to_string().as_bytes()],
        ),
        None => Ok(Packet::request(
            PacketType::CanDo,
            Bytes::copy_from_slice(definition.name().as_bytes()),
        )),
    }
}

fn work_packet(packet_type: PacketType, handle: &Bytes, body: Option<&[u8]>) -> Option<Packet> {
    let packet = match body {
        Some(body) => Packet::from_components(Magic::Request, packet_type, &[handle.as_ref(), body]),
        None => Ok(Packet::request(packet_type, handle.clone())),
    };
    match packet {
        Ok(packet) => Some(packet),
        Err(e) => {
            warn!(error = %e, "could not build {packet_type}");
            None
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "function panicked".to_string()
    }
}
