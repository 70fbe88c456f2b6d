//! In-process mock job server for end-to-end tests.
//!
//! Speaks enough of the server side of the protocol to connect a real
//! [`Client`](gearman_client::Client) with a real
//! [`Worker`](gearman_client::Worker): job queueing, grab/sleep/wakeup,
//! WORK_* forwarding, GET_STATUS and ECHO.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use gearman_client::protocol::{Magic, Packet, PacketBuffer, PacketType};
use gearman_client::ServerAddress;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type ConnId = u64;

struct QueuedJob {
    handle: Bytes,
    function: Bytes,
    unique: Bytes,
    data: Bytes,
}

struct TrackedJob {
    client: Option<ConnId>,
    running: bool,
    numerator: Bytes,
    denominator: Bytes,
}

struct Peer {
    tx: mpsc::UnboundedSender<Packet>,
    abilities: HashSet<Bytes>,
    sleeping: bool,
}

#[derive(Default)]
struct State {
    next_conn: ConnId,
    next_handle: u64,
    ignore_abilities: bool,
    queue: VecDeque<QueuedJob>,
    jobs: HashMap<Bytes, TrackedJob>,
    peers: HashMap<ConnId, Peer>,
    worker_ids: HashMap<ConnId, Bytes>,
}

/// Mock Gearman job server listening on an ephemeral localhost port.
pub struct MockServer {
    address: ServerAddress,
    state: Arc<Mutex<State>>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    /// Start a server that assigns every job to any worker, whether or not
    /// the worker announced the function.
    pub async fn start_ignoring_abilities() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(ignore_abilities: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(State {
            ignore_abilities,
            ..Default::default()
        }));

        let shared = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone()));
            }
        });

        Self {
            address: ServerAddress::new("127.0.0.1", port),
            state,
            accept,
        }
    }

    pub fn address(&self) -> ServerAddress {
        self.address.clone()
    }

    /// Jobs submitted but not yet grabbed.
    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Jobs the server still knows about.
    pub fn known_jobs(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    /// Ids announced with SET_CLIENT_ID.
    pub fn worker_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .worker_ids
            .values()
            .map(|id| String::from_utf8_lossy(id).into_owned())
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>) {
    stream.set_nodelay(true).unwrap();
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();

    let id = {
        let mut state = state.lock().unwrap();
        state.next_conn += 1;
        let id = state.next_conn;
        state.peers.insert(
            id,
            Peer {
                tx,
                abilities: HashSet::new(),
                sleeping: false,
            },
        );
        id
    };

    let writing = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if writer.write_all(&packet.encode()).await.is_err() {
                break;
            }
        }
    });

    let mut buffer = PacketBuffer::new();
    let mut chunk = vec![0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let packets = match buffer.push(&chunk[..n]) {
            Ok(packets) => packets,
            Err(_) => break,
        };
        let mut state = state.lock().unwrap();
        for packet in packets {
            handle(&mut state, id, packet);
        }
    }

    state.lock().unwrap().peers.remove(&id);
    writing.abort();
}

fn reply(state: &State, to: ConnId, packet_type: PacketType, parts: &[&[u8]]) {
    if let Some(peer) = state.peers.get(&to) {
        let packet = Packet::from_components(Magic::Response, packet_type, parts).unwrap();
        let _ = peer.tx.send(packet);
    }
}

fn can_do(state: &State, peer: &Peer, function: &[u8]) -> bool {
    state.ignore_abilities || peer.abilities.contains(function)
}

fn handle(state: &mut State, from: ConnId, packet: Packet) {
    match packet.packet_type() {
        PacketType::CanDo => {
            if let Some(peer) = state.peers.get_mut(&from) {
                peer.abilities.insert(packet.payload_bytes());
            }
        }
        PacketType::CanDoTimeout => {
            let parts = packet.components(2).unwrap();
            if let Some(peer) = state.peers.get_mut(&from) {
                peer.abilities.insert(parts[0].clone());
            }
        }
        PacketType::CantDo => {
            if let Some(peer) = state.peers.get_mut(&from) {
                peer.abilities.remove(packet.payload());
            }
        }
        PacketType::ResetAbilities => {
            if let Some(peer) = state.peers.get_mut(&from) {
                peer.abilities.clear();
            }
        }
        PacketType::SetClientId => {
            state.worker_ids.insert(from, packet.payload_bytes());
        }
        t if t.is_job_submission() => submit(state, from, &packet),
        PacketType::GrabJob | PacketType::GrabJobUniq => grab(state, from, packet.packet_type()),
        PacketType::PreSleep => {
            let has_work = match state.peers.get(&from) {
                Some(peer) => state.queue.iter().any(|job| can_do(state, peer, &job.function)),
                None => false,
            };
            if has_work {
                reply(state, from, PacketType::Noop, &[]);
            } else if let Some(peer) = state.peers.get_mut(&from) {
                peer.sleeping = true;
            }
        }
        t if t.is_work_update() => work_update(state, &packet),
        PacketType::GetStatus => {
            let handle = packet.payload_bytes();
            match state.jobs.get(&handle) {
                Some(job) => {
                    let running: &[u8] = if job.running { b"1" } else { b"0" };
                    reply(
                        state,
                        from,
                        PacketType::StatusRes,
                        &[handle.as_ref(), b"1", running, job.numerator.as_ref(), job.denominator.as_ref()],
                    );
                }
                None => reply(state, from, PacketType::StatusRes, &[handle.as_ref(), b"0", b"0", b"0", b"0"]),
            }
        }
        PacketType::EchoReq => reply(state, from, PacketType::EchoRes, &[packet.payload()]),
        _ => reply(
            state,
            from,
            PacketType::Error,
            &[&b"ERR_UNKNOWN_COMMAND"[..], b"Unknown command"],
        ),
    }
}

fn submit(state: &mut State, from: ConnId, packet: &Packet) {
    let parts = packet.components(3).unwrap();
    state.next_handle += 1;
    let handle = Bytes::from(format!("H:mock:{}", state.next_handle));
    let background = packet.packet_type().is_background_submission();

    state.jobs.insert(
        handle.clone(),
        TrackedJob {
            client: (!background).then_some(from),
            running: false,
            numerator: Bytes::from_static(b"0"),
            denominator: Bytes::from_static(b"0"),
        },
    );
    reply(state, from, PacketType::JobCreated, &[handle.as_ref()]);

    let function = parts[0].clone();
    state.queue.push_back(QueuedJob {
        handle,
        function: function.clone(),
        unique: parts[1].clone(),
        data: parts[2].clone(),
    });

    let sleepers: Vec<ConnId> = state
        .peers
        .iter()
        .filter(|(_, peer)| peer.sleeping && can_do(state, peer, &function))
        .map(|(id, _)| *id)
        .collect();
    for id in sleepers {
        if let Some(peer) = state.peers.get_mut(&id) {
            peer.sleeping = false;
        }
        reply(state, id, PacketType::Noop, &[]);
    }
}

fn grab(state: &mut State, from: ConnId, request: PacketType) {
    let position = match state.peers.get(&from) {
        Some(peer) => state
            .queue
            .iter()
            .position(|job| can_do(state, peer, &job.function)),
        None => return,
    };
    let Some(job) = position.and_then(|p| state.queue.remove(p)) else {
        reply(state, from, PacketType::NoJob, &[]);
        return;
    };

    if let Some(tracked) = state.jobs.get_mut(&job.handle) {
        tracked.running = true;
    }
    if request == PacketType::GrabJobUniq {
        reply(
            state,
            from,
            PacketType::JobAssignUniq,
            &[job.handle.as_ref(), job.function.as_ref(), job.unique.as_ref(), job.data.as_ref()],
        );
    } else {
        reply(
            state,
            from,
            PacketType::JobAssign,
            &[job.handle.as_ref(), job.function.as_ref(), job.data.as_ref()],
        );
    }
}

fn work_update(state: &mut State, packet: &Packet) {
    let handle = match packet.payload().iter().position(|b| *b == 0) {
        Some(pos) => Bytes::copy_from_slice(&packet.payload()[..pos]),
        None => packet.payload_bytes(),
    };

    if packet.packet_type() == PacketType::WorkStatus {
        let parts = packet.components(3).unwrap();
        if let Some(job) = state.jobs.get_mut(&handle) {
            job.numerator = parts[1].clone();
            job.denominator = parts[2].clone();
        }
    }

    let client = state.jobs.get(&handle).and_then(|job| job.client);
    if let Some(client) = client {
        if let Some(peer) = state.peers.get(&client) {
            let forwarded = Packet::response(packet.packet_type(), packet.payload_bytes());
            let _ = peer.tx.send(forwarded);
        }
    }

    if matches!(
        packet.packet_type(),
        PacketType::WorkComplete | PacketType::WorkFail
    ) {
        state.jobs.remove(&handle);
    }
}
