//! Client and worker configuration.
//!
//! Every struct has a `Default` built from the `DEFAULT_*` constants, fluent
//! `with_*` setters, and can be loaded from JSON:
//!
//! ```
//! use gearman_client::config::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{ "submit_timeout_ms": 500 }"#).unwrap();
//! assert_eq!(config.submit_timeout.as_millis(), 500);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GearmanError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Default job server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default job server port.
pub const DEFAULT_PORT: u16 = 4730;

/// Default size of a single socket read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default initial capacity of the send and receive regions.
pub const DEFAULT_INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Default timeout for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a submission to be acknowledged with JOB_CREATED.
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default deadline for GET_STATUS and ECHO_REQ round trips.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Default upper bound on a single readiness wait in the worker loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bytes requested from the socket per read.
    pub read_chunk_size: usize,
    /// Initial capacity of the outbound and inbound regions.
    pub initial_buffer_capacity: usize,
    /// Largest payload accepted from a job server.
    pub max_payload_size: u32,
    /// Deadline for the TCP connect.
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            initial_buffer_capacity: DEFAULT_INITIAL_BUFFER_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    pub fn with_max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// How long `submit` waits for JOB_CREATED.
    #[serde(rename = "submit_timeout_ms", with = "duration_ms")]
    pub submit_timeout: Duration,
    /// How long `job_status` and `echo` wait for their reply.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub connection: ConnectionConfig,
    /// Identifier announced with SET_CLIENT_ID.
    pub worker_id: String,
    /// Upper bound on one readiness wait of the work loop.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            worker_id: default_worker_id(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WorkerConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn default_worker_id() -> String {
    format!("gearman-worker-{}", std::process::id())
}

/// Job server address.
///
/// Parses `host`, `host:port` and `[v6]:port`; the port defaults to
/// [`DEFAULT_PORT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl FromStr for ServerAddress {
    type Err = GearmanError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GearmanError::InvalidAddress(s.to_string()));
        }

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| GearmanError::InvalidAddress(s.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(s, port)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(GearmanError::InvalidAddress(s.to_string())),
            };
            return Ok(Self::new(host, port));
        }

        match s.split_once(':') {
            Some((host, port)) if !host.is_empty() && !port.contains(':') => {
                Ok(Self::new(host, parse_port(s, port)?))
            }
            Some(_) => Err(GearmanError::InvalidAddress(s.to_string())),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

fn parse_port(addr: &str, port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| GearmanError::InvalidAddress(addr.to_string()))
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
