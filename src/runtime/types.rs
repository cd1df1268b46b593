use std::{collections::HashMap, pin::Pin};

use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The runtime's 404; the message names the missing container.
    #[error("{0}")]
    NoSuchContainer(String),

    /// Any other rejection; the message is the runtime's own.
    #[error("{0}")]
    Api(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = RuntimeResult<Bytes>> + Send>>;

/// Filter for container listing. Filters combine with AND.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub all: bool,
    /// `key=value` label selector.
    pub label: Option<String>,
    /// Name selector. The runtime treats it as a substring match.
    pub name: Option<String>,
}

/// One entry of a container listing.
#[derive(Debug, Clone, Default)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Runtime state string (`running`, `exited`, ...), when reported.
    pub state: Option<String>,
    /// Host ports currently published by this container.
    pub public_ports: Vec<u16>,
}

impl ContainerSummary {
    /// Whether this container's name is exactly `name` (the runtime reports
    /// names with a leading slash).
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').unwrap_or(n) == name)
    }
}

/// Raw inspection data. Everything the runtime may omit is optional or empty.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub state: Option<String>,
    pub health: Option<String>,
    /// Container port key (`25565/tcp`) to live host ports, unparsed.
    pub port_bindings: HashMap<String, Vec<String>>,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Container-side key, e.g. `25565/tcp`.
    pub container_port: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub binds: Vec<String>,
    pub restart_policy: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: usize,
}

/// A live exec attached with a TTY. Dropping both halves detaches.
pub struct ExecSession {
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: ByteStream,
}
