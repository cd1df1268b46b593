use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse templates: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid container port {0:?}, expected <port>[/tcp|/udp]")]
    InvalidPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A container-side port, written `25565/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ContainerPort {
    pub const fn tcp(port: u16) -> Self {
        ContainerPort {
            port,
            protocol: Protocol::Tcp,
        }
    }

    pub const fn udp(port: u16) -> Self {
        ContainerPort {
            port,
            protocol: Protocol::Udp,
        }
    }
}

impl fmt::Display for ContainerPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        write!(f, "{}/{}", self.port, proto)
    }
}

impl FromStr for ContainerPort {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TemplateError::InvalidPort(s.to_string());
        let (port, protocol) = match s.split_once('/') {
            Some((port, "tcp")) => (port, Protocol::Tcp),
            Some((port, "udp")) => (port, Protocol::Udp),
            Some(_) => return Err(invalid()),
            None => (s, Protocol::Tcp),
        };
        let port = port.trim().parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(ContainerPort { port, protocol })
    }
}

impl TryFrom<String> for ContainerPort {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContainerPort> for String {
    fn from(port: ContainerPort) -> Self {
        port.to_string()
    }
}

fn default_data_path() -> String {
    "/data".to_string()
}

/// A preset bundling image, exposed ports and default environment for one
/// game-server family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Exposed in declaration order; the first one is the primary port.
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Where the per-server host directory is mounted.
    #[serde(default = "default_data_path")]
    pub data_path: String,
}

/// Layout of a templates file: a list of `[[template]]` tables.
#[derive(Debug, Deserialize)]
pub(crate) struct TemplateFile {
    #[serde(default, rename = "template")]
    pub templates: Vec<Template>,
}
