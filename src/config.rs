use std::{path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::servers::LifecycleConfig;
use crate::streams::StreamConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "gs-manager")]
#[command(about = "Control plane for containerized game servers on a single host")]
#[command(version, long_about = None)]
pub struct Config {
    /// Address the API binds to
    #[arg(long, env = "GS_LISTEN", default_value = "0.0.0.0")]
    pub listen: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Docker Engine unix socket
    #[arg(long, env = "DOCKER_HOST_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    /// Parent of the per-server data directories
    #[arg(long, env = "GS_DATA_ROOT", default_value = "/opt/games")]
    pub data_root: PathBuf,

    /// TOML file with extra or replacement templates
    #[arg(long, env = "GS_TEMPLATES")]
    pub templates: Option<PathBuf>,

    /// Largest frame sent to stream peers, in bytes
    #[arg(long, env = "GS_SEGMENT_SIZE", default_value_t = 120)]
    pub segment_size: usize,

    /// History lines for log requests and log sessions
    #[arg(long, env = "GS_LOG_TAIL", default_value_t = 200)]
    pub log_tail: usize,

    /// Seconds an unreleased port hold survives
    #[arg(long, env = "GS_RESERVATION_TTL", default_value_t = 120)]
    pub reservation_ttl: u64,

    #[arg(long, env = "GS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl)
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            data_root: self.data_root.clone(),
            log_tail: self.log_tail,
        }
    }

    pub fn streams(&self) -> StreamConfig {
        StreamConfig {
            segment_size: self.segment_size,
            log_tail: self.log_tail,
            ..StreamConfig::default()
        }
    }
}
