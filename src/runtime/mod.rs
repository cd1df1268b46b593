//! Container runtime seam.
//!
//! Everything above this module speaks in terms of [`ContainerRuntime`]; the
//! Docker Engine implementation lives in [`docker`].

use async_trait::async_trait;

pub mod docker;
#[cfg(test)]
pub mod fake;
pub mod types;

pub use types::{
    ByteStream, ContainerDetails, ContainerSummary, CreateSpec, ExecSession, ListFilter,
    LogOptions, PortBinding, RuntimeError, RuntimeResult,
};

/// The imperative operations the control plane needs from a container runtime.
///
/// `id` arguments accept anything the runtime resolves to a container
/// (full id, short id or name).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list(&self, filter: ListFilter) -> RuntimeResult<Vec<ContainerSummary>>;

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerDetails>;

    /// Creates a container and returns its full id. Does not start it.
    async fn create(&self, spec: CreateSpec) -> RuntimeResult<String>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    async fn stop(&self, id: &str) -> RuntimeResult<()>;

    /// Forced removal, regardless of state.
    async fn remove(&self, id: &str) -> RuntimeResult<()>;

    /// Combined stdout/stderr.
    async fn logs(&self, id: &str, options: LogOptions) -> RuntimeResult<ByteStream>;

    /// Runs `cmd` with a TTY and attaches both directions.
    async fn exec_attach(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<ExecSession>;
}
