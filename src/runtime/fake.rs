//! In-memory runtime for tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    StreamExt,
    channel::mpsc::{self, UnboundedSender},
    stream,
};
use tokio::io::DuplexStream;

use super::{
    ByteStream, ContainerDetails, ContainerRuntime, ContainerSummary, CreateSpec, ExecSession,
    ListFilter, LogOptions, PortBinding, RuntimeError, RuntimeResult,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub binds: Vec<String>,
    pub running: bool,
    pub health: Option<String>,
    /// Runtime state reported instead of `running`/`exited`.
    pub state: Option<String>,
}

impl FakeContainer {
    fn reported_state(&self) -> String {
        match &self.state {
            Some(state) => state.clone(),
            None if self.running => "running".to_string(),
            None => "exited".to_string(),
        }
    }
}

/// Counts live streams; decremented when the stream is dropped.
struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub containers: Mutex<Vec<FakeContainer>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_create: Mutex<Option<String>>,
    pub fail_start: Mutex<Option<String>>,
    pub fail_stop: Mutex<Option<String>>,
    pub fail_exec: Mutex<Option<String>>,
    pub log_chunks: Mutex<Vec<Bytes>>,
    pub open_streams: Arc<AtomicUsize>,
    /// Shell side of the last exec: reads what the peer typed.
    pub exec_shell: Mutex<Option<DuplexStream>>,
    /// Shell side of the last exec: feeds terminal output.
    pub exec_output: Mutex<Option<UnboundedSender<RuntimeResult<Bytes>>>>,
    next_id: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a running, unmanaged container publishing `ports`.
    pub fn add_foreign(&self, name: &str, ports: &[u16]) {
        let id = self.new_id();
        self.containers.lock().unwrap().push(FakeContainer {
            id,
            name: name.to_string(),
            image: "nginx:latest".to_string(),
            env: vec![],
            labels: HashMap::new(),
            ports: ports
                .iter()
                .map(|p| PortBinding {
                    container_port: "80/tcp".to_string(),
                    host_port: *p,
                })
                .collect(),
            binds: vec![],
            running: true,
            health: None,
            state: None,
        });
    }

    pub fn by_name(&self, name: &str) -> Option<FakeContainer> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name == name)
            .count()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(c) = self
            .containers
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.name == name)
        {
            c.running = running;
        }
    }

    /// Applies `f` to the container named `name`.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut FakeContainer)) {
        if let Some(c) = self
            .containers
            .lock()
            .unwrap()
            .iter_mut()
            .find(|c| c.name == name)
        {
            f(c);
        }
    }

    fn new_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("c{:011x}{}", n, "f".repeat(52))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn find<'a>(containers: &'a mut [FakeContainer], id: &str) -> RuntimeResult<&'a mut FakeContainer> {
        containers
            .iter_mut()
            .find(|c| c.id == id || c.id.starts_with(id) || c.name == id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(format!("No such container: {id}")))
    }

    fn guard(&self) -> OpenGuard {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        OpenGuard(self.open_streams.clone())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, filter: ListFilter) -> RuntimeResult<Vec<ContainerSummary>> {
        self.record("list".to_string());
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .filter(|c| filter.all || c.running)
            .filter(|c| match &filter.label {
                Some(selector) => {
                    let (key, value) = selector.split_once('=').unwrap_or((selector.as_str(), ""));
                    c.labels.get(key).is_some_and(|v| value.is_empty() || v == value)
                }
                None => true,
            })
            .filter(|c| match &filter.name {
                Some(name) => c.name.contains(name.as_str()),
                None => true,
            })
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![format!("/{}", c.name)],
                labels: c.labels.clone(),
                state: Some(c.reported_state()),
                public_ports: if c.running {
                    c.ports.iter().map(|p| p.host_port).collect()
                } else {
                    vec![]
                },
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        self.record(format!("inspect {id}"));
        let mut containers = self.containers.lock().unwrap();
        let c = Self::find(&mut containers, id)?;
        let mut port_bindings: HashMap<String, Vec<String>> = HashMap::new();
        if c.running {
            for p in &c.ports {
                port_bindings
                    .entry(p.container_port.clone())
                    .or_default()
                    .push(p.host_port.to_string());
            }
        }
        Ok(ContainerDetails {
            id: c.id.clone(),
            name: Some(format!("/{}", c.name)),
            image: Some(c.image.clone()),
            state: Some(c.reported_state()),
            health: c.health.clone(),
            port_bindings,
            labels: c.labels.clone(),
            env: c.env.clone(),
            binds: c.binds.clone(),
        })
    }

    async fn create(&self, spec: CreateSpec) -> RuntimeResult<String> {
        self.record(format!("create {}", spec.name));
        if let Some(message) = self.fail_create.lock().unwrap().take() {
            return Err(RuntimeError::Api(message));
        }
        let mut containers = self.containers.lock().unwrap();
        if containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Api(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let id = self.new_id();
        containers.push(FakeContainer {
            id: id.clone(),
            name: spec.name,
            image: spec.image,
            env: spec.env,
            labels: spec.labels,
            ports: spec.ports,
            binds: spec.binds,
            running: false,
            health: None,
            state: None,
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("start {id}"));
        if let Some(message) = self.fail_start.lock().unwrap().take() {
            return Err(RuntimeError::Api(message));
        }
        let mut containers = self.containers.lock().unwrap();
        let target = Self::find(&mut containers, id)?.id.clone();
        let busy: Vec<u16> = containers
            .iter()
            .filter(|c| c.running && c.id != target)
            .flat_map(|c| c.ports.iter().map(|p| p.host_port))
            .collect();
        let c = Self::find(&mut containers, &target)?;
        if let Some(port) = c.ports.iter().find(|p| busy.contains(&p.host_port)) {
            return Err(RuntimeError::Api(format!(
                "Bind for 0.0.0.0:{} failed: port is already allocated",
                port.host_port
            )));
        }
        c.running = true;
        Ok(())
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("stop {id}"));
        if let Some(message) = self.fail_stop.lock().unwrap().take() {
            return Err(RuntimeError::Api(message));
        }
        let mut containers = self.containers.lock().unwrap();
        Self::find(&mut containers, id)?.running = false;
        Ok(())
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        self.record(format!("remove {id}"));
        let mut containers = self.containers.lock().unwrap();
        let target = Self::find(&mut containers, id)?.id.clone();
        containers.retain(|c| c.id != target);
        Ok(())
    }

    async fn logs(&self, id: &str, options: LogOptions) -> RuntimeResult<ByteStream> {
        self.record(format!("logs {id}"));
        {
            let mut containers = self.containers.lock().unwrap();
            Self::find(&mut containers, id)?;
        }
        let chunks: Vec<RuntimeResult<Bytes>> = self
            .log_chunks
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(Ok)
            .collect();
        let guard = self.guard();
        let history = stream::iter(chunks);
        let stream: ByteStream = if options.follow {
            history.chain(stream::pending()).boxed()
        } else {
            history.boxed()
        };
        Ok(stream
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }

    async fn exec_attach(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<ExecSession> {
        self.record(format!("exec {id} {}", cmd.join(" ")));
        if let Some(message) = self.fail_exec.lock().unwrap().take() {
            return Err(RuntimeError::Api(message));
        }
        {
            let mut containers = self.containers.lock().unwrap();
            Self::find(&mut containers, id)?;
        }
        let (client, shell) = tokio::io::duplex(4096);
        let (tx, rx) = mpsc::unbounded();
        *self.exec_shell.lock().unwrap() = Some(shell);
        *self.exec_output.lock().unwrap() = Some(tx);
        let guard = self.guard();
        Ok(ExecSession {
            input: Box::pin(client),
            output: rx
                .map(move |item| {
                    let _held = &guard;
                    item
                })
                .boxed(),
        })
    }
}
