//! Lifecycle Controller: maps create/start/stop/remove/rebind onto runtime
//! calls.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use futures_util::{StreamExt, future::join_all};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{
    projector::{project, project_summary},
    state::{RebindPhase, ServerState, valid_state_transition},
    types::{
        CreateOutcome, CreateRequest, GAME_PORT, GAME_PORT_KEY, MANAGED_LABEL, MANAGED_SELECTOR,
        ManagedServer, PORT_COUNT_LABEL, PORT_LABEL, PRIMARY_LABEL, RebindOutcome, ServerList,
        TEMPLATE_LABEL, short_id,
    },
};
use crate::{
    error::{Error, Result},
    ports::{PortAllocator, PortHold, validate_port},
    runtime::{
        ContainerRuntime, ContainerSummary, CreateSpec, ListFilter, LogOptions, PortBinding,
        RuntimeError,
    },
    templates::{ContainerPort, Template, TemplateRegistry},
};

const MINECRAFT_TEMPLATE: &str = "minecraft";
const MINECRAFT_DEFAULT_ENV: [(&str, &str); 2] = [("EULA", "TRUE"), ("MEMORY", "1G")];
const DEFAULT_DATA_PATH: &str = "/data";
const RESTART_POLICY: &str = "no";
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Parent of the per-server host data directories.
    pub data_root: PathBuf,
    /// Lines of history returned by the logs endpoint.
    pub log_tail: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            data_root: PathBuf::from("/opt/games"),
            log_tail: 200,
        }
    }
}

/// Container names follow the runtime's grammar. The name is also a path
/// segment under the data root.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphanumeric()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        None => return Err(Error::missing_image()),
    };
    if !valid || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "invalid server name {name:?}: use letters, digits, '_', '.', '-'"
        )));
    }
    Ok(())
}

/// Minecraft-family images get the single well-known game port.
pub fn is_minecraft(template: Option<&str>, image: &str) -> bool {
    template == Some(MINECRAFT_TEMPLATE) || image.to_lowercase().contains("minecraft")
}

/// Exact-name lookup among all containers on the host, managed or not.
pub async fn resolve_name(runtime: &dyn ContainerRuntime, name: &str) -> Result<ContainerSummary> {
    validate_name(name)?;
    runtime
        .list(ListFilter {
            all: true,
            name: Some(name.to_string()),
            ..Default::default()
        })
        .await?
        .into_iter()
        .find(|c| c.has_name(name))
        .ok_or_else(|| Error::NotFound(name.to_string()))
}

/// Tracks one in-flight rebind in the shared phase table. The entry goes away
/// when the tracker is dropped, whichever way the rebind ended.
struct RebindTracker<'a> {
    name: String,
    phase: RebindPhase,
    table: &'a Mutex<HashMap<String, RebindPhase>>,
}

impl<'a> RebindTracker<'a> {
    fn begin(table: &'a Mutex<HashMap<String, RebindPhase>>, name: &str) -> Result<Self> {
        let mut phases = lock(table);
        if phases.contains_key(name) {
            return Err(Error::InvalidInput(format!(
                "a port change for {name} is already in progress"
            )));
        }
        phases.insert(name.to_string(), RebindPhase::Stopping);
        Ok(RebindTracker {
            name: name.to_string(),
            phase: RebindPhase::Stopping,
            table,
        })
    }

    fn advance(&mut self) {
        if let Some(next) = self.phase.next() {
            self.phase = next;
            lock(self.table).insert(self.name.clone(), next);
            info!(name = %self.name, phase = %next, "rebind progress");
        }
    }

    fn failed(&self, source: RuntimeError) -> Error {
        if self.phase.is_destructive() {
            error!(
                name = %self.name,
                phase = %self.phase,
                error = %source,
                "rebind failed after removal; server has no container, data is kept"
            );
            Error::PartialFailure {
                name: self.name.clone(),
                phase: self.phase,
                source,
            }
        } else {
            Error::RuntimeFailure(source)
        }
    }
}

impl Drop for RebindTracker<'_> {
    fn drop(&mut self) {
        lock(self.table).remove(&self.name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Lifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    templates: Arc<TemplateRegistry>,
    ports: PortAllocator,
    config: LifecycleConfig,
    rebinds: Mutex<HashMap<String, RebindPhase>>,
}

impl Lifecycle {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        templates: Arc<TemplateRegistry>,
        ports: PortAllocator,
        config: LifecycleConfig,
    ) -> Self {
        Lifecycle {
            runtime,
            templates,
            ports,
            config,
            rebinds: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn templates(&self) -> &[Template] {
        self.templates.list()
    }

    pub fn rebind_phase(&self, name: &str) -> Option<RebindPhase> {
        lock(&self.rebinds).get(name).copied()
    }

    /// All containers carrying the management label, inspected concurrently.
    pub async fn list(&self) -> Result<ServerList> {
        let containers = self
            .runtime
            .list(ListFilter {
                all: true,
                label: Some(MANAGED_SELECTOR.to_string()),
                ..Default::default()
            })
            .await?;

        let inspections = join_all(containers.iter().map(|c| self.runtime.inspect(&c.id))).await;

        let mut list = ServerList::default();
        for (summary, inspection) in containers.iter().zip(inspections) {
            let projection = match inspection {
                Ok(details) => project(&details),
                Err(err) => project_summary(summary, &err.to_string()),
            };
            for warning in &projection.warnings {
                warn!(container_id = %short_id(&summary.id), "{warning}");
            }
            list.warnings.extend(projection.warnings);
            list.servers.push(projection.server);
        }

        let phases = lock(&self.rebinds).clone();
        for (name, phase) in phases {
            match list.servers.iter_mut().find(|s| s.name == name) {
                Some(server) => server.transition = Some(phase),
                None => list.servers.push(ManagedServer {
                    id: String::new(),
                    name,
                    status: ServerState::Absent.to_string(),
                    image: String::new(),
                    host_port: None,
                    transition: Some(phase),
                }),
            }
        }

        Ok(list)
    }

    pub async fn create(&self, request: CreateRequest) -> Result<CreateOutcome> {
        let name = request.name.unwrap_or_default();
        validate_name(&name)?;
        let explicit_port = match &request.port {
            None | Some(Value::Null) => None,
            Some(value) => Some(validate_port(value)?),
        };

        let template = match request.template.as_deref() {
            Some(id) => {
                let found = self.templates.get(id);
                if found.is_none() {
                    warn!(template = id, "unknown template, falling back to image");
                }
                found
            }
            None => None,
        };
        let image = request
            .image
            .filter(|image| !image.trim().is_empty())
            .or_else(|| template.map(|t| t.image.clone()))
            .ok_or_else(Error::missing_image)?;

        let minecraft = is_minecraft(template.map(|t| t.id.as_str()), &image);

        let mut env: BTreeMap<String, String> = BTreeMap::new();
        if minecraft {
            env.extend(
                MINECRAFT_DEFAULT_ENV
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            );
        }
        if let Some(template) = template {
            env.extend(template.env.clone());
        }
        env.extend(request.env);

        let container_ports: Vec<ContainerPort> = if minecraft {
            vec![ContainerPort::tcp(GAME_PORT)]
        } else {
            template.map(|t| t.ports.clone()).unwrap_or_default()
        };

        let (bindings, holds) = self.bind_ports(&name, &container_ports, explicit_port).await?;

        let mut labels = HashMap::from([(MANAGED_LABEL.to_string(), "1".to_string())]);
        if let Some(template) = template {
            labels.insert(TEMPLATE_LABEL.to_string(), template.id.clone());
        }
        if let Some(primary) = bindings.first() {
            labels.insert(PRIMARY_LABEL.to_string(), primary.container_port.clone());
            labels.insert(PORT_LABEL.to_string(), primary.host_port.to_string());
            labels.insert(PORT_COUNT_LABEL.to_string(), bindings.len().to_string());
        }

        let data_path = template
            .map(|t| t.data_path.as_str())
            .unwrap_or(DEFAULT_DATA_PATH);
        let host_dir = self.config.data_root.join(&name);
        let host_port = bindings.first().map(|b| b.host_port);

        let spec = CreateSpec {
            name: name.clone(),
            image,
            env: env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels,
            ports: bindings,
            binds: vec![format!("{}:{}", host_dir.display(), data_path)],
            restart_policy: RESTART_POLICY.to_string(),
        };

        let id = self.runtime.create(spec).await?;
        if let Err(err) = self.runtime.start(&id).await {
            warn!(
                name = %name,
                container_id = %short_id(&id),
                error = %err,
                "container created but failed to start; left in created state"
            );
            return Err(err.into());
        }
        holds.into_iter().for_each(PortHold::confirm);

        info!(name = %name, container_id = %short_id(&id), host_port = ?host_port, "server created");
        Ok(CreateOutcome {
            id: short_id(&id),
            host_port,
        })
    }

    /// Host bindings for `container_ports` in declaration order. An explicit
    /// port goes to the first one; the rest are allocated.
    async fn bind_ports(
        &self,
        name: &str,
        container_ports: &[ContainerPort],
        explicit_port: Option<u16>,
    ) -> Result<(Vec<PortBinding>, Vec<PortHold>)> {
        let mut bindings = Vec::with_capacity(container_ports.len());
        let mut holds = Vec::new();

        let to_allocate = match (container_ports.split_first(), explicit_port) {
            (None, Some(port)) => {
                warn!(name, host_port = port, "image exposes no known port; ignoring requested port");
                &[][..]
            }
            (Some((first, rest)), Some(port)) => {
                holds.extend(self.ports.hold_explicit(port));
                bindings.push(PortBinding {
                    container_port: first.to_string(),
                    host_port: port,
                });
                rest
            }
            (_, None) => container_ports,
        };

        if !to_allocate.is_empty() {
            let bases: Vec<u16> = to_allocate.iter().map(|p| p.port).collect();
            let allocated = self.ports.allocate_many(&bases).await?;
            for (container_port, hold) in to_allocate.iter().zip(allocated) {
                bindings.push(PortBinding {
                    container_port: container_port.to_string(),
                    host_port: hold.port(),
                });
                holds.push(hold);
            }
        }

        Ok((bindings, holds))
    }

    async fn checked(&self, name: &str, target: ServerState) -> Result<ContainerSummary> {
        let container = resolve_name(self.runtime.as_ref(), name).await?;
        if let Some(current) = container.state.as_deref().map(ServerState::from_runtime) {
            if !valid_state_transition(current, target) {
                return Err(Error::RuntimeFailure(RuntimeError::Api(format!(
                    "{name} is {current} and cannot become {target}"
                ))));
            }
        }
        Ok(container)
    }

    pub async fn start(&self, name: &str) -> Result<&'static str> {
        let container = self.checked(name, ServerState::Running).await?;
        self.runtime.start(&container.id).await?;
        info!(name, container_id = %short_id(&container.id), "server started");
        Ok("started")
    }

    pub async fn stop(&self, name: &str) -> Result<&'static str> {
        let container = self.checked(name, ServerState::Stopped).await?;
        self.runtime.stop(&container.id).await?;
        info!(name, container_id = %short_id(&container.id), "server stopped");
        Ok("stopped")
    }

    pub async fn remove(&self, name: &str) -> Result<&'static str> {
        let container = self.checked(name, ServerState::Removed).await?;
        self.runtime.remove(&container.id).await?;
        info!(name, container_id = %short_id(&container.id), "server removed");
        Ok("removed")
    }

    /// The last `log_tail` lines of combined output.
    pub async fn logs(&self, name: &str) -> Result<String> {
        let container = resolve_name(self.runtime.as_ref(), name).await?;
        let mut stream = self
            .runtime
            .logs(
                &container.id,
                LogOptions {
                    follow: false,
                    tail: self.config.log_tail,
                },
            )
            .await?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Recreates `name` with its primary port bound to the new host port.
    ///
    /// Destructive: the old container is removed before the new one exists.
    /// A failure after removal is a [`Error::PartialFailure`]; the data
    /// directory survives but no container carries the name. A recreated
    /// container that fails to start is removed again.
    pub async fn rebind(&self, name: &str, port: &Value) -> Result<RebindOutcome> {
        let new_port = validate_port(port)?;
        let container = resolve_name(self.runtime.as_ref(), name).await?;
        let details = self.runtime.inspect(&container.id).await?;

        let port_count = details
            .labels
            .get(PORT_COUNT_LABEL)
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(details.port_bindings.len());
        if port_count > 1 {
            return Err(Error::InvalidInput(format!(
                "{name} binds {port_count} ports; port changes support single-port servers only"
            )));
        }

        let current_port = project(&details).server.host_port;
        if current_port != Some(new_port) && self.ports.bound_ports().await?.contains(&new_port) {
            return Err(Error::InvalidInput(format!(
                "port {new_port} is already in use"
            )));
        }

        let image = details.image.clone().ok_or_else(|| {
            Error::RuntimeFailure(RuntimeError::Api(format!(
                "inspection of {name} reported no image"
            )))
        })?;
        let primary = details
            .labels
            .get(PRIMARY_LABEL)
            .cloned()
            .unwrap_or_else(|| GAME_PORT_KEY.to_string());

        let mut labels = details.labels.clone();
        labels.insert(MANAGED_LABEL.to_string(), "1".to_string());
        labels.insert(PRIMARY_LABEL.to_string(), primary.clone());
        labels.insert(PORT_LABEL.to_string(), new_port.to_string());
        labels.insert(PORT_COUNT_LABEL.to_string(), "1".to_string());

        let spec = CreateSpec {
            name: name.to_string(),
            image,
            env: details.env.clone(),
            labels,
            ports: vec![PortBinding {
                container_port: primary,
                host_port: new_port,
            }],
            binds: details.binds.clone(),
            restart_policy: RESTART_POLICY.to_string(),
        };

        let hold = self.ports.hold_explicit(new_port);
        let mut tracker = RebindTracker::begin(&self.rebinds, name)?;

        if let Err(err) = self.runtime.stop(&container.id).await {
            warn!(name, error = %err, "stop before rebind failed; removing anyway");
        }
        tracker.advance();

        self.runtime
            .remove(&container.id)
            .await
            .map_err(|source| tracker.failed(source))?;
        tracker.advance();

        tracker.advance();
        let id = self
            .runtime
            .create(spec)
            .await
            .map_err(|source| tracker.failed(source))?;

        tracker.advance();
        if let Err(source) = self.runtime.start(&id).await {
            // leave the name free so the server can be created again
            if let Err(err) = self.runtime.remove(&id).await {
                warn!(
                    name,
                    container_id = %short_id(&id),
                    error = %err,
                    "recreated container could not be removed; it remains in created state"
                );
            }
            return Err(tracker.failed(source));
        }
        tracker.advance();

        if let Some(hold) = hold {
            hold.confirm();
        }
        info!(name, container_id = %short_id(&id), host_port = new_port, "server rebound");
        Ok(RebindOutcome {
            result: "rebound",
            host_port: new_port,
        })
    }
}
