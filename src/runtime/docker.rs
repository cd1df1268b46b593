use std::collections::HashMap;

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::{
        ContainerCreateBody, ContainerInspectResponse, HostConfig, PortBinding as DockerPortBinding,
        RestartPolicy, RestartPolicyNameEnum,
    },
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptions,
        LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
        StopContainerOptions,
    },
};
use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use super::{
    ByteStream, ContainerDetails, ContainerRuntime, ContainerSummary, CreateSpec, ExecSession,
    ListFilter, LogOptions, RuntimeError, RuntimeResult,
};

const DOCKER_TIMEOUT_SECS: u64 = 120;

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NoSuchContainer(message),
            BollardError::DockerResponseServerError { message, .. } => RuntimeError::Api(message),
            other => RuntimeError::Api(other.to_string()),
        }
    }
}

/// [`ContainerRuntime`] backed by a Docker Engine socket.
#[derive(Debug, Clone)]
pub struct DockerClient {
    pub client: Docker,
}

impl DockerClient {
    pub fn connect(socket_path: &str) -> RuntimeResult<Self> {
        let client = Docker::connect_with_unix(socket_path, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION)?;
        Ok(DockerClient { client })
    }

    pub async fn ping(&self) -> RuntimeResult<()> {
        self.client.ping().await?;
        Ok(())
    }
}

fn details_from(info: ContainerInspectResponse) -> ContainerDetails {
    let state = info.state.unwrap_or_default();
    let config = info.config.unwrap_or_default();

    let port_bindings = info
        .network_settings
        .and_then(|settings| settings.ports)
        .unwrap_or_default()
        .into_iter()
        .map(|(key, bindings)| {
            let host_ports = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|binding| binding.host_port)
                .collect();
            (key, host_ports)
        })
        .collect();

    ContainerDetails {
        id: info.id.unwrap_or_default(),
        name: info.name,
        image: config.image,
        state: state
            .status
            .map(|status| status.to_string())
            .filter(|status| !status.is_empty()),
        health: state
            .health
            .and_then(|health| health.status)
            .map(|status| status.to_string())
            .filter(|status| !status.is_empty() && status != "none"),
        port_bindings,
        labels: config.labels.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        binds: info
            .host_config
            .and_then(|host| host.binds)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list(&self, filter: ListFilter) -> RuntimeResult<Vec<ContainerSummary>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(label) = filter.label {
            filters.insert("label".to_string(), vec![label]);
        }
        if let Some(name) = filter.name {
            filters.insert("name".to_string(), vec![name]);
        }

        let options = ListContainersOptions {
            all: filter.all,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                state: c.state.map(|state| state.to_string()),
                public_ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.public_port)
                    .collect(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerDetails> {
        let info = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(details_from(info))
    }

    async fn create(&self, spec: CreateSpec) -> RuntimeResult<String> {
        let restart_policy = RestartPolicy {
            name: Some(
                spec.restart_policy
                    .parse()
                    .unwrap_or(RestartPolicyNameEnum::NO),
            ),
            maximum_retry_count: None,
        };

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
        for binding in &spec.ports {
            exposed_ports.insert(binding.container_port.clone(), HashMap::new());
            port_bindings.insert(
                binding.container_port.clone(),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(binding.host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            binds: Some(spec.binds),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            ..Default::default()
        };

        let container_config = ContainerCreateBody {
            image: Some(spec.image),
            env: Some(spec.env),
            labels: Some(spec.labels),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptionsBuilder::new().name(&spec.name).build();
        let response = self
            .client
            .create_container(Some(options), container_config)
            .await?;
        debug!(name = %spec.name, container_id = %response.id, "container created");
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        match self
            .client
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            // 304 Not Modified: already started
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            other => Ok(other?),
        }
    }

    async fn stop(&self, id: &str) -> RuntimeResult<()> {
        match self
            .client
            .stop_container(id, None::<StopContainerOptions>)
            .await
        {
            // 304 Not Modified: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            other => Ok(other?),
        }
    }

    async fn remove(&self, id: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptionsBuilder::new().force(true).build();
        self.client.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn logs(&self, id: &str, options: LogOptions) -> RuntimeResult<ByteStream> {
        let query = LogsOptionsBuilder::new()
            .follow(options.follow)
            .stdout(true)
            .stderr(true)
            .tail(&options.tail.to_string())
            .build();

        let stream = self
            .client
            .logs(id, Some(query))
            .map_ok(|output| output.into_bytes())
            .map_err(RuntimeError::from);
        Ok(stream.boxed())
    }

    async fn exec_attach(&self, id: &str, cmd: Vec<String>) -> RuntimeResult<ExecSession> {
        let exec = self
            .client
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await?;

        let started = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    ..Default::default()
                }),
            )
            .await?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecSession {
                input,
                output: output
                    .map_ok(|chunk| chunk.into_bytes())
                    .map_err(RuntimeError::from)
                    .boxed(),
            }),
            StartExecResults::Detached => Err(RuntimeError::Api(
                "exec started detached; no stream to attach".to_string(),
            )),
        }
    }
}
