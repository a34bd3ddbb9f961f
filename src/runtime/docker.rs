use super::{
    ContainerEvent, ContainerMetadata, ContainerRuntime, ContainerSpec, ContainerSummary,
    NetworkEndpoint,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as CreateConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, NetworkingConfig, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, EndpointSettings, HostConfig};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, info};
use std::collections::HashMap;
use std::time::Duration;

/// [`ContainerRuntime`] backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the local defaults (unix socket or `DOCKER_HOST`).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn metadata_from(detail: ContainerInspectResponse) -> ContainerMetadata {
    let config = detail.config.unwrap_or_default();
    let host_config = detail.host_config.unwrap_or_default();
    let networks = detail
        .network_settings
        .and_then(|s| s.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| {
            let endpoint = NetworkEndpoint {
                address: endpoint.ip_address.unwrap_or_default(),
                gateway: endpoint.gateway.unwrap_or_default(),
                global_ipv6_address: endpoint.global_ipv6_address.unwrap_or_default(),
            };
            (name, endpoint)
        })
        .collect();

    ContainerMetadata {
        id: detail.id.unwrap_or_default(),
        name: detail
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: config.image.unwrap_or_default(),
        running: detail.state.and_then(|s| s.running).unwrap_or(false),
        network_mode: host_config.network_mode.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        binds: host_config.binds.unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
        networks,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, name: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if let Some(name) = name {
            filters.insert("name".to_string(), vec![name.to_string()]);
        }
        let opts = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let names = c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect();
                Some(ContainerSummary { id, names })
            })
            .collect())
    }

    async fn inspect_container(&self, id_or_name: &str) -> Result<Option<ContainerMetadata>> {
        match self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
        {
            Ok(detail) => Ok(Some(metadata_from(detail))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Container(format!(
                "failed to inspect container {}: {}",
                id_or_name, e
            ))),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            auto_remove: Some(spec.auto_remove),
            binds: Some(spec.binds.clone()),
            cap_add: Some(spec.cap_add.clone()),
            ..Default::default()
        };

        let mut endpoints_config = HashMap::new();
        endpoints_config.insert(
            spec.network_name.clone(),
            EndpointSettings {
                network_id: Some(spec.network_id.clone()),
                ..Default::default()
            },
        );

        let config = CreateConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig { endpoints_config }),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(opts), config)
            .await
            .map_err(|e| Error::Container(format!("failed to create {}: {}", spec.name, e)))?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("failed to start {}: {}", id, e)))
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let opts = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(opts))
            .await
            .map_err(|e| Error::Container(format!("failed to stop {}: {}", id, e)))
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<String>> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(Some(network.id.unwrap_or_default())),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Container(format!(
                "failed to inspect network {}: {}",
                name, e
            ))),
        }
    }

    async fn create_network(&self, name: &str, driver: &str) -> Result<String> {
        let opts = CreateNetworkOptions {
            name: name.to_string(),
            driver: driver.to_string(),
            ..Default::default()
        };
        self.docker
            .create_network(opts)
            .await
            .map_err(|e| Error::Container(format!("failed to create network {}: {}", name, e)))?;

        // ID comes from a fresh inspect.
        self.inspect_network(name)
            .await?
            .ok_or_else(|| Error::Container(format!("network {} vanished after create", name)))
    }

    fn container_events(&self) -> BoxStream<'static, Result<ContainerEvent>> {
        let opts = EventsOptions::<String> {
            filters: [("type".to_string(), vec!["container".to_string()])]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        self.docker
            .events(Some(opts))
            .filter_map(|msg| async move {
                match msg {
                    Ok(event) => {
                        let action = event.action.unwrap_or_default();
                        let container_id = event.actor.and_then(|a| a.id).unwrap_or_default();
                        if container_id.is_empty() {
                            debug!("Ignoring {} event without actor", action);
                            return None;
                        }
                        Some(Ok(ContainerEvent {
                            action,
                            container_id,
                        }))
                    }
                    Err(e) => Some(Err(Error::Stream(e.to_string()))),
                }
            })
            .boxed()
    }
}
