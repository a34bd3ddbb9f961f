use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::Result;

pub mod docker;
pub use docker::DockerRuntime;

/// A running container as returned by a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names without the leading `/`.
    pub names: Vec<String>,
}

/// One network attachment of a container. Addresses are kept as the
/// runtime reports them and may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub address: String,
    pub gateway: String,
    pub global_ipv6_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    pub image: String,
    pub running: bool,
    pub network_mode: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Attachments keyed by network name.
    pub networks: HashMap<String, NetworkEndpoint>,
}

/// Everything needed to create the sidecar container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub binds: Vec<String>,
    pub cap_add: Vec<String>,
    pub network_name: String,
    pub network_id: String,
    pub auto_remove: bool,
}

/// A container lifecycle event from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub action: String,
    pub container_id: String,
}

/// The subset of a container runtime used by the controller and the
/// registrar. Inspect calls return `Ok(None)` when the object does not
/// exist.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists running containers, optionally filtered by name.
    async fn list_containers(&self, name: Option<&str>) -> Result<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id_or_name: &str) -> Result<Option<ContainerMetadata>>;

    /// Creates a container and returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stops a container, killing it once `timeout` has elapsed.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Returns the network ID.
    async fn inspect_network(&self, name: &str) -> Result<Option<String>>;

    /// Creates a network and returns its ID.
    async fn create_network(&self, name: &str, driver: &str) -> Result<String>;

    /// Container-category events in delivery order.
    fn container_events(&self) -> BoxStream<'static, Result<ContainerEvent>>;
}
