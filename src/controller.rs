//! Link binding manager.
//!
//! Runs on the host network, starts the DNS sidecar on a private bridge
//! network, and delegates the domain suffix to it by configuring the
//! bridge's host link in the host resolver. The binding is applied again
//! whenever the system event monitor reports it may have been undone.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::ResolverClient;
use crate::runtime::{ContainerMetadata, ContainerRuntime, ContainerSpec, NetworkEndpoint};
use crate::types::Binding;

/// Prefix of the labels put on the sidecar container.
pub const SIDECAR_LABEL_PREFIX: &str = "dns.ldh";

/// Grace period before the sidecar is killed on shutdown.
pub const SIDECAR_STOP_TIMEOUT: Duration = Duration::from_secs(30);

const SIDECAR_COMMAND: &str = "dns";
const NETWORK_DRIVER: &str = "bridge";
const ID_PREFIX_LEN: usize = 12;

/// The running sidecar as last inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarContainer {
    pub id: String,
    pub name: String,
    pub endpoint: NetworkEndpoint,
}

/// Extracts a container ID from the identity marker, i.e. the last path
/// segment of its first line.
pub fn container_id_from_marker(contents: &str) -> Option<String> {
    let first = contents.lines().next()?.trim();
    let id = first.rsplit('/').next()?;
    (id.len() >= 2).then(|| id.to_string())
}

/// `<owner-name>_<first 12 characters of owner id>`
pub fn sidecar_name(owner: &ContainerMetadata) -> String {
    let prefix: String = owner.id.chars().take(ID_PREFIX_LEN).collect();
    format!("{}_{}", owner.name, prefix)
}

pub struct Controller<R, C> {
    config: Config,
    runtime: R,
    resolver: C,
    owner: ContainerMetadata,
    network_id: String,
    sidecar: Option<SidecarContainer>,
    binding: Option<Binding>,
    links: watch::Sender<Option<i32>>,
}

impl<R, C> Controller<R, C>
where
    R: ContainerRuntime,
    C: ResolverClient,
{
    /// Resolves the controller's own container and makes sure the shared
    /// bridge network exists.
    pub async fn new(config: Config, runtime: R, resolver: C) -> Result<Self> {
        let owner = find_own_container(&config, &runtime).await?;
        if owner.network_mode != "host" {
            warn!("Container {} isn't connected to the host network", owner.id);
            return Err(Error::Topology(owner.id));
        }
        info!("Running as container {} ({})", owner.name, owner.id);

        let network_id = find_or_create_network(&runtime, &config.network_id).await?;
        let (links, _) = watch::channel(None);

        Ok(Self {
            config,
            runtime,
            resolver,
            owner,
            network_id,
            sidecar: None,
            binding: None,
            links,
        })
    }

    /// Starts the sidecar and binds the domain suffix to it.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting DNS container...");
        self.find_or_create_and_run_sidecar().await?;

        info!("Applying DNS change...");
        self.apply().await
    }

    /// Receives the currently bound link index.
    pub fn links(&self) -> watch::Receiver<Option<i32>> {
        self.links.subscribe()
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn sidecar(&self) -> Option<&SidecarContainer> {
        self.sidecar.as_ref()
    }

    /// Waits for `shutdown`, applying the binding again on every reapply
    /// notification. A failed reapply, or the notification channel
    /// closing, ends the loop with an error.
    pub async fn run<F>(&mut self, mut reapply: mpsc::Receiver<()>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                signal = reapply.recv() => match signal {
                    Some(()) => {
                        info!("Reapplying DNS change...");
                        self.apply().await?;
                    }
                    None => {
                        warn!("System event monitor stopped");
                        return Err(Error::ResolverProtocol(
                            "system event monitor stopped, binding can no longer be refreshed"
                                .into(),
                        ));
                    }
                },
            }
        }
    }

    /// Points the sidecar's host link at the sidecar for the domain
    /// suffix. Safe to repeat; each call overwrites the link settings.
    pub async fn apply(&mut self) -> Result<()> {
        let sidecar = self
            .sidecar
            .as_ref()
            .ok_or_else(|| Error::Container("DNS container is not running".into()))?;

        let address = parse_address(&sidecar.endpoint.address)?;
        let gateway = parse_address(&sidecar.endpoint.gateway)?;

        let (link_index, link_name) = self.resolver.link_for_gateway(gateway).await?;
        info!("Applying configuration to {:?} network", link_name);

        let handle = self
            .resolver
            .bind_link(link_index, &[address], &self.config.domain_suffix)
            .await?;

        self.binding = Some(Binding {
            domain_suffix: self.config.domain_suffix.clone(),
            link_index,
            link_name,
            bound_address: address,
            handle: Some(handle),
        });
        self.links.send_replace(Some(link_index));
        Ok(())
    }

    /// Reverts the binding and stops the sidecar. Every step is attempted
    /// and failures are only logged.
    pub async fn shutdown(self) {
        if let Some(handle) = self.binding.as_ref().and_then(|b| b.handle.as_ref()) {
            info!("Reverting DNS change...");
            if let Err(e) = self.resolver.revert(handle).await {
                warn!("Failed to revert DNS: {}", e);
            }
        }
        self.links.send_replace(None);

        if let Some(sidecar) = &self.sidecar {
            info!("Stopping DNS container...");
            if let Err(e) = self
                .runtime
                .stop_container(&sidecar.id, SIDECAR_STOP_TIMEOUT)
                .await
            {
                warn!("Failed to stop container {}: {}", sidecar.id, e);
            }
        }

        debug!("Closing resolver and runtime connections");
        drop(self.resolver);
        drop(self.runtime);
    }

    async fn find_or_create_and_run_sidecar(&mut self) -> Result<()> {
        let name = sidecar_name(&self.owner);

        let id = match self.runtime.inspect_container(&name).await? {
            Some(existing) => existing.id,
            None => {
                info!("Creating {} container...", name);
                self.runtime.create_container(&self.sidecar_spec(&name)).await?
            }
        };

        self.runtime.start_container(&id).await?;

        let meta = self
            .runtime
            .inspect_container(&id)
            .await?
            .filter(|m| m.running)
            .ok_or_else(|| Error::Container(format!("container {} exited unexpectedly", name)))?;

        let endpoint = meta
            .networks
            .get(&self.config.network_id)
            .cloned()
            .ok_or_else(|| {
                Error::Container(format!(
                    "container {} is not attached to network {}",
                    name, self.config.network_id
                ))
            })?;

        info!("DNS container {} running at {}", name, endpoint.address);
        self.sidecar = Some(SidecarContainer {
            id: meta.id,
            name,
            endpoint,
        });
        Ok(())
    }

    fn sidecar_spec(&self, name: &str) -> ContainerSpec {
        let label = |key: &str| format!("{}/{}", SIDECAR_LABEL_PREFIX, key);
        let labels: HashMap<String, String> = [
            (label("controller-id"), self.owner.id.clone()),
            (label("controller-name"), self.owner.name.clone()),
            (label("network-id"), self.config.network_id.clone()),
            (label("domain-suffix"), self.config.domain_suffix.clone()),
            (label("subdomain-label"), self.config.subdomain_label.clone()),
        ]
        .into_iter()
        .collect();

        ContainerSpec {
            name: name.to_string(),
            image: self.owner.image.clone(),
            cmd: vec![SIDECAR_COMMAND.to_string()],
            env: self.owner.env.clone(),
            labels,
            binds: self.owner.binds.clone(),
            cap_add: vec!["CAP_NET_ADMIN".to_string()],
            network_name: self.config.network_id.clone(),
            network_id: self.network_id.clone(),
            auto_remove: true,
        }
    }
}

fn parse_address(raw: &str) -> Result<IpAddr> {
    raw.parse().map_err(|_| Error::Address(raw.to_string()))
}

async fn find_own_container<R: ContainerRuntime>(
    config: &Config,
    runtime: &R,
) -> Result<ContainerMetadata> {
    if let Some(id) = read_identity_marker(&config.identity_file).await {
        match runtime.inspect_container(&id).await? {
            Some(meta) => return Ok(meta),
            None => debug!("Identity marker {:?} is not a container", id),
        }
    }

    debug!("Looking up container named {:?}", config.container_name);
    let id = runtime
        .list_containers(Some(&config.container_name))
        .await?
        .into_iter()
        .find(|c| c.names.iter().any(|n| *n == config.container_name))
        .map(|c| c.id)
        .ok_or_else(|| {
            Error::Identity(format!(
                "no running container named {:?}",
                config.container_name
            ))
        })?;

    runtime
        .inspect_container(&id)
        .await?
        .ok_or_else(|| Error::Identity(format!("container {} not found", id)))
}

async fn read_identity_marker(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => container_id_from_marker(&contents),
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

async fn find_or_create_network<R: ContainerRuntime>(runtime: &R, name: &str) -> Result<String> {
    match runtime.inspect_network(name).await? {
        Some(id) => Ok(id),
        None => {
            info!("Creating {} network...", name);
            runtime.create_network(name, NETWORK_DRIVER).await
        }
    }
}
