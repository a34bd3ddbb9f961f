//! In-memory test doubles for the container runtime, the host resolver
//! and dnsmasq reloads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use ldhdns::error::{Error, Result};
use ldhdns::reload::Reload;
use ldhdns::resolver::{find_link, HostInterface, LinkHandle, ResolverClient};
use ldhdns::runtime::{
    ContainerEvent, ContainerMetadata, ContainerRuntime, ContainerSpec, ContainerSummary,
    NetworkEndpoint,
};
use ldhdns::Config;

pub const LABEL: &str = "dns.ldh/subdomain";

pub type EventSender = mpsc::UnboundedSender<Result<ContainerEvent>>;

#[derive(Default)]
pub struct RuntimeState {
    pub containers: HashMap<String, ContainerMetadata>,
    pub networks: HashMap<String, String>,
    pub created: Vec<ContainerSpec>,
    pub created_networks: Vec<(String, String)>,
    pub started: Vec<String>,
    pub stopped: Vec<(String, Duration)>,
    /// Attachment given to containers created through the runtime.
    pub sidecar_endpoint: NetworkEndpoint,
    /// When set, started containers report as not running.
    pub start_exits: bool,
    pub inspect_calls: usize,
    /// Order of listing and event subscription calls.
    pub calls: Vec<&'static str>,
    events: Option<mpsc::UnboundedReceiver<Result<ContainerEvent>>>,
}

/// A container runtime backed by a map. Clones share state.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime whose event stream is fed by the returned sender.
    /// Dropping the sender ends the stream.
    pub fn with_events() -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self::new();
        runtime.state().events = Some(rx);
        (runtime, tx)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap()
    }

    pub fn add_container(&self, meta: ContainerMetadata) {
        self.state().containers.insert(meta.id.clone(), meta);
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(meta) = self.state().containers.get_mut(id) {
            meta.running = running;
        }
    }

    pub fn remove_container(&self, id: &str) {
        self.state().containers.remove(id);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, name: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut state = self.state();
        state.calls.push("list");
        let mut out: Vec<ContainerSummary> = state
            .containers
            .values()
            .filter(|c| c.running)
            .filter(|c| name.map_or(true, |n| c.name.contains(n)))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn inspect_container(&self, id_or_name: &str) -> Result<Option<ContainerMetadata>> {
        let mut state = self.state();
        state.inspect_calls += 1;
        Ok(state
            .containers
            .values()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state();
        let id = format!("{:0>64}", state.created.len() + 1);
        let mut networks = HashMap::new();
        networks.insert(spec.network_name.clone(), state.sidecar_endpoint.clone());
        state.containers.insert(
            id.clone(),
            ContainerMetadata {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
                network_mode: "bridge".into(),
                env: spec.env.clone(),
                binds: spec.binds.clone(),
                labels: spec.labels.clone(),
                networks,
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        let exits = state.start_exits;
        let meta = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::Container(format!("no such container {}", id)))?;
        meta.running = !exits;
        state.started.push(id.to_string());
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let mut state = self.state();
        if let Some(meta) = state.containers.get_mut(id) {
            meta.running = false;
        }
        state.stopped.push((id.to_string(), timeout));
        Ok(())
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state().networks.get(name).cloned())
    }

    async fn create_network(&self, name: &str, driver: &str) -> Result<String> {
        let mut state = self.state();
        let id = format!("net-{}", name);
        state.networks.insert(name.to_string(), id.clone());
        state
            .created_networks
            .push((name.to_string(), driver.to_string()));
        Ok(id)
    }

    fn container_events(&self) -> BoxStream<'static, Result<ContainerEvent>> {
        let mut state = self.state();
        state.calls.push("events");
        match state.events.take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }
}

#[derive(Default)]
pub struct ResolverState {
    pub interfaces: Vec<HostInterface>,
    pub binds: Vec<(i32, Vec<IpAddr>, String)>,
    pub reverts: Vec<LinkHandle>,
    pub fail_binds_after: Option<usize>,
}

/// Records bind and revert calls. Clones share state.
#[derive(Clone, Default)]
pub struct FakeResolver {
    state: Arc<Mutex<ResolverState>>,
}

impl FakeResolver {
    pub fn with_interfaces(interfaces: Vec<HostInterface>) -> Self {
        let resolver = Self::default();
        resolver.state().interfaces = interfaces;
        resolver
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap()
    }

    pub fn bind_count(&self) -> usize {
        self.state().binds.len()
    }
}

#[async_trait]
impl ResolverClient for FakeResolver {
    async fn link_for_gateway(&self, gateway: IpAddr) -> Result<(i32, String)> {
        find_link(&self.state().interfaces, gateway)
    }

    async fn bind_link(
        &self,
        index: i32,
        addresses: &[IpAddr],
        domain: &str,
    ) -> Result<LinkHandle> {
        let mut state = self.state();
        if let Some(limit) = state.fail_binds_after {
            if state.binds.len() >= limit {
                return Err(Error::ResolverProtocol("link is gone".into()));
            }
        }
        state
            .binds
            .push((index, addresses.to_vec(), domain.to_string()));
        Ok(LinkHandle::new(format!("/org/freedesktop/resolve1/link/_3{}", index)))
    }

    async fn revert(&self, handle: &LinkHandle) -> Result<()> {
        self.state().reverts.push(handle.clone());
        Ok(())
    }
}

/// Counts reload requests.
#[derive(Clone, Default)]
pub struct CountingReloader {
    count: Arc<AtomicUsize>,
}

impl CountingReloader {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Reload for CountingReloader {
    fn reload(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts reload requests and fails every one of them, as when dnsmasq
/// has exited and its PID file is stale.
#[derive(Clone, Default)]
pub struct FailingReloader {
    attempts: Arc<AtomicUsize>,
}

impl FailingReloader {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Reload for FailingReloader {
    fn reload(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // ESRCH
        Err(Error::Signal {
            pid: 4242,
            source: std::io::Error::from_raw_os_error(3),
        })
    }
}

pub fn interface(index: u32, name: &str, addrs: &[&str]) -> HostInterface {
    HostInterface {
        index,
        name: name.to_string(),
        addresses: addrs.iter().map(|a| a.parse().unwrap()).collect(),
    }
}

pub fn endpoint(address: &str, gateway: &str, ipv6: &str) -> NetworkEndpoint {
    NetworkEndpoint {
        address: address.to_string(),
        gateway: gateway.to_string(),
        global_ipv6_address: ipv6.to_string(),
    }
}

/// A running container with the subdomain label set to `subdomain`.
pub fn labelled_container(
    id: &str,
    subdomain: &str,
    networks: &[(&str, NetworkEndpoint)],
) -> ContainerMetadata {
    let mut labels = HashMap::new();
    labels.insert(LABEL.to_string(), subdomain.to_string());
    ContainerMetadata {
        id: id.to_string(),
        name: format!("app-{}", id),
        image: "app:latest".into(),
        running: true,
        network_mode: "bridge".into(),
        labels,
        networks: networks
            .iter()
            .map(|(name, ep)| (name.to_string(), ep.clone()))
            .collect(),
        ..Default::default()
    }
}

pub fn start(id: &str) -> ContainerEvent {
    ContainerEvent {
        action: "start".into(),
        container_id: id.into(),
    }
}

pub fn stop(id: &str) -> ContainerEvent {
    ContainerEvent {
        action: "stop".into(),
        container_id: id.into(),
    }
}

pub fn die(id: &str) -> ContainerEvent {
    ContainerEvent {
        action: "die".into(),
        container_id: id.into(),
    }
}

/// Default configuration rooted in `dir`.
pub fn config_in(dir: &Path) -> Config {
    Config {
        hosts_dir: dir.join("hosts.d"),
        pid_file: dir.join("dnsmasq.pid"),
        identity_file: dir.join("cpuset"),
        ..Config::default()
    }
}

/// Sorted names of the files in `dir`.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
