//! Hostname registrar.
//!
//! Keeps one dnsmasq host file per running container that carries the
//! subdomain label. The file is named after the container ID and holds
//! every address of every network attachment, all mapped to
//! `<label>.<domain suffix>`. dnsmasq picks up new files on its own; it
//! is sent `SIGHUP` when a file is removed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;

use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reload::Reload;
use crate::runtime::{ContainerEvent, ContainerMetadata, ContainerRuntime};
use crate::types::{hostname_for, HostRecord};

pub struct Registrar<R, L> {
    config: Config,
    runtime: R,
    reloader: L,
    records: RwLock<HashMap<String, HostRecord>>,
    /// Event stream opened by `bootstrap`, consumed by `run`.
    events: Mutex<Option<BoxStream<'static, Result<ContainerEvent>>>>,
}

impl<R, L> Registrar<R, L>
where
    R: ContainerRuntime,
    L: Reload,
{
    pub fn new(config: Config, runtime: R, reloader: L) -> Self {
        Self {
            config,
            runtime,
            reloader,
            records: RwLock::new(HashMap::new()),
            events: Mutex::new(None),
        }
    }

    /// Registers every running container and removes host files left
    /// over from containers that are gone. Any failure is fatal.
    ///
    /// The event stream is opened before the listing so containers
    /// started in between are still seen by `run`.
    pub async fn bootstrap(&self) -> Result<()> {
        let hosts_dir = &self.config.hosts_dir;
        tokio::fs::create_dir_all(hosts_dir)
            .await
            .map_err(|e| Error::file_system(hosts_dir, e))?;

        *self.events.lock().await = Some(self.runtime.container_events());

        let running = self.runtime.list_containers(None).await?;
        info!("Loading {} running containers", running.len());
        for container in &running {
            self.container_added(&container.id).await?;
        }

        let live: HashSet<&str> = running.iter().map(|c| c.id.as_str()).collect();
        let pruned = self.prune(&live).await?;
        if pruned > 0 {
            info!("Removed {} stale host files", pruned);
            self.signal_reload();
        }
        Ok(())
    }

    /// Consumes container events until the stream ends or `shutdown`
    /// resolves. Only a stream failure is returned as an error.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut events = match self.events.lock().await.take() {
            Some(events) => events,
            None => self.runtime.container_events(),
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Event loop shutting down");
                    return Ok(());
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        if let Err(e) = self.handle_event(&event).await {
                            warn!(
                                "[{}] Failed to handle {} event: {}",
                                event.container_id, event.action, e
                            );
                        }
                    }
                    Some(Err(e)) => {
                        error!("Event loop shutting down: {}", e);
                        return Err(e);
                    }
                    None => {
                        info!("Event stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }

    pub async fn handle_event(&self, event: &ContainerEvent) -> Result<()> {
        match event.action.as_str() {
            "start" => self.container_added(&event.container_id).await,
            "stop" | "die" => self.container_removed(&event.container_id).await,
            _ => Ok(()),
        }
    }

    /// Writes the host file for `container_id` if it is running and
    /// labelled. Rewriting an unchanged container produces the same file.
    pub async fn container_added(&self, container_id: &str) -> Result<()> {
        let mut records = self.records.write().await;

        debug!("Examining container {}", container_id);
        let Some(meta) = self.runtime.inspect_container(container_id).await? else {
            debug!("[{}] Container no longer exists", container_id);
            return Ok(());
        };
        if !meta.running {
            return Ok(());
        }

        let subdomain = meta
            .labels
            .get(&self.config.subdomain_label)
            .map(String::as_str)
            .unwrap_or_default();
        if subdomain.is_empty() {
            return Ok(());
        }

        let record = HostRecord {
            container_id: container_id.to_string(),
            hostname: hostname_for(subdomain, &self.config.domain_suffix),
            addresses: addresses_of(&meta),
        };

        let path = self.record_path(container_id);
        tokio::fs::write(&path, record.render())
            .await
            .map_err(|e| Error::file_system(&path, e))?;

        info!("Registering {:?}", record.hostname);
        for address in &record.addresses {
            info!(" → {}", address);
        }
        records.insert(container_id.to_string(), record);
        Ok(())
    }

    /// Deletes the host file for `container_id` and asks dnsmasq to
    /// reload. A container without a file is ignored.
    pub async fn container_removed(&self, container_id: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(container_id);

        let path = self.record_path(container_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::file_system(&path, e))?;

        info!("Unregistered container {}", container_id);
        self.signal_reload();
        Ok(())
    }

    /// Current records ordered by container ID.
    pub async fn records(&self) -> Vec<HostRecord> {
        let records = self.records.read().await;
        let mut out: Vec<HostRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        out
    }

    fn record_path(&self, container_id: &str) -> PathBuf {
        self.config.hosts_dir.join(container_id)
    }

    async fn prune(&self, live: &HashSet<&str>) -> Result<usize> {
        let _records = self.records.write().await;
        let hosts_dir = &self.config.hosts_dir;

        let mut entries = tokio::fs::read_dir(hosts_dir)
            .await
            .map_err(|e| Error::file_system(hosts_dir, e))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::file_system(hosts_dir, e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_file || live.contains(name) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!("Removed stale host file {}", name);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale host file {}: {}", name, e),
            }
        }
        Ok(removed)
    }

    fn signal_reload(&self) {
        if let Err(e) = self.reloader.reload() {
            warn!("Failed to signal dnsmasq, reload skipped: {}", e);
        }
    }
}

/// IPv4 and global IPv6 addresses of every attachment, ordered by
/// network name so repeated writes are identical.
fn addresses_of(meta: &ContainerMetadata) -> Vec<IpAddr> {
    let mut names: Vec<&String> = meta.networks.keys().collect();
    names.sort();

    let mut addresses = Vec::new();
    for name in names {
        let endpoint = &meta.networks[name];
        for raw in [&endpoint.address, &endpoint.global_ipv6_address] {
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<IpAddr>() {
                Ok(addr) => addresses.push(addr),
                Err(_) => warn!(
                    "[{}] Skipping invalid address {:?} on network {}",
                    meta.id, raw, name
                ),
            }
        }
    }
    addresses
}
