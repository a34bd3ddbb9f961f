//! Host resolver configuration.
//!
//! The controller delegates the domain suffix to the sidecar by setting
//! per-link DNS servers and routing domains on the host resolver. The
//! [`ResolverClient`] trait is that capability; [`Resolve1Client`] talks
//! to systemd-resolved.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::{Error, Result};

pub mod resolve1;
pub use resolve1::Resolve1Client;

/// Resolver-side reference to a configured link, used to revert it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    path: String,
}

impl LinkHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
pub trait ResolverClient: Send + Sync {
    /// Finds the host link carrying `gateway`, returning its index and name.
    async fn link_for_gateway(&self, gateway: IpAddr) -> Result<(i32, String)>;

    /// Sets `addresses` as the link's DNS servers and `domain` as its only
    /// routing domain.
    async fn bind_link(&self, index: i32, addresses: &[IpAddr], domain: &str)
        -> Result<LinkHandle>;

    /// Restores the link's previous resolver configuration.
    async fn revert(&self, handle: &LinkHandle) -> Result<()>;
}

/// A host network interface and its addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInterface {
    pub index: u32,
    pub name: String,
    pub addresses: Vec<IpAddr>,
}

impl HostInterface {
    /// Enumerates the host's interfaces.
    pub fn list() -> Vec<HostInterface> {
        netdev::get_interfaces()
            .into_iter()
            .map(|iface| {
                let addresses = iface
                    .ipv4
                    .iter()
                    .map(|net| IpAddr::V4(net.addr()))
                    .chain(iface.ipv6.iter().map(|net| IpAddr::V6(net.addr())))
                    .collect();
                HostInterface {
                    index: iface.index,
                    name: iface.name.clone(),
                    addresses,
                }
            })
            .collect()
    }
}

/// Picks the interface holding exactly `target`, ignoring loopback and
/// multicast addresses.
pub fn find_link(interfaces: &[HostInterface], target: IpAddr) -> Result<(i32, String)> {
    for iface in interfaces {
        let matched = iface
            .addresses
            .iter()
            .any(|addr| !addr.is_loopback() && !addr.is_multicast() && *addr == target);
        if matched {
            let index = i32::try_from(iface.index)
                .map_err(|_| Error::InterfaceNotFound(target))?;
            return Ok((index, iface.name.clone()));
        }
    }
    Err(Error::InterfaceNotFound(target))
}
