//! systemd-resolved client over the system bus.
//!
//! See the `org.freedesktop.resolve1` interface documentation for the
//! manager and link objects used here.

use std::net::IpAddr;

use async_trait::async_trait;
use log::{debug, info};
use zbus::zvariant::OwnedObjectPath;
use zbus::{proxy, Connection};

use super::{find_link, HostInterface, LinkHandle, ResolverClient};
use crate::error::Result;

pub const RESOLVE1_PATH: &str = "/org/freedesktop/resolve1";
pub const RESOLVE1_MANAGER_INTERFACE: &str = "org.freedesktop.resolve1.Manager";

#[proxy(
    interface = "org.freedesktop.resolve1.Manager",
    default_service = "org.freedesktop.resolve1",
    default_path = "/org/freedesktop/resolve1",
    gen_blocking = false
)]
trait Manager {
    fn get_link(&self, ifindex: i32) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.resolve1.Link",
    default_service = "org.freedesktop.resolve1",
    gen_blocking = false
)]
trait Link {
    /// `a(iay)`
    #[zbus(name = "SetDNS")]
    fn set_dns(&self, addresses: &[(i32, Vec<u8>)]) -> zbus::Result<()>;

    /// `a(sb)`; the flag marks a routing-only domain.
    fn set_domains(&self, domains: &[(&str, bool)]) -> zbus::Result<()>;

    fn revert(&self) -> zbus::Result<()>;
}

/// Encodes an address as a `SetDNS` entry.
pub fn dns_entry(address: IpAddr) -> (i32, Vec<u8>) {
    match address {
        IpAddr::V4(v4) => (libc::AF_INET, v4.octets().to_vec()),
        IpAddr::V6(v6) => (libc::AF_INET6, v6.octets().to_vec()),
    }
}

/// [`ResolverClient`] for systemd-resolved.
pub struct Resolve1Client {
    conn: Connection,
}

impl Resolve1Client {
    pub async fn connect() -> Result<Self> {
        let conn = Connection::system().await?;
        Ok(Self { conn })
    }

    async fn link(&self, path: &str) -> Result<LinkProxy<'static>> {
        let link = LinkProxy::builder(&self.conn)
            .path(path.to_string())?
            .build()
            .await?;
        Ok(link)
    }
}

#[async_trait]
impl ResolverClient for Resolve1Client {
    async fn link_for_gateway(&self, gateway: IpAddr) -> Result<(i32, String)> {
        find_link(&HostInterface::list(), gateway)
    }

    async fn bind_link(
        &self,
        index: i32,
        addresses: &[IpAddr],
        domain: &str,
    ) -> Result<LinkHandle> {
        let manager = ManagerProxy::new(&self.conn).await?;
        let path = manager.get_link(index).await?;
        debug!("Link {} is {}", index, path.as_str());

        let link = self.link(path.as_str()).await?;
        let entries: Vec<(i32, Vec<u8>)> = addresses.iter().copied().map(dns_entry).collect();
        link.set_dns(&entries).await?;
        link.set_domains(&[(domain, true)]).await?;

        info!("Link {} now routes {} to {:?}", index, domain, addresses);
        Ok(LinkHandle::new(path.as_str()))
    }

    async fn revert(&self, handle: &LinkHandle) -> Result<()> {
        self.link(handle.path()).await?.revert().await?;
        info!("Reverted resolver configuration of {}", handle.path());
        Ok(())
    }
}
