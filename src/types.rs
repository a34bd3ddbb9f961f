//! Data structures shared between the controller and the registrar.
//!
//! A [`Binding`] describes the resolver delegation owned by the
//! controller, a [`MonitoredEvent`] is a decoded system bus signal, and a
//! [`HostRecord`] is the content of one dnsmasq host file.

use std::fmt::Write as _;
use std::net::IpAddr;

use crate::resolver::LinkHandle;

/// The active DNS delegation for the domain suffix.
///
/// At most one exists per process. `handle` stays `None` until the
/// resolver has accepted the link configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub domain_suffix: String,
    pub link_index: i32,
    pub link_name: String,
    /// Address of the sidecar resolver that queries are routed to.
    pub bound_address: IpAddr,
    pub handle: Option<LinkHandle>,
}

/// A system bus signal that may affect the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredEvent {
    /// `PrepareForSleep`; `resuming` is true when the host woke up.
    SuspendResume { resuming: bool },
    /// The resolver's `DNS` property changed. `link_present` tells
    /// whether our link index is still listed among the servers.
    ResolverPropertiesChanged { link_present: bool },
}

impl MonitoredEvent {
    /// Whether the binding should be applied again.
    ///
    /// A `DNS` change that drops our link is taken as the delegation
    /// having been reverted. This is a heuristic and can fire when no
    /// reversion happened.
    pub fn needs_reapply(&self) -> bool {
        match self {
            MonitoredEvent::SuspendResume { resuming } => *resuming,
            MonitoredEvent::ResolverPropertiesChanged { link_present } => !link_present,
        }
    }
}

/// Host entries for a single container, written to a file named after
/// the container ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub container_id: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
}

impl HostRecord {
    /// Renders one `<address>\t<hostname>` line per address.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for address in &self.addresses {
            let _ = writeln!(out, "{}\t{}", address, self.hostname);
        }
        out
    }
}

/// `<label>.<suffix>`
pub fn hostname_for(label: &str, domain_suffix: &str) -> String {
    format!("{}.{}", label, domain_suffix)
}
