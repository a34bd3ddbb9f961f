//! Name resolution for containers on a single host.
//!
//! Two run modes share this library:
//!
//! * the **controller** ([`controller::Controller`]) runs on the host
//!   network, starts a DNS sidecar container and delegates a domain
//!   suffix to it through the host resolver, re-applying the delegation
//!   when [`monitor::SystemEventMonitor`] reports that it may have been
//!   undone;
//! * the **registrar** ([`registrar::Registrar`]) runs inside the sidecar
//!   and keeps a dnsmasq hosts directory in sync with labelled
//!   containers.

pub mod config;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod registrar;
pub mod reload;
pub mod resolver;
pub mod runtime;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
