use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Process configuration, read once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Name of the bridge network shared with the sidecar.
    pub network_id: String,
    pub domain_suffix: String,
    /// Container label whose value becomes the host name.
    pub subdomain_label: String,
    /// Directory of host files read by dnsmasq.
    pub hosts_dir: PathBuf,
    pub pid_file: PathBuf,
    /// Fallback lookup name when the identity file yields nothing.
    pub container_name: String,
    pub identity_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_id: "ldhdns".into(),
            domain_suffix: "ldh.dns".into(),
            subdomain_label: "dns.ldh/subdomain".into(),
            hosts_dir: "/etc/ldhdns/dnsmasq/hosts.d".into(),
            pid_file: "/var/run/dnsmasq.pid".into(),
            container_name: "ldhdns".into(),
            identity_file: "/proc/1/cpuset".into(),
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("ldhdns.toml"))
            .merge(Json::file("ldhdns.json"))
            .merge(Env::prefixed("LDHDNS_"))
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty values; nothing else is checked.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("network_id", self.network_id.is_empty()),
            ("domain_suffix", self.domain_suffix.is_empty()),
            ("subdomain_label", self.subdomain_label.is_empty()),
            ("hosts_dir", self.hosts_dir.as_os_str().is_empty()),
            ("pid_file", self.pid_file.as_os_str().is_empty()),
            ("container_name", self.container_name.is_empty()),
            ("identity_file", self.identity_file.as_os_str().is_empty()),
        ];
        match fields.iter().find(|(_, empty)| *empty) {
            Some((name, _)) => Err(Error::Config(format!("{} must not be empty", name))),
            None => Ok(()),
        }
    }
}
