//! Error types shared by the controller and the registrar.

use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The process could not work out which container it is running in.
    #[error("cannot determine own container: {0}")]
    Identity(String),

    /// The controller container is not attached to the host network.
    #[error("container {0} must be run in the host network")]
    Topology(String),

    /// Create, start, inspect or stop failed, or the container exited.
    #[error("container error: {0}")]
    Container(String),

    #[error("invalid IP address {0:?}")]
    Address(String),

    #[error("no host network interface has address {0}")]
    InterfaceNotFound(IpAddr),

    /// A call against the resolver configuration service failed.
    #[error("resolver protocol error: {0}")]
    ResolverProtocol(String),

    #[error("file system error on {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resolver daemon could not be signalled.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    /// The runtime's event stream failed.
    #[error("event stream error: {0}")]
    Stream(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn file_system(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Container(err.to_string())
    }
}

impl From<zbus::Error> for Error {
    fn from(err: zbus::Error) -> Self {
        Self::ResolverProtocol(err.to_string())
    }
}

impl From<zbus::fdo::Error> for Error {
    fn from(err: zbus::fdo::Error) -> Self {
        Self::ResolverProtocol(err.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
