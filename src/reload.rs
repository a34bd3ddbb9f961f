//! Reload signalling for the downstream dnsmasq process.

use std::path::PathBuf;

use log::{debug, warn};

use crate::error::{Error, Result};

/// Asks the resolver daemon to re-read its hosts directory.
pub trait Reload: Send + Sync {
    fn reload(&self) -> Result<()>;
}

/// Sends `SIGHUP` to the process named in a PID file.
#[derive(Debug, Clone)]
pub struct PidFileReloader {
    pid_file: PathBuf,
}

impl PidFileReloader {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    pub fn read_pid(&self) -> Result<i32> {
        let contents = std::fs::read_to_string(&self.pid_file)
            .map_err(|e| Error::file_system(&self.pid_file, e))?;
        parse_pid(&contents).ok_or_else(|| {
            warn!("Invalid PID {:?} in {}", contents, self.pid_file.display());
            Error::file_system(
                &self.pid_file,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid PID"),
            )
        })
    }
}

impl Reload for PidFileReloader {
    fn reload(&self) -> Result<()> {
        let pid = self.read_pid()?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGHUP) };
        if rc != 0 {
            return Err(Error::Signal {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }
        debug!("Sent SIGHUP to dnsmasq [PID: {}]", pid);
        Ok(())
    }
}

/// Positive PID from PID file contents, ignoring surrounding whitespace.
fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}
