#![cfg(windows)]

use std::fs::{File, OpenOptions};

use super::{slot_names, Duplex, Endpoint, Transport};

const PIPE_ROOT: &str = r"\\?\pipe\";

/// Named pipes opened as ordinary read/write files. No deadlines or
/// non-blocking mode: a remote that never answers holds the handshake read,
/// and `PresenceSession::stop` detaches that worker after its grace period.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedPipeTransport;

impl Transport for NamedPipeTransport {
    fn name(&self) -> &'static str {
        "named-pipe"
    }

    fn candidates(&self) -> Vec<Endpoint> {
        slot_names()
            .map(|name| Endpoint::new(format!("{}{}", PIPE_ROOT, name)))
            .collect()
    }

    fn open(&self, endpoint: &Endpoint) -> Option<Box<dyn Duplex>> {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(endpoint.path())
        {
            Ok(file) => Some(Box::new(file)),
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "Failed to open IPC pipe");
                None
            }
        }
    }
}

impl Duplex for File {}
