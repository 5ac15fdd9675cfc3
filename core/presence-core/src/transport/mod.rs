//! Platform transports: where the desktop app listens and how to reach it.
//!
//! One `Transport` is chosen per session at construction. It enumerates
//! candidate endpoints in preference order and opens a single endpoint on
//! request. Open failures are normal (the app is usually just not running) and
//! are reported as `None`, never as errors.

mod unix;
mod windows;

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
pub use unix::{UnixLocator, UnixTransport};
#[cfg(windows)]
pub use windows::NamedPipeTransport;

pub const ENDPOINT_PREFIX: &str = "discord-ipc-";
pub const ENDPOINT_SLOTS: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    path: PathBuf,
}

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// File names `discord-ipc-0` through `discord-ipc-9`.
pub fn slot_names() -> impl Iterator<Item = String> {
    (0..ENDPOINT_SLOTS).map(|slot| format!("{}{}", ENDPOINT_PREFIX, slot))
}

/// A connected, bidirectional byte stream.
///
/// The hooks default to "unsupported" so transports without deadlines or
/// non-blocking mode still work; callers treat those errors as advisory.
pub trait Duplex: Read + Write + Send {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

pub trait Transport: Send + Sync {
    /// Short name for logs (e.g., "unix", "named-pipe")
    fn name(&self) -> &'static str;

    /// Candidate endpoints in the order they should be tried.
    fn candidates(&self) -> Vec<Endpoint>;

    /// Opens exactly one endpoint. Any failure yields `None`.
    fn open(&self, endpoint: &Endpoint) -> Option<Box<dyn Duplex>>;
}

/// Used where no transport is known: there is never anything to connect to.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn name(&self) -> &'static str {
        "none"
    }

    fn candidates(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    fn open(&self, _endpoint: &Endpoint) -> Option<Box<dyn Duplex>> {
        None
    }
}

/// The transport for the platform this binary was built for.
pub fn platform_transport() -> Arc<dyn Transport> {
    #[cfg(unix)]
    {
        Arc::new(UnixTransport::from_env())
    }
    #[cfg(windows)]
    {
        Arc::new(NamedPipeTransport)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Arc::new(NullTransport)
    }
}
