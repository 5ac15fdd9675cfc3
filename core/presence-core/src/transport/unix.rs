#![cfg(unix)]

use std::env;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use super::{slot_names, Duplex, Endpoint, Transport};

const TEMP_ENV_KEYS: [&str; 3] = ["TMPDIR", "TMP", "TEMP"];
const RUNTIME_ENV: &str = "XDG_RUNTIME_DIR";
const FALLBACK_TEMP_DIR: &str = "/tmp";
// Sandboxed installs put the socket below the runtime dir instead of in it.
const RUNTIME_SUBDIRS: [&str; 3] = ["", "app/com.discordapp.Discord", "snap.discord"];

/// Socket directories for the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixLocator {
    temp_dir: PathBuf,
    runtime_dir: Option<PathBuf>,
}

impl UnixLocator {
    pub fn new(temp_dir: impl Into<PathBuf>, runtime_dir: Option<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            runtime_dir,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let temp_dir = TEMP_ENV_KEYS
            .iter()
            .find_map(|key| non_empty(*key))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_TEMP_DIR));
        let runtime_dir = non_empty(RUNTIME_ENV).map(PathBuf::from);
        Self::new(temp_dir, runtime_dir)
    }

    /// Temp-dir slots first, then every runtime-dir layout, without duplicates.
    pub fn candidates(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = slot_names()
            .map(|name| Endpoint::new(self.temp_dir.join(name)))
            .collect();

        if let Some(runtime_dir) = &self.runtime_dir {
            for subdir in RUNTIME_SUBDIRS {
                let base = runtime_dir.join(subdir);
                for name in slot_names() {
                    let endpoint = Endpoint::new(base.join(name));
                    if !endpoints.contains(&endpoint) {
                        endpoints.push(endpoint);
                    }
                }
            }
        }

        endpoints
    }
}

pub struct UnixTransport {
    locator: UnixLocator,
}

impl UnixTransport {
    pub fn new(locator: UnixLocator) -> Self {
        Self { locator }
    }

    pub fn from_env() -> Self {
        Self::new(UnixLocator::from_env())
    }
}

impl Transport for UnixTransport {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn candidates(&self) -> Vec<Endpoint> {
        self.locator.candidates()
    }

    fn open(&self, endpoint: &Endpoint) -> Option<Box<dyn Duplex>> {
        if !endpoint.path().exists() {
            return None;
        }
        match UnixStream::connect(endpoint.path()) {
            Ok(stream) => Some(Box::new(stream)),
            Err(err) => {
                tracing::debug!(endpoint = %endpoint, error = %err, "Failed to open IPC socket");
                None
            }
        }
    }
}

impl Duplex for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_write_timeout(self, timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        UnixStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::net::UnixListener;

    fn locator_from(vars: &[(&str, &str)]) -> UnixLocator {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        UnixLocator::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn falls_back_to_tmp_without_env() {
        let candidates = locator_from(&[]).candidates();
        assert_eq!(candidates.len(), 10);
        assert_eq!(candidates[0].path(), PathBuf::from("/tmp/discord-ipc-0"));
        assert_eq!(candidates[9].path(), PathBuf::from("/tmp/discord-ipc-9"));
    }

    #[test]
    fn tmpdir_takes_precedence_over_tmp() {
        let candidates = locator_from(&[("TMP", "/b"), ("TMPDIR", "/a")]).candidates();
        assert_eq!(candidates[0].path(), PathBuf::from("/a/discord-ipc-0"));
    }

    #[test]
    fn runtime_dir_appends_second_set_after_temp_dir() {
        let candidates =
            locator_from(&[("TMPDIR", "/tmp"), ("XDG_RUNTIME_DIR", "/run/user/1000")]).candidates();

        assert_eq!(candidates.len(), 40);
        assert_eq!(candidates[9].path(), PathBuf::from("/tmp/discord-ipc-9"));
        assert_eq!(
            candidates[10].path(),
            PathBuf::from("/run/user/1000/discord-ipc-0")
        );
        assert_eq!(
            candidates[20].path(),
            PathBuf::from("/run/user/1000/app/com.discordapp.Discord/discord-ipc-0")
        );
        assert_eq!(
            candidates[39].path(),
            PathBuf::from("/run/user/1000/snap.discord/discord-ipc-9")
        );
    }

    #[test]
    fn runtime_dir_equal_to_temp_dir_is_not_repeated() {
        let candidates =
            locator_from(&[("TMPDIR", "/run/user/1"), ("XDG_RUNTIME_DIR", "/run/user/1")])
                .candidates();
        assert_eq!(candidates.len(), 30);
    }

    #[test]
    fn open_skips_missing_paths() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let transport = UnixTransport::new(UnixLocator::new(temp_dir.path(), None));
        let endpoint = Endpoint::new(temp_dir.path().join("discord-ipc-0"));
        assert!(transport.open(&endpoint).is_none());
    }

    #[test]
    fn open_connects_to_listening_socket() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("discord-ipc-3");
        let _listener = UnixListener::bind(&path).expect("bind socket");

        let transport = UnixTransport::new(UnixLocator::new(temp_dir.path(), None));
        assert!(transport.open(&Endpoint::new(&path)).is_some());
    }

    #[test]
    fn write_deadline_bounds_a_peer_that_never_reads() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("discord-ipc-0");
        let _listener = UnixListener::bind(&path).expect("bind socket");

        let transport = UnixTransport::new(UnixLocator::new(temp_dir.path(), None));
        let mut stream = transport.open(&Endpoint::new(&path)).expect("open socket");
        stream
            .set_write_timeout(Some(Duration::from_millis(50)))
            .expect("write deadline");

        let chunk = vec![0u8; 64 * 1024];
        let err = loop {
            if let Err(err) = io::Write::write_all(&mut stream, &chunk) {
                break err;
            }
        };
        assert!(
            matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            "{err:?}"
        );
    }
}
