//! Configuration loaders for successful and failing launches.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8PathBuf;
use cfgbus_config::{BusKind, Config, SocketEndpoint};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use crate::bootstrap::ConfigLoader;

/// Loader placing both unix sockets under a temporary directory.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary socket directory");
        Self { dir: Arc::new(dir) }
    }

    /// Path of the request socket.
    pub fn daemon_socket(&self) -> PathBuf {
        self.dir.path().join("run").join("cfgbusd.sock")
    }

    /// Path of the notification socket.
    pub fn notification_socket(&self) -> PathBuf {
        self.dir.path().join("run").join("notifications.sock")
    }

    fn endpoint(path: PathBuf) -> SocketEndpoint {
        let path = Utf8PathBuf::from_path_buf(path).expect("temporary path was not valid UTF-8");
        SocketEndpoint::unix(path)
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            bus: BusKind::UnixSocket,
            daemon_socket: Self::endpoint(self.daemon_socket()),
            notification_socket: Self::endpoint(self.notification_socket()),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an unsupported socket scheme.
#[derive(Clone, Copy)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("cfgbusd"),
            OsString::from("--daemon-socket"),
            OsString::from("carrier://pigeon"),
        ];
        Config::load_from_iter(args)
    }
}
