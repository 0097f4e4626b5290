//! Accept loop for the socket bus.

use std::fs;
use std::io;
use std::net::{TcpListener, ToSocketAddrs};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cfgbus_config::SocketEndpoint;
use tracing::{debug, info, warn};

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// A bound, not yet accepting, request socket.
#[derive(Debug)]
pub struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Returns `Ok(None)` when no connection is pending.
    fn accept(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    /// Binds `endpoint`, replacing a stale unix socket file if one exists.
    pub fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { host, port } => Acceptor::Tcp(bind_tcp(host, *port)?),
            SocketEndpoint::Unix { path } => Acceptor::Unix(bind_unix(path.as_std_path())?),
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Endpoint this listener is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    #[cfg(test)]
    pub(crate) fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            Acceptor::Unix(_) => None,
        }
    }

    /// Starts accepting on a background thread, serving every connection on
    /// its own thread.
    pub fn start(self, handler: Arc<dyn ConnectionHandler>) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_nonblocking() {
            remove_socket_file(&self.endpoint);
            return Err(ListenerError::NonBlocking { source });
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("cfgbus-accept".to_owned())
            .spawn(move || self.accept_until(&flag, &handler))
            .map_err(|source| ListenerError::Thread { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }

    fn accept_until(self, shutdown: &AtomicBool, handler: &Arc<dyn ConnectionHandler>) {
        info!(target: LISTENER_TARGET, endpoint = %self.endpoint, "socket listener active");
        let mut repeated = None::<io::ErrorKind>;
        while !shutdown.load(Ordering::SeqCst) {
            match self.acceptor.accept() {
                Ok(Some(stream)) => {
                    repeated = None;
                    spawn_connection(stream, handler);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    if repeated != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, %error, "socket accept error");
                    }
                    repeated = Some(error.kind());
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        remove_socket_file(&self.endpoint);
        info!(target: LISTENER_TARGET, endpoint = %self.endpoint, "socket listener stopped");
    }
}

fn spawn_connection(stream: ConnectionStream, handler: &Arc<dyn ConnectionHandler>) {
    let handler = Arc::clone(handler);
    let spawned = thread::Builder::new()
        .name("cfgbus-conn".to_owned())
        .spawn(move || handler.handle(stream));
    if let Err(error) = spawned {
        warn!(target: LISTENER_TARGET, %error, "failed to spawn connection thread");
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop; connections in flight finish on their
    /// own threads.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop to exit.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Err(_)) => Err(ListenerError::ThreadPanic),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    let display = || path.display().to_string();
    if path.exists() {
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
            path: display(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket { path: display() });
        }
        match UnixStream::connect(path) {
            Ok(_) => return Err(ListenerError::UnixInUse { path: display() }),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                debug!(target: LISTENER_TARGET, path = %path.display(), "removing stale socket");
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: display(),
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixConnect {
                    path: display(),
                    source,
                });
            }
        }
    }
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: display(),
        source,
    })
}

fn remove_socket_file(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(target: LISTENER_TARGET, %error, %path, "failed to remove unix socket file");
    }
}
