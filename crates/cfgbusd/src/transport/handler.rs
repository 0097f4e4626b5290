//! Connection streams and the framed request handler.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use cfgbus_config::SocketEndpoint;
use cfgbus_types::frame::{FrameError, MAX_FRAME_BYTES, read_frame, write_frame};
use tracing::{debug, warn};

use crate::router::Router;

use super::LISTENER_TARGET;

/// Stream types accepted by the listener and opened by notifiers.
#[derive(Debug)]
pub enum ConnectionStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Opens a client connection to `endpoint`.
    pub fn connect(endpoint: &SocketEndpoint) -> io::Result<Self> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                TcpStream::connect((host.as_str(), *port)).map(Self::Tcp)
            }
            SocketEndpoint::Unix { path } => UnixStream::connect(path.as_std_path()).map(Self::Unix),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations must not panic.
    fn handle(&self, stream: ConnectionStream);
}

/// Serves one length-prefixed request per connection through the router.
pub struct FramedDispatchHandler {
    router: Arc<Router>,
    max_frame: usize,
}

impl FramedDispatchHandler {
    /// Creates a handler accepting frames up to [`MAX_FRAME_BYTES`].
    #[must_use]
    pub const fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            max_frame: MAX_FRAME_BYTES,
        }
    }

    fn serve(&self, stream: &mut ConnectionStream) -> Result<(), FrameError> {
        let Some(request) = read_frame(stream, self.max_frame)? else {
            debug!(target: LISTENER_TARGET, "connection closed before a request");
            return Ok(());
        };
        let reply = self.router.dispatch_bytes(&request);
        write_frame(stream, &reply)
    }
}

impl ConnectionHandler for FramedDispatchHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        if let Err(error) = self.serve(&mut stream) {
            warn!(target: LISTENER_TARGET, %error, "connection dropped");
        }
    }
}
