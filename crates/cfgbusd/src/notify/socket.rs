use std::io;

use cfgbus_config::SocketEndpoint;
use cfgbus_types::Envelope;
use cfgbus_types::frame::write_frame;
use tracing::debug;

use crate::transport::ConnectionStream;

use super::{NOTIFY_TARGET, Notifier, NotifyError};

/// Writes length-prefixed notification frames to a listening socket.
///
/// The connection is opened lazily and dropped on any failure; the next
/// notification reconnects. An endpoint nobody listens on swallows the
/// notification.
#[derive(Debug)]
pub struct SocketNotifier {
    endpoint: SocketEndpoint,
    stream: Option<ConnectionStream>,
}

impl SocketNotifier {
    /// Creates a notifier for `endpoint` without connecting.
    #[must_use]
    pub const fn new(endpoint: SocketEndpoint) -> Self {
        Self {
            endpoint,
            stream: None,
        }
    }

    fn connected(&mut self) -> Result<Option<&mut ConnectionStream>, NotifyError> {
        if self.stream.is_none() {
            match ConnectionStream::connect(&self.endpoint) {
                Ok(stream) => self.stream = Some(stream),
                Err(error) if is_absent_listener(&error) => {
                    debug!(
                        target: NOTIFY_TARGET,
                        endpoint = %self.endpoint,
                        "no notification listener"
                    );
                    return Ok(None);
                }
                Err(source) => {
                    return Err(NotifyError::Connect {
                        endpoint: self.endpoint.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(self.stream.as_mut())
    }
}

impl Notifier for SocketNotifier {
    fn notify(&mut self, envelope: &Envelope) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(envelope)?;
        let Some(stream) = self.connected()? else {
            return Ok(());
        };
        if let Err(error) = write_frame(stream, &payload) {
            self.stream = None;
            return Err(error.into());
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), NotifyError> {
        self.stream = None;
        Ok(())
    }
}

fn is_absent_listener(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}
