//! Notifications delivered as ubus events.

use camino::Utf8PathBuf;
use cfgbus_types::Envelope;
use serde_json::{Map, Value};

use super::{UbusClient, object_name};
use crate::notify::{Notifier, NotifyError};

/// Sends each notification as event `cfgbus-<module>` over its own client
/// connection, separate from the connection serving calls.
#[derive(Debug)]
pub struct UbusNotifier {
    socket: Utf8PathBuf,
    client: Option<UbusClient>,
}

impl UbusNotifier {
    /// Builds a notifier for the ubusd socket at `socket`.
    #[must_use]
    pub const fn new(socket: Utf8PathBuf) -> Self {
        Self {
            socket,
            client: None,
        }
    }
}

/// Event payload: the notification's action and data.
fn event_payload(envelope: &Envelope) -> Value {
    let mut payload = Map::new();
    payload.insert("action".to_owned(), Value::String(envelope.action.clone()));
    if let Some(data) = &envelope.data {
        payload.insert("data".to_owned(), data.clone());
    }
    Value::Object(payload)
}

impl Notifier for UbusNotifier {
    fn notify(&mut self, envelope: &Envelope) -> Result<(), NotifyError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => UbusClient::connect(&self.socket)?,
        };
        client.send_event(&object_name(&envelope.module), &event_payload(envelope))?;
        self.client = Some(client);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), NotifyError> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::thread;

    use serde_json::json;

    use super::super::client::fake::FakeBus;
    use super::super::wire::{MessageType, attr};
    use super::*;

    #[test]
    fn payload_omits_missing_data() {
        let envelope = Envelope::notification("dns", "restarted", None);
        assert_eq!(event_payload(&envelope), json!({"action": "restarted"}));
    }

    #[test]
    fn sends_event_named_after_module() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("ubus.sock")).expect("utf8 path");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = thread::spawn(move || {
            let mut bus = FakeBus::accept(&listener, 3);
            let request = bus.read();
            bus.complete(&request, None, 0);
            request
        });

        let mut notifier = UbusNotifier::new(path);
        let envelope =
            Envelope::notification("dns", "update_settings", Some(json!({"dnssec_enabled": true})));
        notifier.notify(&envelope).expect("notify");

        let request = server.join().expect("server thread");
        assert_eq!(request.kind, MessageType::Invoke);
        assert_eq!(request.peer, 1);
        let attrs = request.attrs().expect("attrs");
        assert_eq!(attrs.string(attr::METHOD).expect("method"), "send");
        let data = attrs.table(attr::DATA).expect("data");
        assert_eq!(data["id"], json!("cfgbus-dns"));
        assert_eq!(
            data["data"],
            json!({"action": "update_settings", "data": {"dnssec_enabled": true}})
        );
    }

    #[test]
    fn unreachable_bus_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("missing.sock")).expect("utf8 path");
        let mut notifier = UbusNotifier::new(path);
        let error = notifier
            .notify(&Envelope::notification("dns", "x", None))
            .expect_err("no ubusd");
        assert!(matches!(error, NotifyError::Ubus(_)));
    }
}
