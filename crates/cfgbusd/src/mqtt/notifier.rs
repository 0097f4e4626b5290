//! Notifications published to the broker.

use cfgbus_types::Envelope;
use rumqttc::{Client, QoS};

use super::Topics;
use crate::notify::{Notifier, NotifyError};
use crate::router::encode;

/// Publishes each notification at QoS 0 on its module's notification topic.
#[derive(Clone)]
pub struct MqttNotifier {
    client: Client,
    topics: Topics,
}

impl std::fmt::Debug for MqttNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttNotifier")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl MqttNotifier {
    /// Builds a notifier publishing through `client`.
    #[must_use]
    pub const fn new(client: Client, topics: Topics) -> Self {
        Self { client, topics }
    }
}

/// Topic and payload of the publication announcing `envelope`.
fn publication(topics: &Topics, envelope: &Envelope) -> (String, Vec<u8>) {
    (
        topics.notification(&envelope.module, &envelope.action),
        encode(envelope),
    )
}

impl Notifier for MqttNotifier {
    fn notify(&mut self, envelope: &Envelope) -> Result<(), NotifyError> {
        let (topic, payload) = publication(&self.topics, envelope);
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|error| NotifyError::Publish(error.into()))
    }

    /// The broker connection reconnects on its own.
    fn reset(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::MqttOptions;
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn publication_targets_notification_topic() {
        let envelope = Envelope::notification("dns", "update_settings", Some(json!({"a": 1})));
        let (topic, payload) = publication(&Topics::new("ctl"), &envelope);
        assert_eq!(topic, "cfgbus/ctl/notification/dns/action/update_settings");
        let body: Value = serde_json::from_slice(&payload).expect("json payload");
        assert_eq!(body["kind"], json!("notification"));
        assert_eq!(body["data"], json!({"a": 1}));
    }

    #[test]
    fn full_request_queue_is_reported() {
        let (client, _connection) = Client::new(MqttOptions::new("test", "localhost", 1883), 1);
        let mut notifier = MqttNotifier::new(client, Topics::new("ctl"));
        let envelope = Envelope::notification("dns", "restarted", None);
        notifier.notify(&envelope).expect("first publish fits");
        let error = notifier.notify(&envelope).expect_err("queue is full");
        assert!(matches!(error, NotifyError::Publish(_)));
    }
}
