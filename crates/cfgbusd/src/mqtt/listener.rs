//! Broker event loop dispatching request publications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use cfgbus_config::Config;
use cfgbus_types::Envelope;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{MQTT_TARGET, MqttNotifier, PubSubError, Topics};
use crate::router::{Router, encode};

const REQUEST_CAPACITY: usize = 64;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// A configured, not yet running, broker connection.
pub struct MqttSession {
    client: Client,
    connection: Connection,
    topics: Topics,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("topics", &self.topics)
            .finish_non_exhaustive()
    }
}

impl MqttSession {
    /// Prepares a client for the broker named in `config`.
    #[must_use]
    pub fn open(config: &Config) -> Self {
        let client_id = format!("cfgbusd-{}", config.mqtt_controller_id());
        let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(KEEP_ALIVE);
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        Self {
            client,
            connection,
            topics: Topics::new(config.mqtt_controller_id()),
        }
    }

    /// Notifier publishing through this session's client.
    #[must_use]
    pub fn notifier(&self) -> MqttNotifier {
        MqttNotifier::new(self.client.clone(), self.topics.clone())
    }

    /// Runs the event loop on a background thread.
    pub fn start(self, router: Arc<Router>) -> Result<MqttHandle, PubSubError> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let client = self.client.clone();
        let handle = thread::Builder::new()
            .name("cfgbus-mqtt".to_owned())
            .spawn(move || self.run(&router, &flag))
            .map_err(|source| PubSubError::Thread { source })?;
        Ok(MqttHandle {
            client,
            stop,
            handle: Some(handle),
        })
    }

    fn run(mut self, router: &Router, stop: &AtomicBool) {
        let filters: Vec<String> = router
            .registry()
            .module_names()
            .map(|module| self.topics.request_filter(module))
            .collect();
        let mut last_error = None::<String>;
        for event in self.connection.iter() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    last_error = None;
                    info!(target: MQTT_TARGET, subscriptions = filters.len(), "connected to broker");
                    for filter in &filters {
                        if let Err(error) = self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                            warn!(target: MQTT_TARGET, %filter, %error, "subscription failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some((topic, payload)) =
                        handle_publish(router, &self.topics, &publish.topic, &publish.payload)
                    else {
                        continue;
                    };
                    if let Err(error) = self.client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
                        warn!(target: MQTT_TARGET, %error, "reply dropped");
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    let message = error.to_string();
                    if last_error.as_deref() != Some(message.as_str()) {
                        warn!(target: MQTT_TARGET, error = %message, "broker connection error");
                    }
                    last_error = Some(message);
                    thread::sleep(RECONNECT_BACKOFF);
                }
            }
        }
        info!(target: MQTT_TARGET, "MQTT event loop stopped");
    }
}

/// Dispatches one request publication and returns the reply topic and
/// payload. Publications that are not requests yield `None`.
#[must_use]
pub fn handle_publish(
    router: &Router,
    topics: &Topics,
    topic: &str,
    payload: &[u8],
) -> Option<(String, Vec<u8>)> {
    let Some((module, action)) = topics.parse_request(topic) else {
        warn!(target: MQTT_TARGET, topic, "ignoring publication on unexpected topic");
        return None;
    };
    let body = match serde_json::from_slice::<Value>(payload) {
        Ok(body) => body,
        Err(error) => {
            warn!(target: MQTT_TARGET, topic, %error, "ignoring request that is not JSON");
            return None;
        }
    };
    let Some(reply_msg_id) = body.get("reply_msg_id").and_then(Value::as_str) else {
        warn!(target: MQTT_TARGET, topic, "ignoring request without reply_msg_id");
        return None;
    };
    debug!(target: MQTT_TARGET, module, action, reply_msg_id, "handling request");
    let request = Envelope::request(module, action, body.get("data").cloned());
    let reply = router.dispatch(&request.to_value());
    Some((topics.reply(reply_msg_id), encode(&reply)))
}

/// Handle to the running event loop.
pub struct MqttHandle {
    client: Client,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for MqttHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttHandle")
            .field("stop", &self.stop)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl MqttHandle {
    /// Stops the event loop and disconnects from the broker.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(error) = self.client.try_disconnect() {
            debug!(target: MQTT_TARGET, %error, "disconnect request not queued");
        }
    }

    /// Waits for the event loop thread to exit.
    pub fn join(mut self) -> Result<(), PubSubError> {
        match self.handle.take().map(thread::JoinHandle::join) {
            Some(Err(_)) => Err(PubSubError::ThreadPanic),
            Some(Ok(())) | None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cfgbus_types::{INCORRECT_INPUT, MessageKind};
    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::notify::NotificationSender;
    use crate::router::{
        ActionContext, ActionSpec, DataShape, HandlerError, Module, ModuleRegistry,
    };

    struct Settings;

    const SETTINGS_ACTIONS: &[ActionSpec] = &[ActionSpec {
        name: "get_settings",
        mutating: false,
        request: None,
        reply: DataShape::new(&["enabled"], &[]),
    }];

    impl Module for Settings {
        fn name(&self) -> &'static str {
            "dns"
        }

        fn actions(&self) -> &'static [ActionSpec] {
            SETTINGS_ACTIONS
        }

        fn handle(
            &self,
            _action: &str,
            _data: Option<Value>,
            _ctx: &ActionContext,
        ) -> Result<Value, HandlerError> {
            Ok(json!({"enabled": true}))
        }
    }

    #[fixture]
    fn router() -> Router {
        let mut registry = ModuleRegistry::default();
        registry.register(Arc::new(Settings));
        Router::new(registry, NotificationSender::discard())
    }

    #[fixture]
    fn topics() -> Topics {
        Topics::new("ctl")
    }

    fn decode(payload: &[u8]) -> Envelope {
        serde_json::from_slice(payload).expect("reply envelope")
    }

    #[rstest]
    fn replies_on_reply_topic(router: Router, topics: Topics) {
        let (topic, payload) = handle_publish(
            &router,
            &topics,
            "cfgbus/ctl/request/dns/action/get_settings",
            br#"{"reply_msg_id": "r-1"}"#,
        )
        .expect("reply");
        assert_eq!(topic, "cfgbus/ctl/reply/r-1");
        let reply = decode(&payload);
        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.data, Some(json!({"enabled": true})));
    }

    #[rstest]
    fn unknown_actions_reply_with_errors(router: Router, topics: Topics) {
        let (_, payload) = handle_publish(
            &router,
            &topics,
            "cfgbus/ctl/request/dns/action/reboot",
            br#"{"reply_msg_id": "r-2", "data": {}}"#,
        )
        .expect("reply");
        let reply = decode(&payload);
        assert_eq!(reply.action, "reboot");
        assert_eq!(reply.first_error().expect("error").description, INCORRECT_INPUT);
    }

    #[rstest]
    #[case::foreign_topic("cfgbus/other/request/dns/action/get_settings", r#"{"reply_msg_id": "x"}"#)]
    #[case::missing_reply_id("cfgbus/ctl/request/dns/action/get_settings", r#"{"data": {}}"#)]
    #[case::not_json("cfgbus/ctl/request/dns/action/get_settings", "garbage")]
    fn unanswerable_publications_are_dropped(
        router: Router,
        topics: Topics,
        #[case] topic: &str,
        #[case] payload: &str,
    ) {
        assert!(handle_publish(&router, &topics, topic, payload.as_bytes()).is_none());
    }
}
