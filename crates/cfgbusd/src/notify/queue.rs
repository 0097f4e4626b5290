use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use cfgbus_types::Envelope;
use serde_json::Value;
use tracing::{debug, warn};

use super::{NOTIFY_TARGET, Notifier, NotifyError};

#[derive(Debug)]
enum QueueMessage {
    Notify(Envelope),
    Reset,
    Stop,
}

#[derive(Debug, Clone)]
enum Route {
    Queue(Sender<QueueMessage>),
    Discard,
    #[cfg(test)]
    Capture(Sender<Envelope>),
}

/// Cloneable handle used by handlers to enqueue notifications.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    route: Route,
}

impl NotificationSender {
    /// Returns a sender that drops every notification.
    #[must_use]
    pub const fn discard() -> Self {
        Self {
            route: Route::Discard,
        }
    }

    /// Returns a sender that hands envelopes straight to the returned
    /// receiver.
    #[cfg(test)]
    pub(crate) fn capture() -> (Self, Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                route: Route::Capture(sender),
            },
            receiver,
        )
    }

    /// Enqueues `{module, action: event, kind: notification, data}`.
    pub fn notify(&self, module: &str, event: &str, data: Option<Value>) {
        let envelope = Envelope::notification(module, event, data);
        match &self.route {
            Route::Queue(sender) => {
                if sender.send(QueueMessage::Notify(envelope)).is_err() {
                    debug!(target: NOTIFY_TARGET, module, event, "notification queue closed");
                }
            }
            Route::Discard => {}
            #[cfg(test)]
            Route::Capture(sender) => {
                // Tests may drop the receiver when they ignore notifications.
                let _ = sender.send(envelope);
            }
        }
    }

    /// Asks the queue thread to reopen the notifier connection.
    pub fn reset(&self) {
        if let Route::Queue(sender) = &self.route {
            if sender.send(QueueMessage::Reset).is_err() {
                debug!(target: NOTIFY_TARGET, "notification queue closed before reset");
            }
        }
    }
}

/// Thread draining queued notifications into a [`Notifier`].
#[derive(Debug)]
pub struct NotificationQueue {
    sender: Sender<QueueMessage>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationQueue {
    /// Starts the queue thread.
    pub fn start(notifier: Box<dyn Notifier>) -> Result<Self, NotifyError> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("cfgbus-notify".to_owned())
            .spawn(move || drain(notifier, &receiver))
            .map_err(NotifyError::Thread)?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Returns a handle that enqueues onto this queue.
    #[must_use]
    pub fn sender(&self) -> NotificationSender {
        NotificationSender {
            route: Route::Queue(self.sender.clone()),
        }
    }

    /// Delivers everything already queued, then stops the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // The thread may already have exited after a panic; join reports it.
        let _ = self.sender.send(QueueMessage::Stop);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!(target: NOTIFY_TARGET, "notification thread panicked");
        }
    }
}

impl Drop for NotificationQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain(mut notifier: Box<dyn Notifier>, receiver: &Receiver<QueueMessage>) {
    while let Ok(message) = receiver.recv() {
        let outcome = match message {
            QueueMessage::Notify(envelope) => notifier.notify(&envelope),
            QueueMessage::Reset => notifier.reset(),
            QueueMessage::Stop => break,
        };
        if let Err(error) = outcome {
            warn!(target: NOTIFY_TARGET, %error, "notification dropped");
        }
    }
    debug!(target: NOTIFY_TARGET, "notification queue stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mockall::Sequence;
    use serde_json::json;

    use super::*;
    use crate::notify::MockNotifier;

    #[test]
    fn delivers_in_order_before_stopping() {
        let mut notifier = MockNotifier::new();
        let mut sequence = Sequence::new();
        for action in ["first", "second"] {
            notifier
                .expect_notify()
                .withf(move |envelope| envelope.action == action)
                .times(1)
                .in_sequence(&mut sequence)
                .returning(|_| Ok(()));
        }

        let queue = NotificationQueue::start(Box::new(notifier)).expect("start queue");
        let sender = queue.sender();
        sender.notify("dns", "first", None);
        sender.notify("dns", "second", Some(json!({"a": 1})));
        queue.shutdown();
    }

    #[test]
    fn notifier_errors_do_not_stop_the_queue() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&delivered);
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(2).returning(move |envelope| {
            let mut seen = seen.lock().expect("lock");
            seen.push(envelope.action.clone());
            if seen.len() == 1 {
                Err(NotifyError::Thread(std::io::Error::other("broken")))
            } else {
                Ok(())
            }
        });

        let queue = NotificationQueue::start(Box::new(notifier)).expect("start queue");
        let sender = queue.sender();
        sender.notify("dns", "a", None);
        sender.notify("dns", "b", None);
        queue.shutdown();

        assert_eq!(*delivered.lock().expect("lock"), ["a", "b"]);
    }

    #[test]
    fn reset_reaches_the_notifier() {
        let mut notifier = MockNotifier::new();
        notifier.expect_reset().times(1).returning(|| Ok(()));
        let queue = NotificationQueue::start(Box::new(notifier)).expect("start queue");
        queue.sender().reset();
        queue.shutdown();
    }

    #[test]
    fn sending_after_shutdown_is_silent() {
        let queue = NotificationQueue::start(Box::new(MockNotifier::new())).expect("start queue");
        let sender = queue.sender();
        queue.shutdown();
        sender.notify("dns", "late", None);
    }
}
