//! Behavioural tests for launching and stopping the daemon on the socket bus.

use std::cell::RefCell;
use std::fs;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cfgbus_config::BusKind;
use cfgbus_types::frame::{MAX_FRAME_BYTES, read_frame, write_frame};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};

use crate::bootstrap::ConfigLoader;
use crate::health::HealthReporter;
use crate::modules::BUILTIN;
use crate::process::LaunchError;
use crate::process::launch::{LaunchPlan, run_daemon_with};
use crate::transport::wait_until;

use super::support::{
    FailingConfigLoader, HealthEvent, RecordingHealthReporter, TestConfigLoader,
    TestShutdownSignal,
};

type StepResult = Result<(), String>;

struct LifecycleWorld {
    loader: TestConfigLoader,
    failing: bool,
    reporter: Arc<RecordingHealthReporter>,
    shutdown: TestShutdownSignal,
    notifications: Option<UnixListener>,
    handle: Option<JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    replies: Vec<Value>,
}

impl LifecycleWorld {
    fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            failing: false,
            reporter: Arc::new(RecordingHealthReporter::default()),
            shutdown: TestShutdownSignal::default(),
            notifications: None,
            handle: None,
            result: None,
            replies: Vec::new(),
        }
    }

    fn start(&mut self) {
        let reporter = Arc::clone(&self.reporter) as Arc<dyn HealthReporter>;
        let shutdown = self.shutdown.clone();
        self.handle = Some(if self.failing {
            spawn(FailingConfigLoader, shutdown, reporter)
        } else {
            spawn(self.loader.clone(), shutdown, reporter)
        });
    }

    fn request(&mut self, request: &Value) -> StepResult {
        let mut stream = UnixStream::connect(self.loader.daemon_socket())
            .map_err(|error| format!("connect to daemon socket: {error}"))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .map_err(|error| error.to_string())?;
        let payload = serde_json::to_vec(request).map_err(|error| error.to_string())?;
        write_frame(&mut stream, &payload).map_err(|error| error.to_string())?;
        let reply = read_frame(&mut stream, MAX_FRAME_BYTES)
            .map_err(|error| error.to_string())?
            .ok_or("daemon closed the connection without replying")?;
        let reply = serde_json::from_slice(&reply).map_err(|error| error.to_string())?;
        self.replies.push(reply);
        Ok(())
    }

    fn join(&mut self) -> StepResult {
        let handle = self.handle.take().ok_or("daemon was not started")?;
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_owned())?;
        self.result = Some(result);
        Ok(())
    }
}

impl Drop for LifecycleWorld {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn spawn<L>(
    loader: L,
    shutdown: TestShutdownSignal,
    reporter: Arc<dyn HealthReporter>,
) -> JoinHandle<Result<(), LaunchError>>
where
    L: ConfigLoader + 'static,
{
    thread::spawn(move || {
        run_daemon_with(LaunchPlan {
            loader,
            shutdown,
            reporter,
            factories: BUILTIN,
        })
    })
}

#[fixture]
fn world() -> RefCell<LifecycleWorld> {
    RefCell::new(LifecycleWorld::new())
}

#[given("a daemon configured for the unix socket bus")]
fn given_socket_daemon(world: &RefCell<LifecycleWorld>) {
    world.borrow_mut().failing = false;
}

#[given("a daemon with an invalid configuration")]
fn given_invalid_daemon(world: &RefCell<LifecycleWorld>) {
    world.borrow_mut().failing = true;
}

#[given("a client listening for notifications")]
fn given_notification_listener(world: &RefCell<LifecycleWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    let path = world.loader.notification_socket();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| error.to_string())?;
    }
    let listener = UnixListener::bind(&path).map_err(|error| error.to_string())?;
    world.notifications = Some(listener);
    Ok(())
}

#[when("the daemon starts")]
fn when_daemon_starts(world: &RefCell<LifecycleWorld>) {
    world.borrow_mut().start();
}

#[when("the listener becomes ready")]
fn when_listener_ready(world: &RefCell<LifecycleWorld>) -> StepResult {
    let reporter = Arc::clone(&world.borrow().reporter);
    if wait_until(|| RecordingHealthReporter::listener_ready(&reporter)) {
        Ok(())
    } else {
        Err(format!("listener never became ready: {:?}", reporter.events()))
    }
}

#[when("an echo request is sent over the daemon socket")]
fn when_echo_request(world: &RefCell<LifecycleWorld>) -> StepResult {
    world.borrow_mut().request(&json!({
        "module": "echo",
        "action": "echo",
        "kind": "request",
        "data": {"request_msg": {"hello": "router"}},
    }))
}

#[when("the dns settings are updated over the daemon socket")]
fn when_dns_update(world: &RefCell<LifecycleWorld>) -> StepResult {
    world.borrow_mut().request(&json!({
        "module": "dns",
        "action": "update_settings",
        "kind": "request",
        "data": {
            "forwarding_enabled": false,
            "dnssec_enabled": true,
            "dns_from_dhcp_enabled": true,
        },
    }))
}

#[when("shutdown is triggered")]
fn when_shutdown(world: &RefCell<LifecycleWorld>) {
    world.borrow().shutdown.trigger();
}

#[when("the daemon run completes")]
fn when_run_completes(world: &RefCell<LifecycleWorld>) -> StepResult {
    world.borrow_mut().join()
}

#[then("the echo reply carries the message back")]
fn then_echo_reply(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let reply = world.replies.first().expect("a reply should be recorded");
    assert_eq!(
        reply,
        &json!({
            "module": "echo",
            "action": "echo",
            "kind": "reply",
            "data": {"reply_msg": {"hello": "router"}},
        })
    );
}

#[then("the notification client receives the dns update")]
fn then_notification_received(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let listener = world
        .notifications
        .as_ref()
        .expect("notification listener should be bound");
    let (mut stream, _) = listener.accept().expect("notifier should connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let frame = read_frame(&mut stream, MAX_FRAME_BYTES)
        .expect("read notification")
        .expect("notification frame");
    let notification: Value = serde_json::from_slice(&frame).expect("notification json");
    assert_eq!(notification["module"], "dns");
    assert_eq!(notification["action"], "update_settings");
    assert_eq!(notification["kind"], "notification");
    assert_eq!(notification["data"]["dns_from_dhcp_enabled"], true);
}

#[then("the daemon run succeeds")]
fn then_run_succeeds(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(result.is_ok(), "daemon run should succeed: {result:?}");
}

#[then("the daemon run fails during bootstrap")]
fn then_run_fails(world: &RefCell<LifecycleWorld>) {
    let world = world.borrow();
    let result = world.result.as_ref().expect("daemon result recorded");
    assert!(
        matches!(result, Err(LaunchError::Bootstrap { .. })),
        "expected a bootstrap failure, got {result:?}"
    );
}

#[then("the daemon socket is removed")]
fn then_socket_removed(world: &RefCell<LifecycleWorld>) {
    let path = world.borrow().loader.daemon_socket();
    assert!(!path.exists(), "socket {} should be removed", path.display());
}

#[then("the reporter saw the listener start and stop")]
fn then_listener_lifecycle(world: &RefCell<LifecycleWorld>) {
    let events = world.borrow().reporter.events();
    assert_eq!(
        events,
        vec![
            HealthEvent::BootstrapStarting,
            HealthEvent::BootstrapSucceeded,
            HealthEvent::ListenerReady {
                bus: BusKind::UnixSocket,
                modules: BUILTIN.len(),
            },
            HealthEvent::ListenerStopped(BusKind::UnixSocket),
        ]
    );
}

#[then("the reporter saw the bootstrap fail")]
fn then_bootstrap_failed(world: &RefCell<LifecycleWorld>) {
    let events = world.borrow().reporter.events();
    assert!(
        matches!(events.as_slice(), [HealthEvent::BootstrapStarting, HealthEvent::BootstrapFailed(_)]),
        "unexpected events: {events:?}"
    );
}

#[scenario(path = "tests/features/daemon_lifecycle.feature")]
fn daemon_lifecycle(#[from(world)] world: RefCell<LifecycleWorld>) {
    drop(world);
}
