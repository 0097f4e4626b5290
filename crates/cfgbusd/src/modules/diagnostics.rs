//! Runs configured diagnostic programs under supervision.
//!
//! `run` and `run_batch` return a process id straight away; callers follow
//! progress with `poll` and receive a `finished` notification on exit.
//! `check` runs a program to completion within the request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::router::{ActionContext, ActionSpec, DataShape, HandlerError, Module, ModuleDeps};
use crate::supervisor::{
    AsyncCommand, AsyncMultipleCommands, CmdLine, CommandLaunch, LineHandler, MultipleLaunch,
    ProcessRecord,
};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const RUN_TIMEOUT: Duration = Duration::from_secs(300);

const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "run",
        mutating: false,
        request: Some(DataShape::new(&["command"], &[])),
        reply: DataShape::new(&["process_id"], &[]),
    },
    ActionSpec {
        name: "run_batch",
        mutating: false,
        request: Some(DataShape::new(&["commands"], &[])),
        reply: DataShape::new(&["process_id"], &[]),
    },
    ActionSpec {
        name: "poll",
        mutating: false,
        request: Some(DataShape::new(&["process_id"], &[])),
        reply: DataShape::new(&["records", "retval", "exited"], &[]),
    },
    ActionSpec {
        name: "check",
        mutating: false,
        request: Some(DataShape::new(&["command"], &[])),
        reply: DataShape::new(&["retval", "stdout"], &[]),
    },
];

fn default_commands() -> BTreeMap<String, Vec<String>> {
    [
        ("uptime", vec!["/usr/bin/uptime"]),
        ("addresses", vec!["/sbin/ip", "-json", "addr"]),
        ("routes", vec!["/sbin/ip", "-json", "route"]),
        ("kernel_log", vec!["/bin/dmesg"]),
    ]
    .into_iter()
    .map(|(name, args)| (name.to_owned(), args.into_iter().map(str::to_owned).collect()))
    .collect()
}

/// The `diagnostics` module.
#[derive(Debug)]
pub struct Diagnostics {
    commands: BTreeMap<String, Vec<String>>,
    single: AsyncCommand,
    batches: AsyncMultipleCommands,
    cmdline: CmdLine,
}

impl Diagnostics {
    /// Creates the module with the built-in command table.
    #[must_use]
    pub fn new(deps: &ModuleDeps) -> Self {
        let capacity = deps.config.process_buffer();
        let root = deps.config.cmdline_root().map(ToOwned::to_owned);
        Self {
            commands: default_commands(),
            single: AsyncCommand::new(capacity, root.clone()),
            batches: AsyncMultipleCommands::new(capacity, root.clone()),
            cmdline: CmdLine::new(root),
        }
    }

    /// Replaces the command table.
    #[must_use]
    pub fn with_commands(mut self, commands: BTreeMap<String, Vec<String>>) -> Self {
        self.commands = commands;
        self
    }

    fn command(&self, name: &str) -> Result<&[String], HandlerError> {
        self.commands
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| HandlerError::invalid_data(format!("unknown command '{name}'")))
    }

    fn run(&self, data: &Value, ctx: &ActionContext) -> Result<Value, HandlerError> {
        let args = self.command(string_field(data, "command")?)?;
        let lines = LineHandler::new(".*", |captures, record| {
            let line = captures.get(0).map_or("", |found| found.as_str());
            record.append(json!({ "line": line }));
        })?;
        let finished = ctx.notifier();
        let reconnect = ctx.notifier();
        let launch = CommandLaunch::new(args.iter().cloned())
            .line_handler(lines)
            .on_exit(move |record| finished.notify("finished", Some(exit_summary(record))))
            .reconnect(move || reconnect.reset())
            .timeout(RUN_TIMEOUT);
        let process_id = self.single.start(launch)?;
        Ok(json!({ "process_id": process_id }))
    }

    fn run_batch(&self, data: &Value, ctx: &ActionContext) -> Result<Value, HandlerError> {
        let names = data
            .get("commands")
            .and_then(Value::as_array)
            .ok_or_else(|| HandlerError::invalid_data("commands must be a list"))?;
        let mut commands = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| HandlerError::invalid_data("command names must be strings"))?;
            commands.push(self.command(name)?.to_vec());
        }
        let finished = ctx.notifier();
        let reconnect = ctx.notifier();
        let launch = MultipleLaunch::new(commands, |record, index, result| {
            record.append(json!({ "index": index, "result": result }));
        })
        .on_exit(move |record| finished.notify("finished", Some(exit_summary(record))))
        .reconnect(move || reconnect.reset());
        let process_id = self.batches.start(launch)?;
        Ok(json!({ "process_id": process_id }))
    }

    fn poll(&self, data: &Value) -> Result<Value, HandlerError> {
        let id = string_field(data, "process_id")?;
        let snapshot = self
            .single
            .poll(id)
            .or_else(|| self.batches.poll(id))
            .ok_or_else(|| HandlerError::failed(format!("unknown process id '{id}'")))?;
        Ok(json!({
            "records": snapshot.records,
            "retval": snapshot.retval,
            "exited": snapshot.exited,
        }))
    }

    fn check(&self, data: &Value) -> Result<Value, HandlerError> {
        let args = self.command(string_field(data, "command")?)?;
        let output = self.cmdline.run_command(args, Some(CHECK_TIMEOUT))?;
        Ok(json!({ "retval": output.retval, "stdout": output.stdout }))
    }
}

fn string_field<'a>(data: &'a Value, key: &str) -> Result<&'a str, HandlerError> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::invalid_data(format!("{key} must be a string")))
}

fn exit_summary(record: &ProcessRecord) -> Value {
    let snapshot = record.snapshot();
    json!({ "process_id": snapshot.id, "retval": snapshot.retval })
}

/// Registers [`Diagnostics`].
pub fn factory(deps: &ModuleDeps) -> Arc<dyn Module> {
    Arc::new(Diagnostics::new(deps))
}

impl Module for Diagnostics {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    fn actions(&self) -> &'static [ActionSpec] {
        ACTIONS
    }

    fn handle(
        &self,
        action: &str,
        data: Option<Value>,
        ctx: &ActionContext,
    ) -> Result<Value, HandlerError> {
        let data = data.unwrap_or(Value::Null);
        match action {
            "run" => self.run(&data, ctx),
            "run_batch" => self.run_batch(&data, ctx),
            "poll" => self.poll(&data),
            "check" => self.check(&data),
            other => Err(HandlerError::failed(format!("unsupported action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use cfgbus_config::{Config, LockBackend};
    use cfgbus_types::Envelope;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::notify::NotificationSender;
    use crate::sync::RwLock;
    use crate::transport::wait_until;

    fn shell(script: &str) -> Vec<String> {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    #[fixture]
    fn diagnostics() -> Diagnostics {
        let deps = ModuleDeps {
            config: Arc::new(Config::default()),
            lock: RwLock::new(LockBackend::Thread).expect("thread lock"),
        };
        let commands = [
            ("lines", shell("printf 'one\\ntwo\\nthree\\n'")),
            ("good_json", shell("echo '{\"ok\": true}'")),
            ("bad_exit", shell("echo '{\"ok\": false}'; exit 3")),
            ("status", shell("echo up; exit 2")),
        ]
        .into_iter()
        .map(|(name, args)| (name.to_owned(), args))
        .collect();
        Diagnostics::new(&deps).with_commands(commands)
    }

    fn context() -> (ActionContext, Receiver<Envelope>) {
        let (sender, notifications) = NotificationSender::capture();
        (ActionContext::new("diagnostics", sender), notifications)
    }

    fn poll_until_exited(diagnostics: &Diagnostics, ctx: &ActionContext, id: &Value) -> Value {
        let request = json!({ "process_id": id });
        let mut last = Value::Null;
        let exited = wait_until(|| {
            last = diagnostics
                .handle("poll", Some(request.clone()), ctx)
                .expect("poll");
            last["exited"] == json!(true)
        });
        assert!(exited, "command should exit: {last}");
        last
    }

    #[rstest]
    fn run_records_every_line(diagnostics: Diagnostics) {
        let (ctx, notifications) = context();
        let reply = diagnostics
            .handle("run", Some(json!({"command": "lines"})), &ctx)
            .expect("run");
        let id = reply["process_id"].clone();

        let state = poll_until_exited(&diagnostics, &ctx, &id);
        assert_eq!(
            state["records"],
            json!([{"line": "one"}, {"line": "two"}, {"line": "three"}])
        );
        assert_eq!(state["retval"], json!(0));

        let finished = notifications
            .recv_timeout(Duration::from_secs(2))
            .expect("finished notification");
        assert_eq!(finished.action, "finished");
        assert_eq!(finished.data, Some(json!({"process_id": id, "retval": 0})));
    }

    #[rstest]
    fn batch_delivers_successful_results_only(diagnostics: Diagnostics) {
        let (ctx, _notifications) = context();
        let reply = diagnostics
            .handle("run_batch", Some(json!({"commands": ["good_json", "bad_exit"]})), &ctx)
            .expect("run batch");
        let state = poll_until_exited(&diagnostics, &ctx, &reply["process_id"]);
        assert_eq!(state["retval"], json!(3));
        assert_eq!(state["records"], json!([{"index": 0, "result": {"ok": true}}]));
    }

    #[rstest]
    fn check_runs_to_completion(diagnostics: Diagnostics) {
        let (ctx, _notifications) = context();
        let reply = diagnostics
            .handle("check", Some(json!({"command": "status"})), &ctx)
            .expect("check");
        assert_eq!(reply, json!({"retval": 2, "stdout": "up\n"}));
    }

    #[rstest]
    #[case::unknown_command("run", json!({"command": "format_disk"}))]
    #[case::unknown_batch_member("run_batch", json!({"commands": ["lines", "nope"]}))]
    #[case::non_string_member("run_batch", json!({"commands": [1]}))]
    fn unknown_commands_are_invalid(
        diagnostics: Diagnostics,
        #[case] action: &str,
        #[case] data: Value,
    ) {
        let (ctx, _notifications) = context();
        let error = diagnostics
            .handle(action, Some(data), &ctx)
            .expect_err("command must be configured");
        assert!(matches!(error, HandlerError::InvalidData(_)));
    }

    #[rstest]
    fn polling_unknown_ids_fails(diagnostics: Diagnostics) {
        let (ctx, _notifications) = context();
        let error = diagnostics
            .handle("poll", Some(json!({"process_id": "0".repeat(32)})), &ctx)
            .expect_err("unknown id");
        assert!(matches!(error, HandlerError::Failed(_)));
    }
}
