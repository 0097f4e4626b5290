//! Child process construction shared by every command helper.

use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::SUPERVISOR_TARGET;
use super::errors::SupervisorError;

const WAIT_POLL: Duration = Duration::from_millis(50);
const SIGNAL_EXIT_BASE: i32 = 128;

/// Rewrites an absolute program path so it lives below `root`.
///
/// Relative programs are resolved through `PATH` and stay untouched.
#[must_use]
pub fn inject_root(root: Option<&Utf8Path>, program: &str) -> String {
    match root {
        Some(root) if program.starts_with('/') => {
            let mut joined = Utf8PathBuf::from(root);
            joined.push(program.trim_start_matches('/'));
            joined.into_string()
        }
        _ => program.to_owned(),
    }
}

/// Builds a command for `args` with root injection and death-signal setup.
///
/// The child leads its own process group so a timeout kill also reaches
/// anything it forked.
pub(crate) fn build_command(
    root: Option<&Utf8Path>,
    args: &[String],
) -> Result<(String, Command), SupervisorError> {
    let (program, rest) = args.split_first().ok_or(SupervisorError::EmptyCommand)?;
    let program = inject_root(root, program);
    let mut command = Command::new(&program);
    command
        .args(rest)
        .env("PYTHONUNBUFFERED", "1")
        .process_group(0);
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `set_pdeathsig` is a single async-signal-safe prctl call.
        unsafe {
            command.pre_exec(|| {
                nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
                    .map_err(io::Error::from)
            });
        }
    }
    Ok((program, command))
}

/// Maps an exit status to a shell-style code; signals become `128 + signal`.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| SIGNAL_EXIT_BASE + signal))
        .unwrap_or(-1)
}

/// Result of [`wait_with_deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Exit {
    pub(crate) code: i32,
    pub(crate) timed_out: bool,
}

/// Waits for `child`, killing it once `timeout` elapses.
pub(crate) fn wait_with_deadline(
    child: &mut Child,
    program: &str,
    timeout: Option<Duration>,
) -> io::Result<Exit> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Exit {
                code: exit_code(status),
                timed_out: false,
            });
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(
                target: SUPERVISOR_TARGET,
                program,
                timeout_ms = timeout.map_or(0, |t| t.as_millis()),
                "command exceeded its time limit, killing it"
            );
            if let Err(error) = kill_group(child) {
                warn!(target: SUPERVISOR_TARGET, program, %error, "failed to kill command");
            }
            let status = child.wait()?;
            return Ok(Exit {
                code: exit_code(status),
                timed_out: true,
            });
        }
        thread::sleep(WAIT_POLL);
    }
}

fn kill_group(child: &mut Child) -> io::Result<()> {
    let Ok(pid) = i32::try_from(child.id()) else {
        return child.kill();
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(error) => {
            debug!(target: SUPERVISOR_TARGET, pid, %error, "process group kill failed, killing child only");
            child.kill()
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::absolute(Some("/tmp/root"), "/usr/bin/ip", "/tmp/root/usr/bin/ip")]
    #[case::relative(Some("/tmp/root"), "ip", "ip")]
    #[case::no_root(None, "/usr/bin/ip", "/usr/bin/ip")]
    fn injects_root_only_for_absolute_paths(
        #[case] root: Option<&str>,
        #[case] program: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(inject_root(root.map(Utf8Path::new), program), expected);
    }

    #[test]
    fn empty_command_is_rejected() {
        let error = build_command(None, &[]).expect_err("empty command");
        assert!(matches!(error, SupervisorError::EmptyCommand));
    }

    #[test]
    fn timeout_kills_with_signal_code() {
        let (program, mut command) =
            build_command(None, &["sleep".to_owned(), "5".to_owned()]).expect("command");
        let mut child = command.spawn().expect("spawn sleep");
        let exit = wait_with_deadline(&mut child, &program, Some(Duration::from_millis(100)))
            .expect("wait");
        assert!(exit.timed_out);
        assert_eq!(exit.code, 137);
    }

    #[test]
    fn timeout_kill_reaches_forked_children() {
        let args = ["sh", "-c", "sleep 3; echo late"].map(str::to_owned);
        let (program, mut command) = build_command(None, &args).expect("command");
        let mut child = command
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let mut stdout = child.stdout.take().expect("stdout pipe");
        let started = Instant::now();
        let exit = wait_with_deadline(&mut child, &program, Some(Duration::from_millis(100)))
            .expect("wait");
        let mut output = String::new();
        io::Read::read_to_string(&mut stdout, &mut output).expect("read to eof");

        assert!(exit.timed_out);
        assert!(output.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
