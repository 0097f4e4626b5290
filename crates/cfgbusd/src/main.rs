use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match cfgbusd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "cfgbusd: {error}");
            ExitCode::FAILURE
        }
    }
}
