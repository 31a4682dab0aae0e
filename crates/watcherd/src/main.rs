//! Entry point for the `watcherd` daemon binary.

use std::process::ExitCode;

fn main() -> ExitCode {
    match watcherd::run_daemon() {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
