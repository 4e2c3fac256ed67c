//! Entry point for the `gpulse-host` binary.

use std::io::{self, Write};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match gpulse_host::run_host().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if error.is_user_facing() {
                writeln!(io::stderr(), "gpulse-host: {error}").ok();
            }
            error.exit_code()
        }
    }
}
