//! Entrypoint for the `opcon` control binary.

use std::process::ExitCode;

fn main() -> ExitCode {
    opcon_client::run(std::env::args_os())
}
