//! Control client for console servers: RPC connections, multicast, and the
//! `opcon` command-line binary.
//!
//! A [`ControlClient`] holds named [`ControlConnection`]s to datagram
//! endpoints. Sends are correlated by sequence number and always produce a
//! [`CommandReply`]; transport failures map onto client-local
//! [`ResponseCode`]s rather than surfacing as errors, so a monitoring script
//! can treat every outcome uniformly.

use std::ffi::OsString;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

mod cli;
mod client;
mod connection;
mod reply;

pub use client::{ControlClient, MulticastError, WILDCARD_GROUP};
pub use connection::{ConnectError, ControlConnection, QueryKind};
pub use reply::{CommandReply, ResponseCode};

/// Runs the `opcon` binary against the given arguments.
///
/// Prints the reply payload to stdout and maps the response code onto the
/// process exit code.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = cli::Cli::parse_from(args);
    let timeout = cli.timeout_ms.map(Duration::from_millis);

    let mut client = ControlClient::new();
    if let Err(error) = client.connect("target", &cli.target) {
        eprintln!("opcon: {error}");
        return ExitCode::FAILURE;
    }

    let reply = match cli.query {
        Some(query) => client.query("target", query.into(), timeout),
        None => {
            if cli.command.is_empty() {
                eprintln!("opcon: a command or --query is required");
                return ExitCode::FAILURE;
            }
            client.send("target", &cli.command.join(" "), timeout)
        }
    };

    if let Some(payload) = &reply.payload {
        print!("{payload}");
        if !payload.ends_with('\n') {
            println!();
        }
    }
    if !reply.code.is_success() {
        eprintln!("opcon: {}", reply.code);
    }
    ExitCode::from(exit_code(reply.code))
}

fn exit_code(code: ResponseCode) -> u8 {
    match code {
        ResponseCode::Succeeded => 0,
        ResponseCode::CommandNotFound => 1,
        ResponseCode::InvalidArgCount => 2,
        ResponseCode::TimedOut => 3,
        ResponseCode::SendFailed
        | ResponseCode::PollFailed
        | ResponseCode::ReceiveFailed
        | ResponseCode::NotConnected => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_remote_outcomes() {
        assert_eq!(exit_code(ResponseCode::Succeeded), 0);
        assert_eq!(exit_code(ResponseCode::CommandNotFound), 1);
        assert_eq!(exit_code(ResponseCode::InvalidArgCount), 2);
        assert_eq!(exit_code(ResponseCode::TimedOut), 3);
        assert_eq!(exit_code(ResponseCode::ReceiveFailed), 4);
    }
}
