//! Argument definitions for the `opcon` binary.

use clap::{Parser, ValueEnum};

use opcon_config::Endpoint;

use crate::connection::QueryKind;

/// Command-line control client for console servers.
#[derive(Parser, Debug)]
#[command(name = "opcon", disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Server endpoint, e.g. `udp://127.0.0.1:1976` or `local://tracer`.
    #[arg(long, value_name = "ENDPOINT")]
    pub(crate) target: Endpoint,
    /// Per-call timeout in milliseconds; `0` sends without waiting.
    #[arg(long, value_name = "MS")]
    pub(crate) timeout_ms: Option<u64>,
    /// Query a server property instead of sending a command.
    #[arg(long, value_enum, conflicts_with = "command")]
    pub(crate) query: Option<QueryArg>,
    /// The command line to send, tokens joined by single spaces.
    #[arg(
        value_name = "COMMAND",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) command: Vec<String>,
}

/// Queryable server properties exposed on the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum QueryArg {
    /// Protocol version.
    Version,
    /// Negotiated payload ceiling.
    PayloadSize,
    /// Logical server name.
    Name,
    /// Human-readable command listing.
    Commands,
    /// Machine-readable keyword list.
    Keywords,
    /// Session banner.
    Banner,
    /// Session title.
    Title,
    /// Interactive prompt string.
    Prompt,
}

impl From<QueryArg> for QueryKind {
    fn from(arg: QueryArg) -> Self {
        match arg {
            QueryArg::Version => Self::Version,
            QueryArg::PayloadSize => Self::PayloadSize,
            QueryArg::Name => Self::Name,
            QueryArg::Commands => Self::Commands,
            QueryArg::Keywords => Self::Keywords,
            QueryArg::Banner => Self::Banner,
            QueryArg::Title => Self::Title,
            QueryArg::Prompt => Self::Prompt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_command_invocation() {
        let cli = Cli::parse_from([
            "opcon",
            "--target",
            "udp://127.0.0.1:1976",
            "--timeout-ms",
            "250",
            "loglevel",
            "set",
            "3",
        ]);
        assert_eq!(cli.target, Endpoint::udp("127.0.0.1", 1976));
        assert_eq!(cli.timeout_ms, Some(250));
        assert_eq!(cli.command, vec!["loglevel", "set", "3"]);
        assert!(cli.query.is_none());
    }

    #[test]
    fn parses_a_query_invocation() {
        let cli = Cli::parse_from(["opcon", "--target", "local://tracer", "--query", "version"]);
        assert_eq!(cli.target, Endpoint::local("tracer"));
        assert_eq!(cli.query, Some(QueryArg::Version));
    }

    #[test]
    fn rejects_a_query_combined_with_a_command() {
        let outcome = Cli::try_parse_from([
            "opcon",
            "--target",
            "local://tracer",
            "--query",
            "banner",
            "status",
        ]);
        assert!(outcome.is_err());
    }
}
