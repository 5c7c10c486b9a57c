//! Embeddable operator console for long-running processes.
//!
//! A host process builds a [`ConsoleServer`], registers
//! [`CommandDescriptor`]s against it, and runs one of three session engines:
//!
//! - a **datagram** engine (UDP or a filesystem-backed datagram socket)
//!   serving stateless request/response frames from any number of remote
//!   senders, correlated purely by sequence number;
//! - a **stream** engine accepting one interactive TCP connection at a time,
//!   with an idle timeout and a line-oriented prompt;
//! - a **direct** engine running the same prompt loop against the hosting
//!   process's own interactive channel, with no transport at all.
//!
//! Dispatch is strictly sequential within a server instance: no command ever
//! runs concurrently with another on the same server, so callbacks may touch
//! process-wide state without extra locking.
//!
//! The engines can run on the calling thread ([`ConsoleServer::run`]) or on a
//! dedicated worker ([`ConsoleServer::spawn`]).

mod bind;
mod dispatch;
mod session;
pub mod telemetry;

pub use bind::BindError;
pub use dispatch::{
    CommandCallback, CommandDescriptor, DispatchOutcome, DispatchTable, OutputSink, RegisterError,
    Resolution,
};
pub use session::{
    ConsoleServer, LineEditor, LineEvent, ServerError, ServerHandle, ServerOptions,
    StdioLineEditor,
};
