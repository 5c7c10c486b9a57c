//! Single-session interactive engine over a TCP stream.
//!
//! One connection is served at a time: the listener accepts, the shared
//! prompt loop runs until the session ends, and only then is the next
//! connection accepted. The read timeout on the accepted stream enforces
//! the configured idle window.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use opcon_config::Endpoint;

use crate::bind::bind_listener;
use crate::dispatch::DispatchTable;

use super::editor::{LineEditor, LineEvent};
use super::repl::Repl;
use super::{RECV_BACKOFF, SESSION_TARGET, ServerError, ServerOptions};

/// Binds the listener and serves sessions until `shutdown` is set.
pub(super) fn serve(
    options: &ServerOptions,
    table: &mut DispatchTable,
    shutdown: &AtomicBool,
) -> Result<(), ServerError> {
    let Endpoint::Stream { host, port } = &options.endpoint else {
        unreachable!("datagram endpoints use the datagram engine");
    };
    let (listener, bound) = bind_listener(host, *port, options.port_probe_limit)?;
    listener
        .set_nonblocking(true)
        .map_err(|source| ServerError::Socket { source })?;
    info!(
        target: SESSION_TARGET,
        server = %options.name,
        host,
        port = bound,
        "stream endpoint ready"
    );

    while !shutdown.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(RECV_BACKOFF);
                continue;
            }
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    server = %options.name,
                    error = %error,
                    "accept failed"
                );
                thread::sleep(RECV_BACKOFF);
                continue;
            }
        };
        info!(
            target: SESSION_TARGET,
            server = %options.name,
            peer = %peer,
            "session opened"
        );
        if let Err(error) = run_session(stream, options, table) {
            warn!(
                target: SESSION_TARGET,
                server = %options.name,
                peer = %peer,
                error = %error,
                "session ended with an error"
            );
        }
        info!(
            target: SESSION_TARGET,
            server = %options.name,
            peer = %peer,
            "session closed"
        );
    }
    info!(
        target: SESSION_TARGET,
        server = %options.name,
        "stream engine stopped"
    );
    Ok(())
}

/// Runs one accepted connection through the shared prompt loop.
fn run_session(
    stream: TcpStream,
    options: &ServerOptions,
    table: &mut DispatchTable,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let idle = (options.idle_timeout > Duration::ZERO).then_some(options.idle_timeout);
    stream.set_read_timeout(idle)?;
    let mut editor = SocketLineEditor::new(stream);
    let mut session = Repl::new(table, &options.banner, &options.title, &options.prompt);
    session.run(&mut editor).map(|_end| ())
}

/// Line editor backed by the accepted stream.
///
/// Generic terminal clients send whole lines, so no escape handling is
/// needed here; bytes are accumulated until a newline, with any carriage
/// return stripped.
struct SocketLineEditor {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl SocketLineEditor {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let position = self.pending.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=position).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl LineEditor for SocketLineEditor {
    fn read_line(&mut self, prompt: &str) -> io::Result<LineEvent> {
        self.stream.write_all(prompt.as_bytes())?;
        self.stream.flush()?;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(LineEvent::Line(line));
            }
            let mut chunk = [0_u8; 512];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(LineEvent::Closed),
                Ok(read) => self.pending.extend_from_slice(&chunk[..read]),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(LineEvent::IdleTimeout);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        self.stream.write_all(text.as_bytes())?;
        self.stream.flush()
    }
}
