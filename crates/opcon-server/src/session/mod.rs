//! Session engines and the server object that owns them.
//!
//! A [`ConsoleServer`] owns exactly one dispatch table and one transport
//! endpoint. The engine variant follows the endpoint: datagram endpoints run
//! the connectionless multi-client loop, stream endpoints the single-session
//! interactive loop, and [`ConsoleServer::run_direct`] runs the same loop
//! in-process with no transport.

mod datagram;
mod editor;
mod repl;
mod stream;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use opcon_config::{
    ClaimError, ConsoleOverrides, DEFAULT_CLAIM_ATTEMPTS, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_PORT_PROBE_LIMIT, Endpoint, EndpointPrepareError, OverrideSource, RuntimeDirError,
    default_prompt,
};

use crate::bind::BindError;
use crate::dispatch::{CommandDescriptor, DispatchTable, RegisterError};

pub use editor::{LineEditor, LineEvent, StdioLineEditor};

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Interval between receive polls while waiting for traffic or shutdown.
pub(crate) const RECV_BACKOFF: Duration = Duration::from_millis(25);

/// Resolved settings a server binds and serves with.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Logical server name, reported to clients and used for local endpoint
    /// paths.
    pub name: String,
    /// Transport endpoint to bind.
    pub endpoint: Endpoint,
    /// Banner written when an interactive session opens; empty to skip.
    pub banner: String,
    /// Title written after the banner; empty to skip.
    pub title: String,
    /// Interactive prompt string.
    pub prompt: String,
    /// Idle window closing an inactive stream session.
    pub idle_timeout: Duration,
    /// Initial payload ceiling; `None` takes the transport default.
    pub max_payload: Option<usize>,
    /// Ports probed past the base port on conflict.
    pub port_probe_limit: u16,
    /// Candidate names tried when claiming a local endpoint path.
    pub claim_attempts: usize,
}

impl ServerOptions {
    /// Builds options with built-in defaults for `name` and `endpoint`.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        let name = name.into();
        let prompt = default_prompt(&name);
        Self {
            name,
            endpoint,
            banner: String::new(),
            title: String::new(),
            prompt,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_payload: None,
            port_probe_limit: DEFAULT_PORT_PROBE_LIMIT,
            claim_attempts: DEFAULT_CLAIM_ATTEMPTS,
        }
    }

    /// Applies any per-name overrides before binding.
    pub fn apply_overrides(&mut self, source: &dyn OverrideSource) {
        let Some(overrides) = source.overrides_for(&self.name) else {
            return;
        };
        self.apply(overrides);
    }

    fn apply(&mut self, overrides: ConsoleOverrides) {
        match &mut self.endpoint {
            Endpoint::Udp { host, port } | Endpoint::Stream { host, port } => {
                if let Some(new_host) = overrides.host {
                    *host = new_host;
                }
                if let Some(new_port) = overrides.port {
                    *port = new_port;
                }
            }
            Endpoint::Local { .. } => {}
        }
        if let Some(prompt) = overrides.prompt {
            self.prompt = prompt;
        }
        if let Some(banner) = overrides.banner {
            self.banner = banner;
        }
        if let Some(title) = overrides.title {
            self.title = title;
        }
        if let Some(timeout) = overrides.timeout {
            self.idle_timeout = timeout;
        }
    }
}

/// Errors surfaced while starting or running a console server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A network endpoint could not be acquired.
    #[error(transparent)]
    Bind(#[from] BindError),
    /// The runtime directory could not be prepared.
    #[error(transparent)]
    Prepare(#[from] EndpointPrepareError),
    /// The runtime directory could not be derived.
    #[error(transparent)]
    Runtime(#[from] RuntimeDirError),
    /// No local endpoint path could be claimed.
    #[error(transparent)]
    Claim(#[from] ClaimError),
    /// A socket operation failed during startup.
    #[error("socket setup failed: {source}")]
    Socket {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Local datagram endpoints need a unix platform.
    #[error("local endpoints are unsupported on this platform")]
    UnsupportedLocal,
    /// The worker thread panicked.
    #[error("server thread panicked")]
    ThreadPanic,
}

/// A command server owning one dispatch table and one transport.
pub struct ConsoleServer {
    options: ServerOptions,
    table: DispatchTable,
}

impl ConsoleServer {
    /// Builds a server with an empty table.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            table: DispatchTable::new(),
        }
    }

    /// The resolved options this server will bind with.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// The table of registered commands.
    #[must_use]
    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Registers a command, returning the validation outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`RegisterError`] when the descriptor is malformed; the
    /// table is left unchanged.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), RegisterError> {
        self.table.register(descriptor)
    }

    /// Registers a command, logging and skipping malformed descriptors so
    /// registration-time mistakes never stop the server.
    pub fn add_command(&mut self, descriptor: CommandDescriptor) {
        if let Err(error) = self.table.register(descriptor) {
            warn!(
                target: SESSION_TARGET,
                server = %self.options.name,
                error = %error,
                "command registration skipped"
            );
        }
    }

    /// Runs the receive loop on the calling thread until `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns a [`ServerError`] when the endpoint cannot be acquired; once
    /// serving, transport errors are logged and the loop continues.
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> Result<(), ServerError> {
        info!(
            target: SESSION_TARGET,
            server = %self.options.name,
            endpoint = %self.options.endpoint,
            "console server starting"
        );
        let Self { options, table } = self;
        match &options.endpoint {
            Endpoint::Stream { .. } => stream::serve(options, table, shutdown),
            Endpoint::Udp { .. } | Endpoint::Local { .. } => {
                datagram::serve(options, table, shutdown)
            }
        }
    }

    /// Runs the receive loop on the calling thread; the caller never regains
    /// control until process shutdown.
    ///
    /// # Errors
    ///
    /// As [`ConsoleServer::run_until`].
    pub fn run(mut self) -> Result<(), ServerError> {
        let shutdown = AtomicBool::new(false);
        self.run_until(&shutdown)
    }

    /// Spawns a dedicated worker owning the receive loop and returns
    /// immediately.
    #[must_use]
    pub fn spawn(mut self) -> ServerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || self.run_until(&flag));
        ServerHandle {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Runs an interactive session against the hosting process's own
    /// channel, entirely in the calling context.
    ///
    /// # Errors
    ///
    /// Returns the editor's IO error when the channel fails outright.
    pub fn run_direct(&mut self, editor: &mut dyn LineEditor) -> std::io::Result<()> {
        let Self { options, table } = self;
        let mut session = repl::Repl::new(table, &options.banner, &options.title, &options.prompt);
        session.run(editor).map(|_end| ())
    }
}

/// Handle to a server running on a dedicated worker thread.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Result<(), ServerError>>>,
}

impl ServerHandle {
    /// Asks the receive loop to stop after its current poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the worker to finish and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the server's startup error or [`ServerError::ThreadPanic`].
    pub fn join(mut self) -> Result<(), ServerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ServerError::ThreadPanic)?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
