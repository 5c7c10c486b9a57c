//! One control connection to a console server.
//!
//! A connection owns a connected datagram socket and a monotonically
//! increasing sequence counter. Replies are correlated purely by sequence:
//! anything older than the in-flight request is a stale leftover from an
//! earlier timed-out send and is discarded without ending the wait.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use opcon_config::Endpoint;
#[cfg(unix)]
use opcon_config::{DEFAULT_CLAIM_ATTEMPTS, PathClaim, runtime_dir, socket_path};
use opcon_config::{EndpointPrepareError, RuntimeDirError};
use opcon_proto::{
    DEFAULT_LOCAL_PAYLOAD, DEFAULT_UDP_PAYLOAD, DispatchStatus, HEADER_LEN, MAX_PAYLOAD, Message,
    MessageType,
};

use crate::reply::{CommandReply, ResponseCode};

pub(crate) const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::control");

/// Server properties queryable without running any command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Protocol version the server speaks.
    Version,
    /// Currently negotiated payload ceiling.
    PayloadSize,
    /// The server's logical name.
    Name,
    /// Human-readable command listing.
    Commands,
    /// Machine-readable keyword list for completion.
    Keywords,
    /// Session banner.
    Banner,
    /// Session title.
    Title,
    /// Interactive prompt string.
    Prompt,
}

impl QueryKind {
    fn message_type(self) -> MessageType {
        match self {
            Self::Version => MessageType::QueryVersion,
            Self::PayloadSize => MessageType::QueryPayloadSize,
            Self::Name => MessageType::QueryName,
            Self::Commands => MessageType::QueryCommandsHuman,
            Self::Keywords => MessageType::QueryCommandsMachine,
            Self::Banner => MessageType::QueryBanner,
            Self::Title => MessageType::QueryTitle,
            Self::Prompt => MessageType::QueryPrompt,
        }
    }
}

/// A named control connection to one server endpoint.
#[derive(Debug)]
pub struct ControlConnection {
    name: String,
    socket: ControlSocket,
    sequence: u32,
    default_timeout: Duration,
    recv_capacity: usize,
}

impl ControlConnection {
    /// Opens a connection to `target`.
    ///
    /// UDP targets bind an ephemeral local socket; local targets claim a
    /// uniquely named endpoint path so many clients coexist within one
    /// process.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when resolution, binding, or the endpoint
    /// claim fails, or when `target` is not a datagram endpoint.
    pub fn open(
        name: impl Into<String>,
        target: &Endpoint,
        default_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let name = name.into();
        let (socket, default_payload) = match target {
            Endpoint::Udp { host, port } => {
                let peer = resolve(host, *port)?;
                let local = match peer {
                    SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
                    SocketAddr::V6(_) => {
                        SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, 0))
                    }
                };
                let socket =
                    UdpSocket::bind(local).map_err(|source| ConnectError::Bind { source })?;
                socket
                    .connect(peer)
                    .map_err(|source| ConnectError::Connect {
                        endpoint: target.to_string(),
                        source,
                    })?;
                (ControlSocket::Udp(socket), DEFAULT_UDP_PAYLOAD)
            }
            #[cfg(unix)]
            Endpoint::Local { name: server } => {
                use std::os::unix::net::UnixDatagram;

                target.prepare_filesystem()?;
                let dir = runtime_dir()?;
                let claim = PathClaim::acquire_ephemeral(&dir, &name, DEFAULT_CLAIM_ATTEMPTS)?;
                let socket = UnixDatagram::bind(claim.socket_path())
                    .map_err(|source| ConnectError::Bind { source })?;
                socket
                    .connect(socket_path(&dir, server))
                    .map_err(|source| ConnectError::Connect {
                        endpoint: target.to_string(),
                        source,
                    })?;
                (
                    ControlSocket::Local {
                        socket,
                        _claim: claim,
                    },
                    DEFAULT_LOCAL_PAYLOAD,
                )
            }
            #[cfg(not(unix))]
            Endpoint::Local { .. } => return Err(ConnectError::UnsupportedLocal),
            Endpoint::Stream { .. } => {
                return Err(ConnectError::UnsupportedTransport {
                    endpoint: target.to_string(),
                });
            }
        };
        Ok(Self {
            name,
            socket,
            sequence: 0,
            default_timeout,
            recv_capacity: HEADER_LEN + default_payload,
        })
    }

    /// The connection's logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends a command and waits for its completion.
    ///
    /// A zero effective timeout is fire-and-forget: the request is sent with
    /// the response flag cleared and `Succeeded` is returned immediately.
    /// Failures never surface as `Err`; they map onto the reply code.
    pub fn send(&mut self, command: &str, timeout: Option<Duration>) -> CommandReply {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let fire_and_forget = timeout.is_zero();
        let sequence = self.next_sequence();
        let request = Message::request(
            MessageType::ControlCommand,
            !fire_and_forget,
            true,
            sequence,
            command,
        );
        self.transmit(&request, timeout)
    }

    /// Asks the server for one of its queryable properties.
    ///
    /// A zero or absent timeout falls back to the connection default; a
    /// query with no reply would be useless.
    pub fn query(&mut self, kind: QueryKind, timeout: Option<Duration>) -> CommandReply {
        let timeout = timeout
            .filter(|value| !value.is_zero())
            .unwrap_or(self.default_timeout);
        let sequence = self.next_sequence();
        let request = Message::request(kind.message_type(), true, true, sequence, "");
        self.transmit(&request, timeout)
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn transmit(&mut self, request: &Message, timeout: Duration) -> CommandReply {
        if let Err(error) = self.socket.send(&request.encode()) {
            warn!(
                target: CLIENT_TARGET,
                connection = %self.name,
                error = %error,
                "request send failed"
            );
            return CommandReply::local(ResponseCode::SendFailed);
        }
        if !request.response_needed() {
            return CommandReply::local(ResponseCode::Succeeded);
        }
        self.await_reply(request.sequence, timeout)
    }

    fn await_reply(&mut self, sequence: u32, timeout: Duration) -> CommandReply {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return CommandReply::local(ResponseCode::TimedOut);
            }
            if let Err(error) = self.socket.set_read_timeout(Some(remaining)) {
                warn!(
                    target: CLIENT_TARGET,
                    connection = %self.name,
                    error = %error,
                    "failed to arm the reply deadline"
                );
                return CommandReply::local(ResponseCode::PollFailed);
            }
            let mut buffer = vec![0_u8; self.recv_capacity];
            let len = match self.socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return CommandReply::local(ResponseCode::TimedOut);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    warn!(
                        target: CLIENT_TARGET,
                        connection = %self.name,
                        error = %error,
                        "reply receive failed"
                    );
                    return CommandReply::local(ResponseCode::ReceiveFailed);
                }
            };
            let reply = match Message::decode(&buffer[..len]) {
                Ok(reply) => reply,
                Err(error) => {
                    debug!(
                        target: CLIENT_TARGET,
                        connection = %self.name,
                        error = %error,
                        "malformed frame dropped"
                    );
                    continue;
                }
            };
            if reply.kind == MessageType::UpdatePayloadSize {
                if let Ok(size) = reply.payload_text().trim().parse::<usize>() {
                    self.recv_capacity = HEADER_LEN + size.min(MAX_PAYLOAD);
                    debug!(
                        target: CLIENT_TARGET,
                        connection = %self.name,
                        size,
                        "receive buffer grown"
                    );
                }
                continue;
            }
            if reply.sequence != sequence {
                debug!(
                    target: CLIENT_TARGET,
                    connection = %self.name,
                    expected = sequence,
                    got = reply.sequence,
                    "stale reply discarded"
                );
                continue;
            }
            let code = match DispatchStatus::from_wire(reply.response) {
                Ok(status) => ResponseCode::from_status(status),
                Err(error) => {
                    debug!(
                        target: CLIENT_TARGET,
                        connection = %self.name,
                        error = %error,
                        "unparseable reply status"
                    );
                    return CommandReply::local(ResponseCode::ReceiveFailed);
                }
            };
            let payload = reply.data_needed().then(|| reply.payload_text());
            return CommandReply { code, payload };
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConnectError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    addrs.next().ok_or_else(|| ConnectError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })
}

/// Transport-erased connected datagram socket.
#[derive(Debug)]
enum ControlSocket {
    Udp(UdpSocket),
    #[cfg(unix)]
    Local {
        socket: std::os::unix::net::UnixDatagram,
        _claim: PathClaim,
    },
}

impl ControlSocket {
    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        match self {
            Self::Udp(socket) => socket.send(frame),
            #[cfg(unix)]
            Self::Local { socket, .. } => socket.send(frame),
        }
    }

    fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Udp(socket) => socket.recv(buffer),
            #[cfg(unix)]
            Self::Local { socket, .. } => socket.recv(buffer),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Udp(socket) => socket.set_read_timeout(timeout),
            #[cfg(unix)]
            Self::Local { socket, .. } => socket.set_read_timeout(timeout),
        }
    }
}

/// Errors surfaced while opening a control connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The target host did not resolve.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// Host being resolved.
        host: String,
        /// Port being resolved.
        port: u16,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Resolution produced no usable address.
    #[error("no addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host being resolved.
        host: String,
        /// Port being resolved.
        port: u16,
    },
    /// The local socket could not be bound.
    #[error("failed to bind a local socket: {source}")]
    Bind {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Connecting the socket to the target failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint being connected to.
        endpoint: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The runtime directory could not be prepared.
    #[error(transparent)]
    Prepare(#[from] EndpointPrepareError),
    /// The runtime directory could not be derived.
    #[error(transparent)]
    Runtime(#[from] RuntimeDirError),
    /// No unique local endpoint path could be claimed.
    #[error(transparent)]
    Claim(#[from] opcon_config::ClaimError),
    /// A connection with this name is already registered.
    #[error("a connection named '{name}' already exists")]
    DuplicateName {
        /// The conflicting connection name.
        name: String,
    },
    /// Control connections require a datagram endpoint.
    #[error("cannot open a control connection to {endpoint}: not a datagram endpoint")]
    UnsupportedTransport {
        /// Endpoint that was rejected.
        endpoint: String,
    },
    /// Local datagram endpoints need a unix platform.
    #[error("local endpoints are unsupported on this platform")]
    UnsupportedLocal,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use std::thread;

    use super::*;

    fn fake_server() -> (UdpSocket, Endpoint) {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake server");
        let port = socket.local_addr().expect("addr").port();
        (socket, Endpoint::udp("127.0.0.1", port))
    }

    fn open(target: &Endpoint) -> ControlConnection {
        ControlConnection::open("test", target, Duration::from_secs(5)).expect("open connection")
    }

    #[test]
    fn fire_and_forget_clears_the_response_flag() {
        let (server, target) = fake_server();
        let mut connection = open(&target);

        let reply = connection.send("loglevel 3", Some(Duration::ZERO));
        assert_eq!(reply.code, ResponseCode::Succeeded);
        assert!(reply.payload.is_none());

        let mut buffer = [0_u8; 256];
        let (len, _) = server.recv_from(&mut buffer).expect("request arrives");
        let request = Message::decode(&buffer[..len]).expect("decode request");
        assert_eq!(request.kind, MessageType::ControlCommand);
        assert!(!request.response_needed());
        assert_eq!(request.payload_text(), "loglevel 3");
    }

    #[test]
    fn silence_times_out() {
        let (_server, target) = fake_server();
        let mut connection = open(&target);
        let reply = connection.send("ping", Some(Duration::from_millis(50)));
        assert_eq!(reply.code, ResponseCode::TimedOut);
    }

    #[test]
    fn stale_replies_are_discarded_until_the_matching_one() {
        let (server, target) = fake_server();
        let mut connection = open(&target);

        let responder = thread::spawn(move || {
            let mut buffer = [0_u8; 256];
            let (len, peer) = server.recv_from(&mut buffer).expect("request");
            let request = Message::decode(&buffer[..len]).expect("decode");
            let stale = Message::reply(
                MessageType::CommandComplete,
                DispatchStatus::Succeeded.as_wire(),
                request.sequence.wrapping_sub(1),
                "stale\n",
            );
            server.send_to(&stale.encode(), peer).expect("send stale");
            let fresh = Message::reply(
                MessageType::CommandComplete,
                DispatchStatus::Succeeded.as_wire(),
                request.sequence,
                "fresh\n",
            );
            server.send_to(&fresh.encode(), peer).expect("send fresh");
        });

        let reply = connection.send("ping", Some(Duration::from_secs(5)));
        assert_eq!(reply.code, ResponseCode::Succeeded);
        assert_eq!(reply.payload.as_deref(), Some("fresh\n"));
        responder.join().expect("responder");
    }

    #[test]
    fn payload_updates_grow_the_receive_buffer_mid_wait() {
        let (server, target) = fake_server();
        let mut connection = open(&target);
        let oversized = "y".repeat(DEFAULT_UDP_PAYLOAD + 64);

        let body = oversized.clone();
        let responder = thread::spawn(move || {
            let mut buffer = [0_u8; 256];
            let (len, peer) = server.recv_from(&mut buffer).expect("request");
            let request = Message::decode(&buffer[..len]).expect("decode");
            let update = Message::request(
                MessageType::UpdatePayloadSize,
                false,
                false,
                request.sequence,
                body.len().to_string(),
            );
            server.send_to(&update.encode(), peer).expect("send update");
            let reply = Message::reply(
                MessageType::CommandComplete,
                DispatchStatus::Succeeded.as_wire(),
                request.sequence,
                body.as_str(),
            );
            server.send_to(&reply.encode(), peer).expect("send reply");
        });

        let reply = connection.send("dump", Some(Duration::from_secs(5)));
        assert_eq!(reply.code, ResponseCode::Succeeded);
        assert_eq!(reply.payload.as_deref(), Some(oversized.as_str()));
        responder.join().expect("responder");
    }

    #[test]
    fn remote_statuses_surface_in_the_reply_code() {
        let (server, target) = fake_server();
        let mut connection = open(&target);

        let responder = thread::spawn(move || {
            let mut buffer = [0_u8; 256];
            let (len, peer) = server.recv_from(&mut buffer).expect("request");
            let request = Message::decode(&buffer[..len]).expect("decode");
            let reply = Message::reply(
                MessageType::CommandComplete,
                DispatchStatus::NotFound.as_wire(),
                request.sequence,
                "unknown command: 'bogus'\n",
            );
            server.send_to(&reply.encode(), peer).expect("send reply");
        });

        let reply = connection.send("bogus", Some(Duration::from_secs(5)));
        assert_eq!(reply.code, ResponseCode::CommandNotFound);
        assert!(reply.payload.expect("diagnostic").contains("bogus"));
        responder.join().expect("responder");
    }

    #[test]
    fn stream_targets_are_rejected() {
        let error = ControlConnection::open(
            "test",
            &Endpoint::stream("127.0.0.1", 4000),
            Duration::from_secs(5),
        )
        .expect_err("stream endpoint");
        assert!(matches!(error, ConnectError::UnsupportedTransport { .. }));
    }
}
