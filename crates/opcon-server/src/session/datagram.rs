//! Connectionless datagram engine shared by UDP and local endpoints.
//!
//! Every request frame is self-contained, so one receive loop serves any
//! number of clients without per-client state. Queries are answered from
//! the server's own configuration; command frames run through the dispatch
//! table and produce a terminal completion frame carrying the dispatch
//! status. Senders that clear the response flag get nothing back.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info, warn};

use opcon_config::Endpoint;
#[cfg(unix)]
use opcon_config::{PathClaim, runtime_dir};
use opcon_proto::{
    DEFAULT_LOCAL_PAYLOAD, DEFAULT_UDP_PAYLOAD, DispatchStatus, HEADER_LEN, MAX_PAYLOAD, Message,
    MessageType, PROTOCOL_VERSION,
};

use crate::bind::bind_udp;
use crate::dispatch::{DispatchOutcome, DispatchTable, OutputSink, Resolution};

use super::{RECV_BACKOFF, SESSION_TARGET, ServerError, ServerOptions};

/// Binds the endpoint and runs the receive loop until `shutdown` is set.
pub(super) fn serve(
    options: &ServerOptions,
    table: &mut DispatchTable,
    shutdown: &AtomicBool,
) -> Result<(), ServerError> {
    let (socket, default_payload) = bind_socket(options)?;
    serve_loop(&socket, default_payload, options, table, shutdown)
}

fn bind_socket(options: &ServerOptions) -> Result<(DatagramSocket, usize), ServerError> {
    match &options.endpoint {
        Endpoint::Udp { host, port } => {
            let (socket, bound) = bind_udp(host, *port, options.port_probe_limit)?;
            info!(
                target: SESSION_TARGET,
                server = %options.name,
                host,
                port = bound,
                "datagram endpoint ready"
            );
            Ok((DatagramSocket::Udp(socket), DEFAULT_UDP_PAYLOAD))
        }
        #[cfg(unix)]
        Endpoint::Local { name } => {
            use std::os::unix::net::UnixDatagram;

            options.endpoint.prepare_filesystem()?;
            let dir = runtime_dir()?;
            let claim = PathClaim::acquire(&dir, name, options.claim_attempts)?;
            let socket = UnixDatagram::bind(claim.socket_path())
                .map_err(|source| ServerError::Socket { source })?;
            info!(
                target: SESSION_TARGET,
                server = %options.name,
                path = %claim.socket_path().display(),
                "datagram endpoint ready"
            );
            Ok((
                DatagramSocket::Local {
                    socket,
                    _claim: claim,
                },
                DEFAULT_LOCAL_PAYLOAD,
            ))
        }
        #[cfg(not(unix))]
        Endpoint::Local { .. } => Err(ServerError::UnsupportedLocal),
        Endpoint::Stream { .. } => unreachable!("stream endpoints use the stream engine"),
    }
}

fn serve_loop(
    socket: &DatagramSocket,
    default_payload: usize,
    options: &ServerOptions,
    table: &mut DispatchTable,
    shutdown: &AtomicBool,
) -> Result<(), ServerError> {
    socket
        .set_nonblocking(true)
        .map_err(|source| ServerError::Socket { source })?;
    let negotiated = options
        .max_payload
        .unwrap_or(default_payload)
        .min(MAX_PAYLOAD);
    let mut engine = Engine {
        options,
        table,
        negotiated,
    };
    // Receive at the hard ceiling so a frame sized for a future negotiated
    // payload is never truncated on arrival.
    let mut buffer = vec![0_u8; HEADER_LEN + MAX_PAYLOAD];

    while !shutdown.load(Ordering::SeqCst) {
        let (len, peer) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(RECV_BACKOFF);
                continue;
            }
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    server = %options.name,
                    error = %error,
                    "datagram receive failed"
                );
                thread::sleep(RECV_BACKOFF);
                continue;
            }
        };
        let request = match Message::decode(&buffer[..len]) {
            Ok(request) => request,
            Err(error) => {
                debug!(
                    target: SESSION_TARGET,
                    server = %engine.options.name,
                    error = %error,
                    "malformed frame dropped"
                );
                continue;
            }
        };
        for frame in engine.handle(&request) {
            if let Err(error) = socket.send_to(&frame.encode(), &peer) {
                warn!(
                    target: SESSION_TARGET,
                    server = %engine.options.name,
                    error = %error,
                    "reply send failed"
                );
            }
        }
    }
    info!(
        target: SESSION_TARGET,
        server = %options.name,
        "datagram engine stopped"
    );
    Ok(())
}

/// Stateless frame handler; one instance serves the whole loop.
struct Engine<'a> {
    options: &'a ServerOptions,
    table: &'a mut DispatchTable,
    negotiated: usize,
}

impl Engine<'_> {
    /// Produces the zero, one, or two frames owed for `request`.
    ///
    /// A reply larger than the negotiated payload size is preceded by an
    /// `UpdatePayloadSize` frame so the client can grow its receive buffer
    /// before the reply lands.
    fn handle(&mut self, request: &Message) -> Vec<Message> {
        let reply = match request.kind {
            MessageType::UserCommand | MessageType::ControlCommand => {
                Some(self.run_command(request))
            }
            MessageType::UpdatePayloadSize | MessageType::CommandComplete => {
                debug!(
                    target: SESSION_TARGET,
                    server = %self.options.name,
                    kind = ?request.kind,
                    "reply-only frame ignored"
                );
                None
            }
            query => Some(self.answer_query(query, request.sequence)),
        };
        if !request.response_needed() {
            return Vec::new();
        }
        let Some(mut reply) = reply else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if reply.payload.len() > MAX_PAYLOAD {
            reply.payload.truncate(MAX_PAYLOAD);
        }
        if reply.payload.len() > self.negotiated {
            self.negotiated = reply.payload.len();
            frames.push(Message::request(
                MessageType::UpdatePayloadSize,
                false,
                false,
                request.sequence,
                self.negotiated.to_string(),
            ));
        }
        frames.push(reply);
        frames
    }

    /// Answers a query frame from configuration; callbacks never run.
    fn answer_query(&self, kind: MessageType, sequence: u32) -> Message {
        let payload = match kind {
            MessageType::QueryVersion => PROTOCOL_VERSION.to_string(),
            MessageType::QueryPayloadSize => self.negotiated.to_string(),
            MessageType::QueryName => self.options.name.clone(),
            MessageType::QueryCommandsHuman => self.table.render_listing(),
            MessageType::QueryCommandsMachine => self.table.keyword_list(),
            MessageType::QueryBanner => self.options.banner.clone(),
            MessageType::QueryTitle => self.options.title.clone(),
            MessageType::QueryPrompt => self.options.prompt.clone(),
            _ => String::new(),
        };
        Message::reply(kind, DispatchStatus::Succeeded.as_wire(), sequence, payload)
    }

    /// Resolves and dispatches a command frame's payload.
    fn run_command(&mut self, request: &Message) -> Message {
        let text = request.payload_text();
        let mut tokens = text.split_whitespace();
        let Some(keyword) = tokens.next() else {
            return self.completion(request, DispatchStatus::NotFound, "empty command\n");
        };
        let args: Vec<String> = tokens.map(str::to_owned).collect();

        match self.table.resolve(keyword) {
            Resolution::NotFound => self.completion(
                request,
                DispatchStatus::NotFound,
                format!("unknown command: '{keyword}'\n"),
            ),
            Resolution::Ambiguous(candidates) => self.completion(
                request,
                DispatchStatus::NotFound,
                format!(
                    "ambiguous command: '{keyword}' (matches {})\n",
                    candidates.join(", ")
                ),
            ),
            Resolution::Matched(index) => {
                let mut sink = OutputSink::new();
                let outcome = self.table.dispatch(index, &args, &mut sink);
                let status = match outcome {
                    DispatchOutcome::Done => DispatchStatus::Succeeded,
                    DispatchOutcome::InvalidArgCount => DispatchStatus::InvalidArgCount,
                };
                self.completion(request, status, sink.take())
            }
        }
    }

    /// Builds the terminal frame for a command, honouring the data flag.
    fn completion(
        &self,
        request: &Message,
        status: DispatchStatus,
        output: impl Into<String>,
    ) -> Message {
        let payload = if request.data_needed() {
            output.into()
        } else {
            String::new()
        };
        Message::reply(
            MessageType::CommandComplete,
            status.as_wire(),
            request.sequence,
            payload,
        )
    }
}

/// Transport-erased datagram socket.
enum DatagramSocket {
    Udp(UdpSocket),
    #[cfg(unix)]
    Local {
        socket: std::os::unix::net::UnixDatagram,
        _claim: PathClaim,
    },
}

/// Return address of a received datagram.
enum Peer {
    Net(std::net::SocketAddr),
    #[cfg(unix)]
    Local(std::os::unix::net::SocketAddr),
}

impl DatagramSocket {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Self::Udp(socket) => socket.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Self::Local { socket, .. } => socket.set_nonblocking(nonblocking),
        }
    }

    fn recv_from(&self, buffer: &mut [u8]) -> io::Result<(usize, Peer)> {
        match self {
            Self::Udp(socket) => {
                let (len, addr) = socket.recv_from(buffer)?;
                Ok((len, Peer::Net(addr)))
            }
            #[cfg(unix)]
            Self::Local { socket, .. } => {
                let (len, addr) = socket.recv_from(buffer)?;
                Ok((len, Peer::Local(addr)))
            }
        }
    }

    fn send_to(&self, frame: &[u8], peer: &Peer) -> io::Result<usize> {
        match (self, peer) {
            (Self::Udp(socket), Peer::Net(addr)) => socket.send_to(frame, addr),
            #[cfg(unix)]
            (Self::Local { socket, .. }, Peer::Local(addr)) => match addr.as_pathname() {
                Some(path) => socket.send_to(frame, path),
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "peer socket is unnamed; no return address",
                )),
            },
            #[cfg(unix)]
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "peer does not match the bound transport",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;
    use crate::dispatch::CommandDescriptor;

    fn sample_options() -> ServerOptions {
        let mut options = ServerOptions::new("tracer", Endpoint::udp("127.0.0.1", 0));
        options.banner = "trace console".to_owned();
        options
    }

    fn sample_table() -> DispatchTable {
        let mut table = DispatchTable::new();
        table
            .register(CommandDescriptor::new("hello", "say hello", |args, sink| {
                sink.writeln(format!("hello {}", args.join(" ")));
            })
            .with_args(0, 20, "hello [names...]"))
            .expect("register hello");
        table
            .register(
                CommandDescriptor::new("pair", "needs two", |_args, _sink| {})
                    .with_args(2, 2, "pair <a> <b>"),
            )
            .expect("register pair");
        table
    }

    fn engine<'a>(options: &'a ServerOptions, table: &'a mut DispatchTable) -> Engine<'a> {
        Engine {
            options,
            table,
            negotiated: DEFAULT_UDP_PAYLOAD,
        }
    }

    fn command(text: &str, sequence: u32) -> Message {
        Message::request(MessageType::ControlCommand, true, true, sequence, text)
    }

    #[test]
    fn queries_are_answered_from_configuration() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let request = Message::request(MessageType::QueryVersion, true, true, 7, "");
        let frames = engine.handle(&request);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageType::QueryVersion);
        assert_eq!(frames[0].sequence, 7);
        assert_eq!(frames[0].payload_text(), PROTOCOL_VERSION.to_string());

        let request = Message::request(MessageType::QueryBanner, true, true, 8, "");
        let frames = engine.handle(&request);
        assert_eq!(frames[0].payload_text(), "trace console");

        let request = Message::request(MessageType::QueryCommandsMachine, true, true, 9, "");
        let frames = engine.handle(&request);
        assert_eq!(frames[0].payload_text(), "hello pair");
    }

    #[test]
    fn commands_complete_with_the_dispatch_status_and_output() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let frames = engine.handle(&command("hello world", 21));
        assert_eq!(frames.len(), 1);
        let reply = &frames[0];
        assert_eq!(reply.kind, MessageType::CommandComplete);
        assert_eq!(reply.sequence, 21);
        assert_eq!(reply.response, DispatchStatus::Succeeded.as_wire());
        assert!(reply.data_needed());
        assert_eq!(reply.payload_text(), "hello world\n");
    }

    #[test]
    fn unique_prefixes_dispatch_over_the_wire() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let frames = engine.handle(&command("hel remote", 3));
        assert_eq!(frames[0].response, DispatchStatus::Succeeded.as_wire());
        assert_eq!(frames[0].payload_text(), "hello remote\n");
    }

    #[test]
    fn unknown_and_ambiguous_commands_report_not_found() {
        let options = sample_options();
        let mut table = sample_table();
        table
            .register(CommandDescriptor::new("help", "shadows", |_args, _sink| {}))
            .expect("register help");
        let mut engine = engine(&options, &mut table);

        let frames = engine.handle(&command("bogus", 4));
        assert_eq!(frames[0].response, DispatchStatus::NotFound.as_wire());
        assert!(frames[0].payload_text().contains("unknown command: 'bogus'"));

        let frames = engine.handle(&command("hel", 5));
        assert_eq!(frames[0].response, DispatchStatus::NotFound.as_wire());
        assert!(frames[0].payload_text().contains("ambiguous command: 'hel'"));
    }

    #[test]
    fn bad_argument_counts_report_invalid_arg_count() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let frames = engine.handle(&command("pair only-one", 6));
        assert_eq!(frames[0].response, DispatchStatus::InvalidArgCount.as_wire());
        assert!(frames[0].payload_text().contains("usage: pair <a> <b>"));
    }

    #[test]
    fn cleared_response_flag_suppresses_the_reply() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let request = Message::request(MessageType::ControlCommand, false, false, 10, "hello");
        assert!(engine.handle(&request).is_empty());
    }

    #[test]
    fn cleared_data_flag_drops_output_but_keeps_the_status() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let request = Message::request(MessageType::ControlCommand, true, false, 11, "hello");
        let frames = engine.handle(&request);
        assert_eq!(frames[0].response, DispatchStatus::Succeeded.as_wire());
        assert!(frames[0].payload.is_empty());
        assert!(!frames[0].data_needed());
    }

    #[test]
    fn oversized_replies_are_preceded_by_a_payload_update() {
        let options = sample_options();
        let mut table = DispatchTable::new();
        table
            .register(CommandDescriptor::new("dump", "bulk output", |_args, sink| {
                sink.write("x".repeat(DEFAULT_UDP_PAYLOAD + 100));
            }))
            .expect("register dump");
        let mut engine = engine(&options, &mut table);

        let frames = engine.handle(&command("dump", 12));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, MessageType::UpdatePayloadSize);
        assert_eq!(
            frames[0].payload_text(),
            (DEFAULT_UDP_PAYLOAD + 100).to_string()
        );
        assert_eq!(frames[1].kind, MessageType::CommandComplete);
        assert_eq!(frames[1].payload.len(), DEFAULT_UDP_PAYLOAD + 100);

        // The grown size persists for later queries.
        let request = Message::request(MessageType::QueryPayloadSize, true, true, 13, "");
        let frames = engine.handle(&request);
        assert_eq!(
            frames[0].payload_text(),
            (DEFAULT_UDP_PAYLOAD + 100).to_string()
        );
    }

    #[test]
    fn reply_only_frames_are_ignored() {
        let options = sample_options();
        let mut table = sample_table();
        let mut engine = engine(&options, &mut table);

        let request = Message::request(MessageType::CommandComplete, true, true, 14, "");
        assert!(engine.handle(&request).is_empty());
    }

    #[test]
    fn loopback_round_trip_through_the_serve_loop() {
        let options = sample_options();
        let mut table = sample_table();
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind server");
        let server_addr = socket.local_addr().expect("server addr");
        let socket = DatagramSocket::Udp(socket);
        let shutdown = AtomicBool::new(false);

        thread::scope(|scope| {
            let worker = scope.spawn(|| {
                serve_loop(&socket, DEFAULT_UDP_PAYLOAD, &options, &mut table, &shutdown)
            });

            let client = UdpSocket::bind("127.0.0.1:0").expect("bind client");
            client
                .set_read_timeout(Some(std::time::Duration::from_secs(5)))
                .expect("read timeout");
            client
                .send_to(&command("hello loop", 42).encode(), server_addr)
                .expect("send");

            let mut buffer = vec![0_u8; HEADER_LEN + MAX_PAYLOAD];
            let (len, _) = client.recv_from(&mut buffer).expect("reply");
            let reply = Message::decode(&buffer[..len]).expect("decode reply");
            assert_eq!(reply.kind, MessageType::CommandComplete);
            assert_eq!(reply.sequence, 42);
            assert_eq!(reply.payload_text(), "hello loop\n");

            shutdown.store(true, Ordering::SeqCst);
            worker.join().expect("join").expect("serve loop");
        });
    }
}
