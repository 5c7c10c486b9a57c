//! The connection registry: named connections, groups, and multicast.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use opcon_config::{DEFAULT_CLIENT_TIMEOUT, Endpoint, NoOverrides, OverrideSource};

use crate::connection::{CLIENT_TARGET, ConnectError, ControlConnection, QueryKind};
use crate::reply::{CommandReply, ResponseCode};

/// Group keyword matching commands whose first token names no other group.
pub const WILDCARD_GROUP: &str = "all";

/// Holds named control connections and routes commands to them.
///
/// Connections are registered under unique logical names. Groups map a
/// command keyword to a set of connection names for fire-and-forget
/// multicast.
#[derive(Debug)]
pub struct ControlClient {
    connections: Vec<ControlConnection>,
    groups: Vec<Group>,
    default_timeout: Duration,
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Group {
    keyword: String,
    members: Vec<String>,
}

impl ControlClient {
    /// Creates an empty client with the standard per-call timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_CLIENT_TIMEOUT)
    }

    /// Creates an empty client with a custom per-call timeout.
    #[must_use]
    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            connections: Vec::new(),
            groups: Vec::new(),
            default_timeout,
        }
    }

    /// Opens and registers a connection under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::DuplicateName`] when the name is taken, or
    /// the underlying connect failure.
    pub fn connect(&mut self, name: &str, target: &Endpoint) -> Result<(), ConnectError> {
        self.connect_with_overrides(name, target, &NoOverrides)
    }

    /// Opens a connection after applying any per-name overrides to the
    /// target's host and port and to the connection's default timeout.
    ///
    /// # Errors
    ///
    /// As [`ControlClient::connect`].
    pub fn connect_with_overrides(
        &mut self,
        name: &str,
        target: &Endpoint,
        source: &dyn OverrideSource,
    ) -> Result<(), ConnectError> {
        if self.connection(name).is_some() {
            return Err(ConnectError::DuplicateName {
                name: name.to_owned(),
            });
        }
        let mut endpoint = target.clone();
        let mut timeout = self.default_timeout;
        if let Some(overrides) = source.overrides_for(name) {
            if let Endpoint::Udp { host, port } | Endpoint::Stream { host, port } = &mut endpoint {
                if let Some(new_host) = overrides.host {
                    *host = new_host;
                }
                if let Some(new_port) = overrides.port {
                    *port = new_port;
                }
            }
            if let Some(new_timeout) = overrides.timeout {
                timeout = new_timeout;
            }
        }
        let connection = ControlConnection::open(name, &endpoint, timeout)?;
        info!(
            target: CLIENT_TARGET,
            connection = name,
            endpoint = %endpoint,
            "control connection opened"
        );
        self.connections.push(connection);
        Ok(())
    }

    /// Sends a command over the named connection.
    ///
    /// Never returns `Err`: an unknown name yields a
    /// [`ResponseCode::NotConnected`] reply, and transport failures map onto
    /// the other client-local codes.
    pub fn send(&mut self, name: &str, command: &str, timeout: Option<Duration>) -> CommandReply {
        let Some(connection) = self.connection_mut(name) else {
            warn!(
                target: CLIENT_TARGET,
                connection = name,
                "send on an unknown connection"
            );
            return CommandReply::local(ResponseCode::NotConnected);
        };
        connection.send(command, timeout)
    }

    /// Queries a server property over the named connection.
    pub fn query(&mut self, name: &str, kind: QueryKind, timeout: Option<Duration>) -> CommandReply {
        let Some(connection) = self.connection_mut(name) else {
            return CommandReply::local(ResponseCode::NotConnected);
        };
        connection.query(kind, timeout)
    }

    /// Adds a connection name to the group for `keyword`.
    ///
    /// [`WILDCARD_GROUP`] collects the fallback members used when a
    /// multicast command's keyword matches no specific group. Repeated joins
    /// are idempotent.
    pub fn join_group(&mut self, keyword: &str, connection: &str) {
        let index = match self
            .groups
            .iter()
            .position(|group| group.keyword == keyword)
        {
            Some(index) => index,
            None => {
                self.groups.push(Group {
                    keyword: keyword.to_owned(),
                    members: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[index];
        if !group.members.iter().any(|member| member == connection) {
            group.members.push(connection.to_owned());
        }
    }

    /// Fire-and-forget sends `command` to every member of its group.
    ///
    /// The group is chosen by the command's first whitespace token, falling
    /// back to [`WILDCARD_GROUP`]. Returns the number of members the command
    /// was sent to.
    ///
    /// # Errors
    ///
    /// Returns [`MulticastError::NoGroup`] when neither a matching group nor
    /// a wildcard group exists.
    pub fn send_multicast(&mut self, command: &str) -> Result<usize, MulticastError> {
        let keyword = command.split_whitespace().next().unwrap_or_default();
        let group = self
            .groups
            .iter()
            .find(|group| group.keyword == keyword)
            .or_else(|| {
                self.groups
                    .iter()
                    .find(|group| group.keyword == WILDCARD_GROUP)
            })
            .ok_or_else(|| MulticastError::NoGroup {
                keyword: keyword.to_owned(),
            })?;

        let members: Vec<String> = group.members.clone();
        let mut sent = 0;
        for member in &members {
            let Some(connection) = self.connection_mut(member) else {
                debug!(
                    target: CLIENT_TARGET,
                    connection = %member,
                    "group member has no live connection"
                );
                continue;
            };
            connection.send(command, Some(Duration::ZERO));
            sent += 1;
        }
        Ok(sent)
    }

    /// Drops the named connection, releasing any claimed endpoint path.
    ///
    /// Returns whether a connection was actually removed. Group memberships
    /// stay; a later connection under the same name rejoins them.
    pub fn disconnect(&mut self, name: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|connection| connection.name() != name);
        before != self.connections.len()
    }

    /// Drops every connection.
    pub fn disconnect_all(&mut self) {
        self.connections.clear();
    }

    /// Names of the registered connections, in registration order.
    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.iter().map(ControlConnection::name)
    }

    fn connection(&self, name: &str) -> Option<&ControlConnection> {
        self.connections
            .iter()
            .find(|connection| connection.name() == name)
    }

    fn connection_mut(&mut self, name: &str) -> Option<&mut ControlConnection> {
        self.connections
            .iter_mut()
            .find(|connection| connection.name() == name)
    }
}

/// Errors surfaced while multicasting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MulticastError {
    /// No group matched the command keyword and no wildcard group exists.
    #[error("no multicast group matches '{keyword}'")]
    NoGroup {
        /// Keyword that matched nothing.
        keyword: String,
    },
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use std::net::UdpSocket;
    use std::time::Duration;

    use rstest::{fixture, rstest};

    use opcon_proto::{Message, MessageType};

    use super::*;

    struct FakeServer {
        socket: UdpSocket,
        endpoint: Endpoint,
    }

    impl FakeServer {
        fn recv_command(&self) -> Message {
            self.socket
                .set_read_timeout(Some(Duration::from_secs(5)))
                .expect("read timeout");
            let mut buffer = [0_u8; 512];
            let (len, _) = self.socket.recv_from(&mut buffer).expect("datagram");
            Message::decode(&buffer[..len]).expect("decode")
        }
    }

    #[fixture]
    fn server() -> FakeServer {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake server");
        let port = socket.local_addr().expect("addr").port();
        FakeServer {
            socket,
            endpoint: Endpoint::udp("127.0.0.1", port),
        }
    }

    struct PortOverride(u16);

    impl OverrideSource for PortOverride {
        fn overrides_for(&self, _name: &str) -> Option<opcon_config::ConsoleOverrides> {
            Some(opcon_config::ConsoleOverrides {
                port: Some(self.0),
                ..Default::default()
            })
        }
    }

    #[rstest]
    fn overrides_redirect_the_connection_port(server: FakeServer) {
        let Endpoint::Udp { port, .. } = &server.endpoint else {
            panic!("udp fixture");
        };
        let port = *port;
        let mut client = ControlClient::new();
        // The configured target points at a dead port; the override fixes it.
        client
            .connect_with_overrides(
                "trace",
                &Endpoint::udp("127.0.0.1", 1),
                &PortOverride(port),
            )
            .expect("connect via override");
        client.send("trace", "ping", Some(Duration::ZERO));
        assert_eq!(server.recv_command().payload_text(), "ping");
    }

    #[rstest]
    fn duplicate_names_are_rejected(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("first");
        let error = client
            .connect("trace", &server.endpoint)
            .expect_err("duplicate");
        assert!(matches!(error, ConnectError::DuplicateName { .. }));
    }

    #[rstest]
    fn sends_on_unknown_names_report_not_connected(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("connect");
        let reply = client.send("other", "ping", None);
        assert_eq!(reply.code, ResponseCode::NotConnected);
    }

    #[rstest]
    fn multicast_routes_by_the_first_token(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("connect");
        client.join_group("loglevel", "trace");

        let sent = client
            .send_multicast("loglevel set 3")
            .expect("group exists");
        assert_eq!(sent, 1);

        let request = server.recv_command();
        assert_eq!(request.kind, MessageType::ControlCommand);
        assert!(!request.response_needed());
        assert_eq!(request.payload_text(), "loglevel set 3");
    }

    #[test]
    fn multicast_reaches_every_group_member_and_nobody_else() {
        let first = server();
        let second = server();
        let outsider = server();

        let mut client = ControlClient::new();
        client.connect("first", &first.endpoint).expect("first");
        client.connect("second", &second.endpoint).expect("second");
        client
            .connect("outsider", &outsider.endpoint)
            .expect("outsider");
        client.join_group("status", "first");
        client.join_group("status", "second");

        let sent = client.send_multicast("status now").expect("group");
        assert_eq!(sent, 2);
        assert_eq!(first.recv_command().payload_text(), "status now");
        assert_eq!(second.recv_command().payload_text(), "status now");

        outsider
            .socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .expect("read timeout");
        let mut buffer = [0_u8; 64];
        assert!(outsider.socket.recv_from(&mut buffer).is_err());
    }

    #[rstest]
    fn multicast_falls_back_to_the_wildcard_group(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("connect");
        client.join_group(WILDCARD_GROUP, "trace");

        let sent = client.send_multicast("shutdown").expect("wildcard");
        assert_eq!(sent, 1);
        assert_eq!(server.recv_command().payload_text(), "shutdown");
    }

    #[test]
    fn multicast_without_any_group_errors() {
        let mut client = ControlClient::new();
        let error = client.send_multicast("shutdown").expect_err("no group");
        assert_eq!(
            error,
            MulticastError::NoGroup {
                keyword: "shutdown".to_owned()
            }
        );
    }

    #[rstest]
    fn members_without_live_connections_are_skipped(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("connect");
        client.join_group(WILDCARD_GROUP, "trace");
        client.join_group(WILDCARD_GROUP, "gone");

        let sent = client.send_multicast("status").expect("wildcard");
        assert_eq!(sent, 1);
    }

    #[rstest]
    fn disconnect_removes_the_named_connection(server: FakeServer) {
        let mut client = ControlClient::new();
        client.connect("trace", &server.endpoint).expect("connect");
        assert!(client.disconnect("trace"));
        assert!(!client.disconnect("trace"));
        assert_eq!(client.connection_names().count(), 0);
    }
}
