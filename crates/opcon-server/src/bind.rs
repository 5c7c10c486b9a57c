//! Network endpoint acquisition with sequential port probing.
//!
//! The requested port is tried first; on conflict successive ports are
//! probed up to a fixed ceiling, with a single warning logged on the first
//! conflict. Exhausting the ceiling is a hard startup failure.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs, UdpSocket};

use thiserror::Error;
use tracing::{info, warn};

const BIND_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bind");

/// Binds a UDP socket near `host:port`, probing upward on conflict.
///
/// Returns the socket and the port actually bound, as reported by the OS, so
/// a requested port of 0 yields the assigned port.
///
/// # Errors
///
/// Returns [`BindError`] when the host does not resolve or every probed
/// port is taken.
pub(crate) fn bind_udp(host: &str, port: u16, probe_limit: u16) -> Result<(UdpSocket, u16), BindError> {
    probe_ports(host, port, probe_limit, |addr| {
        let socket = UdpSocket::bind(addr)?;
        let bound = socket.local_addr()?;
        Ok((socket, bound))
    })
}

/// Binds a TCP listener near `host:port`, probing upward on conflict.
///
/// # Errors
///
/// As [`bind_udp`].
pub(crate) fn bind_listener(
    host: &str,
    port: u16,
    probe_limit: u16,
) -> Result<(TcpListener, u16), BindError> {
    probe_ports(host, port, probe_limit, |addr| {
        let listener = TcpListener::bind(addr)?;
        let bound = listener.local_addr()?;
        Ok((listener, bound))
    })
}

fn probe_ports<T>(
    host: &str,
    base_port: u16,
    probe_limit: u16,
    bind: impl Fn(SocketAddr) -> io::Result<(T, SocketAddr)>,
) -> Result<(T, u16), BindError> {
    let base = resolve(host, base_port)?;
    let mut warned = false;
    for offset in 0..probe_limit.max(1) {
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };
        let mut addr = base;
        addr.set_port(port);
        match bind(addr) {
            Ok((socket, bound)) => {
                if offset > 0 {
                    info!(
                        target: BIND_TARGET,
                        requested = base_port,
                        bound = bound.port(),
                        "bound an alternate port"
                    );
                }
                return Ok((socket, bound.port()));
            }
            Err(error) if error.kind() == io::ErrorKind::AddrInUse => {
                if !warned {
                    warn!(
                        target: BIND_TARGET,
                        host,
                        port = base_port,
                        "requested port in use; probing upward"
                    );
                    warned = true;
                }
            }
            Err(source) => {
                return Err(BindError::Bind { addr, source });
            }
        }
    }
    Err(BindError::Exhausted {
        host: host.to_owned(),
        base_port,
        probe_limit,
    })
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, BindError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|source| BindError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| BindError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })
}

/// Errors surfaced while acquiring a network endpoint.
#[derive(Debug, Error)]
pub enum BindError {
    /// The host name did not resolve.
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
    /// Binding failed for a reason other than a port conflict.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Every probed port was already taken.
    #[error("no free port near {host}:{base_port} within {probe_limit} attempts")]
    Exhausted {
        /// Host being bound.
        host: String,
        /// First port probed.
        base_port: u16,
        /// Number of ports probed.
        probe_limit: u16,
    },
}
