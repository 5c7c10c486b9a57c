//! Declarative configuration for console transport endpoints.

use std::fmt;
use std::fs::DirBuilder;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::defaults::DEFAULT_PORT;
use crate::runtime::{RuntimeDirError, runtime_dir};

/// Transport endpoint a console server binds to or a client targets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Endpoint {
    /// Connectionless UDP endpoint serving any number of remote senders.
    Udp {
        /// Host name or address to bind or resolve.
        host: String,
        /// Base port; the bind layer probes upward on conflict.
        port: u16,
    },
    /// Single-session TCP stream endpoint for interactive use.
    Stream {
        /// Host name or address to bind or resolve.
        host: String,
        /// Base port; the bind layer probes upward on conflict.
        port: u16,
    },
    /// Filesystem-backed datagram endpoint named within the runtime directory.
    Local {
        /// Logical endpoint name; the socket path derives from it.
        name: String,
    },
}

impl Endpoint {
    /// Builds a UDP endpoint.
    #[must_use]
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::Udp {
            host: host.into(),
            port,
        }
    }

    /// Builds a stream endpoint.
    #[must_use]
    pub fn stream(host: impl Into<String>, port: u16) -> Self {
        Self::Stream {
            host: host.into(),
            port,
        }
    }

    /// Builds a local datagram endpoint.
    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        Self::Local { name: name.into() }
    }

    /// Ensures the runtime directory exists for local endpoints.
    ///
    /// Network endpoints need no filesystem preparation.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointPrepareError`] when the runtime directory cannot be
    /// derived or created.
    pub fn prepare_filesystem(&self) -> Result<(), EndpointPrepareError> {
        let Self::Local { .. } = self else {
            return Ok(());
        };
        let dir = runtime_dir()?;
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        if let Err(source) = builder.create(&dir)
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(EndpointPrepareError::CreateDirectory {
                path: dir.display().to_string(),
                source,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp { host, port } => write!(formatter, "udp://{host}:{port}"),
            Self::Stream { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Local { name } => write!(formatter, "local://{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parses `udp://host[:port]`, `tcp://host[:port]`, or `local://name`.
    ///
    /// An omitted network port falls back to [`DEFAULT_PORT`].
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "udp" | "tcp" => {
                let host = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingHost(input.to_owned()))?;
                let port = url.port().unwrap_or(DEFAULT_PORT);
                if url.scheme() == "udp" {
                    Ok(Self::udp(host, port))
                } else {
                    Ok(Self::stream(host, port))
                }
            }
            "local" => {
                let name = url
                    .host_str()
                    .ok_or_else(|| EndpointParseError::MissingName(input.to_owned()))?;
                Ok(Self::local(name))
            }
            other => Err(EndpointParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

/// Errors encountered while parsing an [`Endpoint`] from text.
#[derive(Debug, Error)]
pub enum EndpointParseError {
    /// Scheme was not recognised.
    #[error("unsupported endpoint scheme '{0}'")]
    UnsupportedScheme(String),
    /// Network host name was missing.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// Local endpoint name was absent.
    #[error("missing local endpoint name in '{0}'")]
    MissingName(String),
    /// URL failed to parse.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Errors raised when preparing endpoint directories.
#[derive(Debug, Error)]
pub enum EndpointPrepareError {
    /// The runtime directory could not be derived.
    #[error(transparent)]
    Runtime(#[from] RuntimeDirError),
    /// Failed to create the runtime directory.
    #[error("failed to create runtime directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
