//! Reply codes and the terminal reply value returned by every send.

use std::fmt;

use opcon_proto::DispatchStatus;

/// Outcome of one command send, remote or client-local.
///
/// The first three variants echo the remote dispatch status; the rest are
/// produced by the client itself without any server involvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// The remote callback ran.
    Succeeded,
    /// The server resolved no command for the keyword.
    CommandNotFound,
    /// The argument count fell outside the command's declared range.
    InvalidArgCount,
    /// The request could not be transmitted.
    SendFailed,
    /// Waiting on the socket failed before any reply arrived.
    PollFailed,
    /// Receiving the reply failed.
    ReceiveFailed,
    /// No matching reply arrived within the effective timeout.
    TimedOut,
    /// No connection is registered under the requested name.
    NotConnected,
}

impl ResponseCode {
    /// True for the one code that means the command actually ran.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub(crate) fn from_status(status: DispatchStatus) -> Self {
        match status {
            DispatchStatus::Succeeded => Self::Succeeded,
            DispatchStatus::NotFound => Self::CommandNotFound,
            DispatchStatus::InvalidArgCount => Self::InvalidArgCount,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Succeeded => "succeeded",
            Self::CommandNotFound => "command not found",
            Self::InvalidArgCount => "invalid argument count",
            Self::SendFailed => "send failed",
            Self::PollFailed => "poll failed",
            Self::ReceiveFailed => "receive failed",
            Self::TimedOut => "timed out",
            Self::NotConnected => "not connected",
        };
        formatter.write_str(text)
    }
}

/// Terminal reply for one send; sends never surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Outcome code, remote or client-local.
    pub code: ResponseCode,
    /// Command output, present when the server echoed any back.
    pub payload: Option<String>,
}

impl CommandReply {
    /// Builds a client-local reply carrying no payload.
    #[must_use]
    pub fn local(code: ResponseCode) -> Self {
        Self {
            code,
            payload: None,
        }
    }
}
