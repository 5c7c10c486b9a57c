//! Wire types shared by the console server and the control client.
//!
//! Every connectionless console transport exchanges [`Message`] frames: a
//! fixed 8-byte header followed by a text payload. The codec here is pure and
//! stateless; transports deliver exactly one frame per datagram, so no length
//! field is carried beyond what the transport guarantees.

mod message;
mod status;

pub use message::{
    CodecError, DEFAULT_LOCAL_PAYLOAD, DEFAULT_UDP_PAYLOAD, HEADER_LEN, MAX_PAYLOAD, Message,
    MessageType, PROTOCOL_VERSION,
};
pub use status::{DispatchStatus, UnknownStatus};
