//! Frame encoding and decoding for the console wire protocol.

use thiserror::Error;

/// Length of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Protocol version reported in reply to [`MessageType::QueryVersion`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Default payload ceiling for UDP transports.
pub const DEFAULT_UDP_PAYLOAD: usize = 4 * 1024;

/// Default payload ceiling for filesystem-backed datagram transports.
pub const DEFAULT_LOCAL_PAYLOAD: usize = 64 * 1024;

/// Hard upper bound on any negotiated payload size.
pub const MAX_PAYLOAD: usize = 64 * 1024;

const OFFSET_TYPE: usize = 0;
const OFFSET_RESPONSE: usize = 1;
const OFFSET_DATA: usize = 2;
const OFFSET_SEQUENCE: usize = 4;

/// Frame types carried in header byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Ask the server for its protocol version.
    QueryVersion = 1,
    /// Ask the server for its negotiated maximum payload size.
    QueryPayloadSize = 2,
    /// Ask the server for its logical name.
    QueryName = 3,
    /// Ask for the human-readable command listing.
    QueryCommandsHuman = 4,
    /// Ask for the machine-readable keyword list.
    QueryCommandsMachine = 5,
    /// Server-initiated notice that the payload ceiling has grown.
    UpdatePayloadSize = 6,
    /// A command typed by an interactive user.
    UserCommand = 7,
    /// Terminal reply to a dispatched command.
    CommandComplete = 8,
    /// Ask for the server banner.
    QueryBanner = 9,
    /// Ask for the server title.
    QueryTitle = 10,
    /// Ask for the interactive prompt string.
    QueryPrompt = 11,
    /// A command issued programmatically by a control client.
    ControlCommand = 12,
}

impl MessageType {
    /// Parses a wire byte into a message type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownType`] for bytes outside the enumeration.
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::QueryVersion),
            2 => Ok(Self::QueryPayloadSize),
            3 => Ok(Self::QueryName),
            4 => Ok(Self::QueryCommandsHuman),
            5 => Ok(Self::QueryCommandsMachine),
            6 => Ok(Self::UpdatePayloadSize),
            7 => Ok(Self::UserCommand),
            8 => Ok(Self::CommandComplete),
            9 => Ok(Self::QueryBanner),
            10 => Ok(Self::QueryTitle),
            11 => Ok(Self::QueryPrompt),
            12 => Ok(Self::ControlCommand),
            other => Err(CodecError::UnknownType { value: other }),
        }
    }

    /// Returns true for the query types answered without invoking callbacks.
    #[must_use]
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Self::QueryVersion
                | Self::QueryPayloadSize
                | Self::QueryName
                | Self::QueryCommandsHuman
                | Self::QueryCommandsMachine
                | Self::QueryBanner
                | Self::QueryTitle
                | Self::QueryPrompt
        )
    }
}

/// A single wire frame.
///
/// Header bytes 1 and 2 are context dependent: on a request they carry the
/// response-needed and data-needed flags; on a reply byte 1 carries the
/// remote [`DispatchStatus`](crate::DispatchStatus) and byte 2 records
/// whether command output follows in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Frame type (header byte 0).
    pub kind: MessageType,
    /// Response slot (header byte 1).
    pub response: u8,
    /// Data slot (header byte 2).
    pub data: u8,
    /// Correlation sequence number (header bytes 4..8, big-endian).
    pub sequence: u32,
    /// Text payload following the header.
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a request frame.
    #[must_use]
    pub fn request(
        kind: MessageType,
        response_needed: bool,
        data_needed: bool,
        sequence: u32,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            response: u8::from(response_needed),
            data: u8::from(data_needed),
            sequence,
            payload: payload.into(),
        }
    }

    /// Builds a reply frame carrying a status in the response slot.
    #[must_use]
    pub fn reply(
        kind: MessageType,
        status: u8,
        sequence: u32,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let payload = payload.into();
        Self {
            kind,
            response: status,
            data: u8::from(!payload.is_empty()),
            sequence,
            payload,
        }
    }

    /// True when the sender expects a reply to this frame.
    #[must_use]
    pub fn response_needed(&self) -> bool {
        self.response != 0
    }

    /// True when the sender wants command output echoed back.
    #[must_use]
    pub fn data_needed(&self) -> bool {
        self.data != 0
    }

    /// Serialises the frame into header plus payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.push(self.kind as u8);
        frame.push(self.response);
        frame.push(self.data);
        frame.push(0);
        frame.extend_from_slice(&self.sequence.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    /// Deserialises a frame received from a datagram.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ShortHeader`] when fewer than [`HEADER_LEN`]
    /// bytes are present and [`CodecError::UnknownType`] for an
    /// unrecognised type byte.
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        if frame.len() < HEADER_LEN {
            return Err(CodecError::ShortHeader { len: frame.len() });
        }
        let kind = MessageType::from_wire(frame[OFFSET_TYPE])?;
        let sequence = u32::from_be_bytes([
            frame[OFFSET_SEQUENCE],
            frame[OFFSET_SEQUENCE + 1],
            frame[OFFSET_SEQUENCE + 2],
            frame[OFFSET_SEQUENCE + 3],
        ]);
        Ok(Self {
            kind,
            response: frame[OFFSET_RESPONSE],
            data: frame[OFFSET_DATA],
            sequence,
            payload: frame[HEADER_LEN..].to_vec(),
        })
    }

    /// Returns the payload interpreted as UTF-8, replacing invalid bytes.
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Errors surfaced while decoding a wire frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The datagram was shorter than the fixed header.
    #[error("frame of {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    ShortHeader {
        /// Bytes actually received.
        len: usize,
    },
    /// Header byte 0 did not name a known message type.
    #[error("unknown message type {value}")]
    UnknownType {
        /// The offending type byte.
        value: u8,
    },
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    #[test]
    fn round_trip_preserves_every_field() {
        let message = Message::request(
            MessageType::ControlCommand,
            true,
            false,
            0xDEAD_BEEF,
            "loglevel set 3".as_bytes().to_vec(),
        );
        let decoded = Message::decode(&message.encode()).expect("decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_preserves_empty_payload() {
        let message = Message::request(MessageType::QueryVersion, true, true, 1, Vec::new());
        let decoded = Message::decode(&message.encode()).expect("decode");
        assert_eq!(decoded, message);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn sequence_is_big_endian_on_the_wire() {
        let message = Message::request(MessageType::UserCommand, false, false, 0x0102_0304, vec![]);
        let frame = message.encode();
        assert_eq!(&frame[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn decode_rejects_short_frames() {
        let error = Message::decode(&[7, 0, 0]).expect_err("short frame");
        assert!(matches!(error, CodecError::ShortHeader { len: 3 }));
    }

    #[test]
    fn decode_rejects_unknown_types() {
        let mut frame = Message::request(MessageType::UserCommand, false, false, 9, vec![]).encode();
        frame[0] = 200;
        let error = Message::decode(&frame).expect_err("unknown type");
        assert!(matches!(error, CodecError::UnknownType { value: 200 }));
    }

    #[test]
    fn reply_records_payload_presence_in_data_slot() {
        let with_output = Message::reply(MessageType::CommandComplete, 0, 5, "ok\n");
        assert!(with_output.data_needed());
        let silent = Message::reply(MessageType::CommandComplete, 0, 5, "");
        assert!(!silent.data_needed());
    }

    #[test]
    fn query_classification_excludes_commands() {
        assert!(MessageType::QueryBanner.is_query());
        assert!(MessageType::QueryPayloadSize.is_query());
        assert!(!MessageType::UserCommand.is_query());
        assert!(!MessageType::ControlCommand.is_query());
        assert!(!MessageType::UpdatePayloadSize.is_query());
    }
}
