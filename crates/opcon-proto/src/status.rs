//! Dispatch outcome codes echoed across the control boundary.

use thiserror::Error;

/// Outcome of resolving and dispatching a remote command.
///
/// Carried in the response slot of a [`CommandComplete`](crate::MessageType)
/// reply. These three values are the only remote outcomes a control client
/// should branch on; everything else it reports is a local transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchStatus {
    /// The command resolved uniquely and its callback ran.
    Succeeded = 0,
    /// No registered keyword matched (or the abbreviation was ambiguous).
    NotFound = 1,
    /// The keyword matched but the argument count fell outside [min, max].
    InvalidArgCount = 2,
}

impl DispatchStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    /// Parses the wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatus`] for bytes outside the enumeration.
    pub fn from_wire(value: u8) -> Result<Self, UnknownStatus> {
        match value {
            0 => Ok(Self::Succeeded),
            1 => Ok(Self::NotFound),
            2 => Ok(Self::InvalidArgCount),
            other => Err(UnknownStatus { value: other }),
        }
    }
}

/// A reply carried a status byte outside the known enumeration.
#[derive(Debug, Error)]
#[error("unknown dispatch status {value}")]
pub struct UnknownStatus {
    /// The offending status byte.
    pub value: u8,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    #[test]
    fn wire_codes_round_trip() {
        for status in [
            DispatchStatus::Succeeded,
            DispatchStatus::NotFound,
            DispatchStatus::InvalidArgCount,
        ] {
            assert_eq!(DispatchStatus::from_wire(status.as_wire()).expect("known"), status);
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(DispatchStatus::from_wire(77).is_err());
    }
}
