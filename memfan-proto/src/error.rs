//! Error type shared by the text and binary parsers.

/// Error type for response parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    /// Not fatal - the caller should buffer more data and retry.
    #[error("incomplete data")]
    Incomplete,

    /// The reply does not follow the protocol.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A field that should be a decimal number is not.
    #[error("invalid number")]
    InvalidNumber,

    /// Unknown opcode in a binary packet.
    #[cfg(feature = "binary")]
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Invalid magic byte in a binary packet.
    #[cfg(feature = "binary")]
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),
}

impl ParseError {
    /// Returns true if this error only means more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_is_not_fatal() {
        assert!(ParseError::Incomplete.is_incomplete());
        assert!(!ParseError::Protocol("bad").is_incomplete());
        assert!(!ParseError::InvalidNumber.is_incomplete());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", ParseError::Incomplete), "incomplete data");
        assert_eq!(
            format!("{}", ParseError::Protocol("expected VALUE or END")),
            "protocol error: expected VALUE or END"
        );
    }
}
