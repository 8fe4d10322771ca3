use super::opt::parse_error::OptParseError;
use super::{Code, OptNumber};

/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Reached end of stream before parsing was finished
  UnexpectedEndOfStream,

  /// Token length was > 8
  InvalidTokenLength(u8),

  /// Error parsing option
  OptParseError(OptParseError),

  /// The message type is invalid (see [`Type`](crate::Type) for information & valid values)
  InvalidType(u8),

  /// The version bits were not `1`
  InvalidVersion(u8),

  /// Code classes 1 and 6 are reserved, and class 7 is only valid
  /// over stream transports
  ReservedCode(Code),

  /// An empty message (code `0.00`) had a token, options or a payload
  EmptyMessageNotEmpty,

  /// A payload marker (`0xFF`) was followed by a zero-length payload
  EmptyPayloadAfterMarker,

  /// The message carries a critical option that the receiver does not know
  /// (or knows, with a value length it does not accept)
  UnrecognizedCriticalOption(OptNumber),
}

impl MessageParseError {
  /// Shorthand for [`MessageParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl From<OptParseError> for MessageParseError {
  fn from(e: OptParseError) -> Self {
    Self::OptParseError(e)
  }
}

impl core::fmt::Display for MessageParseError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::UnexpectedEndOfStream => write!(f, "message truncated"),
      | Self::InvalidTokenLength(n) => write!(f, "token length {} is greater than 8", n),
      | Self::OptParseError(e) => write!(f, "invalid option: {}", e),
      | Self::InvalidType(t) => write!(f, "invalid message type {}", t),
      | Self::InvalidVersion(v) => write!(f, "unsupported CoAP version {}", v),
      | Self::ReservedCode(c) => write!(f, "reserved code {}", c),
      | Self::EmptyMessageNotEmpty => write!(f, "empty message has token, options or payload"),
      | Self::EmptyPayloadAfterMarker => write!(f, "payload marker followed by empty payload"),
      | Self::UnrecognizedCriticalOption(n) => write!(f, "unrecognized critical option {}", n.0),
    }
  }
}

impl std::error::Error for MessageParseError {}
