use super::MessageParseError;

/// Message type (RFC 7252 section 3)
///
/// Confirmable messages are retransmitted until acknowledged,
/// non-confirmable messages are sent once.
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Fire-and-forget; repeated sensor readings are the typical use.
  Non,
  /// Requires exactly one [`Type::Ack`] or [`Type::Reset`] from the recipient
  /// and is retransmitted until one arrives.
  Con,
  /// Acknowledges a [`Type::Con`] message with the same [`Id`](crate::Id).
  /// May carry a piggybacked response.
  Ack,
  /// The recipient got the message but lacks the context to process it
  /// (e.g. it rebooted). Provoking one with an empty CON is a "CoAP ping".
  Reset,
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    match t {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}

impl core::fmt::Display for Type {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let s = match self {
      | Type::Con => "CON",
      | Type::Non => "NON",
      | Type::Ack => "ACK",
      | Type::Reset => "RST",
    };
    f.write_str(s)
  }
}
