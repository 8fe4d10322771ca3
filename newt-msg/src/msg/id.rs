use super::MessageParseError;
use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;
#[allow(unused_imports)]
use crate::Token;

/// # Message ID
///
/// 16-bit unsigned integer in network byte order, used to
/// detect duplicated datagrams and to match [`Type::Ack`](crate::Type::Ack)
/// and [`Type::Reset`](crate::Type::Reset) messages to the message they answer.
///
/// Ids are scoped to a single peer and a single direction; requests and
/// responses are correlated by [`Token`] instead.
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Debug, Eq, Ord, Default)]
pub struct Id(pub u16);

impl Id {
  /// Create an Id from a big-endian 2-byte unsigned int
  pub fn from_be_bytes(bs: [u8; 2]) -> Self {
    Self(u16::from_be_bytes(bs))
  }

  /// The id following this one, wrapping at `u16::MAX`
  pub fn next(self) -> Self {
    Self(self.0.wrapping_add(1))
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}

impl<Bytes: AsRef<[u8]>> TryConsumeBytes<Bytes> for Id {
  type Error = MessageParseError;

  fn try_consume_bytes(bytes: &mut Cursor<Bytes>) -> Result<Self, Self::Error> {
    match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(Id::from_be_bytes([a, b])),
      | _ => Err(MessageParseError::eof()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn next_wraps() {
    assert_eq!(Id(1).next(), Id(2));
    assert_eq!(Id(u16::MAX).next(), Id(0));
  }
}
