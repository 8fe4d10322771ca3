use crate::msg::opt::{self, known, MAX_OPT_LEN};
use crate::msg::Byte1;
use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error type yielded if conversion fails
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use newt_msg::{Code, Id, Message, Token, TryIntoBytes, Type};
  ///
  /// let msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
  /// let bytes: Vec<u8> = msg.try_into_bytes().unwrap();
  /// assert_eq!(bytes, vec![0b_01_00_0000, 0b_000_00001, 0, 1]);
  /// ```
  fn try_into_bytes(&self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// The serialized message would exceed the allowed size
  #[allow(missing_docs)]
  TooLong { capacity: usize, size: usize },
  /// An option value is longer than the option format can express,
  /// or outside the length bounds of a known option
  #[allow(missing_docs)]
  OptionValueLength { number: OptNumber, len: usize },
  /// The option number does not fit in 16 bits
  OptionNumber(OptNumber),
  /// The code is not representable in 8 bits
  InvalidCode(Code),
  /// An empty message (code `0.00`) had a token, options or a payload
  EmptyMessageNotEmpty,
}

impl core::fmt::Display for MessageToBytesError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::TooLong { capacity, size } => {
        write!(f, "message of {} bytes exceeds limit of {}", size, capacity)
      },
      | Self::OptionValueLength { number, len } => {
        write!(f, "option {} cannot have a {} byte value", number.0, len)
      },
      | Self::OptionNumber(n) => write!(f, "option number {} exceeds {}", n.0, u16::MAX),
      | Self::InvalidCode(c) => write!(f, "invalid code {:?}", c),
      | Self::EmptyMessageNotEmpty => write!(f, "empty message has token, options or payload"),
    }
  }
}

impl std::error::Error for MessageToBytesError {}

impl Message {
  /// Number of bytes this message occupies as a datagram
  pub fn size(&self) -> usize {
    let header_size = 4;
    let payload_size = match self.payload.0.len() {
      | 0 => 0,
      | n => n + 1,
    };

    header_size + self.token.0.len() + opt::opts_size(&self.opts) + payload_size
  }

  /// Serialize, failing with [`MessageToBytesError::TooLong`] when the
  /// datagram would be bigger than `max` bytes
  ///
  /// ```
  /// use newt_msg::*;
  ///
  /// let mut msg = Message::new(Type::Non, Code::new(2, 5), Id(1), Token::default());
  /// msg.payload = Payload(vec![0; 100]);
  ///
  /// assert_eq!(msg.try_into_bytes_max(64),
  ///            Err(MessageToBytesError::TooLong { capacity: 64,
  ///                                               size: 105 }));
  /// ```
  pub fn try_into_bytes_max(&self, max: usize) -> Result<Vec<u8>, MessageToBytesError> {
    match self.size() {
      | size if size > max => Err(MessageToBytesError::TooLong { capacity: max,
                                                                 size }),
      | _ => self.try_into_bytes(),
    }
  }

  /// Validate the parts of a message shared by datagrams and stream frames
  pub(crate) fn check_encodable(&self) -> Result<(), MessageToBytesError> {
    if self.code.class > 7 || self.code.detail > 31 {
      return Err(MessageToBytesError::InvalidCode(self.code));
    }

    if self.is_empty()
       && (!self.token.is_empty() || !self.opts.is_empty() || !self.payload.0.is_empty())
    {
      return Err(MessageToBytesError::EmptyMessageNotEmpty);
    }

    if let Some(n) = self.opts.keys().find(|n| n.0 > u32::from(u16::MAX)) {
      return Err(MessageToBytesError::OptionNumber(*n));
    }

    self.opts
        .iter()
        .flat_map(|(n, vs)| vs.iter().map(move |v| (*n, v.0.len())))
        .find(|(n, len)| {
          *len > MAX_OPT_LEN || known::known(*n).map(|k| !k.len_ok(*len)).unwrap_or(false)
        })
        .map(|(number, len)| Err(MessageToBytesError::OptionValueLength { number, len }))
        .unwrap_or(Ok(()))
  }

  /// Append options, payload marker and payload
  pub(crate) fn extend_tail(&self, bytes: &mut Vec<u8>) {
    opt::extend_bytes(&self.opts, bytes);

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0.iter().copied());
    }
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(&self) -> Result<Vec<u8>, Self::Error> {
    self.check_encodable()?;

    let mut bytes = Vec::with_capacity(self.size());

    let byte1: u8 = Byte1 { tkl: self.token.0.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.into();

    bytes.push(byte1);
    bytes.push(code);
    bytes.extend(id);
    bytes.extend(self.token.0.iter().copied());

    self.extend_tail(&mut bytes);

    Ok(bytes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::tests::test_msg;

  macro_rules! assert_eqb_iter {
    ($actual:expr, $expected:expr) => {
      if $actual.iter().ne($expected.iter()) {
        panic!("expected {:?} to equal {:?}",
               $actual.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>(),
               $expected.into_iter()
                        .map(|b| format!("{:08b}", b))
                        .collect::<Vec<_>>())
      }
    };
  }

  fn msg_with_opt(number: u32, len: usize) -> Message {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
    msg.add(OptNumber(number), OptValue(vec![0xAB; len]));
    msg
  }

  #[test]
  fn msg() {
    let (msg, expected) = test_msg();
    let actual: Vec<u8> = msg.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
    assert_eq!(msg.size(), expected.len());
  }

  #[test]
  fn no_payload_marker() {
    let msg = Message::new(Type::Con, Code::new(0, 1), Id(0), Token::default());
    let bytes = msg.try_into_bytes().unwrap();
    assert_ne!(bytes.last(), Some(&0b11111111))
  }

  #[test]
  fn encoding_is_deterministic() {
    let mut a = Message::new(Type::Con, Code::new(0, 2), Id(3), Token::opaque(b"a"));
    a.add(known::URI_QUERY, OptValue::from("x"));
    a.set_path("a/b");
    a.set_content_format(ContentFormat::Text);

    let mut b = Message::new(Type::Con, Code::new(0, 2), Id(3), Token::opaque(b"a"));
    b.set_content_format(ContentFormat::Text);
    b.set_path("a/b");
    b.add(known::URI_QUERY, OptValue::from("x"));

    assert_eq!(a.try_into_bytes().unwrap(), b.try_into_bytes().unwrap());
  }

  // Round trips across the delta & length escape boundaries
  macro_rules! round_trip {
    ($($number:literal, $len:literal);*) => {
      $(
        paste::paste! {
          #[test]
          fn [<round_trip_opt_ $number _len_ $len>]() {
            let msg = msg_with_opt($number, $len);
            let bytes = msg.try_into_bytes().unwrap();
            assert_eq!(bytes.len(), msg.size());
            assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
          }
        }
      )*
    };
  }

  round_trip!(2, 12; 13, 13; 16, 14; 268, 268; 269, 269; 270, 270; 1000, 1000; 65000, 0; 65535, 1);

  #[test]
  fn option_number_must_fit_in_16_bits() {
    for number in [65_536, 65_805, 70_000] {
      assert_eq!(msg_with_opt(number, 1).try_into_bytes(),
                 Err(MessageToBytesError::OptionNumber(OptNumber(number))));
      assert_eq!(crate::tcp::to_bytes(&msg_with_opt(number, 1)),
                 Err(MessageToBytesError::OptionNumber(OptNumber(number))));
    }
  }

  #[test]
  fn extended_delta_bytes() {
    let bytes = msg_with_opt(13, 0).try_into_bytes().unwrap();
    assert_eq!(&bytes[4..], &[0b1101_0000, 0]);

    let bytes = msg_with_opt(269, 0).try_into_bytes().unwrap();
    assert_eq!(&bytes[4..], &[0b1110_0000, 0, 0]);

    let mut bytes = msg_with_opt(1000, 0).try_into_bytes().unwrap();
    bytes.truncate(7);
    assert_eq!(&bytes[4..], &[0b1110_0000, 0x02, 0xDB]);
  }

  #[test]
  fn known_option_length_is_enforced() {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
    msg.set(known::ETAG, OptValue(vec![0; 9]));
    assert_eq!(msg.try_into_bytes(),
               Err(MessageToBytesError::OptionValueLength { number: known::ETAG,
                                                            len: 9 }));
  }

  #[test]
  fn empty_message_must_be_empty() {
    let mut msg = Message::empty(Type::Ack, Id(1));
    msg.payload = Payload(vec![1]);
    assert_eq!(msg.try_into_bytes(),
               Err(MessageToBytesError::EmptyMessageNotEmpty));
  }
}
