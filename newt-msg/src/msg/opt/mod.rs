use std::collections::BTreeMap;

use crate::cursor::Cursor;

/// Option parsing errors
pub mod parse_error;
pub use parse_error::*;

/// Known option numbers and typed option values
pub mod known;
pub use known::block::Block;
pub use known::content_format::ContentFormat;
pub use known::observe;

/// Largest option value (or delta) encodable with the 14 escape:
/// `0xFFFF + 269`
pub const MAX_OPT_LEN: usize = 65_804;

/// Options of a message, ordered by [`OptNumber`].
///
/// An option number maps to every value it occurs with, in the order they
/// were added (or parsed). Keeping options in a map means serialization
/// always emits them in ascending number order, so equal option sets encode
/// to equal bytes.
pub type OptionMap = BTreeMap<OptNumber, Vec<OptValue>>;

/// The raw bytes of an option's value (RFC 7252 section 3.2)
///
/// Interpreting the bytes (empty, opaque, uint or string) is up to the option.
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer in the minimal number of
  /// big-endian bytes (zero is the empty value)
  ///
  /// ```
  /// use newt_msg::OptValue;
  ///
  /// assert_eq!(OptValue::uint(0).0, Vec::<u8>::new());
  /// assert_eq!(OptValue::uint(0x0102).0, vec![1, 2]);
  /// ```
  pub fn uint(n: u32) -> Self {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    Self(bytes[skip..].to_vec())
  }

  /// Interpret this value as an unsigned integer
  ///
  /// Yields `None` for values longer than 4 bytes.
  pub fn as_uint(&self) -> Option<u32> {
    if self.0.len() > 4 {
      None
    } else {
      Some(self.0.iter().fold(0u32, |n, b| (n << 8) | u32::from(*b)))
    }
  }

  /// Interpret this value as a UTF-8 string
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }
}

impl From<&str> for OptValue {
  fn from(s: &str) -> Self {
    Self(s.as_bytes().to_vec())
  }
}

impl From<Vec<u8>> for OptValue {
  fn from(v: Vec<u8>) -> Self {
    Self(v)
  }
}

/// Option number (RFC 7252 section 5.4.6)
///
/// On the wire an option carries only the difference ("delta") between its
/// number and the previous option's number; the number is the running sum.
///
/// The low bits of the number encode how an endpoint that does not
/// recognize the option must treat it:
///
/// ```text
///   0   1   2   3   4   5   6   7
/// +---+---+---+---+---+---+---+---+
/// |           | NoCacheKey| U | C |
/// +---+---+---+---+---+---+---+---+
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

/// Whether an endpoint may ignore an option it does not recognize
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptionMustBeProcessed {
  /// "Critical"; unrecognized, the message must be rejected
  Yes,
  /// "Elective"; unrecognized, the option is ignored
  No,
}

/// Whether a proxy that does not understand an option may forward it
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionUnsupportedByProxy {
  /// "Unsafe"; the proxy must answer with an error
  Error,
  /// "Safe-to-forward"
  Forward,
}

/// Whether an option participates in a proxy's cache key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WhenOptionChanges {
  /// Part of the cache key
  ResponseChanges,
  /// "NoCacheKey"
  ResponseDoesNotChange,
}

impl OptNumber {
  /// Whether or not this option may be ignored by a server
  pub fn must_be_processed(&self) -> OptionMustBeProcessed {
    if self.0 & 0b1 == 1 {
      OptionMustBeProcessed::Yes
    } else {
      OptionMustBeProcessed::No
    }
  }

  /// Whether or not this option may be forwarded blindly by
  /// a proxy that does not support processing it
  pub fn when_unsupported_by_proxy(&self) -> WhenOptionUnsupportedByProxy {
    if self.0 & 0b10 == 0b10 {
      WhenOptionUnsupportedByProxy::Error
    } else {
      WhenOptionUnsupportedByProxy::Forward
    }
  }

  /// Whether or not different values for this option should
  /// yield proxies' cached response
  pub fn when_option_changes(&self) -> WhenOptionChanges {
    if self.0 & 0b11110 == 0b11100 {
      WhenOptionChanges::ResponseDoesNotChange
    } else {
      WhenOptionChanges::ResponseChanges
    }
  }

  /// Shorthand for `self.must_be_processed() == OptionMustBeProcessed::Yes`
  pub fn is_critical(&self) -> bool {
    self.must_be_processed() == OptionMustBeProcessed::Yes
  }
}

/// Read the remainder of a delta or length nibble.
///
/// 13 and 14 escape to 1 and 2 extension bytes, 15 is reserved.
pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u32, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok(u32::from(n) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u32::from(u16::from_be_bytes([a, b])) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(u32::from(head)),
  }
}

/// Split a delta or length into its 4-bit nibble and extension bytes.
pub(crate) fn opt_len_or_delta(val: u32) -> (u8, Vec<u8>) {
  match val {
    | n if n >= 269 => (14, ((n - 269) as u16).to_be_bytes().to_vec()),
    | n if n >= 13 => (13, vec![(n - 13) as u8]),
    | n => (n as u8, vec![]),
  }
}

fn extension_len(val: usize) -> usize {
  match val {
    | n if n >= 269 => 2,
    | n if n >= 13 => 1,
    | _ => 0,
  }
}

/// Number of bytes `opts` occupy on the wire
pub(crate) fn opts_size(opts: &OptionMap) -> usize {
  let mut prev = 0u32;
  let mut size = 0usize;

  for (OptNumber(num), values) in opts {
    for value in values {
      let delta = (num - prev) as usize;
      size += 1 + extension_len(delta) + extension_len(value.0.len()) + value.0.len();
      prev = *num;
    }
  }

  size
}

/// Append the wire representation of `opts` to `bytes`
pub(crate) fn extend_bytes(opts: &OptionMap, bytes: &mut Vec<u8>) {
  let mut prev = 0u32;

  for (OptNumber(num), values) in opts {
    for value in values {
      let (del, del_bytes) = opt_len_or_delta(num - prev);
      let (len, len_bytes) = opt_len_or_delta(value.0.len() as u32);

      bytes.push((del << 4) | len);
      bytes.extend(del_bytes);
      bytes.extend(len_bytes);
      bytes.extend(value.0.iter().copied());

      prev = *num;
    }
  }
}

/// Parse options until the payload marker or the end of the buffer.
///
/// Yields the options and whether a payload marker was consumed.
pub(crate) fn consume_opts<A: AsRef<[u8]>>(bytes: &mut Cursor<A>)
                                           -> Result<(OptionMap, bool), OptParseError> {
  let mut opts = OptionMap::new();
  let mut number = 0u32;

  loop {
    let byte1 = match bytes.next() {
      | None => break Ok((opts, false)),
      | Some(0b11111111) => break Ok((opts, true)),
      | Some(b) => b,
    };

    // NOTE: the delta extension precedes the length extension
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    number = number.checked_add(delta)
                   .filter(|n| *n <= u32::from(u16::MAX))
                   .ok_or(OptParseError::OptionNumberOverflow { previous: number,
                                                                delta })?;

    let value = bytes.take_exact(len).ok_or_else(OptParseError::eof)?;

    opts.entry(OptNumber(number))
        .or_default()
        .push(OptValue(value.to_vec()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(bytes: &[u8]) -> Result<(OptionMap, bool), OptParseError> {
    consume_opts(&mut Cursor::new(bytes))
  }

  #[test]
  fn parse_opts() {
    let (opts, marker) = parse(&[0b00010001, 0b00000001]).unwrap();
    assert!(!marker);
    assert_eq!(opts.get(&OptNumber(1)), Some(&vec![OptValue(vec![1])]));

    let (opts, _) = parse(&[0b11010001, 0b00000001, 0b00000001]).unwrap();
    assert_eq!(opts.get(&OptNumber(14)), Some(&vec![OptValue(vec![1])]));

    let (opts, _) = parse(&[0b11100001, 0b00000000, 0b00000001, 0b00000001]).unwrap();
    assert_eq!(opts.get(&OptNumber(270)), Some(&vec![OptValue(vec![1])]));

    let (opts, marker) =
      parse(&[0b10110001, 0b00000001, 0b00000001, 0b00000011, 0b11111111]).unwrap();
    assert!(marker);
    assert_eq!(opts.get(&OptNumber(11)),
               Some(&vec![OptValue(vec![1]), OptValue(vec![3])]));
  }

  #[test]
  fn reserved_nibbles() {
    assert_eq!(parse(&[0b11110000]),
               Err(OptParseError::OptionDeltaReservedValue(15)));
    assert_eq!(parse(&[0b00011111]),
               Err(OptParseError::ValueLengthReservedValue(15)));
  }

  #[test]
  fn truncated_value() {
    assert_eq!(parse(&[0b00010010, 0b00000001]), Err(OptParseError::eof()));
    assert_eq!(parse(&[0b11010001]), Err(OptParseError::eof()));
  }

  #[test]
  fn number_overflow() {
    // 65000 + 65000 > 65535
    let big = ((65_000u32 - 269) as u16).to_be_bytes();
    let bytes = [0b11100000, big[0], big[1], 0b11100000, big[0], big[1]];
    assert_eq!(parse(&bytes),
               Err(OptParseError::OptionNumberOverflow { previous: 65_000,
                                                         delta: 65_000 }));
  }

  #[test]
  fn size_matches_bytes() {
    let mut opts = OptionMap::new();
    opts.insert(OptNumber(11), vec![OptValue::from("a"), OptValue(vec![0; 20])]);
    opts.insert(OptNumber(300), vec![OptValue(vec![0; 300])]);

    let mut bytes = vec![];
    extend_bytes(&opts, &mut bytes);
    assert_eq!(bytes.len(), opts_size(&opts));
    assert_eq!(parse(&bytes).unwrap().0, opts);
  }

  #[test]
  fn opt_number_qualities() {
    // critical, safe-to-fwd, cache-key
    let if_match = OptNumber(1);

    // critical, unsafe-to-fwd, cache-key
    let uri_host = OptNumber(3);

    // elective, safe-to-fwd, cache-key
    let etag = OptNumber(4);

    // elective, safe-to-fwd, no-cache-key
    let size1 = OptNumber(60);

    assert!(if_match.is_critical() && uri_host.is_critical());
    assert!(!etag.is_critical() && !size1.is_critical());

    assert_eq!(uri_host.when_unsupported_by_proxy(),
               WhenOptionUnsupportedByProxy::Error);
    assert_eq!(etag.when_unsupported_by_proxy(),
               WhenOptionUnsupportedByProxy::Forward);

    assert_eq!(etag.when_option_changes(), WhenOptionChanges::ResponseChanges);
    assert_eq!(size1.when_option_changes(),
               WhenOptionChanges::ResponseDoesNotChange);
  }

  #[test]
  fn uint_values() {
    assert_eq!(OptValue::uint(0x00_01_00_00).0, vec![1, 0, 0]);
    assert_eq!(OptValue(vec![1, 0, 0]).as_uint(), Some(0x00_01_00_00));
    assert_eq!(OptValue(vec![]).as_uint(), Some(0));
    assert_eq!(OptValue(vec![0; 5]).as_uint(), None);
  }
}
