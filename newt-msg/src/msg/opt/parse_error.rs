/// Why the options section of a message could not be read
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum OptParseError {
  /// The bytes ran out in the middle of an option header or value
  UnexpectedEndOfStream,

  /// An option header used the delta nibble 15, which only the payload marker may
  OptionDeltaReservedValue(u8),

  /// An option header used the length nibble 15
  ValueLengthReservedValue(u8),

  /// `previous + delta` is not a 16 bit option number
  #[allow(missing_docs)]
  OptionNumberOverflow { previous: u32, delta: u32 },
}

impl OptParseError {
  /// Shorthand for [`OptParseError::UnexpectedEndOfStream`]
  pub fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}

impl core::fmt::Display for OptParseError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::UnexpectedEndOfStream => write!(f, "truncated option"),
      | Self::OptionDeltaReservedValue(n) => write!(f, "reserved option delta nibble {}", n),
      | Self::ValueLengthReservedValue(n) => write!(f, "reserved option length nibble {}", n),
      | Self::OptionNumberOverflow { previous, delta } => {
        write!(f, "option {} + delta {} overflows", previous, delta)
      },
    }
  }
}
