/// Message code (RFC 7252 section 12.1)
///
/// A 3-bit class and a 5-bit detail, written `c.dd`.
///
/// |class|meaning|
/// |---|---|
/// |`0`|request (or empty message when detail is also `0`)|
/// |`2`|success response|
/// |`4`|client error response|
/// |`5`|server error response|
/// |`7`|signaling (stream transports only)|
///
/// ```
/// use newt_msg::Code;
///
/// assert_eq!(Code { class: 2, detail: 5 }.to_string(), "2.05".to_string())
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Code {
  /// Request, success, client error, server error
  pub class: u8,
  /// Integer in `[0, 32)` refining the class
  pub detail: u8,
}

/// Whether a code makes a message a request, a response or an empty message
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CodeKind {
  /// `0.00`; ACKs, RSTs and pings
  Empty,
  /// `0.01`..`0.31`
  Request,
  /// classes 2 through 5
  Response,
  /// class 7, meaningful only over stream transports
  Signaling,
  /// classes 1 and 6
  Reserved,
}

impl Code {
  /// The empty code `0.00`
  pub const EMPTY: Self = Self::new(0, 0);

  /// Create a new Code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Classify this code
  ///
  /// ```
  /// use newt_msg::{Code, CodeKind};
  ///
  /// assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
  /// assert_eq!(Code::new(0, 1).kind(), CodeKind::Request);
  /// assert_eq!(Code::new(4, 4).kind(), CodeKind::Response);
  /// assert_eq!(Code::new(6, 0).kind(), CodeKind::Reserved);
  /// ```
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | (2..=5, _) => CodeKind::Response,
      | (7, _) => CodeKind::Signaling,
      | _ => CodeKind::Reserved,
    }
  }

  /// Is this a 2.xx code?
  pub fn is_success(&self) -> bool {
    self.class == 2
  }

  /// Is this a 4.xx or 5.xx code?
  pub fn is_error(&self) -> bool {
    self.class == 4 || self.class == 5
  }
}

impl core::fmt::Display for Code {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}.{:02}", self.class, self.detail)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    let class = b >> 5;
    let detail = b & 0b0011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    let class = code.class << 5;
    let detail = code.detail & 0b0011111;

    class | detail
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_code() {
    let byte = 0b_010_00101u8;
    let code = Code::from(byte);
    assert_eq!(code, Code { class: 2, detail: 5 })
  }

  #[test]
  fn serialize_code() {
    let code = Code { class: 4, detail: 4 };
    let actual: u8 = code.into();
    assert_eq!(actual, 0b_100_00100u8);
  }

  #[test]
  fn display_pads_detail() {
    assert_eq!(Code::new(2, 31).to_string(), "2.31");
    assert_eq!(Code::new(0, 1).to_string(), "0.01");
  }
}
