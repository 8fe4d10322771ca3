use newt_msg::Code;

/// Request method
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Method(pub(crate) Code);

impl core::fmt::Debug for Method {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self.0.detail {
      | 1 => write!(f, "GET"),
      | 2 => write!(f, "POST"),
      | 3 => write!(f, "PUT"),
      | 4 => write!(f, "DELETE"),
      | 5 => write!(f, "FETCH"),
      | 6 => write!(f, "PATCH"),
      | 7 => write!(f, "iPATCH"),
      | _ => write!(f, "{}", self.0),
    }
  }
}

impl core::fmt::Display for Method {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    core::fmt::Debug::fmt(self, f)
  }
}

impl Method {
  /// Get the raw code of this method
  pub fn code(self) -> Code {
    self.0
  }

  /// Does this method permit an Observe option (RFC7641 section 2)?
  pub fn is_observable(self) -> bool {
    self == Method::GET || self == Method::FETCH
  }

  crate::code!(rfc7252("4.1")    EMPTY  = Method(0 * 00));
  crate::code!(rfc7252("5.8.1")  GET    = Method(0 * 01));
  crate::code!(rfc7252("5.8.2")  POST   = Method(0 * 02));
  crate::code!(rfc7252("5.8.3")  PUT    = Method(0 * 03));
  crate::code!(rfc7252("5.8.4")  DELETE = Method(0 * 04));
  crate::code!(rfc8132("2")      FETCH  = Method(0 * 05));
  crate::code!(rfc8132("3")      PATCH  = Method(0 * 06));
  crate::code!(rfc8132("3")      IPATCH = Method(0 * 07));
}

impl From<Code> for Method {
  fn from(c: Code) -> Self {
    Method(c)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display() {
    assert_eq!(Method::GET.to_string(), "GET");
    assert_eq!(Method::IPATCH.to_string(), "iPATCH");
    assert_eq!(Method(Code::new(0, 31)).to_string(), "0.31");
  }

  #[test]
  fn observable() {
    assert!(Method::GET.is_observable());
    assert!(Method::FETCH.is_observable());
    assert!(!Method::POST.is_observable());
  }
}
