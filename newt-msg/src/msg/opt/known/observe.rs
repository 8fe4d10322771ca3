/// Largest Observe sequence number; sequence numbers are 24 bits wide
/// and wrap around to zero.
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// Value of the Observe option in a GET or FETCH request (RFC 7641 section 2)
///
/// The observer list entry consists of the client endpoint
/// and the request's token.
#[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Action {
  /// `0`; add the client to the resource's observers
  Register,
  /// `1`; remove the client from the resource's observers
  Deregister,
}

impl Action {
  /// Interpret the uint value of an Observe option in a request
  pub fn from_uint(n: u32) -> Option<Self> {
    match n {
      | 0 => Some(Action::Register),
      | 1 => Some(Action::Deregister),
      | _ => None,
    }
  }
}

impl From<Action> for u32 {
  fn from(a: Action) -> Self {
    match a {
      | Action::Register => 0,
      | Action::Deregister => 1,
    }
  }
}
