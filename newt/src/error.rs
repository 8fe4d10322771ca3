use std::io;
use std::net::SocketAddr;

use newt_msg::{Id, MessageParseError, MessageToBytesError, Token};

use crate::block;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// We were sending a message
  Sending(SocketAddr, Id, Token),
  /// We were handling bytes received from a peer
  Receiving(SocketAddr),
  /// We were waiting on the outcome of the exchange with this token
  Waiting(Token),
  /// We were firing timers
  Ticking,
  /// No particular context
  None,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what(self, what: What) -> Error {
    Error { when: self, what }
  }
}

/// Ways a message can be unacceptable as a CoAP message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
  /// Bytes could not be parsed as a message
  FromBytes(MessageParseError),
  /// A message could not be serialized
  ToBytes(MessageToBytesError),
  /// The token is already in use by another
  /// exchange with the same peer
  TokenCollision(Token),
}

/// A contextless error with some additional debug data attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum What {
  /// A message could not be parsed, serialized or accepted
  MalformedMessage(Malformed),
  /// The transport failed to send
  Transport(io::ErrorKind),
  /// Blocks of a block-wise transfer arrived out of
  /// order, changed size or were otherwise inconsistent
  BlockSequence(block::Error),
  /// A CONfirmable message was sent many times without an ACKnowledgement,
  /// or no response arrived within the exchange lifetime.
  ExchangeTimeout,
  /// The exchange was cancelled
  Cancelled,
  /// The caller stopped waiting for the outcome of the exchange;
  /// the exchange is cancelled.
  DeadlineElapsed,
  /// The peer rejected our message with a RST
  Reset,
  /// An observation went silent for longer than the
  /// freshness of its latest notification
  ObservationExpired,
  /// The engine was dropped before the exchange completed
  EngineStopped,
  /// The clock failed to provide timing.
  ///
  /// See [`embedded_time::clock::Error`]
  ClockError,
}

impl What {
  fn describe(&self) -> String {
    match self {
      | What::MalformedMessage(Malformed::FromBytes(e)) => format!("malformed message: {}", e),
      | What::MalformedMessage(Malformed::ToBytes(e)) => format!("message cannot be serialized: {}", e),
      | What::MalformedMessage(Malformed::TokenCollision(t)) => format!("token {} already in use", t),
      | What::Transport(kind) => format!("transport error: {:?}", kind),
      | What::BlockSequence(e) => format!("block-wise transfer failed: {}", e),
      | What::ExchangeTimeout => "exchange timed out".into(),
      | What::Cancelled => "exchange cancelled".into(),
      | What::DeadlineElapsed => "gave up waiting for exchange".into(),
      | What::Reset => "peer reset the exchange".into(),
      | What::ObservationExpired => "observation expired".into(),
      | What::EngineStopped => "engine stopped".into(),
      | What::ClockError => "clock failed to provide timing".into(),
    }
  }
}

/// An error encounterable from within the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
  /// What happened?
  pub what: What,
  /// What were we doing when it happened?
  pub when: When,
}

impl Error {
  /// Create an error without context
  pub fn new(what: What) -> Self {
    When::None.what(what)
  }

  /// Would retrying the same operation plausibly succeed?
  ///
  /// Transport failures and timeouts (ours or the caller's) are transient;
  /// malformed messages, resets and cancellations are not.
  ///
  /// ```
  /// use newt::error::{Error, What};
  ///
  /// assert!(Error::new(What::ExchangeTimeout).is_retriable());
  /// assert!(!Error::new(What::Cancelled).is_retriable());
  /// ```
  pub fn is_retriable(&self) -> bool {
    matches!(self.what,
             What::Transport(_) | What::ExchangeTimeout | What::DeadlineElapsed)
  }

  /// Is this `FromBytes`?
  pub fn message_parse_error(&self) -> Option<&MessageParseError> {
    match self.what {
      | What::MalformedMessage(Malformed::FromBytes(ref e)) => Some(e),
      | _ => None,
    }
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self.when {
      | When::Sending(addr, id, token) => {
        write!(f, "{} (sending {:?} {} to {})", self.what.describe(), id, token, addr)
      },
      | When::Receiving(addr) => write!(f, "{} (receiving from {})", self.what.describe(), addr),
      | When::Waiting(token) => write!(f, "{} (waiting on {})", self.what.describe(), token),
      | When::Ticking => write!(f, "{} (firing timers)", self.what.describe()),
      | When::None => write!(f, "{}", self.what.describe()),
    }
  }
}

impl std::error::Error for Error {}

impl From<MessageParseError> for What {
  fn from(e: MessageParseError) -> Self {
    What::MalformedMessage(Malformed::FromBytes(e))
  }
}

impl From<MessageToBytesError> for What {
  fn from(e: MessageToBytesError) -> Self {
    What::MalformedMessage(Malformed::ToBytes(e))
  }
}

impl From<block::Error> for What {
  fn from(e: block::Error) -> Self {
    What::BlockSequence(e)
  }
}

impl From<&io::Error> for What {
  fn from(e: &io::Error) -> Self {
    What::Transport(e.kind())
  }
}

impl From<embedded_time::clock::Error> for What {
  fn from(_: embedded_time::clock::Error) -> Self {
    What::ClockError
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_includes_context() {
    let addr: SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let e = When::Receiving(addr).what(What::from(MessageParseError::InvalidTokenLength(9)));
    let s = e.to_string();
    assert!(s.starts_with("malformed message"));
    assert!(s.ends_with("(receiving from 127.0.0.1:5683)"));
    assert_eq!(e.message_parse_error(),
               Some(&MessageParseError::InvalidTokenLength(9)));
  }

  #[test]
  fn retriable() {
    assert!(Error::new(What::Transport(io::ErrorKind::ConnectionRefused)).is_retriable());
    assert!(!Error::new(What::Reset).is_retriable());
    assert!(!Error::new(What::MalformedMessage(Malformed::TokenCollision(Token::default()))).is_retriable());
  }
}
