use newt_msg::{Code, ContentFormat, Id, Message, Payload, Token, Type};

use crate::req::Req;

pub mod code;

/// A CoAP response
///
/// ```
/// use newt::req::Req;
/// use newt::resp::{code, Resp};
/// use newt_msg::{ContentFormat, Id, Token, Type};
///
/// let mut req = Req::get("hello");
/// req.msg_mut().id = Id(1);
/// req.set_token(Token::opaque(&[1]));
///
/// let mut resp = Resp::for_request(&req);
/// resp.set_code(code::CONTENT);
/// resp.set_content_format(ContentFormat::Json);
/// resp.set_payload(r#"{"hello": "world"}"#);
///
/// // Req's default type is CON, so the response is piggybacked on the ACK.
/// assert_eq!(resp.msg().ty, Type::Ack);
/// assert_eq!(resp.msg().id, Id(1));
/// assert_eq!(resp.token(), req.token());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resp(Message);

impl Resp {
  /// Create a `2.05 Content` response to a request.
  ///
  /// A response to a CON request is piggybacked on the ACK (same id),
  /// a response to a NON request is a NON.
  pub fn for_request(req: &Req) -> Self {
    let ty = match req.msg_type() {
      | Type::Con | Type::Ack => Type::Ack,
      | Type::Non | Type::Reset => Type::Non,
    };

    Self(Message::new(ty, code::CONTENT, req.msg().id, req.token()))
  }

  /// Create a response with a code and nothing else
  pub fn new(code: Code) -> Self {
    Self(Message::new(Type::Non, code, Id(0), Token::default()))
  }

  /// Obtain a reference to the inner message
  pub fn msg(&self) -> &Message {
    &self.0
  }

  /// Obtain a mutable reference to the inner message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.0
  }

  /// Get the response code
  pub fn code(&self) -> Code {
    self.0.code
  }

  /// Change the response code
  pub fn set_code(&mut self, code: Code) {
    self.0.code = code;
  }

  /// Get the token of the request this responds to
  pub fn token(&self) -> Token {
    self.0.token
  }

  /// Sequence number of this notification, if this is a notification
  pub fn observe(&self) -> Option<u32> {
    self.0.observe()
  }

  /// Set the Content-Format of the payload
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.0.set_content_format(format)
  }

  /// Set the Max-Age option (seconds)
  pub fn set_max_age(&mut self, seconds: u32) {
    self.0.set_uint(newt_msg::opt::known::MAX_AGE, seconds);
  }

  /// Get the payload
  pub fn payload(&self) -> &[u8] {
    &self.0.payload.0
  }

  /// Get the payload as a utf8 string
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(self.payload())
  }

  /// Get an owned copy of the payload as a utf8 string
  pub fn payload_string(&self) -> Result<String, std::string::FromUtf8Error> {
    String::from_utf8(self.payload().to_vec())
  }

  /// Set the payload
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.0.payload = Payload(payload.into());
  }
}

impl From<Message> for Resp {
  fn from(msg: Message) -> Self {
    Self(msg)
  }
}

impl From<Resp> for Message {
  fn from(resp: Resp) -> Self {
    resp.0
  }
}

impl AsRef<Message> for Resp {
  fn as_ref(&self) -> &Message {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn non_request_gets_non_response() {
    let mut req = Req::get("a");
    req.non();
    let resp = Resp::for_request(&req);
    assert_eq!(resp.msg().ty, Type::Non);
    assert_eq!(resp.code(), code::CONTENT);
  }

  #[test]
  fn code_display() {
    assert_eq!(code::CONTINUE.to_string(), "2.31");
    assert_eq!(code::REQUEST_ENTITY_INCOMPLETE.to_string(), "4.08");
    assert!(code::NOT_FOUND.is_error());
  }
}
