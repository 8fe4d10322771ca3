use newt_msg::{ContentFormat, Id, Message, Payload, Token, Type};

/// Request methods
pub mod method;
pub use method::Method;

/// A CoAP request
///
/// The engine assigns the message [`Id`] and (unless one was set) the [`Token`]
/// when the request is sent.
///
/// ```
/// use newt::req::{Method, Req};
/// use newt_msg::Type;
///
/// let mut req = Req::post("sensors/temp");
/// req.set_payload("21.5");
///
/// assert_eq!(req.method(), Method::POST);
/// assert_eq!(req.path().unwrap(), "sensors/temp");
/// assert_eq!(req.msg_type(), Type::Con);
/// assert_eq!(req.payload_str(), Ok("21.5"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Req(Message);

impl Req {
  /// Create a CONfirmable request
  pub fn new(method: Method, path: impl AsRef<str>) -> Self {
    let mut msg = Message::new(Type::Con, method.0, Id(0), Token::default());
    msg.set_path(path.as_ref());
    Self(msg)
  }

  /// Creates a new GET request
  pub fn get(path: impl AsRef<str>) -> Self {
    Self::new(Method::GET, path)
  }

  /// Creates a new POST request
  pub fn post(path: impl AsRef<str>) -> Self {
    Self::new(Method::POST, path)
  }

  /// Creates a new PUT request
  pub fn put(path: impl AsRef<str>) -> Self {
    Self::new(Method::PUT, path)
  }

  /// Creates a new DELETE request
  pub fn delete(path: impl AsRef<str>) -> Self {
    Self::new(Method::DELETE, path)
  }

  /// Obtain a reference to the inner message
  pub fn msg(&self) -> &Message {
    &self.0
  }

  /// Obtain a mutable reference to the inner message
  pub fn msg_mut(&mut self) -> &mut Message {
    &mut self.0
  }

  /// Get the request method
  pub fn method(&self) -> Method {
    Method(self.0.code)
  }

  /// Get the request path (Uri-Path segments joined by `/`)
  pub fn path(&self) -> Result<String, core::str::Utf8Error> {
    self.0.path()
  }

  /// Uri-Query arguments
  pub fn query(&self) -> Vec<&str> {
    self.0.query()
  }

  /// Add a Uri-Query argument
  pub fn add_query(&mut self, arg: impl AsRef<str>) {
    self.0.add_query(arg.as_ref())
  }

  /// Get the request type (confirmable, non-confirmable)
  pub fn msg_type(&self) -> Type {
    self.0.ty
  }

  /// Set this request to be non-confirmable
  ///
  /// Non-confirmable requests are sent once and never retransmitted.
  pub fn non(&mut self) {
    self.0.ty = Type::Non;
  }

  /// Get the request token
  pub fn token(&self) -> Token {
    self.0.token
  }

  /// Use a specific token for this request instead of letting
  /// the engine generate one
  pub fn set_token(&mut self, token: Token) {
    self.0.token = token;
  }

  /// Set the Content-Format of the payload
  pub fn set_content_format(&mut self, format: ContentFormat) {
    self.0.set_content_format(format)
  }

  /// Set the Accept option
  pub fn set_accept(&mut self, format: ContentFormat) {
    self.0
        .set_uint(newt_msg::opt::known::ACCEPT, u16::from(format).into());
  }

  /// Get the payload
  pub fn payload(&self) -> &[u8] {
    &self.0.payload.0
  }

  /// Get the payload as a utf8 string
  pub fn payload_str(&self) -> Result<&str, core::str::Utf8Error> {
    core::str::from_utf8(self.payload())
  }

  /// Set the payload
  pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
    self.0.payload = Payload(payload.into());
  }
}

impl From<Message> for Req {
  fn from(msg: Message) -> Self {
    Self(msg)
  }
}

impl From<Req> for Message {
  fn from(req: Req) -> Self {
    req.0
  }
}

impl AsRef<Message> for Req {
  fn as_ref(&self) -> &Message {
    &self.0
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::opt::known;

  use super::*;

  #[test]
  fn path_segments() {
    let req = Req::get("/a/b//c/");
    assert_eq!(req.path().unwrap(), "a/b/c");
    assert_eq!(req.msg().get(known::URI_PATH).unwrap().len(), 3);
  }

  #[test]
  fn non() {
    let mut req = Req::delete("x");
    req.non();
    assert_eq!(req.msg_type(), Type::Non);
    assert_eq!(req.method(), Method::DELETE);
  }
}
