/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;
use crate::TryFromBytes;

/// Message payload (RFC 7252 section 5.5)
#[derive(Clone, Default, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Payload(pub Vec<u8>);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = b.ver.0 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl;

    ver | ty | tkl
  }
}

/// # `Message` struct
/// Low-level representation of a CoAP message, very close to the binary format:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Ver| T |  TKL  |      Code     |          Message ID           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Token (if any, TKL bytes) ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Options (if any) ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |1 1 1 1 1 1 1 1|    Payload (if any) ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Messages support both serializing to bytes and from bytes, by using the provided [`TryFromBytes`] and [`TryIntoBytes`](crate::TryIntoBytes) traits.
///
/// ```
/// use newt_msg::*;
/// # //                       version  token len  code (2.05 Content)
/// # //                       |        |          /
/// # //                       |  type  |         /  message ID
/// # //                       |  |     |        |   |
/// # //                       vv vv vvvv vvvvvvvv vvvvvvvvvvvvvvvv
/// # let header: [u8; 4] = 0b_01_00_0001_01000101_0000000000000001u32.to_be_bytes();
/// # let token: [u8; 1] = [254u8];
/// # let content_format: &[u8] = b"application/json";
/// # let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
/// # let payload: [&[u8]; 2] = [&[0b_11111111u8], b"hello, world!"];
/// let packet: Vec<u8> = /* bytes! */
/// # [header.as_ref(), token.as_ref(), options.concat().as_ref(), payload.concat().as_ref()].concat();
///
/// let msg = Message::try_from_bytes(&packet).unwrap();
///
/// assert_eq!(msg.id, Id(1));
/// assert_eq!(msg.ty, Type::Con);
/// assert_eq!(msg.code, Code::new(2, 5));
/// assert_eq!(msg.token.as_bytes(), &[254]);
/// assert_eq!(msg.get_first(opt::known::CONTENT_FORMAT).map(|v| &v.0[..]), Some(content_format));
/// assert_eq!(msg.payload.0, b"hello, world!".to_vec());
/// ```
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`OptionMap`] for details
  pub opts: OptionMap,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a message with no options and an empty payload
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           ver: Version::default(),
           token,
           code,
           opts: OptionMap::new(),
           payload: Payload(Vec::new()) }
  }

  /// Create an empty message (code `0.00`, no token) of the given type
  pub fn empty(ty: Type, id: Id) -> Self {
    Self::new(ty, Code::EMPTY, id, Token::default())
  }

  /// An empty ACK acknowledging this message
  ///
  /// ```
  /// use newt_msg::*;
  ///
  /// let req = Message::new(Type::Con, Code::new(0, 1), Id(7), Token::opaque(&[1]));
  /// let ack = req.ack();
  /// assert_eq!((ack.ty, ack.id, ack.code), (Type::Ack, Id(7), Code::EMPTY));
  /// assert!(ack.token.is_empty());
  /// ```
  pub fn ack(&self) -> Self {
    Self::empty(Type::Ack, self.id)
  }

  /// An RST rejecting this message
  pub fn rst(&self) -> Self {
    Self::empty(Type::Reset, self.id)
  }

  /// Shorthand for `self.code.kind()`
  pub fn kind(&self) -> CodeKind {
    self.code.kind()
  }

  /// Is this a request (code class 0, not empty)?
  pub fn is_request(&self) -> bool {
    self.kind() == CodeKind::Request
  }

  /// Is this a response (code class 2, 4 or 5)?
  pub fn is_response(&self) -> bool {
    self.kind() == CodeKind::Response
  }

  /// Is this an empty message (code `0.00`)?
  pub fn is_empty(&self) -> bool {
    self.kind() == CodeKind::Empty
  }

  /// All values of an option
  pub fn get(&self, n: OptNumber) -> Option<&Vec<OptValue>> {
    self.opts.get(&n)
  }

  /// The first value of an option
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).and_then(|vs| vs.first())
  }

  /// The first value of an option, interpreted as an unsigned integer
  pub fn get_uint(&self, n: OptNumber) -> Option<u32> {
    self.get_first(n).and_then(OptValue::as_uint)
  }

  /// Replace all values of an option with `v`,
  /// yielding the values that were there before.
  pub fn set(&mut self, n: OptNumber, v: OptValue) -> Option<Vec<OptValue>> {
    self.opts.insert(n, vec![v])
  }

  /// Replace all values of an option with an unsigned integer
  pub fn set_uint(&mut self, n: OptNumber, v: u32) -> Option<Vec<OptValue>> {
    self.set(n, OptValue::uint(v))
  }

  /// Add a value to an option, after any it already has
  pub fn add(&mut self, n: OptNumber, v: OptValue) {
    self.opts.entry(n).or_default().push(v);
  }

  /// Remove all values of an option
  pub fn remove(&mut self, n: OptNumber) -> Option<Vec<OptValue>> {
    self.opts.remove(&n)
  }

  /// Uri-Path segments joined with `/`
  ///
  /// ```
  /// use newt_msg::*;
  ///
  /// let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
  /// msg.set_path("/a/b/");
  /// assert_eq!(msg.path().unwrap(), "a/b");
  /// assert_eq!(msg.get(opt::known::URI_PATH).unwrap().len(), 2);
  /// ```
  pub fn path(&self) -> Result<String, core::str::Utf8Error> {
    self.get(known::URI_PATH)
        .map(|segs| {
          segs.iter()
              .map(|v| core::str::from_utf8(&v.0))
              .collect::<Result<Vec<_>, _>>()
              .map(|segs| segs.join("/"))
        })
        .unwrap_or_else(|| Ok(String::new()))
  }

  /// Replace the Uri-Path segments with those of `path`
  /// (empty segments are skipped)
  pub fn set_path(&mut self, path: &str) {
    self.remove(known::URI_PATH);
    path.split('/')
        .filter(|seg| !seg.is_empty())
        .for_each(|seg| self.add(known::URI_PATH, OptValue::from(seg)));
  }

  /// Uri-Query arguments
  pub fn query(&self) -> Vec<&str> {
    self.get(known::URI_QUERY)
        .map(|vs| vs.iter().filter_map(OptValue::as_str).collect())
        .unwrap_or_default()
  }

  /// Add a Uri-Query argument
  pub fn add_query(&mut self, arg: &str) {
    self.add(known::URI_QUERY, OptValue::from(arg))
  }

  /// Block1 option value
  pub fn block1(&self) -> Option<Block> {
    self.get_uint(known::BLOCK1).map(Block::from)
  }

  /// Set the Block1 option
  pub fn set_block1(&mut self, b: Block) {
    self.set_uint(known::BLOCK1, b.into());
  }

  /// Block2 option value
  pub fn block2(&self) -> Option<Block> {
    self.get_uint(known::BLOCK2).map(Block::from)
  }

  /// Set the Block2 option
  pub fn set_block2(&mut self, b: Block) {
    self.set_uint(known::BLOCK2, b.into());
  }

  /// Observe option value
  pub fn observe(&self) -> Option<u32> {
    self.get_uint(known::OBSERVE)
  }

  /// Observe option value, interpreted as a request's register / deregister action
  pub fn observe_action(&self) -> Option<observe::Action> {
    self.observe().and_then(observe::Action::from_uint)
  }

  /// Set the Observe option
  pub fn set_observe(&mut self, n: u32) {
    self.set_uint(known::OBSERVE, n & observe::MAX_SEQUENCE);
  }

  /// Content-Format option value
  pub fn content_format(&self) -> Option<ContentFormat> {
    self.get_uint(known::CONTENT_FORMAT)
        .and_then(|n| u16::try_from(n).ok())
        .map(ContentFormat::from)
  }

  /// Set the Content-Format option
  pub fn set_content_format(&mut self, f: ContentFormat) {
    self.set_uint(known::CONTENT_FORMAT, u16::from(f).into());
  }

  /// ETag option value
  pub fn etag(&self) -> Option<&[u8]> {
    self.get_first(known::ETAG).map(|v| v.0.as_slice())
  }

  /// Max-Age option value in seconds (defaults to 60 when absent)
  pub fn max_age(&self) -> u32 {
    self.get_uint(known::MAX_AGE).unwrap_or(60)
  }

  /// Check that every critical option in this message is recognized;
  /// options defined in [`known`] plus `extra`.
  ///
  /// A known option whose value has an invalid length counts as unrecognized.
  ///
  /// ```
  /// use newt_msg::*;
  ///
  /// let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
  /// msg.add(OptNumber(65001), OptValue(vec![]));
  /// assert_eq!(msg.check_critical(&[]),
  ///            Err(MessageParseError::UnrecognizedCriticalOption(OptNumber(65001))));
  /// assert_eq!(msg.check_critical(&[OptNumber(65001)]), Ok(()));
  /// ```
  pub fn check_critical(&self, extra: &[OptNumber]) -> Result<(), MessageParseError> {
    let unrecognized = |(n, vs): (&OptNumber, &Vec<OptValue>)| {
      if !n.is_critical() || extra.contains(n) {
        return false;
      }

      match known::known(*n) {
        | Some(k) => vs.iter().any(|v| !k.len_ok(v.0.len())),
        | None => true,
      }
    };

    match self.opts.iter().find(|o| unrecognized(*o)) {
      | Some((n, _)) => Err(MessageParseError::UnrecognizedCriticalOption(*n)),
      | None => Ok(()),
    }
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver != Version(1) {
      return Err(MessageParseError::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    match code.kind() {
      | CodeKind::Reserved | CodeKind::Signaling => {
        return Err(MessageParseError::ReservedCode(code))
      },
      | _ => (),
    }

    let id = Id::try_consume_bytes(&mut bytes)?;

    if code.kind() == CodeKind::Empty && (tkl > 0 || !bytes.is_exhausted()) {
      return Err(MessageParseError::EmptyMessageNotEmpty);
    }

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)
                     .and_then(Token::try_from_slice)?;

    let (opts, payload) = consume_opts_and_payload(&mut bytes)?;

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

/// The tail shared by datagrams and stream frames: options, then
/// (after a `0xFF` marker) the payload.
pub(crate) fn consume_opts_and_payload<A: AsRef<[u8]>>(
  bytes: &mut Cursor<A>)
  -> Result<(OptionMap, Payload), MessageParseError> {
  let (opts, marker) = opt::consume_opts(bytes)?;
  let payload = bytes.take_until_end().to_vec();

  if marker && payload.is_empty() {
    Err(MessageParseError::EmptyPayloadAfterMarker)
  } else {
    Ok((opts, Payload(payload)))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;

  pub(crate) fn test_msg() -> (Message, Vec<u8>) {
    let header: [u8; 4] = 0b_01_00_0001_01000101_0000000000000001u32.to_be_bytes();
    let token: [u8; 1] = [254u8];
    let content_format: &[u8] = b"application/json";
    let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
    let payload: [&[u8]; 2] = [&[0b_11111111u8], b"hello, world!"];
    let bytes = [header.as_ref(),
                 token.as_ref(),
                 options.concat().as_ref(),
                 payload.concat().as_ref()].concat();

    let mut msg = Message::new(Type::Con,
                               Code::new(2, 5),
                               Id(1),
                               Token::try_from_slice(&[254]).unwrap());
    msg.set(known::CONTENT_FORMAT, OptValue(content_format.to_vec()));
    msg.payload = Payload(b"hello, world!".to_vec());

    (msg, bytes)
  }

  #[test]
  fn parse_msg() {
    let (expect, bytes) = test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn parse_id() {
    let mut id_bytes = Cursor::new(34u16.to_be_bytes());
    let id = Id::try_consume_bytes(&mut id_bytes).unwrap();
    assert_eq!(id, Id(34));
  }

  #[test]
  fn truncated() {
    let (_, bytes) = test_msg();
    assert_eq!(Message::try_from_bytes(&bytes[..3]),
               Err(MessageParseError::UnexpectedEndOfStream));
    // header says 1 byte of token
    assert_eq!(Message::try_from_bytes(&bytes[..4]),
               Err(MessageParseError::UnexpectedEndOfStream));
    // option value cut short
    assert_eq!(Message::try_from_bytes(&bytes[..10]),
               Err(MessageParseError::OptParseError(OptParseError::UnexpectedEndOfStream)));
  }

  #[test]
  fn bad_header() {
    assert_eq!(Message::try_from_bytes([0b_01_00_1001, 0, 0, 0]),
               Err(MessageParseError::InvalidTokenLength(9)));
    assert_eq!(Message::try_from_bytes([0b_10_00_0000, 0, 0, 0]),
               Err(MessageParseError::InvalidVersion(2)));
    assert_eq!(Message::try_from_bytes([0b_01_00_0000, 0b_110_00000, 0, 0]),
               Err(MessageParseError::ReservedCode(Code::new(6, 0))));
  }

  #[test]
  fn empty_message_rules() {
    // empty CON (ping) is fine
    let ping = Message::try_from_bytes([0b_01_00_0000, 0, 0, 1]).unwrap();
    assert!(ping.is_empty());

    assert_eq!(Message::try_from_bytes([0b_01_00_0001, 0, 0, 1, 9]),
               Err(MessageParseError::EmptyMessageNotEmpty));
    assert_eq!(Message::try_from_bytes([0b_01_10_0000, 0, 0, 1, 0xFF, 1]),
               Err(MessageParseError::EmptyMessageNotEmpty));
  }

  #[test]
  fn marker_without_payload() {
    assert_eq!(Message::try_from_bytes([0b_01_00_0000, 0b_000_00001, 0, 1, 0xFF]),
               Err(MessageParseError::EmptyPayloadAfterMarker));
  }

  #[test]
  fn unknown_elective_options_are_kept() {
    // option 1000 (even, elective) with value [7]
    let delta = ((1000u32 - 269) as u16).to_be_bytes();
    let bytes = [0b_01_00_0000, 0b_000_00001, 0, 1, 0b1110_0001, delta[0], delta[1], 7];
    let msg = Message::try_from_bytes(bytes).unwrap();

    assert_eq!(msg.get(OptNumber(1000)), Some(&vec![OptValue(vec![7])]));
    assert_eq!(msg.check_critical(&[]), Ok(()));
  }

  #[test]
  fn known_critical_option_with_bad_length_is_unrecognized() {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
    msg.set(known::URI_HOST, OptValue(vec![]));
    assert_eq!(msg.check_critical(&[]),
               Err(MessageParseError::UnrecognizedCriticalOption(known::URI_HOST)));
  }

  #[test]
  fn option_helpers() {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
    msg.set_block2(Block::new(64, 3, true));
    msg.set_observe(0x0100_0001);
    msg.set_content_format(ContentFormat::Json);
    msg.add_query("a=1");
    msg.add_query("b");

    assert_eq!(msg.block2(), Some(Block::new(64, 3, true)));
    assert_eq!(msg.block1(), None);
    assert_eq!(msg.observe(), Some(1));
    assert_eq!(msg.observe_action(), Some(observe::Action::Deregister));
    assert_eq!(msg.content_format(), Some(ContentFormat::Json));
    assert_eq!(msg.query(), vec!["a=1", "b"]);
    assert_eq!(msg.max_age(), 60);
  }
}
