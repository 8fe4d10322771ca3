//! Message framing for reliable, ordered byte streams (RFC 8323 section 3.2).
//!
//! Over TCP and TLS there is no message type or message id; reliability
//! comes from the stream. Instead, each frame starts with the length of its
//! options and payload:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Len  |  TKL  | Extended Length (if any, as chosen by Len) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Code     | Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Frames decode to messages of type [`Type::Non`] with [`Id`] `0`;
//! both fields are ignored when encoding.
//!
//! ```
//! use newt_msg::{tcp, Code, Id, Message, Token, Type};
//!
//! let mut msg = Message::new(Type::Non, Code::new(0, 1), Id(0), Token::opaque(b"t"));
//! msg.set_path("temp");
//!
//! let bytes = tcp::to_bytes(&msg).unwrap();
//! assert_eq!(tcp::frame_len(&bytes), Some(bytes.len()));
//! assert_eq!(tcp::try_from_bytes(&bytes).unwrap(), msg);
//! ```

use crate::cursor::Cursor;
use crate::msg::consume_opts_and_payload;
use crate::*;

/// Encode a message as a stream frame
pub fn to_bytes(msg: &Message) -> Result<Vec<u8>, MessageToBytesError> {
  msg.check_encodable()?;

  let mut tail = Vec::new();
  msg.extend_tail(&mut tail);

  let (len_nibble, ext) = match tail.len() {
    | n if n >= 65_805 => (15u8, ((n - 65_805) as u32).to_be_bytes().to_vec()),
    | n if n >= 269 => (14, ((n - 269) as u16).to_be_bytes().to_vec()),
    | n if n >= 13 => (13, vec![(n - 13) as u8]),
    | n => (n as u8, vec![]),
  };

  let mut bytes = Vec::with_capacity(2 + ext.len() + msg.token.0.len() + tail.len());
  bytes.push((len_nibble << 4) | msg.token.0.len() as u8);
  bytes.extend(ext);
  bytes.push(msg.code.into());
  bytes.extend(msg.token.0.iter().copied());
  bytes.extend(tail);

  Ok(bytes)
}

struct Header {
  tkl: usize,
  body_len: usize,
  header_len: usize,
}

fn header(bytes: &[u8]) -> Option<Header> {
  let byte1 = *bytes.first()?;
  let tkl = usize::from(byte1 & 0b1111);
  let ext_len = match byte1 >> 4 {
    | 13 => 1,
    | 14 => 2,
    | 15 => 4,
    | _ => 0,
  };

  let ext = bytes.get(1..1 + ext_len)?;
  let body_len = match ext_len {
    | 1 => usize::from(ext[0]) + 13,
    | 2 => usize::from(u16::from_be_bytes([ext[0], ext[1]])) + 269,
    | 4 => u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]]) as usize + 65_805,
    | _ => usize::from(byte1 >> 4),
  };

  Some(Header { tkl,
                body_len,
                header_len: 1 + ext_len + 1 })
}

/// How many bytes the frame at the start of `bytes` occupies in total.
///
/// Yields `None` when `bytes` is too short to contain the frame's
/// length fields; read more from the stream and try again.
///
/// ```
/// use newt_msg::tcp;
///
/// assert_eq!(tcp::frame_len(&[]), None);
/// assert_eq!(tcp::frame_len(&[0b1101_0000]), None);
/// // 13 + 2 byte body, code byte, no token
/// assert_eq!(tcp::frame_len(&[0b1101_0000, 2]), Some(1 + 1 + 1 + 15));
/// ```
pub fn frame_len(bytes: &[u8]) -> Option<usize> {
  header(bytes).map(|h| h.header_len + h.tkl + h.body_len)
}

/// Decode exactly one frame
pub fn try_from_bytes(bytes: &[u8]) -> Result<Message, MessageParseError> {
  let h = header(bytes).ok_or_else(MessageParseError::eof)?;

  if h.tkl > 8 {
    return Err(MessageParseError::InvalidTokenLength(h.tkl as u8));
  }

  let total = h.header_len + h.tkl + h.body_len;
  if bytes.len() < total {
    return Err(MessageParseError::eof());
  }

  let mut cursor = Cursor::new(&bytes[..total]);
  cursor.take_exact(h.header_len - 1);

  let code: Code = cursor.next().ok_or_else(MessageParseError::eof)?.into();
  if code.kind() == CodeKind::Reserved {
    return Err(MessageParseError::ReservedCode(code));
  }

  let token = cursor.take_exact(h.tkl)
                    .ok_or_else(MessageParseError::eof)
                    .and_then(Token::try_from_slice)?;

  let (opts, payload) = consume_opts_and_payload(&mut cursor)?;

  Ok(Message { id: Id(0),
               ty: Type::Non,
               ver: Version::default(),
               token,
               code,
               opts,
               payload })
}

/// Decode the first frame of a stream buffer.
///
/// Yields `Ok(None)` when the buffer does not yet hold a whole frame,
/// otherwise the message and the number of bytes it consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<(Message, usize)>, MessageParseError> {
  match frame_len(bytes) {
    | Some(len) if len <= bytes.len() => {
      try_from_bytes(&bytes[..len]).map(|msg| Some((msg, len)))
    },
    | _ => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn msg_with_payload(len: usize) -> Message {
    let mut msg = Message::new(Type::Non,
                               Code::new(2, 5),
                               Id(0),
                               Token::try_from_slice(&[1, 2]).unwrap());
    msg.payload = Payload(vec![7; len]);
    msg
  }

  #[test]
  fn length_escapes() {
    // body = marker + payload
    for (payload, nibble, ext_len) in [(11, 12, 0), (12, 13, 1), (268, 14, 2), (65_804, 15, 4)] {
      let msg = msg_with_payload(payload);
      let bytes = to_bytes(&msg).unwrap();

      assert_eq!(bytes[0] >> 4, nibble, "payload {}", payload);
      assert_eq!(bytes.len(), 1 + ext_len + 1 + 2 + payload + 1);
      assert_eq!(frame_len(&bytes), Some(bytes.len()));
      assert_eq!(try_from_bytes(&bytes).unwrap(), msg);
    }
  }

  #[test]
  fn partial_frames() {
    let msg = msg_with_payload(40);
    let bytes = to_bytes(&msg).unwrap();

    assert_eq!(decode_frame(&bytes[..bytes.len() - 1]), Ok(None));
    assert_eq!(try_from_bytes(&bytes[..bytes.len() - 1]),
               Err(MessageParseError::eof()));

    let mut two = bytes.clone();
    two.extend(bytes.iter().copied());
    let (first, used) = decode_frame(&two).unwrap().unwrap();
    assert_eq!(first, msg);
    assert_eq!(used, bytes.len());
  }

  #[test]
  fn signaling_codes_are_allowed() {
    let csm = Message::new(Type::Non, Code::new(7, 1), Id(0), Token::default());
    let bytes = to_bytes(&csm).unwrap();
    assert_eq!(bytes, vec![0, 0b111_00001]);
    assert_eq!(try_from_bytes(&bytes).unwrap(), csm);
  }
}
