use tinyvec::ArrayVec;

use super::MessageParseError;

/// # Message Token
///
/// 0 to 8 opaque bytes chosen by the client to correlate a request with
/// its response, independent of the [`Id`](crate::Id) of the datagrams
/// that carry them.
///
/// An [`Id`](crate::Id) identifies one datagram (and its retransmissions),
/// a `Token` identifies the whole exchange: a piggybacked response, a separate
/// response, every block of a block-wise transfer and every notification of
/// an observation share the token of the request that started it.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Take an arbitrary-length sequence of bytes and turn it into an opaque message token
  ///
  /// Uses BLAKE2b with an 8 byte digest.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// let my_token = Token::opaque(&[0, 1, 2]);
  /// assert_eq!(my_token.0.len(), 8);
  /// assert_eq!(my_token, Token::opaque(&[0, 1, 2]));
  /// ```
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    Token(Into::<[u8; 8]>::into(digest.finalize()).into())
  }

  /// Copy a token from a slice, failing if it is longer than 8 bytes
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// assert_eq!(Token::try_from_slice(&[1, 2]).unwrap().as_bytes(), &[1, 2]);
  /// assert!(Token::try_from_slice(&[0; 9]).is_err());
  /// ```
  pub fn try_from_slice(bytes: &[u8]) -> Result<Token, MessageParseError> {
    if bytes.len() > 8 {
      return Err(MessageParseError::InvalidTokenLength(bytes.len() as u8));
    }

    let mut token = ArrayVec::new();
    token.extend_from_slice(bytes);
    Ok(Token(token))
  }

  /// The token's bytes
  pub fn as_bytes(&self) -> &[u8] {
    self.0.as_slice()
  }

  /// Whether this is the zero-length token
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl core::fmt::Display for Token {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_str("0x")?;
    self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
  }
}
