use std::net::SocketAddr;

use dashmap::DashMap;
use embedded_time::duration::Milliseconds;
use newt_msg::opt::known;
use newt_msg::{Block, Message, Payload, Token};

use crate::hash;
use crate::net::Addrd;
use crate::time::{Millis, Stamped};

/// Ways a block-wise transfer can go wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// A block arrived that was not the next one
  OutOfOrder {
    /// The block number we were waiting for
    expected: u32,
    /// The block number that arrived
    got: u32,
  },
  /// The block size changed mid-transfer
  SizeChanged {
    /// Size of the blocks so far
    expected: u16,
    /// Size of the block that arrived
    got: u16,
  },
  /// A block's payload was longer than the block size,
  /// or a block that is not the last was shorter
  PayloadLength {
    /// Number of the offending block
    num: u32,
    /// Length of its payload
    len: usize,
  },
  /// The representation changed mid-transfer (different ETag)
  EtagChanged,
  /// The reassembled body would exceed the configured limit
  TooLarge {
    /// The limit, in bytes
    max: usize,
  },
  /// BERT (RFC8323 block size exponent 7) is not supported
  Bert,
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Error::OutOfOrder { expected, got } => {
        write!(f, "expected block {} but got block {}", expected, got)
      },
      | Error::SizeChanged { expected, got } => {
        write!(f, "block size changed from {} to {}", expected, got)
      },
      | Error::PayloadLength { num, len } => {
        write!(f, "block {} has an invalid payload length of {}", num, len)
      },
      | Error::EtagChanged => write!(f, "representation changed between blocks"),
      | Error::TooLarge { max } => write!(f, "body exceeds {} bytes", max),
      | Error::Bert => write!(f, "BERT blocks are not supported"),
    }
  }
}

/// Result of feeding a block to a [`Reassembly`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
  /// The block was appended; block `next` should come next
  More {
    /// Number of the next block
    next: u32,
  },
  /// The block was an exact repeat of the latest block and was ignored
  Duplicate,
  /// That was the last block; here is the whole body
  Complete(Vec<u8>),
}

/// Body being reassembled from blocks received strictly in order
#[derive(Debug, Clone, Default)]
pub struct Reassembly {
  body: Vec<u8>,
  size: Option<u16>,
  next: u32,
  last: Option<u64>,
  etag: Option<Vec<u8>>,
}

impl Reassembly {
  /// Start reassembling a body
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of the block expected next
  pub fn next(&self) -> u32 {
    self.next
  }

  /// Feed the next block.
  ///
  /// Blocks must arrive in order with a constant size; an exact
  /// repeat of the latest block is tolerated. Every block except the
  /// last must carry exactly `size` bytes.
  ///
  /// ```
  /// use newt::block::{Accepted, Error, Reassembly};
  /// use newt_msg::Block;
  ///
  /// let mut body = Reassembly::new();
  /// assert_eq!(body.accept(Block::new(16, 0, true), &[0; 16], None, 64),
  ///            Ok(Accepted::More { next: 1 }));
  /// assert_eq!(body.accept(Block::new(16, 0, true), &[0; 16], None, 64),
  ///            Ok(Accepted::Duplicate));
  /// assert_eq!(body.accept(Block::new(16, 2, false), &[1; 4], None, 64),
  ///            Err(Error::OutOfOrder { expected: 1, got: 2 }));
  /// assert_eq!(body.accept(Block::new(16, 1, false), &[1; 4], None, 64),
  ///            Ok(Accepted::Complete([&[0; 16][..], &[1; 4][..]].concat())));
  /// ```
  pub fn accept(&mut self,
                block: Block,
                payload: &[u8],
                etag: Option<&[u8]>,
                max: usize)
                -> Result<Accepted, Error> {
    if block.is_bert() {
      return Err(Error::Bert);
    }

    let digest = hash::digest(payload);
    let size = block.size();

    if self.next > 0
       && block.num() == self.next - 1
       && self.size == Some(size)
       && self.last == Some(digest)
    {
      return Ok(Accepted::Duplicate);
    }

    match self.size {
      | Some(expected) if expected != size => return Err(Error::SizeChanged { expected, got: size }),
      | _ => (),
    }

    if block.num() != self.next {
      return Err(Error::OutOfOrder { expected: self.next,
                                     got: block.num() });
    }

    let len_ok = if block.more() {
      payload.len() == size as usize
    } else {
      payload.len() <= size as usize
    };

    if !len_ok {
      return Err(Error::PayloadLength { num: block.num(),
                                        len: payload.len() });
    }

    match (&self.etag, etag) {
      | (Some(a), Some(b)) if a.as_slice() != b => return Err(Error::EtagChanged),
      | (Some(_), None) if self.next > 0 => return Err(Error::EtagChanged),
      | (None, Some(_)) if self.next > 0 => return Err(Error::EtagChanged),
      | _ => (),
    }

    if self.body.len() + payload.len() > max {
      return Err(Error::TooLarge { max });
    }

    if self.next == 0 {
      self.size = Some(size);
      self.etag = etag.map(|e| e.to_vec());
    }

    self.body.extend_from_slice(payload);
    self.last = Some(digest);
    self.next += 1;

    if block.more() {
      Ok(Accepted::More { next: self.next })
    } else {
      Ok(Accepted::Complete(core::mem::take(&mut self.body)))
    }
  }
}

/// A body being sent in blocks, one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragments {
  body: Vec<u8>,
  size: u16,
  current: u32,
}

impl Fragments {
  /// Split `body` into blocks of `size` bytes
  pub fn new(body: Vec<u8>, size: u16) -> Self {
    Self { body,
           size,
           current: 0 }
  }

  /// Total length of the body
  pub fn len(&self) -> usize {
    self.body.len()
  }

  /// Is the body empty?
  pub fn is_empty(&self) -> bool {
    self.body.is_empty()
  }

  /// The block in flight, and its payload
  pub fn current(&self) -> (Block, &[u8]) {
    let size = self.size as usize;
    let start = (self.current as usize * size).min(self.body.len());
    let end = (start + size).min(self.body.len());

    (Block::new(self.size, self.current, end < self.body.len()), &self.body[start..end])
  }

  /// The peer acknowledged a block, echoing it back as `echoed`.
  ///
  /// Yields whether there is another block to send; if so it
  /// becomes [`Fragments::current`].
  ///
  /// The peer may ask for smaller blocks when acknowledging the
  /// first block; the transfer continues from the same byte offset.
  ///
  /// ```
  /// use newt::block::Fragments;
  /// use newt_msg::Block;
  ///
  /// let mut frags = Fragments::new(vec![0; 100], 64);
  /// assert_eq!(frags.current().0, Block::new(64, 0, true));
  ///
  /// // the server only accepts 32 byte blocks
  /// assert_eq!(frags.acknowledge(Block::new(32, 0, true)), Ok(true));
  /// assert_eq!(frags.current().0, Block::new(32, 2, true));
  /// assert_eq!(frags.current().1.len(), 32);
  /// ```
  pub fn acknowledge(&mut self, echoed: Block) -> Result<bool, Error> {
    if echoed.num() != self.current {
      return Err(Error::OutOfOrder { expected: self.current,
                                     got: echoed.num() });
    }

    let next = if echoed.size() == self.size {
      self.current + 1
    } else if self.current == 0 && echoed.size() < self.size && !echoed.is_bert() {
      let next = (self.size / echoed.size()) as u32;
      self.size = echoed.size();
      next
    } else {
      return Err(Error::SizeChanged { expected: self.size,
                                      got: echoed.size() });
    };

    if next as usize * self.size as usize >= self.body.len() {
      Ok(false)
    } else {
      self.current = next;
      Ok(true)
    }
  }
}

/// Cut block `num` of `size` bytes out of a complete response,
/// `None` if the response has no such block.
///
/// The first block carries the total length in Size2.
pub(crate) fn slice(full: &Message, num: u32, size: u16) -> Option<Message> {
  let body = &full.payload.0;
  let start = num as usize * size as usize;
  if num > 0 && start >= body.len() {
    return None;
  }

  let end = (start + size as usize).min(body.len());
  let mut msg = Message { id: full.id,
                          ty: full.ty,
                          ver: full.ver,
                          token: full.token,
                          code: full.code,
                          opts: full.opts.clone(),
                          payload: Payload(body[start..end].to_vec()) };

  msg.set_block2(Block::new(size, num, end < body.len()));
  if num == 0 {
    msg.set_uint(known::SIZE2, body.len() as u32);
  }

  Some(msg)
}

/// Next step of a block-wise upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Upload {
  /// There is no upload with this key
  None,
  /// Send this block next
  Next(Block, Vec<u8>),
  /// The last block was acknowledged
  Done,
}

/// Every block-wise transfer in progress, in both directions.
#[derive(Debug, Default)]
pub(crate) struct Blocks {
  /// Request bodies we are sending (Block1)
  uploads: DashMap<Addrd<Token>, Stamped<Fragments>>,
  /// Response bodies we are receiving (Block2)
  downloads: DashMap<Addrd<Token>, Stamped<Reassembly>>,
  /// Request bodies we are receiving (Block1)
  requests: DashMap<Addrd<Token>, Stamped<Reassembly>>,
  /// Response bodies we are serving (Block2), by peer & request path
  responses: DashMap<(SocketAddr, String), Stamped<Message>>,
}

impl Blocks {
  pub(crate) fn start_upload(&self,
                             key: Addrd<Token>,
                             body: Vec<u8>,
                             size: u16,
                             now: Millis)
                             -> (Block, Vec<u8>) {
    let frags = Fragments::new(body, size);
    let (block, payload) = frags.current();
    let first = (block, payload.to_vec());
    self.uploads.insert(key, Stamped(frags, now));
    first
  }

  pub(crate) fn is_uploading(&self, key: &Addrd<Token>) -> bool {
    self.uploads.contains_key(key)
  }

  pub(crate) fn upload_acked(&self,
                             key: &Addrd<Token>,
                             echoed: Block,
                             now: Millis)
                             -> Result<Upload, Error> {
    let step = match self.uploads.get_mut(key) {
      | None => return Ok(Upload::None),
      | Some(mut frags) => {
        frags.1 = now;
        frags.0.acknowledge(echoed).map(|more| {
                                     if more {
                                       let (block, payload) = frags.0.current();
                                       Upload::Next(block, payload.to_vec())
                                     } else {
                                       Upload::Done
                                     }
                                   })
      },
    };

    if !matches!(step, Ok(Upload::Next(..))) {
      self.uploads.remove(key);
    }

    step
  }

  pub(crate) fn is_downloading(&self, key: &Addrd<Token>) -> bool {
    self.downloads.contains_key(key)
  }

  pub(crate) fn download(&self,
                         key: Addrd<Token>,
                         msg: &Message,
                         block: Block,
                         max: usize,
                         now: Millis)
                         -> Result<Accepted, Error> {
    let accepted = {
      let mut entry = self.downloads
                          .entry(key)
                          .or_insert_with(|| Stamped(Reassembly::new(), now));
      entry.1 = now;
      entry.0.accept(block, &msg.payload.0, msg.etag(), max)
    };

    if !matches!(accepted, Ok(Accepted::More { .. }) | Ok(Accepted::Duplicate)) {
      self.downloads.remove(&key);
    }

    accepted
  }

  pub(crate) fn request_block(&self,
                              key: Addrd<Token>,
                              msg: &Message,
                              block: Block,
                              max: usize,
                              now: Millis)
                              -> Result<Accepted, Error> {
    let accepted = {
      let mut entry = self.requests
                          .entry(key)
                          .or_insert_with(|| Stamped(Reassembly::new(), now));
      entry.1 = now;
      entry.0.accept(block, &msg.payload.0, None, max)
    };

    if !matches!(accepted, Ok(Accepted::More { .. }) | Ok(Accepted::Duplicate)) {
      self.requests.remove(&key);
    }

    accepted
  }

  pub(crate) fn cache_response(&self, peer: SocketAddr, path: String, msg: Message, now: Millis) {
    self.responses.insert((peer, path), Stamped(msg, now));
  }

  /// Serve block `num` of a response we cached earlier
  ///
  /// `Some(None)` when the cached response has no such block.
  pub(crate) fn cached_response(&self,
                                peer: SocketAddr,
                                path: &str,
                                block: Block)
                                -> Option<Option<Message>> {
    let key = (peer, path.to_string());
    let sliced = self.responses
                     .get(&key)
                     .map(|full| slice(full.data(), block.num(), block.size()));

    if let Some(Some(ref msg)) = sliced {
      if !msg.block2().map(|b| b.more()).unwrap_or(false) {
        self.responses.remove(&key);
      }
    }

    sliced
  }

  pub(crate) fn forget(&self, key: &Addrd<Token>) {
    self.uploads.remove(key);
    self.downloads.remove(key);
  }

  /// Discard transfers that have been idle longer than `lifetime`
  pub(crate) fn prune(&self, now: Millis, lifetime: u64) {
    let lifetime = Milliseconds(lifetime);
    let before = self.len();

    self.uploads.retain(|_, s| !s.is_older_than(lifetime, now));
    self.downloads.retain(|_, s| !s.is_older_than(lifetime, now));
    self.requests.retain(|_, s| !s.is_older_than(lifetime, now));
    self.responses.retain(|_, s| !s.is_older_than(lifetime, now));

    let after = self.len();
    if before > after {
      log::debug!("Blocks::prune removed {} idle block-wise transfers",
                  before - after);
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.uploads.len() + self.downloads.len() + self.requests.len() + self.responses.len()
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::{Code, Id, Type};

  use super::*;

  fn key() -> Addrd<Token> {
    Addrd(Token::opaque(&[1]), crate::test::dummy_addr())
  }

  #[test]
  fn size_change_is_an_error() {
    let mut body = Reassembly::new();
    body.accept(Block::new(32, 0, true), &[0; 32], None, 1024)
        .unwrap();
    assert_eq!(body.accept(Block::new(16, 1, true), &[0; 16], None, 1024),
               Err(Error::SizeChanged { expected: 32,
                                        got: 16 }));
  }

  #[test]
  fn short_intermediate_block_is_an_error() {
    let mut body = Reassembly::new();
    assert_eq!(body.accept(Block::new(32, 0, true), &[0; 31], None, 1024),
               Err(Error::PayloadLength { num: 0, len: 31 }));
  }

  #[test]
  fn last_block_may_not_exceed_size() {
    let mut body = Reassembly::new();
    assert_eq!(body.accept(Block::new(16, 0, false), &[0; 17], None, 1024),
               Err(Error::PayloadLength { num: 0, len: 17 }));
  }

  #[test]
  fn repeat_with_different_payload_is_out_of_order() {
    let mut body = Reassembly::new();
    body.accept(Block::new(16, 0, true), &[0; 16], None, 1024)
        .unwrap();
    assert_eq!(body.accept(Block::new(16, 0, true), &[9; 16], None, 1024),
               Err(Error::OutOfOrder { expected: 1, got: 0 }));
  }

  #[test]
  fn etag_must_not_change() {
    let mut body = Reassembly::new();
    body.accept(Block::new(16, 0, true), &[0; 16], Some(&[1]), 1024)
        .unwrap();
    assert_eq!(body.accept(Block::new(16, 1, false), &[0; 2], Some(&[2]), 1024),
               Err(Error::EtagChanged));
  }

  #[test]
  fn too_large() {
    let mut body = Reassembly::new();
    body.accept(Block::new(16, 0, true), &[0; 16], None, 20)
        .unwrap();
    assert_eq!(body.accept(Block::new(16, 1, false), &[0; 16], None, 20),
               Err(Error::TooLarge { max: 20 }));
  }

  #[test]
  fn bert_rejected() {
    let mut body = Reassembly::new();
    assert_eq!(body.accept(Block::from(7u32), &[], None, 20),
               Err(Error::Bert));
  }

  #[test]
  fn fragments_walk_the_body() {
    let body = (0..40u8).collect::<Vec<_>>();
    let mut frags = Fragments::new(body.clone(), 16);

    let mut seen = vec![];
    loop {
      let (block, payload) = frags.current();
      seen.extend_from_slice(payload);
      if !frags.acknowledge(block).unwrap() {
        break;
      }
    }

    assert_eq!(seen, body);
  }

  #[test]
  fn fragments_reject_wrong_echo() {
    let mut frags = Fragments::new(vec![0; 40], 16);
    assert_eq!(frags.acknowledge(Block::new(16, 1, true)),
               Err(Error::OutOfOrder { expected: 0, got: 1 }));

    frags.acknowledge(Block::new(16, 0, true)).unwrap();
    assert_eq!(frags.acknowledge(Block::new(32, 1, true)),
               Err(Error::SizeChanged { expected: 16,
                                        got: 32 }));
  }

  #[test]
  fn slicing() {
    let mut full = Message::new(Type::Ack, Code::new(2, 5), Id(1), Token::opaque(&[1]));
    full.payload = Payload(vec![7; 40]);

    let first = slice(&full, 0, 16).unwrap();
    assert_eq!(first.block2(), Some(Block::new(16, 0, true)));
    assert_eq!(first.get_uint(known::SIZE2), Some(40));
    assert_eq!(first.payload.0.len(), 16);

    let last = slice(&full, 2, 16).unwrap();
    assert_eq!(last.block2(), Some(Block::new(16, 2, false)));
    assert_eq!(last.get_uint(known::SIZE2), None);
    assert_eq!(last.payload.0.len(), 8);

    assert_eq!(slice(&full, 3, 16), None);
  }

  #[test]
  fn upload_lifecycle() {
    let blocks = Blocks::default();
    let now = Milliseconds(0);
    let (first, payload) = blocks.start_upload(key(), vec![1; 20], 16, now);
    assert_eq!(first, Block::new(16, 0, true));
    assert_eq!(payload.len(), 16);
    assert!(blocks.is_uploading(&key()));

    assert_eq!(blocks.upload_acked(&key(), first, now),
               Ok(Upload::Next(Block::new(16, 1, false), vec![1; 4])));
    assert_eq!(blocks.upload_acked(&key(), Block::new(16, 1, false), now),
               Ok(Upload::Done));
    assert!(!blocks.is_uploading(&key()));
    assert_eq!(blocks.upload_acked(&key(), Block::new(16, 1, false), now),
               Ok(Upload::None));
  }

  #[test]
  fn prune_idle() {
    let blocks = Blocks::default();
    blocks.start_upload(key(), vec![1; 20], 16, Milliseconds(0));
    blocks.prune(Milliseconds(10), 10);
    assert_eq!(blocks.len(), 1);
    blocks.prune(Milliseconds(11), 10);
    assert_eq!(blocks.len(), 0);
  }
}
