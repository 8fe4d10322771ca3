/// A cursor over a byte buffer that parsers advance as they consume bytes.
///
/// Unlike `std::io::Cursor`, reads never partially succeed; asking for more
/// bytes than remain yields `None` and leaves the position unchanged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor<T> {
  t: T,
  cursor: usize,
}

impl<T: AsRef<[u8]>> Cursor<T> {
  pub(crate) fn new(t: T) -> Cursor<T> {
    Cursor { t, cursor: 0 }
  }

  fn len(&self) -> usize {
    self.t.as_ref().len()
  }

  /// Take the next byte
  pub(crate) fn next(&mut self) -> Option<u8> {
    self.take_exact(1).map(|a| a[0])
  }

  /// Take exactly `n` bytes, or nothing if fewer remain
  pub(crate) fn take_exact(&mut self, n: usize) -> Option<&[u8]> {
    if n > self.remaining() {
      None
    } else {
      let start = self.cursor;
      self.cursor += n;
      Some(&self.t.as_ref()[start..start + n])
    }
  }

  /// Look at the next `n` bytes without consuming them
  pub(crate) fn peek_exact(&self, n: usize) -> Option<&[u8]> {
    if n > self.remaining() {
      None
    } else {
      Some(&self.t.as_ref()[self.cursor..self.cursor + n])
    }
  }

  /// Consume everything that is left
  pub(crate) fn take_until_end(&mut self) -> &[u8] {
    let start = self.cursor;
    self.cursor = self.len();
    &self.t.as_ref()[start..]
  }

  pub(crate) fn remaining(&self) -> usize {
    self.len() - self.cursor
  }

  pub(crate) fn is_exhausted(&self) -> bool {
    self.remaining() == 0
  }

  pub(crate) fn position(&self) -> usize {
    self.cursor
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  pub fn next() {
    let mut cur = Cursor::new(vec![1]);
    assert_eq!(cur.next(), Some(1));
    assert_eq!(cur.next(), None);
    assert_eq!(cur.next(), None);
  }

  #[test]
  pub fn take_exact() {
    let mut cur = Cursor::new(vec![1, 2, 3]);
    assert_eq!(cur.take_exact(2), Some([1, 2].as_ref()));
    assert_eq!(cur.take_exact(2), None);
    assert_eq!(cur.position(), 2);
    assert_eq!(cur.take_exact(1), Some([3].as_ref()));
    assert!(cur.is_exhausted());
  }

  #[test]
  pub fn peek_exact() {
    let cur = Cursor::new(vec![1, 2, 3]);
    assert_eq!(cur.peek_exact(3), Some([1, 2, 3].as_ref()));
    assert_eq!(cur.peek_exact(4), None);
    assert_eq!(cur.position(), 0);
  }

  #[test]
  pub fn take_until_end() {
    let mut cur = Cursor::new(vec![1, 2, 3]);
    cur.next();
    assert_eq!(cur.take_until_end(), &[2, 3]);
    assert_eq!(cur.take_until_end(), &[] as &[u8]);
    assert_eq!(cur.remaining(), 0);
  }
}
