use core::hash::Hasher;

use blake2::digest::consts::U8;
use blake2::{Blake2b, Digest};

/// [`Hasher`] implementation that uses the [`blake2`] algo
/// to generate a 64 bit hash that is stable across runs
/// (unlike [`std::collections::hash_map::DefaultHasher`]).
#[derive(Default, Clone)]
pub(crate) struct Blake2Hasher(Blake2b<U8>);

impl core::fmt::Debug for Blake2Hasher {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_tuple("Blake2Hasher")
     .field(&"<Blake2bCore<U8>>")
     .finish()
  }
}

impl Hasher for Blake2Hasher {
  fn finish(&self) -> u64 {
    u64::from_be_bytes(self.0.clone().finalize().into())
  }

  fn write(&mut self, bytes: &[u8]) {
    self.0.update(bytes);
  }
}

/// Digest some bytes
pub(crate) fn digest(bytes: &[u8]) -> u64 {
  let mut h = Blake2Hasher::default();
  h.write(bytes);
  h.finish()
}

#[cfg(test)]
mod tests {
  use core::hash::Hash;

  use super::*;

  #[test]
  fn stable() {
    assert_eq!(digest(b"hello"), digest(b"hello"));
    assert_ne!(digest(b"hello"), digest(b"hellp"));

    let mut a = Blake2Hasher::default();
    let mut b = Blake2Hasher::default();
    ("a", 1u16).hash(&mut a);
    ("a", 1u16).hash(&mut b);
    assert_eq!(a.finish(), b.finish());
  }
}
