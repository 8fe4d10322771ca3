use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use newt_msg::{Id, Token};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::dedup::Dedup;
use crate::time::Millis;

/// Generates message ids and tokens for outbound messages.
///
/// Message ids are sequential per peer, starting from a random id.
/// A peer's counter is dropped once it has been idle for the
/// deduplication window.
/// Tokens are opaque digests of the token seed, the time and a counter.
#[derive(Debug)]
pub(crate) struct Ids {
  seed: u16,
  count: AtomicU64,
  next: DashMap<SocketAddr, (Id, Millis)>,
  rng: Mutex<ChaCha8Rng>,
}

impl Ids {
  pub(crate) fn new(seed: u16, now: Millis) -> Self {
    let rng = ChaCha8Rng::seed_from_u64(((seed as u64) << 48) ^ now.0);
    Self { seed,
           count: AtomicU64::new(0),
           next: DashMap::new(),
           rng: Mutex::new(rng) }
  }

  /// A token that no other exchange of ours uses
  //
  // token_seed   time since epoch   counter
  // ||           ||||||||           ||||||||
  // xx           xxxxxxxx           xxxxxxxx
  pub(crate) fn next_token(&self, now: Millis) -> Token {
    let n = self.count.fetch_add(1, Ordering::Relaxed);

    let mut bytes = [0u8; 18];
    bytes[0..2].copy_from_slice(&self.seed.to_be_bytes());
    bytes[2..10].copy_from_slice(&now.0.to_be_bytes());
    bytes[10..18].copy_from_slice(&n.to_be_bytes());

    Token::opaque(&bytes)
  }

  /// The next message id for `peer` that has not been used
  /// with them within the deduplication window.
  ///
  /// `None` when every id is in use.
  pub(crate) fn next_id(&self, peer: SocketAddr, dedup: &Dedup, now: Millis) -> Option<Id> {
    (0..=u16::MAX).map(|_| self.bump(peer, now))
                  .find(|id| dedup.outbound(peer, *id, now))
  }

  fn bump(&self, peer: SocketAddr, now: Millis) -> Id {
    let mut next = self.next
                       .entry(peer)
                       .or_insert_with(|| (Id(self.rng.lock().gen()), now));
    let (id, _) = *next;
    *next = (id.next(), now);
    id
  }

  #[cfg(test)]
  pub(crate) fn peers(&self) -> usize {
    self.next.len()
  }

  /// Forget the counters of peers we have not sent to for `window` ms
  pub(crate) fn prune(&self, now: Millis, window: u64) -> usize {
    let before = self.next.len();
    self.next
        .retain(|_, (_, used)| now.0.saturating_sub(used.0) < window);
    before - self.next.len()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2};

  #[test]
  fn tokens_are_unique_within_a_millisecond() {
    let ids = Ids::new(0, Milliseconds(1));
    let tokens = (0..100).map(|_| ids.next_token(Milliseconds(1)))
                         .collect::<HashSet<_>>();
    assert_eq!(tokens.len(), 100);
    assert!(tokens.iter().all(|t| t.as_bytes().len() == 8));
  }

  #[test]
  fn ids_are_sequential_per_peer() {
    let ids = Ids::new(0, Milliseconds(1));
    let dedup = Dedup::new(Milliseconds(1000), 1000);
    let now = Milliseconds(0);

    let a = ids.next_id(dummy_addr(), &dedup, now).unwrap();
    let b = ids.next_id(dummy_addr(), &dedup, now).unwrap();
    assert_eq!(b, a.next());

    ids.next_id(dummy_addr_2(), &dedup, now).unwrap();
    assert_eq!(ids.next_id(dummy_addr(), &dedup, now).unwrap(), b.next());
  }

  #[test]
  fn idle_counters_are_pruned() {
    let ids = Ids::new(0, Milliseconds(1));
    let dedup = Dedup::new(Milliseconds(1000), 1000);

    ids.next_id(dummy_addr(), &dedup, Milliseconds(0)).unwrap();
    ids.next_id(dummy_addr_2(), &dedup, Milliseconds(500)).unwrap();

    assert_eq!(ids.prune(Milliseconds(999), 1000), 0);
    assert_eq!(ids.prune(Milliseconds(1000), 1000), 1);
    assert_eq!(ids.next.len(), 1);
    assert!(ids.next.contains_key(&dummy_addr_2()));

    assert_eq!(ids.prune(Milliseconds(1500), 1000), 1);
    assert!(ids.next.is_empty());
  }

  #[test]
  fn ids_skip_those_in_use() {
    let ids = Ids::new(0, Milliseconds(1));
    let dedup = Dedup::new(Milliseconds(1000), 100_000);
    let now = Milliseconds(0);

    let a = ids.next_id(dummy_addr(), &dedup, now).unwrap();
    // the id after `a` is claimed elsewhere
    assert!(dedup.outbound(dummy_addr(), a.next(), now));
    assert_eq!(ids.next_id(dummy_addr(), &dedup, now).unwrap(),
               a.next().next());
  }
}
