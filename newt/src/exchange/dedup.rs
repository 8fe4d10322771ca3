use std::net::SocketAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use newt_msg::Id;

use crate::time::{Millis, Stamped};

/// Which way a message id travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Direction {
  /// A peer sent us a message with this id
  Inbound,
  /// We sent a peer a message with this id
  Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
  pub(crate) peer: SocketAddr,
  pub(crate) direction: Direction,
  pub(crate) id: Id,
}

/// What we know about a message id we have seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Seen {
  /// We are still working on the message
  Processing,
  /// We replied to the message with these bytes
  Replied(Vec<u8>),
  /// We sent a message with this id
  Sent,
}

/// Message ids seen recently, per peer and direction.
///
/// Entries are forgotten once they are older than the window, or
/// (oldest first) when there are more than `capacity` of them.
#[derive(Debug)]
pub(crate) struct Dedup {
  seen: DashMap<Key, Stamped<Seen>>,
  window: Millis,
  capacity: usize,
}

impl Dedup {
  pub(crate) fn new(window: Millis, capacity: usize) -> Self {
    Self { seen: DashMap::new(),
           window,
           capacity }
  }

  /// Note that a peer sent us a message with this id.
  ///
  /// Yields `None` the first time an id is seen within the window,
  /// and what we know about it every time after that.
  pub(crate) fn inbound(&self, peer: SocketAddr, id: Id, now: Millis) -> Option<Seen> {
    let key = Key { peer,
                    direction: Direction::Inbound,
                    id };

    let seen = match self.seen.entry(key) {
      | Entry::Occupied(e) if !e.get().is_older_than(self.window, now) => Some(e.get().0.clone()),
      | Entry::Occupied(mut e) => {
        e.insert(Stamped(Seen::Processing, now));
        None
      },
      | Entry::Vacant(e) => {
        e.insert(Stamped(Seen::Processing, now));
        None
      },
    };

    if seen.is_none() {
      self.enforce_capacity(now);
    }

    seen
  }

  /// Remember the bytes we replied to an inbound message with,
  /// so that duplicates get the same reply
  pub(crate) fn replied(&self, peer: SocketAddr, id: Id, bytes: Vec<u8>) {
    let key = Key { peer,
                    direction: Direction::Inbound,
                    id };

    if let Some(mut e) = self.seen.get_mut(&key) {
      e.0 = Seen::Replied(bytes);
    }
  }

  /// Claim an id for a message we are about to send.
  ///
  /// Yields `false` if the id was used with this peer within the window.
  pub(crate) fn outbound(&self, peer: SocketAddr, id: Id, now: Millis) -> bool {
    let key = Key { peer,
                    direction: Direction::Outbound,
                    id };

    let claimed = match self.seen.entry(key) {
      | Entry::Occupied(e) if !e.get().is_older_than(self.window, now) => false,
      | Entry::Occupied(mut e) => {
        e.insert(Stamped(Seen::Sent, now));
        true
      },
      | Entry::Vacant(e) => {
        e.insert(Stamped(Seen::Sent, now));
        true
      },
    };

    if claimed {
      self.enforce_capacity(now);
    }

    claimed
  }

  /// Release an outbound id early (e.g. the exchange was cancelled)
  pub(crate) fn forget_outbound(&self, peer: SocketAddr, id: Id) {
    self.seen.remove(&Key { peer,
                            direction: Direction::Outbound,
                            id });
  }

  /// Forget entries older than the window
  pub(crate) fn prune(&self, now: Millis) -> usize {
    let before = self.seen.len();
    self.seen.retain(|_, s| !s.is_older_than(self.window, now));
    before - self.seen.len()
  }

  pub(crate) fn len(&self) -> usize {
    self.seen.len()
  }

  fn enforce_capacity(&self, now: Millis) {
    if self.seen.len() <= self.capacity {
      return;
    }

    self.prune(now);

    while self.seen.len() > self.capacity {
      let oldest = self.seen
                       .iter()
                       .min_by_key(|e| e.value().1 .0)
                       .map(|e| *e.key());

      match oldest {
        | Some(key) => {
          log::trace!("Dedup at capacity; forgetting {:?}", key);
          self.seen.remove(&key);
        },
        | None => break,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2};

  fn ms(n: u64) -> Millis {
    Milliseconds(n)
  }

  #[test]
  fn inbound_duplicates() {
    let dedup = Dedup::new(ms(100), 10);
    assert_eq!(dedup.inbound(dummy_addr(), Id(1), ms(0)), None);
    assert_eq!(dedup.inbound(dummy_addr(), Id(1), ms(50)),
               Some(Seen::Processing));

    dedup.replied(dummy_addr(), Id(1), vec![1, 2]);
    assert_eq!(dedup.inbound(dummy_addr(), Id(1), ms(60)),
               Some(Seen::Replied(vec![1, 2])));

    // different peer, same id
    assert_eq!(dedup.inbound(dummy_addr_2(), Id(1), ms(60)), None);

    // window passed
    assert_eq!(dedup.inbound(dummy_addr(), Id(1), ms(101)), None);
  }

  #[test]
  fn directions_are_separate() {
    let dedup = Dedup::new(ms(100), 10);
    assert!(dedup.outbound(dummy_addr(), Id(1), ms(0)));
    assert!(!dedup.outbound(dummy_addr(), Id(1), ms(1)));
    assert_eq!(dedup.inbound(dummy_addr(), Id(1), ms(1)), None);

    dedup.forget_outbound(dummy_addr(), Id(1));
    assert!(dedup.outbound(dummy_addr(), Id(1), ms(2)));
  }

  #[test]
  fn capacity_evicts_oldest() {
    let dedup = Dedup::new(ms(1_000), 3);
    for n in 0..5u16 {
      dedup.inbound(dummy_addr(), Id(n), ms(n as u64));
    }

    assert_eq!(dedup.len(), 3);
    assert_eq!(dedup.inbound(dummy_addr(), Id(4), ms(10)),
               Some(Seen::Processing));
    assert_eq!(dedup.inbound(dummy_addr(), Id(0), ms(10)), None);
  }

  #[test]
  fn prune() {
    let dedup = Dedup::new(ms(10), 100);
    dedup.inbound(dummy_addr(), Id(1), ms(0));
    dedup.outbound(dummy_addr(), Id(2), ms(5));
    assert_eq!(dedup.prune(ms(11)), 1);
    assert_eq!(dedup.len(), 1);
  }
}
