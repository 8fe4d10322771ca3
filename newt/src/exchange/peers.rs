use std::collections::VecDeque;
use std::net::SocketAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug)]
struct Peer<Q> {
  in_flight: usize,
  queue: VecDeque<Q>,
}

/// Per-peer limit on outstanding CON requests (RFC7252 `NSTART`),
/// with requests over the limit waiting in FIFO order.
#[derive(Debug)]
pub(crate) struct Peers<Q> {
  peers: DashMap<SocketAddr, Peer<Q>>,
  limit: usize,
}

impl<Q> Peers<Q> {
  pub(crate) fn new(limit: usize) -> Self {
    Self { peers: DashMap::new(),
           limit: limit.max(1) }
  }

  /// Claim a slot for `item`, or queue it behind requests already waiting.
  ///
  /// Yields the item back when it may be sent right away.
  pub(crate) fn admit(&self, peer: SocketAddr, item: Q) -> Option<Q> {
    let mut p = self.peers.entry(peer).or_insert_with(|| Peer { in_flight: 0,
                                                                queue: VecDeque::new() });

    if p.in_flight < self.limit && p.queue.is_empty() {
      p.in_flight += 1;
      Some(item)
    } else {
      p.queue.push_back(item);
      None
    }
  }

  /// Give up a slot. The request at the front of the queue (if any)
  /// takes it over and is yielded.
  pub(crate) fn release(&self, peer: SocketAddr) -> Option<Q> {
    match self.peers.entry(peer) {
      | Entry::Vacant(_) => None,
      | Entry::Occupied(mut e) => {
        let p = e.get_mut();
        match p.queue.pop_front() {
          | Some(next) => Some(next),
          | None => {
            p.in_flight = p.in_flight.saturating_sub(1);
            if p.in_flight == 0 {
              e.remove();
            }
            None
          },
        }
      },
    }
  }

  /// Remove a queued request that has not been sent yet
  pub(crate) fn dequeue(&self, peer: SocketAddr, f: impl Fn(&Q) -> bool) -> Option<Q> {
    self.peers.get_mut(&peer).and_then(|mut p| {
                               let ix = p.queue.iter().position(|q| f(q))?;
                               p.queue.remove(ix)
                             })
  }

  /// Does any queued request match?
  pub(crate) fn any_queued(&self, peer: SocketAddr, f: impl Fn(&Q) -> bool) -> bool {
    self.peers
        .get(&peer)
        .map(|p| p.queue.iter().any(|q| f(q)))
        .unwrap_or(false)
  }

  pub(crate) fn in_flight(&self, peer: SocketAddr) -> usize {
    self.peers.get(&peer).map(|p| p.in_flight).unwrap_or(0)
  }

  pub(crate) fn queued(&self, peer: SocketAddr) -> usize {
    self.peers.get(&peer).map(|p| p.queue.len()).unwrap_or(0)
  }

  /// Empty every queue
  pub(crate) fn drain(&self) -> Vec<Q> {
    let mut drained = vec![];
    self.peers
        .iter_mut()
        .for_each(|mut p| drained.extend(p.queue.drain(..)));
    drained
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2};

  #[test]
  fn fifo_per_peer() {
    let peers = Peers::new(1);
    assert_eq!(peers.admit(dummy_addr(), 1), Some(1));
    assert_eq!(peers.admit(dummy_addr(), 2), None);
    assert_eq!(peers.admit(dummy_addr(), 3), None);

    // other peers are unaffected
    assert_eq!(peers.admit(dummy_addr_2(), 4), Some(4));

    assert_eq!(peers.in_flight(dummy_addr()), 1);
    assert_eq!(peers.queued(dummy_addr()), 2);

    assert_eq!(peers.release(dummy_addr()), Some(2));
    assert_eq!(peers.release(dummy_addr()), Some(3));
    assert_eq!(peers.release(dummy_addr()), None);
    assert_eq!(peers.in_flight(dummy_addr()), 0);

    assert_eq!(peers.admit(dummy_addr(), 5), Some(5));
  }

  #[test]
  fn limit_above_one() {
    let peers = Peers::new(2);
    assert_eq!(peers.admit(dummy_addr(), 1), Some(1));
    assert_eq!(peers.admit(dummy_addr(), 2), Some(2));
    assert_eq!(peers.admit(dummy_addr(), 3), None);
    assert_eq!(peers.release(dummy_addr()), Some(3));
    assert_eq!(peers.in_flight(dummy_addr()), 2);
  }

  #[test]
  fn dequeue() {
    let peers = Peers::new(1);
    peers.admit(dummy_addr(), 1);
    peers.admit(dummy_addr(), 2);
    peers.admit(dummy_addr(), 3);

    assert!(peers.any_queued(dummy_addr(), |q| *q == 2));
    assert_eq!(peers.dequeue(dummy_addr(), |q| *q == 2), Some(2));
    assert_eq!(peers.dequeue(dummy_addr(), |q| *q == 2), None);
    assert_eq!(peers.release(dummy_addr()), Some(3));
    assert_eq!(peers.drain(), Vec::<i32>::new());
  }
}
