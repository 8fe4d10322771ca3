use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use embedded_time::duration::Milliseconds;
use newt_msg::Token;
use parking_lot::{Condvar, Mutex};

use crate::net::Addrd;
use crate::time::Millis;

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Alarm {
  /// Retransmit the exchange's CON (or give up on it)
  Retransmit,
  /// Stop waiting for a response
  Expire,
  /// Forget a finished exchange
  Retire,
}

/// A scheduled wake-up for an exchange.
///
/// `generation` is the exchange's generation when the timer was
/// armed; a timer that fires after the exchange has moved on is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timer {
  pub(crate) key: Addrd<Token>,
  pub(crate) kind: Alarm,
  pub(crate) generation: u64,
}

/// Handle to a scheduled timer, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Slot {
  at: u64,
  seq: u64,
}

/// Timer wheel shared by every exchange; ordered by deadline then insertion.
#[derive(Debug, Default)]
pub(crate) struct Timers {
  queue: Mutex<BTreeMap<Slot, Timer>>,
  seq: AtomicU64,
  changed: Condvar,
}

impl Timers {
  pub(crate) fn schedule(&self, at: Millis, timer: Timer) -> Slot {
    let slot = Slot { at: at.0,
                      seq: self.seq.fetch_add(1, Ordering::Relaxed) };

    let mut q = self.queue.lock();
    let earliest = q.keys().next().map(|s| slot < *s).unwrap_or(true);
    q.insert(slot, timer);

    if earliest {
      self.changed.notify_all();
    }

    slot
  }

  /// Cancel a timer; `false` if it already fired or was cancelled
  pub(crate) fn cancel(&self, slot: Slot) -> bool {
    self.queue.lock().remove(&slot).is_some()
  }

  /// Remove and yield every timer due at `now`, earliest first
  pub(crate) fn pop_due(&self, now: Millis) -> Vec<Timer> {
    let mut q = self.queue.lock();
    let later = q.split_off(&Slot { at: now.0.saturating_add(1),
                                    seq: 0 });
    let due = core::mem::replace(&mut *q, later);
    due.into_values().collect()
  }

  pub(crate) fn next_deadline(&self) -> Option<Millis> {
    self.queue
        .lock()
        .keys()
        .next()
        .map(|s| Milliseconds(s.at))
  }

  pub(crate) fn len(&self) -> usize {
    self.queue.lock().len()
  }

  /// Block the calling thread until the earliest timer is due
  /// (as of `now`), a new earliest timer is scheduled,
  /// [`Timers::wake`] is called, or `max` passes.
  pub(crate) fn park(&self, now: Millis, max: Duration) {
    let mut q = self.queue.lock();
    let wait = q.keys()
                .next()
                .map(|s| Duration::from_millis(s.at.saturating_sub(now.0)))
                .unwrap_or(max)
                .min(max);

    if !wait.is_zero() {
      self.changed.wait_for(&mut q, wait);
    }
  }

  /// Wake up anyone parked
  pub(crate) fn wake(&self) {
    let _q = self.queue.lock();
    self.changed.notify_all();
  }
}
