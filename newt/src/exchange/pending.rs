use std::sync::{Arc, Weak};
use std::time::Instant;

use newt_msg::Token;
use parking_lot::{Condvar, Mutex};

use super::state::{CancelReason, State};
use crate::error::{Error, What, When};
use crate::net::Addrd;
use crate::resp::Resp;
use crate::time::Timeout;

/// The outcome of an exchange
pub type Outcome = Result<Addrd<Resp>, Error>;

/// A slot that is filled exactly once with the outcome of an exchange.
///
/// The first call to [`Pending::complete`] wins; later calls are ignored.
#[derive(Debug, Default)]
pub(crate) struct Pending {
  slot: Mutex<Option<Outcome>>,
  done: Condvar,
}

impl Pending {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Fill the slot, waking anyone waiting. Yields `false`
  /// if the slot was already filled.
  pub(crate) fn complete(&self, outcome: Outcome) -> bool {
    let mut slot = self.slot.lock();
    if slot.is_some() {
      return false;
    }

    *slot = Some(outcome);
    self.done.notify_all();
    true
  }

  pub(crate) fn is_complete(&self) -> bool {
    self.slot.lock().is_some()
  }

  pub(crate) fn peek(&self) -> Option<Outcome> {
    self.slot.lock().clone()
  }

  /// Block until the slot is filled or `deadline` passes
  pub(crate) fn wait(&self, deadline: Option<Instant>) -> Option<Outcome> {
    let mut slot = self.slot.lock();
    loop {
      if let Some(outcome) = slot.as_ref() {
        return Some(outcome.clone());
      }

      match deadline {
        | Some(deadline) => {
          if self.done.wait_until(&mut slot, deadline).timed_out() {
            return slot.clone();
          }
        },
        | None => self.done.wait(&mut slot),
      }
    }
  }
}

/// Operations an [`ExchangeHandle`] needs from the engine that owns its exchange
pub(crate) trait Exchanges: Send + Sync {
  /// Cancel the exchange; `false` if it had already finished
  fn cancel(&self, key: &Addrd<Token>, pending: &Arc<Pending>, why: CancelReason) -> bool;

  /// Current state of the exchange, `None` if it has been forgotten
  /// or is still waiting for its turn to be sent
  fn state(&self, key: &Addrd<Token>) -> Option<State>;
}

/// The caller's side of an exchange.
///
/// Waiting on a handle never blocks the engine, and dropping it
/// does not cancel the exchange.
///
/// ```no_run
/// use newt::config::Config;
/// use newt::net::Addrd;
/// use newt::req::Req;
/// use newt::time::Timeout;
///
/// let (engine, _runtime) = newt::std::bind("0.0.0.0:0", Config::default()).unwrap();
/// let server = "127.0.0.1:5683".parse().unwrap();
///
/// let handle = engine.send(Addrd(Req::get("hello"), server)).unwrap();
///
/// match handle.wait(Timeout::Millis(1_000)) {
///   | Ok(resp) => println!("{:?}", resp.data().payload_str()),
///   | Err(e) => println!("{}", e),
/// }
/// ```
pub struct ExchangeHandle {
  key: Addrd<Token>,
  pending: Arc<Pending>,
  engine: Weak<dyn Exchanges>,
}

impl core::fmt::Debug for ExchangeHandle {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ExchangeHandle")
     .field("key", &self.key)
     .field("complete", &self.pending.is_complete())
     .finish()
  }
}

impl ExchangeHandle {
  pub(crate) fn new(key: Addrd<Token>, pending: Arc<Pending>, engine: Weak<dyn Exchanges>) -> Self {
    Self { key,
           pending,
           engine }
  }

  /// The token identifying this exchange
  pub fn token(&self) -> Token {
    self.key.0
  }

  /// The peer this exchange is with
  pub fn peer(&self) -> std::net::SocketAddr {
    self.key.1
  }

  /// Where the exchange is in its lifecycle.
  ///
  /// `None` while the request waits for its turn to be sent,
  /// and after the exchange has been forgotten by the engine.
  pub fn state(&self) -> Option<State> {
    self.engine.upgrade().and_then(|e| e.state(&self.key))
  }

  /// Check for the outcome without blocking
  pub fn poll(&self) -> nb::Result<Addrd<Resp>, Error> {
    match self.pending.peek() {
      | Some(Ok(r)) => Ok(r),
      | Some(Err(e)) => Err(nb::Error::Other(e)),
      | None => Err(nb::Error::WouldBlock),
    }
  }

  /// Block until the exchange finishes or `timeout` elapses.
  ///
  /// When the timeout elapses first, the exchange is cancelled and this
  /// yields [`What::DeadlineElapsed`]. The caller's deadline is
  /// independent of the engine's retransmission timers.
  pub fn wait(&self, timeout: Timeout) -> Result<Addrd<Resp>, Error> {
    let deadline = timeout.deadline(Instant::now());
    let when = When::Waiting(self.key.0);

    loop {
      if let Some(outcome) = self.pending.wait(deadline) {
        return outcome;
      }

      match self.engine.upgrade() {
        | Some(engine) => {
          engine.cancel(&self.key, &self.pending, CancelReason::Deadline);
        },
        | None => {
          self.pending
              .complete(Err(when.what(What::EngineStopped)));
        },
      }

      // whatever won the race (the cancellation, or an outcome that
      // arrived just before it) is now in the slot
      if let Some(outcome) = self.pending.peek() {
        return outcome;
      }
    }
  }

  /// Cancel the exchange.
  ///
  /// Yields `false` if it had already finished.
  pub fn cancel(&self) -> bool {
    match self.engine.upgrade() {
      | Some(engine) => engine.cancel(&self.key, &self.pending, CancelReason::Requested),
      | None => self.pending
                    .complete(Err(When::Waiting(self.key.0).what(What::EngineStopped))),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::thread;
  use std::time::Duration;

  use newt_msg::Message;

  use super::*;
  use crate::test::dummy_addr;

  fn resp() -> Addrd<Resp> {
    Addrd(Resp::from(Message::empty(newt_msg::Type::Ack, newt_msg::Id(1))),
          dummy_addr())
  }

  #[test]
  fn first_completion_wins() {
    let p = Pending::new();
    assert!(p.complete(Ok(resp())));
    assert!(!p.complete(Err(Error::new(What::Cancelled))));
    assert_eq!(p.peek(), Some(Ok(resp())));
  }

  #[test]
  fn wait_wakes_on_completion() {
    let p = Arc::new(Pending::new());
    let p2 = p.clone();
    let t = thread::spawn(move || p2.wait(None));

    thread::sleep(Duration::from_millis(20));
    p.complete(Err(Error::new(What::Reset)));
    assert_eq!(t.join().unwrap().map(|o| o.unwrap_err().what),
               Some(What::Reset));
  }

  #[test]
  fn wait_times_out() {
    let p = Pending::new();
    let deadline = Instant::now() + Duration::from_millis(10);
    assert_eq!(p.wait(Some(deadline)), None);
  }

  #[test]
  fn orphaned_handle_reports_engine_stopped() {
    let engine: Weak<dyn Exchanges> = Weak::<NoEngine>::new();
    let h = ExchangeHandle::new(Addrd(Token::opaque(&[1]), dummy_addr()),
                                Arc::new(Pending::new()),
                                engine);

    assert_eq!(h.poll().unwrap_err(), nb::Error::WouldBlock);
    assert_eq!(h.wait(Timeout::Millis(5)).unwrap_err().what,
               What::EngineStopped);
    assert!(!h.cancel());
  }

  struct NoEngine;
  impl Exchanges for NoEngine {
    fn cancel(&self, _: &Addrd<Token>, _: &Arc<Pending>, _: CancelReason) -> bool {
      false
    }

    fn state(&self, _: &Addrd<Token>) -> Option<State> {
      None
    }
  }
}
