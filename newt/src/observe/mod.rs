use std::net::SocketAddr;
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use dashmap::DashMap;
use newt_msg::{observe, Message, Token};

use crate::error::{Error, What, When};
use crate::exchange::{after, Engine, ExchangeHandle, Inner, Kind, Outcome};
use crate::net::{Addrd, Transport};
use crate::req::Req;
use crate::resp::Resp;
use crate::time::{Clock, Millis, Timeout};

/// Keeping track of clients observing our resources
pub mod server;

/// Notifications whose sequence numbers are this far apart
/// are ordered the other way around (RFC7641 section 3.4)
const SEQ_HALF_RANGE: u32 = 1 << 23;

/// Notifications more than this far apart in time are
/// always fresh (RFC7641 section 3.4)
const FRESHNESS_WINDOW_MILLIS: u64 = 128_000;

/// Is a notification with sequence number `v2` received at `t2` newer than
/// one with `v1` received at `t1`? (RFC7641 section 3.4)
///
/// Sequence numbers are 24 bits wide and wrap around.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use newt::observe::is_fresh;
///
/// let t = Milliseconds(0u64);
/// assert!(is_fresh(5, t, 7, t));
/// assert!(!is_fresh(5, t, 3, t));
///
/// // wrapped around
/// assert!(is_fresh(0xFF_FFFF, t, 1, t));
///
/// // stale, but long enough ago that ordering no longer matters
/// assert!(is_fresh(5, t, 3, Milliseconds(128_001)));
/// ```
pub fn is_fresh(v1: u32, t1: Millis, v2: u32, t2: Millis) -> bool {
  (v1 < v2 && v2 - v1 < SEQ_HALF_RANGE)
  || (v1 > v2 && v1 - v2 > SEQ_HALF_RANGE)
  || t2.0 > t1.0.saturating_add(FRESHNESS_WINDOW_MILLIS)
}

/// Identifies an observation: the resource, and the token & peer
/// every notification for it carries
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservationKey {
  /// Path of the observed resource
  pub path: String,
  /// Token of the registration request
  pub token: Token,
  /// The server
  pub peer: SocketAddr,
}

impl ObservationKey {
  pub(crate) fn addrd_token(&self) -> Addrd<Token> {
    Addrd(self.token, self.peer)
  }
}

#[derive(Debug)]
struct Observation {
  path: String,
  seq: u32,
  at: Millis,
  expires_at: Millis,
  tx: Sender<Outcome>,
}

/// What became of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
  /// Handed to the subscriber
  Delivered,
  /// Older than a notification we already delivered
  Stale,
  /// Delivered, and the observation is over
  Ended,
  /// We are not observing anything with this token
  Unknown,
}

/// Observations we hold on other peers' resources
#[derive(Debug)]
pub(crate) struct Observations {
  map: DashMap<Addrd<Token>, Observation>,
  leeway: Millis,
}

impl Observations {
  pub(crate) fn new(leeway: Millis) -> Self {
    Self { map: DashMap::new(),
           leeway }
  }

  fn expiry(&self, msg: &Message, now: Millis) -> Millis {
    after(now, (msg.max_age() as u64 * 1000).saturating_add(self.leeway.0))
  }

  /// Start tracking an observation once the server accepted it;
  /// yields `false` (dropping `tx`) if it did not.
  pub(crate) fn register(&self,
                         key: Addrd<Token>,
                         request: &Message,
                         resp: &Message,
                         tx: Sender<Outcome>,
                         now: Millis)
                         -> bool {
    let seq = match resp.observe() {
      | Some(seq) if resp.code.is_success() => seq,
      | _ => return false,
    };

    let path = request.path().unwrap_or_default();
    log::debug!("observing {} on {} ({})", path, key.1, key.0);

    self.map.insert(key,
                    Observation { path,
                                  seq,
                                  at: now,
                                  expires_at: self.expiry(resp, now),
                                  tx });
    true
  }

  pub(crate) fn contains(&self, key: &Addrd<Token>) -> bool {
    self.map.contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.map.len()
  }

  /// Route a response to the observation its token belongs to
  pub(crate) fn notify(&self, key: &Addrd<Token>, msg: &Message, now: Millis) -> Delivery {
    let delivery = match self.map.get_mut(key) {
      | None => return Delivery::Unknown,
      | Some(mut obs) => {
        let resp = Addrd(Resp::from(msg.clone()), key.1);

        match msg.observe().filter(|_| msg.code.is_success()) {
          | None => {
            log::debug!("{} ended observation of {}", key.1, obs.path);
            obs.tx.send(Ok(resp)).ok();
            Delivery::Ended
          },
          | Some(seq) if !is_fresh(obs.seq, obs.at, seq, now) => Delivery::Stale,
          | Some(seq) => {
            obs.seq = seq;
            obs.at = now;
            obs.expires_at = self.expiry(msg, now);

            match obs.tx.send(Ok(resp)) {
              | Ok(()) => Delivery::Delivered,
              | Err(_) => Delivery::Ended,
            }
          },
        }
      },
    };

    if delivery == Delivery::Ended {
      self.map.remove(key);
    }

    delivery
  }

  pub(crate) fn forget(&self, key: &Addrd<Token>) -> bool {
    self.map.remove(key).is_some()
  }

  /// End observations that went quiet for longer than
  /// the freshness of their latest notification
  pub(crate) fn expire(&self, now: Millis) -> Vec<(Addrd<Token>, Error)> {
    let expired = self.map
                      .iter()
                      .filter(|o| o.expires_at.0 < now.0)
                      .map(|o| *o.key())
                      .collect::<Vec<_>>();

    expired.into_iter()
           .filter_map(|key| self.map.remove(&key))
           .map(|(key, obs)| {
             let e = When::Waiting(key.0).what(What::ObservationExpired);
             obs.tx.send(Err(e.clone())).ok();
             (key, e)
           })
           .collect()
  }
}

/// Operations a [`Subscription`] needs from the engine
pub(crate) trait Observing: Send + Sync {
  fn forget_observation(&self, key: &Addrd<Token>);
  fn deregister(&self, request: Message, peer: SocketAddr) -> Result<ExchangeHandle, Error>;
}

impl<T: Transport, C: Clock> Observing for Inner<T, C> {
  fn forget_observation(&self, key: &Addrd<Token>) {
    if self.observations.forget(key) {
      log::debug!("forgot observation {} with {}", key.0, key.1);
    }
  }

  fn deregister(&self, mut request: Message, peer: SocketAddr) -> Result<ExchangeHandle, Error> {
    let key = Addrd(request.token, peer);
    self.observations.forget(&key);
    self.retire_now(&key);

    request.set_observe(observe::Action::Deregister.into());
    self.submit(Addrd(request, peer), Kind::Request)
  }
}

/// A stream of notifications from an observed resource (RFC7641).
///
/// The first item is the response to the registration; notifications
/// follow in order of freshness (stale ones are dropped).
/// The stream ends when the server stops sending notifications
/// (an error response, or a response without Observe),
/// or yields [`What::ObservationExpired`] when the latest notification
/// outlived its Max-Age.
///
/// Dropping a subscription forgets the observation locally; the server
/// learns of it when we reject its next notification. Use
/// [`Subscription::deregister`] to tell it explicitly.
pub struct Subscription {
  key: ObservationKey,
  request: Message,
  first: Option<ExchangeHandle>,
  rx: Receiver<Outcome>,
  engine: Weak<dyn Observing>,
}

impl core::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Subscription")
     .field("key", &self.key)
     .field("registered", &self.first.is_none())
     .finish()
  }
}

impl Subscription {
  /// The observation this subscription receives notifications for
  pub fn key(&self) -> &ObservationKey {
    &self.key
  }

  /// Block until the next notification arrives.
  ///
  /// Yields `None` once the observation is over.
  pub fn next(&mut self, timeout: Timeout) -> Option<Outcome> {
    if let Some(first) = self.first.take() {
      return Some(first.wait(timeout));
    }

    let when = When::Waiting(self.key.token);
    match timeout {
      | Timeout::Millis(ms) => match self.rx.recv_timeout(Duration::from_millis(ms)) {
        | Ok(outcome) => Some(outcome),
        | Err(RecvTimeoutError::Timeout) => Some(Err(when.what(What::DeadlineElapsed))),
        | Err(RecvTimeoutError::Disconnected) => None,
      },
      | Timeout::Never => self.rx.recv().ok(),
    }
  }

  /// Check for a notification without blocking
  pub fn try_next(&mut self) -> nb::Result<Outcome, ()> {
    if let Some(first) = self.first.as_ref() {
      let outcome = match first.poll() {
        | Ok(resp) => Ok(resp),
        | Err(nb::Error::Other(e)) => Err(e),
        | Err(nb::Error::WouldBlock) => return Err(nb::Error::WouldBlock),
      };

      self.first = None;
      return Ok(outcome);
    }

    match self.rx.try_recv() {
      | Ok(outcome) => Ok(outcome),
      | Err(TryRecvError::Empty) => Err(nb::Error::WouldBlock),
      | Err(TryRecvError::Disconnected) => Err(nb::Error::Other(())),
    }
  }

  /// Ask the server to stop sending notifications
  /// (a GET with `Observe: 1` and the same token).
  ///
  /// The returned handle completes with the server's response.
  pub fn deregister(self) -> Result<ExchangeHandle, Error> {
    match self.engine.upgrade() {
      | Some(engine) => engine.deregister(self.request.clone(), self.key.peer),
      | None => Err(When::Waiting(self.key.token).what(What::EngineStopped)),
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(engine) = self.engine.upgrade() {
      engine.forget_observation(&self.key.addrd_token());
    }
  }
}

impl<T: Transport, C: Clock> Engine<T, C> {
  /// Observe a resource: send a GET (or FETCH) with `Observe: 0`
  /// and receive every notification the server sends back.
  pub fn observe(&self, req: Addrd<Req>) -> Result<Subscription, Error> {
    let now = self.inner.now()?;
    let Addrd(req, peer) = req;
    let mut msg = Message::from(req);

    if msg.token.is_empty() {
      msg.token = self.inner.ids.next_token(now);
    }
    msg.set_observe(observe::Action::Register.into());

    let key = ObservationKey { path: msg.path().unwrap_or_default(),
                               token: msg.token,
                               peer };

    let (tx, rx) = crossbeam_channel::unbounded();
    let first = self.inner
                    .submit(Addrd(msg.clone(), peer), Kind::Observe(Some(tx)))?;
    let engine: Weak<dyn Observing> = self.inner.me.clone();

    Ok(Subscription { key,
                      request: msg,
                      first: Some(first),
                      rx,
                      engine })
  }

  /// Number of observations we hold on other peers' resources
  pub fn observations(&self) -> usize {
    self.inner.observations.len()
  }
}
