use std::net::SocketAddr;
use std::sync::Weak;

use dashmap::DashMap;
use newt_msg::{known, observe, Id, Message, Token, Type};

use crate::block;
use crate::exchange::{Engine, Inner, Kind};
use crate::net::{Addrd, Transport};
use crate::req::Req;
use crate::time::{Clock, Millis};

/// A client observing one of our resources
#[derive(Debug, Clone)]
pub(crate) struct Observer {
  pub(crate) path: String,
  /// The registration request; re-dispatched to produce every notification
  pub(crate) request: Message,
  /// Id of the latest NON notification, to match RSTs against
  pub(crate) last_id: Option<Id>,
}

/// The observer list of every resource (RFC7641 section 4.1),
/// keyed by the observer's token & address
#[derive(Debug, Default)]
pub(crate) struct Observers {
  relations: DashMap<Addrd<Token>, Observer>,
  seq: DashMap<String, u32>,
}

impl Observers {
  /// Add (or refresh) an observer; yields `true` if it is new
  pub(crate) fn register(&self, key: Addrd<Token>, path: String, request: Message) -> bool {
    log::debug!("{} is observing {} ({})", key.1, path, key.0);
    self.relations
        .insert(key,
                Observer { path,
                           request,
                           last_id: None })
        .is_none()
  }

  pub(crate) fn remove(&self, key: &Addrd<Token>) -> bool {
    match self.relations.remove(key) {
      | Some((_, o)) => {
        log::debug!("{} stopped observing {} ({})", key.1, o.path, key.0);
        true
      },
      | None => false,
    }
  }

  /// Every observer of `path`, with its registration request
  pub(crate) fn of_path(&self, path: &str) -> Vec<(Addrd<Token>, Message)> {
    self.relations
        .iter()
        .filter(|o| o.path == path)
        .map(|o| (*o.key(), o.request.clone()))
        .collect()
  }

  /// The sequence number for the next notification of `path`
  pub(crate) fn next_seq(&self, path: &str) -> u32 {
    let mut seq = self.seq.entry(path.to_string()).or_insert(0);
    *seq = (*seq + 1) & observe::MAX_SEQUENCE;
    *seq
  }

  pub(crate) fn sent(&self, key: &Addrd<Token>, id: Id) {
    if let Some(mut o) = self.relations.get_mut(key) {
      o.last_id = Some(id);
    }
  }

  /// A peer rejected the notification with this id; forget it as an observer
  pub(crate) fn reset(&self, peer: SocketAddr, id: Id) -> bool {
    let before = self.relations.len();
    self.relations
        .retain(|k, o| !(k.1 == peer && o.last_id == Some(id)));
    self.relations.len() < before
  }

  pub(crate) fn len(&self) -> usize {
    self.relations.len()
  }
}

/// Operations a [`Notifier`] needs from the engine
pub(crate) trait Notify: Send + Sync {
  fn notify(&self, path: &str) -> usize;
}

impl<T: Transport, C: Clock> Notify for Inner<T, C> {
  fn notify(&self, path: &str) -> usize {
    Inner::notify(self, path)
  }
}

/// Tells the observers of a resource that its state changed.
///
/// Handlers get one through [`Context::notifier`](crate::server::Context::notifier)
/// and may keep it (it does not keep the engine alive).
#[derive(Clone)]
pub struct Notifier {
  path: String,
  engine: Weak<dyn Notify>,
}

impl core::fmt::Debug for Notifier {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Notifier").field("path", &self.path).finish()
  }
}

impl Notifier {
  pub(crate) fn new(path: String, engine: Weak<dyn Notify>) -> Self {
    Self { path, engine }
  }

  /// The resource this notifies observers of
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Send a notification to every observer of the resource;
  /// yields the number of notifications sent.
  pub fn notify(&self) -> usize {
    self.engine
        .upgrade()
        .map(|e| e.notify(&self.path))
        .unwrap_or(0)
  }
}

impl<T: Transport, C: Clock> Inner<T, C> {
  pub(crate) fn notifier(&self, path: &str) -> Notifier {
    let engine: Weak<dyn Notify> = self.me.clone();
    Notifier::new(path.to_string(), engine)
  }

  /// Re-run the handler of `path` for each of its observers and
  /// send them the result
  pub(crate) fn notify(&self, path: &str) -> usize {
    let now = self.now_or_last();

    self.observers
        .of_path(path)
        .into_iter()
        .filter(|(key, request)| self.notify_one(*key, path, request, now))
        .count()
  }

  fn notify_one(&self, key: Addrd<Token>, path: &str, request: &Message, now: Millis) -> bool {
    let peer = key.1;
    let req = Addrd(Req::from(request.clone()), peer);
    let mut msg = Message::from(self.dispatch(&req, true));
    msg.token = key.0;

    match msg.code.is_success() {
      | true => msg.set_observe(self.observers.next_seq(path)),
      | false => {
        msg.remove(known::OBSERVE);
        self.observers.remove(&key);
      },
    }

    let size = self.config.block_size();
    if self.datagram() && msg.payload.0.len() > size as usize {
      if let Some(first) = block::slice(&msg, 0, size) {
        self.blocks
            .cache_response(peer, path.to_string(), msg, now);
        msg = first;
      }
    }

    if self.datagram() && self.config.observe.confirmable_notifications && self.notification_slot(&key) {
      msg.ty = Type::Con;
      return match self.submit(Addrd(msg, peer), Kind::Notification) {
               | Ok(_) => true,
               | Err(e) => {
                 log::warn!("{}", e);
                 false
               },
             };
    }

    msg.ty = Type::Non;
    if self.datagram() {
      match self.ids.next_id(peer, &self.dedup, now) {
        | Some(id) => msg.id = id,
        | None => {
          log::warn!("no message ids left for {}; skipping notification", peer);
          return false;
        },
      }
    }

    let sent = self.send_msg(Addrd(&msg, peer)).is_some();
    if sent {
      self.observers.sent(&key, msg.id);
    }

    sent
  }

  /// Make way for a CON notification to an observer.
  ///
  /// A newer notification replaces one still in flight (RFC7641 section 4.5.2);
  /// `false` when the key is taken by something other than a notification.
  fn notification_slot(&self, key: &Addrd<Token>) -> bool {
    let notification = match self.exchange(key) {
      | None => return true,
      | Some(ex) => matches!(ex.lock().kind, Kind::Notification),
    };

    if notification {
      self.retire_now(key);
    }

    notification
  }
}

impl<T: Transport, C: Clock> Engine<T, C> {
  /// Notify the observers of a resource that its state changed.
  ///
  /// The resource's handler is invoked once per observer (with
  /// [`Context::is_notification`](crate::server::Context::is_notification) set)
  /// and the response is sent as a notification. Yields the number of notifications sent.
  pub fn notify(&self, path: &str) -> usize {
    self.inner.notify(path.trim_matches('/'))
  }

  /// A [`Notifier`] for a resource
  pub fn notifier(&self, path: &str) -> Notifier {
    self.inner.notifier(path.trim_matches('/'))
  }

  /// Number of clients observing our resources
  pub fn observers(&self) -> usize {
    self.inner.observers.len()
  }
}

#[cfg(test)]
mod tests {
  use newt_msg::Code;

  use super::*;
  use crate::test::{dummy_addr, dummy_addr_2};

  fn req(path: &str) -> Message {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::opaque(&[1]));
    msg.set_path(path);
    msg.set_observe(0);
    msg
  }

  #[test]
  fn register_and_list() {
    let obs = Observers::default();
    let a = Addrd(Token::opaque(&[1]), dummy_addr());
    let b = Addrd(Token::opaque(&[2]), dummy_addr_2());

    assert!(obs.register(a, "temp".into(), req("temp")));
    assert!(!obs.register(a, "temp".into(), req("temp")));
    assert!(obs.register(b, "humidity".into(), req("humidity")));

    assert_eq!(obs.of_path("temp").into_iter().map(|(k, _)| k).collect::<Vec<_>>(),
               vec![a]);
    assert!(obs.remove(&a));
    assert!(!obs.remove(&a));
    assert_eq!(obs.len(), 1);
  }

  #[test]
  fn sequence_numbers_are_per_path_and_wrap() {
    let obs = Observers::default();
    assert_eq!(obs.next_seq("a"), 1);
    assert_eq!(obs.next_seq("a"), 2);
    assert_eq!(obs.next_seq("b"), 1);

    obs.seq.insert("a".into(), observe::MAX_SEQUENCE);
    assert_eq!(obs.next_seq("a"), 0);
  }

  #[test]
  fn reset_forgets_observer() {
    let obs = Observers::default();
    let a = Addrd(Token::opaque(&[1]), dummy_addr());
    obs.register(a, "temp".into(), req("temp"));
    obs.sent(&a, Id(40));

    assert!(!obs.reset(dummy_addr(), Id(41)));
    assert!(!obs.reset(dummy_addr_2(), Id(40)));
    assert!(obs.reset(dummy_addr(), Id(40)));
    assert_eq!(obs.len(), 0);
  }
}
