use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use dashmap::DashMap;
use embedded_time::duration::Milliseconds;
use newt_msg::{known, tcp, Id, Message, Payload, Token, Type};
use parking_lot::{Mutex, RwLock};

use crate::block::Blocks;
use crate::config::Config;
use crate::error::{Error, Malformed, What, When};
use crate::logging::msg_summary;
use crate::net::{Addrd, Framing, Transport};
use crate::observe::server::Observers;
use crate::observe::Observations;
use crate::req::Req;
use crate::retry::{RetryTimer, YouShould};
use crate::server::Router;
use crate::time::{self, Clock, Millis};

mod dedup;
mod ids;
mod inbound;
mod peers;
mod pending;
mod state;
mod timers;

pub(crate) use dedup::{Dedup, Seen};
pub(crate) use ids::Ids;
pub(crate) use peers::Peers;
pub use pending::{ExchangeHandle, Outcome};
pub(crate) use pending::{Exchanges, Pending};
pub(crate) use state::{Act, CancelReason, Event};
pub use state::State;
pub(crate) use timers::{Alarm, Slot, Timer, Timers};

/// How often idle state (dedup entries, block transfers,
/// observations) is swept
const PRUNE_EVERY_MILLIS: u64 = 1_000;

/// What an exchange is for
#[derive(Debug)]
pub(crate) enum Kind {
  /// A request we expect a response to
  Request,
  /// An empty CON we expect a RST to
  Ping,
  /// A request registering an observation; once the first response arrives
  /// the sender is handed to the observation registry
  Observe(Option<Sender<Outcome>>),
  /// A CON notification to one of our observers; an ACK finishes it
  Notification,
}

/// A request waiting for its turn to be sent
#[derive(Debug)]
pub(crate) struct Queued {
  pub(crate) key: Addrd<Token>,
  pub(crate) kind: Kind,
  pub(crate) request: Message,
  pub(crate) msg: Message,
  pub(crate) pending: Arc<Pending>,
  pub(crate) holds_slot: bool,
}

/// One outbound interaction and everything we need to drive it
#[derive(Debug)]
pub(crate) struct Exchange {
  pub(crate) key: Addrd<Token>,
  pub(crate) kind: Kind,
  /// The request as the caller gave it; template for block follow-ups
  pub(crate) request: Message,
  /// The message currently on the wire
  pub(crate) msg: Message,
  pub(crate) bytes: Vec<u8>,
  /// Every message id this exchange has used
  pub(crate) ids: Vec<Id>,
  pub(crate) state: State,
  pub(crate) retry: Option<RetryTimer>,
  pub(crate) generation: u64,
  pub(crate) timer: Option<Slot>,
  pub(crate) created_at: Millis,
  pub(crate) holds_slot: bool,
  pub(crate) pending: Arc<Pending>,
  /// Observe sequence number of the first block of a block-wise response
  pub(crate) observe_seq: Option<u32>,
}

pub(crate) fn after(now: Millis, ms: u64) -> Millis {
  Milliseconds(now.0.saturating_add(ms))
}

/// The state shared by every clone of an [`Engine`], its
/// transport's receive callback and its runtime
pub(crate) struct Inner<T: Transport, C: Clock> {
  pub(crate) me: Weak<Self>,
  pub(crate) config: Config,
  pub(crate) transport: T,
  pub(crate) clock: C,
  pub(crate) exchanges: DashMap<Addrd<Token>, Arc<Mutex<Exchange>>>,
  pub(crate) by_id: DashMap<Addrd<Id>, Addrd<Token>>,
  pub(crate) dedup: Dedup,
  pub(crate) peers: Peers<Queued>,
  pub(crate) ids: Ids,
  pub(crate) timers: Timers,
  pub(crate) blocks: Blocks,
  pub(crate) observations: Observations,
  pub(crate) observers: Observers,
  pub(crate) router: RwLock<Router>,
  /// Requests being handled right now, by token
  pub(crate) handling: DashMap<Addrd<Token>, Id>,
  /// Partial frames received on stream transports
  pub(crate) streams: DashMap<SocketAddr, Vec<u8>>,
  last_now: AtomicU64,
  last_prune: AtomicU64,
}

/// The exchange engine.
///
/// Owns every exchange with every peer, in both directions:
/// - requests we send (retransmission, deduplication, block-wise transfers, NSTART)
/// - requests we receive (deduplication, routing, block-wise transfers, observe)
///
/// The engine is cheap to clone; clones share all state.
/// It does no I/O of its own: inbound bytes arrive through the
/// [`Transport`]'s receive callback, and timers fire when someone calls
/// [`Engine::tick`] (see [`crate::std::Runtime`]).
pub struct Engine<T: Transport, C: Clock> {
  pub(crate) inner: Arc<Inner<T, C>>,
}

impl<T: Transport, C: Clock> Clone for Engine<T, C> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

impl<T: Transport, C: Clock> core::fmt::Debug for Engine<T, C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Engine")
     .field("config", &self.inner.config)
     .field("exchanges", &self.inner.exchanges.len())
     .field("timers", &self.inner.timers.len())
     .finish()
  }
}

impl<T: Transport, C: Clock> Engine<T, C> {
  /// Create an engine and register it as the transport's receiver
  pub fn new(config: Config, transport: T, clock: C) -> Result<Self, Error> {
    let now = time::now_millis(&clock).map_err(|e| Error::new(What::from(e)))?;
    let dedup_window = Milliseconds(config.dedup_window_millis());

    let inner = Arc::new_cyclic(|me| Inner { me: me.clone(),
                                             config,
                                             transport,
                                             clock,
                                             exchanges: DashMap::new(),
                                             by_id: DashMap::new(),
                                             dedup: Dedup::new(dedup_window,
                                                               config.dedup.capacity),
                                             peers: Peers::new(config.max_concurrent_requests
                                                               as usize),
                                             ids: Ids::new(config.msg.token_seed, now),
                                             timers: Timers::default(),
                                             blocks: Blocks::default(),
                                             observations: Observations::new(config.observe
                                                                                   .leeway),
                                             observers: Observers::default(),
                                             router: RwLock::new(Router::default()),
                                             handling: DashMap::new(),
                                             streams: DashMap::new(),
                                             last_now: AtomicU64::new(now.0),
                                             last_prune: AtomicU64::new(now.0) });

    let me = Arc::downgrade(&inner);
    inner.transport.on_receive(Box::new(move |chunk| {
                                 if let Some(inner) = me.upgrade() {
                                   inner.recv(chunk);
                                 }
                               }));

    Ok(Self { inner })
  }

  /// The engine's configuration
  pub fn config(&self) -> &Config {
    &self.inner.config
  }

  /// The engine's transport
  pub fn transport(&self) -> &T {
    &self.inner.transport
  }

  /// The engine's clock
  pub fn clock(&self) -> &C {
    &self.inner.clock
  }

  /// Send a request.
  ///
  /// The request gets a fresh token when it has none, and a message id
  /// when it goes on the wire; bodies bigger than the configured block size
  /// are uploaded block-wise (Block1).
  ///
  /// When the peer already has `max_concurrent_requests` CON requests in
  /// flight, the request waits for its turn and the returned handle's
  /// [`state`](ExchangeHandle::state) is `None` until then.
  pub fn send(&self, req: Addrd<Req>) -> Result<ExchangeHandle, Error> {
    self.inner.submit(req.map(Message::from), Kind::Request)
  }

  /// Send an empty CON to a peer ("CoAP ping").
  ///
  /// The exchange completes successfully with the peer's RST.
  pub fn ping(&self, peer: SocketAddr) -> Result<ExchangeHandle, Error> {
    self.inner
        .submit(Addrd(Message::empty(Type::Con, Id(0)), peer), Kind::Ping)
  }

  /// Process bytes received from a peer, as the transport's
  /// receive callback does.
  pub fn recv(&self, chunk: Addrd<&[u8]>) {
    self.inner.recv(chunk)
  }

  /// Fire every timer that is due and sweep idle state
  pub fn tick(&self) -> Result<(), Error> {
    self.inner.tick()
  }

  /// When [`Engine::tick`] next has something to do
  pub fn next_deadline(&self) -> Option<Millis> {
    self.inner.timers.next_deadline()
  }

  /// The state of an exchange we started
  pub fn state(&self, token: Token, peer: SocketAddr) -> Option<State> {
    self.inner.state(&Addrd(token, peer))
  }
}

impl<T: Transport, C: Clock> Inner<T, C> {
  pub(crate) fn now(&self) -> Result<Millis, Error> {
    let now = time::now_millis(&self.clock).map_err(|e| Error::new(What::from(e)))?;
    self.last_now.store(now.0, Ordering::Relaxed);
    Ok(now)
  }

  pub(crate) fn now_or_last(&self) -> Millis {
    self.now().unwrap_or_else(|e| {
                log::warn!("{}", e);
                Milliseconds(self.last_now.load(Ordering::Relaxed))
              })
  }

  pub(crate) fn datagram(&self) -> bool {
    self.transport.framing() == Framing::Datagram
  }

  pub(crate) fn encode(&self, msg: &Message) -> Result<Vec<u8>, What> {
    let bytes = match self.transport.framing() {
      | Framing::Datagram => msg.try_into_bytes_max(self.config.msg.max_size),
      | Framing::Stream => tcp::to_bytes(msg),
    };

    bytes.map_err(What::from)
  }

  /// Encode and send a message we will not retransmit,
  /// yielding the bytes sent
  pub(crate) fn send_msg(&self, msg: Addrd<&Message>) -> Option<Vec<u8>> {
    let Addrd(msg, peer) = msg;
    let bytes = match self.encode(msg) {
      | Ok(bytes) => bytes,
      | Err(what) => {
        log::error!("{}", When::Sending(peer, msg.id, msg.token).what(what));
        return None;
      },
    };

    match self.transport.send(Addrd(&bytes, peer)) {
      | Ok(()) => log::trace!("-> {} {}", peer, msg_summary(msg)),
      | Err(e) => log::warn!("{}", When::Sending(peer, msg.id, msg.token).what(What::from(&e))),
    }

    Some(bytes)
  }

  pub(crate) fn exchange(&self, key: &Addrd<Token>) -> Option<Arc<Mutex<Exchange>>> {
    self.exchanges.get(key).map(|e| e.value().clone())
  }

  pub(crate) fn exchange_by_id(&self, peer: SocketAddr, id: Id) -> Option<Arc<Mutex<Exchange>>> {
    let key = self.by_id.get(&Addrd(id, peer)).map(|k| *k.value())?;
    self.exchange(&key)
  }

  pub(crate) fn state(&self, key: &Addrd<Token>) -> Option<State> {
    self.exchange(key).map(|ex| ex.lock().state)
  }

  /// Accept a message for sending; it goes out now or when
  /// its peer has a free NSTART slot.
  pub(crate) fn submit(&self, msg: Addrd<Message>, kind: Kind) -> Result<ExchangeHandle, Error> {
    let now = self.now()?;
    let Addrd(mut request, peer) = msg;
    let ping = matches!(kind, Kind::Ping);

    if !ping && request.token.is_empty() {
      request.token = self.ids.next_token(now);
    }

    let key = match ping {
      | true => Addrd(self.ids.next_token(now), peer),
      | false => Addrd(request.token, peer),
    };

    if self.exchanges.contains_key(&key)
       || self.observations.contains(&key)
       || self.peers.any_queued(peer, |q| q.key == key)
    {
      let when = When::Sending(peer, request.id, request.token);
      return Err(when.what(What::MalformedMessage(Malformed::TokenCollision(key.0))));
    }

    let datagram = self.datagram();
    let size = self.config.block_size();
    let msg = if datagram && request.payload.0.len() > size as usize {
      let body = core::mem::take(&mut request.payload.0);
      let total = body.len();
      let (block, payload) = self.blocks.start_upload(key, body, size, now);
      log::debug!("{} uploading {} bytes to {} in blocks of {}",
                  key.0,
                  total,
                  peer,
                  size);

      let mut first = request.clone();
      first.payload = Payload(payload);
      first.set_block1(block);
      first.set_uint(known::SIZE1, total as u32);
      first
    } else {
      request.clone()
    };

    let gated = datagram && msg.ty == Type::Con && !matches!(kind, Kind::Notification);
    let pending = Arc::new(Pending::new());
    let engine: Weak<dyn Exchanges> = self.me.clone();
    let handle = ExchangeHandle::new(key, pending.clone(), engine);

    let queued = Queued { key,
                          kind,
                          request,
                          msg,
                          pending,
                          holds_slot: gated };

    let admitted = match gated {
      | true => self.peers.admit(peer, queued),
      | false => Some(queued),
    };

    match admitted {
      | Some(q) => self.start(q, now)?,
      | None => log::debug!("{} waiting for one of {} in-flight requests to {} to finish",
                            key.0,
                            self.peers.in_flight(peer),
                            peer),
    }

    Ok(handle)
  }

  /// Put a message on the wire for the first time
  pub(crate) fn start(&self, q: Queued, now: Millis) -> Result<(), Error> {
    let Queued { key,
                 kind,
                 request,
                 mut msg,
                 pending,
                 holds_slot, } = q;
    let peer = key.1;
    let datagram = self.datagram();

    if pending.is_complete() {
      log::debug!("{} cancelled before it was sent", key.0);
      self.blocks.forget(&key);
      if holds_slot {
        self.launch(self.peers.release(peer));
      }
      return Ok(());
    }

    if datagram {
      match self.ids.next_id(peer, &self.dedup, now) {
        | Some(id) => msg.id = id,
        | None => {
          let when = When::Sending(peer, msg.id, msg.token);
          let e = when.what(What::Transport(std::io::ErrorKind::WouldBlock));
          return self.abort(key, &pending, holds_slot, e);
        },
      }
    }

    let id = msg.id;
    let bytes = match self.encode(&msg) {
      | Ok(bytes) => bytes,
      | Err(what) => {
        let e = When::Sending(peer, id, msg.token).what(what);
        return self.abort(key, &pending, holds_slot, e);
      },
    };

    let con = datagram && msg.ty == Type::Con;
    let retry = con.then(|| {
                     RetryTimer::seeded(now,
                                        self.config.msg.con.retry_strategy,
                                        self.config.max_attempts(),
                                        now.0 ^ crate::hash::digest(key.0.as_bytes()))
                   });

    let ex = Arc::new(Mutex::new(Exchange { key,
                                            kind,
                                            request,
                                            msg,
                                            bytes,
                                            ids: vec![id],
                                            state: State::Sent,
                                            retry,
                                            generation: 0,
                                            timer: None,
                                            created_at: now,
                                            holds_slot,
                                            pending,
                                            observe_seq: None }));

    let (result, next) = {
      let mut guard = ex.lock();
      let ex_ = &mut *guard;
      self.exchanges.insert(key, ex.clone());
      if datagram {
        self.by_id.insert(Addrd(id, peer), key);
      }

      match ex_.retry.as_ref().map(RetryTimer::deadline) {
        | Some(at) => self.arm(ex_, Alarm::Retransmit, at),
        | None => {
          let lifetime = self.response_lifetime(&ex_.msg);
          self.arm(ex_, Alarm::Expire, after(now, lifetime));
        },
      }

      // cancelled while we were provisioning it
      if ex_.pending.is_complete() {
        let next = self.apply(ex_, Event::Cancel(CancelReason::Requested), now);
        (Ok(()), next)
      } else {
        self.transmit(ex_, con, now)
      }
    };

    self.launch(next);
    result
  }

  /// First transmission of an exchange that was just inserted
  fn transmit(&self,
              ex: &mut Exchange,
              con: bool,
              now: Millis)
              -> (Result<(), Error>, Option<Queued>) {
    let (key, id) = (ex.key, ex.msg.id);
    let peer = key.1;

    match self.transport.send(Addrd(&ex.bytes, peer)) {
      | Ok(()) => {
        log::trace!("-> {} {}", peer, msg_summary(&ex.msg));
        (Ok(()), None)
      },
      | Err(e) if con => {
        log::warn!("{}; will retry",
                   When::Sending(peer, id, key.0).what(What::from(&e)));
        (Ok(()), None)
      },
      | Err(e) => {
        let what = What::from(&e);
        let next = self.apply(ex, Event::Failed(what), now);
        (Err(When::Sending(peer, id, key.0).what(what)), next)
      },
    }
  }

  /// Fail a message that never made it onto the wire
  fn abort(&self,
           key: Addrd<Token>,
           pending: &Pending,
           holds_slot: bool,
           e: Error)
           -> Result<(), Error> {
    log::error!("{}", e);
    self.blocks.forget(&key);
    pending.complete(Err(e.clone()));

    if holds_slot {
      self.launch(self.peers.release(key.1));
    }

    Err(e)
  }

  /// Start a request that was handed an NSTART slot
  pub(crate) fn launch(&self, next: Option<Queued>) {
    if let Some(q) = next {
      let now = self.now_or_last();
      // failures are delivered to the request's handle
      self.start(q, now).ok();
    }
  }

  /// How long we wait for a response to a message that is not
  /// (or no longer) being retransmitted
  fn response_lifetime(&self, msg: &Message) -> u64 {
    match (self.datagram(), msg.ty) {
      | (true, Type::Non) => self.config.non_lifetime_millis(),
      | _ => self.config.exchange_lifetime_millis(),
    }
  }

  pub(crate) fn arm(&self, ex: &mut Exchange, alarm: Alarm, at: Millis) {
    if let Some(slot) = ex.timer.take() {
      self.timers.cancel(slot);
    }

    ex.generation += 1;
    let timer = Timer { key: ex.key,
                        kind: alarm,
                        generation: ex.generation };
    ex.timer = Some(self.timers.schedule(at, timer));
  }

  pub(crate) fn disarm(&self, ex: &mut Exchange) {
    if let Some(slot) = ex.timer.take() {
      self.timers.cancel(slot);
    }

    ex.generation += 1;
  }

  /// Drive the state machine and act on the transition
  pub(crate) fn apply(&self, ex: &mut Exchange, event: Event, now: Millis) -> Option<Queued> {
    let (state, act) = ex.state.step(event);
    if state != ex.state {
      log::debug!("{} {:?} -> {:?} on {:?}", ex.key.0, ex.state, state, event);
    }
    ex.state = state;

    match act {
      | Act::Nothing | Act::SendNext | Act::Deliver => None,
      | Act::Retransmit => {
        self.retransmit(ex);
        None
      },
      | Act::AwaitResponse => {
        let at = after(now, self.config.exchange_lifetime_millis());
        self.arm(ex, Alarm::Expire, at);
        None
      },
      | Act::Fail(what) => {
        let e = When::Sending(ex.key.1, ex.msg.id, ex.key.0).what(what);
        self.finish(ex, Err(e), now)
      },
    }
  }

  /// The final response arrived (or the exchange needs no response)
  pub(crate) fn deliver(&self, ex: &mut Exchange, outcome: Outcome, now: Millis) -> Option<Queued> {
    let (state, act) = ex.state.step(Event::Response);
    ex.state = state;

    match act {
      | Act::Deliver => self.finish(ex, outcome, now),
      | _ => None,
    }
  }

  fn retransmit(&self, ex: &mut Exchange) {
    let peer = ex.key.1;
    let attempt = ex.retry.as_ref().map(|r| r.attempts().0).unwrap_or(0);

    match self.transport.send(Addrd(&ex.bytes, peer)) {
      | Ok(()) => log::debug!("retransmitting {:?} {} to {} (attempt {})",
                              ex.msg.id,
                              ex.key.0,
                              peer,
                              attempt),
      | Err(e) => log::warn!("{}",
                             When::Sending(peer, ex.msg.id, ex.key.0).what(What::from(&e))),
    }

    if let Some(at) = ex.retry.as_ref().map(RetryTimer::deadline) {
      self.arm(ex, Alarm::Retransmit, at);
    }
  }

  /// Send the next message of a block-wise transfer as part of the same exchange
  pub(crate) fn send_next(&self, ex: &mut Exchange, mut msg: Message, now: Millis) -> Option<Queued> {
    let peer = ex.key.1;
    self.disarm(ex);

    let id = match self.ids.next_id(peer, &self.dedup, now) {
      | Some(id) => id,
      | None => return self.apply(ex, Event::Failed(What::Transport(std::io::ErrorKind::WouldBlock)), now),
    };

    msg.id = id;
    let bytes = match self.encode(&msg) {
      | Ok(bytes) => bytes,
      | Err(what) => return self.apply(ex, Event::Failed(what), now),
    };

    ex.ids.push(id);
    self.by_id.insert(Addrd(id, peer), ex.key);
    ex.msg = msg;
    ex.bytes = bytes;

    match ex.msg.ty {
      | Type::Con => {
        let retry = RetryTimer::seeded(now,
                                       self.config.msg.con.retry_strategy,
                                       self.config.max_attempts(),
                                       now.0 ^ id.0 as u64);
        let at = retry.deadline();
        ex.retry = Some(retry);
        self.arm(ex, Alarm::Retransmit, at);
      },
      | _ => {
        ex.retry = None;
        let at = after(now, self.response_lifetime(&ex.msg));
        self.arm(ex, Alarm::Expire, at);
      },
    }

    match self.transport.send(Addrd(&ex.bytes, peer)) {
      | Ok(()) => {
        log::trace!("-> {} {}", peer, msg_summary(&ex.msg));
        None
      },
      | Err(e) if ex.retry.is_some() => {
        log::warn!("{}; will retry",
                   When::Sending(peer, id, ex.key.0).what(What::from(&e)));
        None
      },
      | Err(e) => self.apply(ex, Event::Failed(What::from(&e)), now),
    }
  }

  /// Complete an exchange's outcome and release what it holds.
  ///
  /// Yields the queued request that inherits its NSTART slot.
  pub(crate) fn finish(&self, ex: &mut Exchange, outcome: Outcome, now: Millis) -> Option<Queued> {
    self.disarm(ex);
    self.blocks.forget(&ex.key);

    match (&mut ex.kind, &outcome) {
      | (Kind::Observe(tx), Ok(resp)) => {
        if let Some(tx) = tx.take() {
          if !self.observations
                  .register(ex.key, &ex.request, resp.data().msg(), tx, now)
          {
            log::debug!("{} {} did not accept the observation",
                        ex.key.0,
                        ex.key.1);
          }
        }
      },
      | (Kind::Observe(tx), Err(_)) => drop(tx.take()),
      | (Kind::Notification, Err(e)) if matches!(e.what, What::Reset | What::ExchangeTimeout) => {
        self.observers.remove(&ex.key);
      },
      | _ => (),
    }

    match &outcome {
      | Ok(resp) => log::debug!("{} completed with {} after {}ms",
                                ex.key.0,
                                resp.data().code(),
                                now.0.saturating_sub(ex.created_at.0)),
      | Err(e) => log::debug!("{} failed: {}", ex.key.0, e),
    }

    ex.pending.complete(outcome);

    match ex.state {
      | State::Cancelled => {
        ex.ids
          .iter()
          .for_each(|id| self.dedup.forget_outbound(ex.key.1, *id));
        self.forget(ex)
      },
      | _ => {
        let at = after(now, self.config.dedup_window_millis());
        self.arm(ex, Alarm::Retire, at);
      },
    }

    match core::mem::replace(&mut ex.holds_slot, false) {
      | true => self.peers.release(ex.key.1),
      | false => None,
    }
  }

  /// Remove a finished exchange from every table
  pub(crate) fn forget(&self, ex: &Exchange) {
    self.exchanges.remove(&ex.key);
    ex.ids.iter().for_each(|id| {
                   self.by_id.remove_if(&Addrd(*id, ex.key.1), |_, k| *k == ex.key);
                 });
  }

  /// Make a key available again: cancel the exchange using it if
  /// it is still going, and forget it.
  pub(crate) fn retire_now(&self, key: &Addrd<Token>) {
    let ex = match self.exchange(key) {
      | Some(ex) => ex,
      | None => return,
    };

    let next = {
      let mut ex = ex.lock();
      let next = self.apply(&mut ex, Event::Cancel(CancelReason::Requested), self.now_or_last());
      self.disarm(&mut ex);
      self.forget(&ex);
      next
    };

    self.launch(next);
  }

  fn fire(&self, timer: Timer, now: Millis) -> Option<Queued> {
    let ex = self.exchange(&timer.key)?;
    let mut ex = ex.lock();
    if ex.generation != timer.generation {
      return None;
    }

    ex.timer = None;

    match timer.kind {
      | Alarm::Retire => {
        self.forget(&ex);
        None
      },
      | Alarm::Expire => self.apply(&mut ex, Event::Expired, now),
      | Alarm::Retransmit => {
        let should = ex.retry.as_mut().map(|r| r.what_should_i_do(now));
        match should {
          | Some(Ok(YouShould::Retry)) => {
            self.apply(&mut ex, Event::Timeout { exhausted: false }, now)
          },
          | Some(Ok(YouShould::Cry)) => self.apply(&mut ex, Event::Timeout { exhausted: true }, now),
          | Some(Err(nb::Error::WouldBlock)) => {
            if let Some(at) = ex.retry.as_ref().map(RetryTimer::deadline) {
              self.arm(&mut ex, Alarm::Retransmit, at);
            }
            None
          },
          | Some(Err(nb::Error::Other(never))) => match never {},
          | None => None,
        }
      },
    }
  }

  pub(crate) fn tick(&self) -> Result<(), Error> {
    let now = self.now().map_err(|e| When::Ticking.what(e.what))?;

    for timer in self.timers.pop_due(now) {
      let next = self.fire(timer, now);
      self.launch(next);
    }

    let last = self.last_prune.load(Ordering::Relaxed);
    if now.0.saturating_sub(last) >= PRUNE_EVERY_MILLIS {
      self.last_prune.store(now.0, Ordering::Relaxed);
      self.prune(now);
    }

    Ok(())
  }

  fn prune(&self, now: Millis) {
    let forgotten = self.dedup.prune(now);
    if forgotten > 0 {
      log::trace!("forgot {} message ids", forgotten);
    }

    let idle = self.ids.prune(now, self.config.dedup_window_millis());
    if idle > 0 {
      log::trace!("dropped id counters of {} idle peers", idle);
    }

    self.blocks
        .prune(now, self.config.exchange_lifetime_millis());
    self.streams.retain(|_, buf| !buf.is_empty());

    for (key, e) in self.observations.expire(now) {
      log::debug!("observation {} with {} expired: {}", key.0, key.1, e);
    }
  }
}

impl<T: Transport, C: Clock> Inner<T, C> {
  /// Cancel the exchange in the table that `pending` belongs to
  fn cancel_live(&self, key: &Addrd<Token>, pending: &Arc<Pending>, why: CancelReason) -> bool {
    let (cancelled, next) = match self.exchange(key) {
      | Some(ex) => {
        let mut ex = ex.lock();
        match Arc::ptr_eq(&ex.pending, pending) {
          | true => {
            let was = ex.state;
            let next = self.apply(&mut ex, Event::Cancel(why), self.now_or_last());
            (!was.is_terminal() && ex.state == State::Cancelled, next)
          },
          | false => (false, None),
        }
      },
      | None => (false, None),
    };

    self.launch(next);
    cancelled
  }
}

impl<T: Transport, C: Clock> Exchanges for Inner<T, C> {
  fn cancel(&self, key: &Addrd<Token>, pending: &Arc<Pending>, why: CancelReason) -> bool {
    let stopped = || Err(When::Waiting(key.0).what(why.into()));

    if let Some(q) = self.peers
                         .dequeue(key.1, |q| Arc::ptr_eq(&q.pending, pending))
    {
      log::debug!("{} cancelled before it was sent", key.0);
      self.blocks.forget(key);
      return q.pending.complete(stopped());
    }

    if self.cancel_live(key, pending, why) {
      return true;
    }

    // a request between the NSTART queue and the exchange table;
    // whichever of us and `start` comes second stops it
    let cancelled = pending.complete(stopped());
    if cancelled {
      self.cancel_live(key, pending, why);
    }

    cancelled
  }

  fn state(&self, key: &Addrd<Token>) -> Option<State> {
    Inner::state(self, key)
  }
}

impl<T: Transport, C: Clock> Drop for Inner<T, C> {
  fn drop(&mut self) {
    let stopped = |token: Token| Err(When::Waiting(token).what(What::EngineStopped));

    self.peers.drain().into_iter().for_each(|q| {
                                     q.pending.complete(stopped(q.key.0));
                                   });

    self.exchanges.iter().for_each(|e| {
                           let ex = e.value().lock();
                           ex.pending.complete(stopped(ex.key.0));
                         });
  }
}
