#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use embedded_time::rate::Fraction;
use embedded_time::Instant;
use newt_msg::{tcp, Message, TryFromBytes, TryIntoBytes};
use parking_lot::Mutex;

use crate::config::Config;
use crate::exchange::Engine;
use crate::net::{Addrd, Framing, OnReceive, Transport};

/// Print log output of the test being run
pub fn init_logging() {
  simple_logger::init_with_level(log::Level::Trace).ok();
}

pub fn dummy_addr() -> SocketAddr {
  "192.168.0.1:5683".parse().unwrap()
}

pub fn dummy_addr_2() -> SocketAddr {
  "192.168.0.2:5683".parse().unwrap()
}

pub fn dummy_addr_3() -> SocketAddr {
  "192.168.0.3:5683".parse().unwrap()
}

/// Millisecond clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ClockMock(pub Arc<AtomicU64>);

impl ClockMock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, to: u64) {
    self.0.store(to, Ordering::SeqCst);
  }

  pub fn advance(&self, by: u64) {
    self.0.fetch_add(by, Ordering::SeqCst);
  }

  pub fn get(&self) -> u64 {
    self.0.load(Ordering::SeqCst)
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.load(Ordering::SeqCst)))
  }
}

#[derive(Default)]
struct Wire {
  sent: Mutex<Vec<Addrd<Vec<u8>>>>,
  fail: Mutex<Option<io::ErrorKind>>,
  closed: Mutex<Vec<SocketAddr>>,
  on_receive: Mutex<Option<OnReceive>>,
}

/// A transport that records what is sent and
/// delivers whatever the test hands it.
///
/// Clones share the same wire.
#[derive(Clone)]
pub struct TransportMock {
  wire: Arc<Wire>,
  framing: Framing,
}

impl core::fmt::Debug for TransportMock {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("TransportMock")
     .field("framing", &self.framing)
     .field("sent", &self.wire.sent.lock().len())
     .finish()
  }
}

impl TransportMock {
  pub fn new(framing: Framing) -> Self {
    Self { wire: Default::default(),
           framing }
  }

  /// Every chunk sent so far, oldest first
  pub fn sent_bytes(&self) -> Vec<Addrd<Vec<u8>>> {
    self.wire.sent.lock().clone()
  }

  /// Every message sent so far, oldest first
  pub fn sent(&self) -> Vec<Addrd<Message>> {
    self.sent_bytes()
        .into_iter()
        .map(|Addrd(bytes, addr)| Addrd(self.decode(&bytes), addr))
        .collect()
  }

  /// Every message sent so far, forgetting them
  pub fn take_sent(&self) -> Vec<Addrd<Message>> {
    let sent = self.sent();
    self.wire.sent.lock().clear();
    sent
  }

  pub fn last_sent(&self) -> Option<Addrd<Message>> {
    self.sent().pop()
  }

  /// Make every send fail with `kind` (or succeed again with `None`)
  pub fn fail_sends(&self, kind: Option<io::ErrorKind>) {
    *self.wire.fail.lock() = kind;
  }

  pub fn closed(&self) -> Vec<SocketAddr> {
    self.wire.closed.lock().clone()
  }

  /// Pretend `msg` arrived from the network
  pub fn deliver(&self, msg: Addrd<&Message>) {
    let bytes = match self.framing {
      | Framing::Datagram => msg.data().try_into_bytes().unwrap(),
      | Framing::Stream => tcp::to_bytes(msg.data()).unwrap(),
    };

    self.deliver_bytes(Addrd(&bytes, msg.addr()));
  }

  /// Pretend some bytes arrived from the network
  pub fn deliver_bytes(&self, bytes: Addrd<&[u8]>) {
    let f = self.wire.on_receive.lock();
    let f = f.as_ref().expect("nobody registered a receive callback");
    f(bytes);
  }

  fn decode(&self, bytes: &[u8]) -> Message {
    match self.framing {
      | Framing::Datagram => Message::try_from_bytes(bytes).unwrap(),
      | Framing::Stream => tcp::decode_frame(bytes).unwrap().unwrap().0,
    }
  }
}

impl Transport for TransportMock {
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<()> {
    match *self.wire.fail.lock() {
      | Some(kind) => Err(io::Error::from(kind)),
      | None => {
        self.wire.sent.lock().push(msg.map(Vec::from));
        Ok(())
      },
    }
  }

  fn on_receive(&self, f: OnReceive) {
    *self.wire.on_receive.lock() = Some(f);
  }

  fn close(&self, peer: SocketAddr) {
    self.wire.closed.lock().push(peer);
  }

  fn framing(&self) -> Framing {
    self.framing
  }
}

pub type TestEngine = Engine<TransportMock, ClockMock>;

/// An engine over a mock datagram transport and a mock clock at 0 ms
pub fn engine(config: Config) -> (TestEngine, TransportMock, ClockMock) {
  engine_with(config, Framing::Datagram)
}

pub fn engine_with(config: Config, framing: Framing) -> (TestEngine, TransportMock, ClockMock) {
  let transport = TransportMock::new(framing);
  let clock = ClockMock::new();
  let engine = Engine::new(config, transport.clone(), clock.clone()).unwrap();
  (engine, transport, clock)
}

#[test]
fn clock_mock_is_millis() {
  let clock = ClockMock::new();
  clock.set(1_500);
  clock.advance(500);
  assert_eq!(crate::time::now_millis(&clock).unwrap().0, 2_000);
}

#[test]
fn transport_mock_records_and_fails() {
  let t = TransportMock::new(Framing::Datagram);
  t.send(Addrd(&[1, 2], dummy_addr())).unwrap();
  t.fail_sends(Some(io::ErrorKind::ConnectionRefused));
  assert_eq!(t.send(Addrd(&[3], dummy_addr())).unwrap_err().kind(),
             io::ErrorKind::ConnectionRefused);
  assert_eq!(t.sent_bytes(), vec![Addrd(vec![1, 2], dummy_addr())]);
}
