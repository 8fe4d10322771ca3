#![allow(clippy::many_single_char_names)]

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_time::rate::Fraction;
use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{Error, What, When};
use crate::exchange::{Engine, Inner};
use crate::net::{Addrd, Framing, OnReceive, Transport};

/// How long the I/O thread blocks on the socket before checking
/// whether it should stop
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest the runtime sleeps without looking at the clock
const MAX_PARK: Duration = Duration::from_millis(100);

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

type Receiver = Arc<RwLock<Option<OnReceive>>>;

/// [`Transport`] over a [`UdpSocket`].
///
/// A background thread reads datagrams and hands them to the
/// registered receive callback. The thread stops once the transport is dropped.
pub struct UdpTransport {
  socket: Arc<UdpSocket>,
  on_receive: Receiver,
  stop: Arc<AtomicBool>,
}

impl core::fmt::Debug for UdpTransport {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("UdpTransport")
     .field("socket", &self.socket)
     .finish()
  }
}

impl UdpTransport {
  /// Bind a socket and start reading from it
  pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;

    let socket = Arc::new(socket);
    let on_receive = Receiver::default();
    let stop = Arc::new(AtomicBool::new(false));

    let (s, r, x) = (socket.clone(), on_receive.clone(), stop.clone());
    thread::Builder::new().name("newt-udp".into())
                          .spawn(move || Self::read(&s, &r, &x))?;

    log::info!("listening on {}", socket.local_addr()?);

    Ok(Self { socket,
              on_receive,
              stop })
  }

  /// The address the socket is bound to
  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }

  fn read(socket: &UdpSocket, on_receive: &Receiver, stop: &AtomicBool) {
    let mut buf = vec![0u8; u16::MAX as usize];

    while !stop.load(Ordering::Relaxed) {
      match socket.recv_from(&mut buf) {
        | Ok((n, addr)) => {
          if let Some(f) = on_receive.read().as_ref() {
            f(Addrd(&buf[..n], addr));
          }
        },
        | Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => (),
        | Err(e) => log::warn!("reading from socket: {}", e),
      }
    }

    log::trace!("udp thread stopped");
  }
}

impl Transport for UdpTransport {
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<()> {
    self.socket.send_to(msg.data(), msg.addr()).map(|_| ())
  }

  fn on_receive(&self, f: OnReceive) {
    *self.on_receive.write() = Some(f);
  }

  fn framing(&self) -> Framing {
    Framing::Datagram
  }
}

impl Drop for UdpTransport {
  fn drop(&mut self) {
    // the thread may be the one dropping us, so it is never joined
    self.stop.store(true, Ordering::Relaxed);
  }
}

/// What the [`Runtime`]'s thread needs from an engine
pub(crate) trait Tick: Send + Sync {
  fn tick(&self) -> Result<(), Error>;
  fn park(&self, max: Duration);
  fn wake(&self);
}

impl<T: Transport, C: crate::time::Clock> Tick for Inner<T, C> {
  fn tick(&self) -> Result<(), Error> {
    Inner::tick(self)
  }

  fn park(&self, max: Duration) {
    self.timers.park(self.now_or_last(), max)
  }

  fn wake(&self) {
    self.timers.wake()
  }
}

/// Drives an engine's timers (retransmission, expiry, cleanup)
/// from a background thread.
///
/// The thread sleeps until the next deadline and stops when the
/// runtime or the engine is dropped.
pub struct Runtime {
  stop: Arc<AtomicBool>,
  engine: Weak<dyn Tick>,
  thread: Option<JoinHandle<()>>,
}

impl core::fmt::Debug for Runtime {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Runtime")
     .field("running", &!self.stop.load(Ordering::Relaxed))
     .finish()
  }
}

impl Runtime {
  /// Start ticking `engine`
  pub fn start<T: Transport, C: crate::time::Clock>(engine: &Engine<T, C>) -> io::Result<Self> {
    let stop = Arc::new(AtomicBool::new(false));
    let inner = Arc::downgrade(&engine.inner);
    let weak: Weak<dyn Tick> = inner;

    let (s, w) = (stop.clone(), weak.clone());
    let thread = thread::Builder::new().name("newt-timers".into())
                                       .spawn(move || Self::run(&s, &w))?;

    Ok(Self { stop,
              engine: weak,
              thread: Some(thread) })
  }

  fn run(stop: &AtomicBool, engine: &Weak<dyn Tick>) {
    while !stop.load(Ordering::Relaxed) {
      let engine = match engine.upgrade() {
        | Some(e) => e,
        | None => break,
      };

      if let Err(e) = engine.tick() {
        log::warn!("{}", e);
      }

      engine.park(MAX_PARK);
    }

    log::trace!("timer thread stopped");
  }
}

impl Drop for Runtime {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(engine) = self.engine.upgrade() {
      engine.wake();
    }

    if let Some(t) = self.thread.take() {
      if t.join().is_err() {
        log::error!("timer thread panicked");
      }
    }
  }
}

/// Bind a UDP socket and build an engine on it, with a [`Runtime`]
/// driving its timers.
///
/// Keep the runtime alive for as long as the engine is in use.
///
/// ```no_run
/// use newt::config::Config;
///
/// let (engine, _runtime) = newt::std::bind("0.0.0.0:5683", Config::default()).unwrap();
/// println!("{:?}", engine.transport().local_addr());
/// ```
pub fn bind(addr: impl ToSocketAddrs,
            config: Config)
            -> Result<(Engine<UdpTransport, Clock>, Runtime), Error> {
  let io = |e: io::Error| When::None.what(What::from(&e));

  let transport = UdpTransport::bind(addr).map_err(io)?;
  let engine = Engine::new(config, transport, Clock::new())?;
  let runtime = Runtime::start(&engine).map_err(io)?;

  Ok((engine, runtime))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::blocking::Client;
  use crate::req::Req;
  use crate::resp::{code, Resp};
  use crate::time::{now_millis, Timeout};

  #[test]
  fn clock_counts_up() {
    let clock = Clock::new();
    thread::sleep(Duration::from_millis(5));
    assert!(now_millis(&clock).unwrap().0 >= 5);
  }

  #[test]
  fn udp_loopback() {
    let a = UdpTransport::bind("127.0.0.1:0").unwrap();
    let b = UdpTransport::bind("127.0.0.1:0").unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    b.on_receive(Box::new(move |Addrd(bytes, addr)| {
                   tx.send((bytes.to_vec(), addr)).ok();
                 }));

    a.send(Addrd(&[1, 2, 3], b.local_addr().unwrap())).unwrap();

    let (bytes, from) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(bytes, vec![1, 2, 3]);
    assert_eq!(from, a.local_addr().unwrap());
  }

  #[test]
  fn request_response_over_udp() {
    crate::test::init_logging();

    let (server, _server_runtime) = bind("127.0.0.1:0", Config::default()).unwrap();
    server.register_handler("hello/{name}", |_, ctx| {
            let mut resp = Resp::new(code::CONTENT);
            resp.set_payload(format!("hello, {}!", ctx.param("name").unwrap()));
            resp
          });
    let addr = server.transport().local_addr().unwrap();

    let client = Client::bind("127.0.0.1:0", Config::default()).unwrap()
                                                                .with_timeout(Timeout::Millis(5_000));
    let resp = client.send(Addrd(Req::get("hello/newt"), addr)).unwrap();

    assert_eq!(resp.data().code(), code::CONTENT);
    assert_eq!(resp.data().payload_str(), Ok("hello, newt!"));
  }

  #[test]
  fn runtime_stops_with_engine() {
    let (engine, runtime) = bind("127.0.0.1:0", Config::default()).unwrap();
    drop(engine);
    drop(runtime);
  }
}
