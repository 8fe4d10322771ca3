use std::net::SocketAddr;

use crate::config::Config;
use crate::error::{Error, What};
use crate::exchange::Engine;
use crate::net::{Addrd, Transport};
use crate::observe::Subscription;
use crate::req::Req;
use crate::resp::Resp;
use crate::time::{Clock, Timeout};

/// Helper methods on Client Results
pub trait ClientResultExt<T> {
  /// If we timed out waiting for a response, consider that Ok(None).
  ///
  /// Usually used to handle sending non-confirmable requests that
  /// the server may have received but not responded to.
  fn timeout_ok(self) -> Result<Option<T>, Error>;
}

impl<T> ClientResultExt<T> for Result<T, Error> {
  fn timeout_ok(self) -> Result<Option<T>, Error> {
    match self {
      | Ok(t) => Ok(Some(t)),
      | Err(Error { what: What::ExchangeTimeout | What::DeadlineElapsed,
                    .. }) => Ok(None),
      | Err(e) => Err(e),
    }
  }
}

/// A blocking CoAP request client.
///
/// Every request blocks the calling thread until its response arrives,
/// the exchange fails, or the client's timeout elapses (which cancels the exchange).
/// Clients are cheap to clone and may be shared between threads.
pub struct Client<T: Transport, C: Clock> {
  engine: Engine<T, C>,
  timeout: Timeout,
  #[cfg(feature = "std")]
  runtime: Option<std::sync::Arc<crate::std::Runtime>>,
}

impl<T: Transport, C: Clock> Clone for Client<T, C> {
  fn clone(&self) -> Self {
    Self { engine: self.engine.clone(),
           timeout: self.timeout,
           #[cfg(feature = "std")]
           runtime: self.runtime.clone() }
  }
}

impl<T: Transport, C: Clock> core::fmt::Debug for Client<T, C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Client")
     .field("engine", &self.engine)
     .field("timeout", &self.timeout)
     .finish()
  }
}

#[cfg(feature = "std")]
impl Client<crate::std::UdpTransport, crate::std::Clock> {
  /// Create a new Client for a platform supporting Rust's standard library.
  ///
  /// ```no_run
  /// use newt::blocking::Client;
  /// use newt::config::Config;
  ///
  /// let client = Client::bind("0.0.0.0:0", Config::default()).unwrap();
  /// let resp = client.get("127.0.0.1:5683".parse().unwrap(), "hello").unwrap();
  ///
  /// println!("Hello, {}!", resp.data().payload_string().unwrap());
  /// ```
  pub fn bind(addr: impl std::net::ToSocketAddrs, config: Config) -> Result<Self, Error> {
    let (engine, runtime) = crate::std::bind(addr, config)?;
    let mut client = Self::new(engine);
    client.runtime = Some(std::sync::Arc::new(runtime));
    Ok(client)
  }
}

impl<T: Transport, C: Clock> Client<T, C> {
  /// Create a client sending requests through `engine`.
  ///
  /// Requests wait at most [`Config::max_transmit_wait_millis`] for their response.
  pub fn new(engine: Engine<T, C>) -> Self {
    let timeout = Timeout::Millis(engine.config().max_transmit_wait_millis());
    Self { engine,
           timeout,
           #[cfg(feature = "std")]
           runtime: None }
  }

  /// Wait at most `timeout` for every response
  pub fn with_timeout(mut self, timeout: Timeout) -> Self {
    self.timeout = timeout;
    self
  }

  /// The engine requests are sent through
  pub fn engine(&self) -> &Engine<T, C> {
    &self.engine
  }

  /// Send a request
  pub fn send(&self, req: Addrd<Req>) -> Result<Addrd<Resp>, Error> {
    self.engine.send(req)?.wait(self.timeout)
  }

  /// Send a GET request
  pub fn get(&self, peer: SocketAddr, path: impl AsRef<str>) -> Result<Addrd<Resp>, Error> {
    self.send(Addrd(Req::get(path), peer))
  }

  /// Send a POST request
  pub fn post(&self,
              peer: SocketAddr,
              path: impl AsRef<str>,
              payload: impl Into<Vec<u8>>)
              -> Result<Addrd<Resp>, Error> {
    let mut req = Req::post(path);
    req.set_payload(payload);
    self.send(Addrd(req, peer))
  }

  /// Send a PUT request
  pub fn put(&self,
             peer: SocketAddr,
             path: impl AsRef<str>,
             payload: impl Into<Vec<u8>>)
             -> Result<Addrd<Resp>, Error> {
    let mut req = Req::put(path);
    req.set_payload(payload);
    self.send(Addrd(req, peer))
  }

  /// Send a DELETE request
  pub fn delete(&self, peer: SocketAddr, path: impl AsRef<str>) -> Result<Addrd<Resp>, Error> {
    self.send(Addrd(Req::delete(path), peer))
  }

  /// Ping an endpoint
  pub fn ping(&self, peer: SocketAddr) -> Result<(), Error> {
    self.engine.ping(peer)?.wait(self.timeout).map(|_| ())
  }

  /// Observe a resource (see [`Engine::observe`])
  pub fn observe(&self, req: Addrd<Req>) -> Result<Subscription, Error> {
    self.engine.observe(req)
  }
}

#[cfg(test)]
mod tests {
  use std::thread;
  use std::time::Duration;

  use newt_msg::{Message, Type};

  use super::*;
  use crate::resp::code;
  use crate::test::{dummy_addr, engine, TransportMock};

  /// Answer the first request sent through `transport` from another thread
  fn answer(transport: TransportMock, respond: fn(&Message) -> Message) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
      if let Some(req) = transport.last_sent() {
        transport.deliver(Addrd(&respond(req.data()), req.addr()));
        break;
      }

      thread::sleep(Duration::from_millis(1));
    })
  }

  #[test]
  fn send_waits_for_response() {
    let (engine, transport, _) = engine(Config::default());
    let client = Client::new(engine).with_timeout(Timeout::Millis(5_000));

    let server = answer(transport, |req| {
      let mut resp = Message::new(Type::Ack, code::CONTENT, req.id, req.token);
      resp.payload.0 = b"hi".to_vec();
      resp
    });

    let resp = client.get(dummy_addr(), "hello").unwrap();
    server.join().unwrap();

    assert_eq!(resp.data().payload_str(), Ok("hi"));
    assert_eq!(resp.addr(), dummy_addr());
  }

  #[test]
  fn ping_completes_on_reset() {
    let (engine, transport, _) = engine(Config::default());
    let client = Client::new(engine).with_timeout(Timeout::Millis(5_000));

    let server = answer(transport, Message::rst);
    client.ping(dummy_addr()).unwrap();
    server.join().unwrap();
  }

  #[test]
  fn timeout_cancels() {
    let (engine, _, _) = engine(Config::default());
    let client = Client::new(engine).with_timeout(Timeout::Millis(10));

    let e = client.delete(dummy_addr(), "hello").unwrap_err();
    assert_eq!(e.what, What::DeadlineElapsed);
    assert_eq!(client.engine().next_deadline(), None);

    assert_eq!(client.delete(dummy_addr(), "hello").timeout_ok(), Ok(None));
  }

  #[test]
  fn default_timeout_is_max_transmit_wait() {
    let (engine, _, _) = engine(Config::default());
    let wait = engine.config().max_transmit_wait_millis();
    assert_eq!(Client::new(engine).timeout, Timeout::Millis(wait));
  }
}
