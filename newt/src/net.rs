use std::io;
use std::net::SocketAddr;

/// Data that came from (or is headed to) a network peer
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Map the data contained in this Addressed (with a copy of the address)
  pub fn map_with_addr<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> Addrd<R> {
    Addrd(f(self.0, self.1), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Turn the entire structure into something else
  pub fn fold<R>(self, f: impl FnOnce(T, SocketAddr) -> R) -> R {
    f(self.0, self.1)
  }
}

impl<T> AsMut<T> for Addrd<T> {
  fn as_mut(&mut self) -> &mut T {
    &mut self.0
  }
}

/// How a [`Transport`] delimits messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Framing {
  /// Every receive callback carries exactly one message,
  /// encoded per RFC7252 (UDP, DTLS)
  Datagram,
  /// Receive callbacks carry arbitrary slices of a byte stream
  /// per peer, in which messages are framed per RFC8323 (TCP, TLS, WebSockets).
  ///
  /// The transport is reliable, so nothing is ever retransmitted
  /// or deduplicated.
  Stream,
}

/// Callback invoked by a [`Transport`] for every chunk of bytes it receives
pub type OnReceive = Box<dyn Fn(Addrd<&[u8]>) + Send + Sync>;

/// The contract between the exchange engine and the network.
///
/// A transport moves opaque bytes to and from peers and knows nothing
/// about CoAP. Reliability, retransmission and deduplication
/// all live above it.
///
/// Implementations deliver inbound bytes by invoking the callback
/// registered with [`Transport::on_receive`], from any thread.
pub trait Transport: Send + Sync + 'static {
  /// Send bytes to a peer.
  ///
  /// An unreachable or closed peer should yield an error
  /// rather than panic; the engine treats send failures on
  /// CON messages like a lost datagram and retries.
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<()>;

  /// Register the callback to invoke for every chunk of bytes received.
  ///
  /// Registering a new callback replaces the previous one.
  fn on_receive(&self, f: OnReceive);

  /// Release any resources held for a peer (e.g. close a connection)
  fn close(&self, peer: SocketAddr) {
    let _ = peer;
  }

  /// How messages are delimited on this transport
  fn framing(&self) -> Framing {
    Framing::Datagram
  }
}

impl<T: Transport> Transport for std::sync::Arc<T> {
  fn send(&self, msg: Addrd<&[u8]>) -> io::Result<()> {
    T::send(self, msg)
  }

  fn on_receive(&self, f: OnReceive) {
    T::on_receive(self, f)
  }

  fn close(&self, peer: SocketAddr) {
    T::close(self, peer)
  }

  fn framing(&self) -> Framing {
    T::framing(self)
  }
}
