//! `newt` is a CoAP exchange engine.
//!
//! It sits between an application and a transport that moves bytes
//! to and from peers, and owns everything CoAP adds on top:
//! - Reliable delivery of CONfirmable messages with randomized exponential back-off
//! - Deduplication of inbound messages, replaying cached replies to duplicates
//! - Matching responses to requests (by token & peer) and ACKs / RSTs (by message id)
//! - Per-peer congestion control (`NSTART`)
//! - [Block-wise transfers](https://datatracker.ietf.org/doc/html/rfc7959) in both directions
//! - [Resource observation](https://datatracker.ietf.org/doc/html/rfc7641) as both client and server
//! - Routing inbound requests to handlers
//!
//! ## CoAP
//! CoAP is an application-level network protocol that copies the semantics of HTTP
//! to an environment conducive to **constrained** devices. (weak hardware, small battery capacity, etc.)
//!
//! CoAP customarily sits on top of UDP, which offers no guarantee of delivery,
//! ordering or uniqueness; CoAP machines are expected to perform both client and server
//! roles (or more accurately, _sender_ and _receiver_ roles).
//!
//! ## Getting started
//! ```no_run
//! use newt::config::Config;
//! use newt::net::Addrd;
//! use newt::req::Req;
//! use newt::resp::{code, Resp};
//! use newt::time::Timeout;
//!
//! let (engine, _runtime) = newt::std::bind("0.0.0.0:5683", Config::default()).unwrap();
//!
//! // serve
//! engine.register_handler("hello", |_req, _cx| {
//!         let mut rep = Resp::new(code::CONTENT);
//!         rep.set_payload("hello, world!");
//!         rep
//!       });
//!
//! // request
//! let rep = engine.send(Addrd(Req::get("time"), "127.0.0.1:5684".parse().unwrap()))
//!                 .unwrap()
//!                 .wait(Timeout::Millis(10_000))
//!                 .unwrap();
//! println!("{}", rep.data().payload_string().unwrap());
//! ```

#![doc(html_root_url = "https://docs.rs/newt/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
// -
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

pub(crate) mod hash;
pub(crate) mod logging;

/// Blocking rust CoAP client
pub mod blocking;

/// customizable retrying of fallible operations
pub mod retry;

/// requests
pub mod req;

/// responses
pub mod resp;

/// errors raised by the engine
pub mod error;

/// The exchange engine: reliability, deduplication, matching and congestion control
pub mod exchange;

/// Block-wise transfers (RFC7959)
pub mod block;

/// Resource observation (RFC7641)
pub mod observe;

/// Routing inbound requests to handlers
pub mod server;

/// network abstractions
pub mod net;

/// time abstractions
pub mod time;

/// configuring runtime behavior
pub mod config;

/// `std`-only newt stuff
#[cfg(feature = "std")]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub mod std;

#[doc(inline)]
pub use exchange::Engine;

macro_rules! code {
  ($rfc:ident($section:literal) $name:ident = $c:literal * $d:literal) => {
    #[doc = concat!("[", stringify!($rfc), " section ", $section, "](https://datatracker.ietf.org/doc/html/", stringify!($rfc), "#section-", $section, ")")]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: newt_msg::Code = newt_msg::Code::new($c, $d);
  };
  ($rfc:ident($section:literal) $name:ident = $newtype:tt($c:literal * $d:literal)) => {
    #[doc = concat!("[", stringify!($rfc), " section ", $section, "](https://datatracker.ietf.org/doc/html/", stringify!($rfc), "#section-", $section, ")")]
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: $newtype = $newtype(newt_msg::Code::new($c, $d));
  };
}

pub(crate) use code;
