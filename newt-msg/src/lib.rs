//! Low-level representation of CoAP messages.
//!
//! The most notable item in `newt_msg` is [`Message`];
//! a CoAP message very close to the actual byte layout.
//!
//! ## Serialization
//! [`Message`] implements [`TryFromBytes`] and [`TryIntoBytes`] for the
//! datagram layout described in RFC 7252. The [`tcp`] module
//! provides the length-prefixed framing used over reliable transports (RFC 8323).
//!
//! Encoding is deterministic: options are kept ordered by number
//! (repeated options keep their insertion order), so equal messages always
//! serialize to equal bytes.
//!
//! ```
//! use newt_msg::*;
//!
//! let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token(Default::default()));
//! msg.set_path("hello/world");
//! msg.payload = Payload(b"hi".to_vec());
//!
//! let bytes = msg.try_into_bytes().unwrap();
//! assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
//! ```

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

pub(crate) mod cursor;

#[doc(hidden)]
pub mod from_bytes;

#[doc(hidden)]
pub mod msg;

#[doc(hidden)]
pub mod to_bytes;

/// Length-prefixed message framing for reliable transports
pub mod tcp;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};
