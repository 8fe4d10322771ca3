mod client;

#[doc(inline)]
pub use client::*;
