use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration options related to outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Con {
  /// Retry strategy for CON messages that
  /// have not yet been ACKed.
  ///
  /// Defaults to RFC7252's `ACK_TIMEOUT` (2s) and
  /// `ACK_RANDOM_FACTOR` (1.5):
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  ///
  /// assert_eq!(Con::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub retry_strategy: Strategy,
  /// Number of times we are allowed to resend a CON message
  /// before giving up on it.
  ///
  /// Defaults to 4 (RFC7252 `MAX_RETRANSMIT`).
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_retransmits, Attempts(4));
  /// ```
  pub max_retransmits: Attempts,
}

/// Configuration options related to parsing & handling messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Msg {
  /// Seed used to generate message [`Token`](newt_msg::Token)s
  /// and initial message [`Id`](newt_msg::Id)s.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  ///
  /// ```
  /// use newt::config::Msg;
  ///
  /// assert_eq!(Msg::default().token_seed, 0);
  /// ```
  pub token_seed: u16,

  /// See [`Con`]
  pub con: Con,

  /// Expected upper bound on the time a datagram
  /// spends in flight (RFC7252 `MAX_LATENCY`).
  ///
  /// Defaults to 100 seconds.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Msg;
  ///
  /// assert_eq!(Msg::default().max_latency, Milliseconds(100_000u64));
  /// ```
  #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
  pub max_latency: Millis,

  /// Time a peer is expected to need between receiving a CON
  /// and sending its ACK (RFC7252 `PROCESSING_DELAY`).
  ///
  /// Defaults to 2 seconds.
  #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
  pub processing_delay: Millis,

  /// Largest datagram we will emit, in bytes.
  ///
  /// Defaults to 1152 (RFC7252 section 4.6)
  pub max_size: usize,
}

/// Configuration options related to block-wise transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Block {
  /// Preferred block size in bytes.
  ///
  /// Payloads larger than this are transferred block-wise.
  /// Rounded down to a power of two between 16 and 1024.
  ///
  /// ```
  /// use newt::config::Block;
  ///
  /// assert_eq!(Block::default().size, 1024);
  /// ```
  pub size: u16,
  /// Largest body we are willing to reassemble from blocks.
  ///
  /// Defaults to 1 MiB.
  pub max_body: usize,
}

/// Configuration options related to message deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Dedup {
  /// How long a message id is remembered.
  ///
  /// When `None`, this is the longest time a sender
  /// may keep retransmitting a CON (RFC7252 `MAX_TRANSMIT_SPAN`)
  /// as derived from [`Con`].
  #[cfg_attr(feature = "serde", serde(with = "crate::config::opt_millis"))]
  pub window: Option<Millis>,
  /// Most message ids remembered at once; the oldest are
  /// forgotten first.
  ///
  /// ```
  /// use newt::config::Dedup;
  ///
  /// assert_eq!(Dedup::default().capacity, 10_000);
  /// ```
  pub capacity: usize,
}

/// Configuration options related to resource observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Observe {
  /// Grace period added to a notification's Max-Age
  /// before an observation we hold is considered expired.
  ///
  /// Defaults to 5 seconds.
  #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
  pub leeway: Millis,
  /// Send notifications to observers of our resources as CON
  /// messages (`true`) or NON messages (`false`, the default)
  pub confirmable_notifications: bool,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_retransmits: Attempts(4) }
  }
}

impl Default for Msg {
  fn default() -> Self {
    Msg { token_seed: 0,
          con: Con::default(),
          max_latency: Milliseconds(100_000),
          processing_delay: Milliseconds(2_000),
          max_size: 1152 }
  }
}

impl Default for Block {
  fn default() -> Self {
    Block { size: 1024,
            max_body: 1024 * 1024 }
  }
}

impl Default for Dedup {
  fn default() -> Self {
    Dedup { window: None,
            capacity: 10_000 }
  }
}

impl Default for Observe {
  fn default() -> Self {
    Observe { leeway: Milliseconds(5_000),
              confirmable_notifications: false }
  }
}

/// Runtime config
///
/// ```
/// use newt::config::Config;
///
/// let config = Config::default();
///
/// // RFC7252 section 4.8.2
/// assert_eq!(config.max_transmit_span_millis(), 45_000);
/// assert_eq!(config.max_transmit_wait_millis(), 93_000);
/// assert_eq!(config.exchange_lifetime_millis(), 247_000);
/// assert_eq!(config.non_lifetime_millis(), 145_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,
  /// Maximum number of CON requests that
  /// can be in flight to a single peer at a given moment
  /// (RFC7252 `NSTART`).
  ///
  /// Further requests wait their turn in FIFO order.
  ///
  /// Default value is `1`
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().max_concurrent_requests, 1);
  /// ```
  pub max_concurrent_requests: u8,
  /// See [`Block`]
  pub block: Block,
  /// See [`Dedup`]
  pub dedup: Dedup,
  /// See [`Observe`]
  pub observe: Observe,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(),
             max_concurrent_requests: 1,
             block: Block::default(),
             dedup: Dedup::default(),
             observe: Observe::default() }
  }
}

impl Config {
  /// Parse a config from JSON; fields that are omitted keep their default values.
  ///
  /// Durations are expressed in milliseconds.
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::config::Config;
  ///
  /// let config = Config::from_json_str(r#"{"max_concurrent_requests": 2, "msg": {"max_latency": 500}}"#).unwrap();
  /// assert_eq!(config.max_concurrent_requests, 2);
  /// assert_eq!(config.msg.max_latency, Milliseconds(500u64));
  /// assert_eq!(config.block, Default::default());
  /// ```
  #[cfg(feature = "std_serde_json")]
  pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Total number of transmissions (first + retransmissions) of a CON message
  pub fn max_attempts(&self) -> Attempts {
    Attempts(self.msg.con.max_retransmits.0.saturating_add(1))
  }

  /// Preferred block size, as a valid block size
  ///
  /// ```
  /// use newt::config::Config;
  ///
  /// let mut config = Config::default();
  /// config.block.size = 1000;
  /// assert_eq!(config.block_size(), 512);
  ///
  /// config.block.size = 4;
  /// assert_eq!(config.block_size(), 16);
  /// ```
  pub fn block_size(&self) -> u16 {
    let size = self.block.size.clamp(16, 1024);
    1 << (15 - size.leading_zeros())
  }

  /// Time from the first transmission of a CON to its last retransmission
  pub fn max_transmit_span_millis(&self) -> u64 {
    self.msg
        .con
        .retry_strategy
        .max_time(self.msg.con.max_retransmits)
        .0
  }

  /// Time from the first transmission of a CON to giving up on it
  pub fn max_transmit_wait_millis(&self) -> u64 {
    self.msg.con.retry_strategy.max_time(self.max_attempts()).0
  }

  /// Maximum time a datagram is expected to spend in transit
  pub fn max_latency_millis(&self) -> u64 {
    self.msg.max_latency.0
  }

  /// Time a peer is expected to take to ACK a CON
  pub fn processing_delay_millis(&self) -> u64 {
    self.msg.processing_delay.0
  }

  /// Time from first transmission of a CON until its id
  /// may safely be reused, and how long we wait for a separate response
  pub fn exchange_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis()
    + (2 * self.max_latency_millis())
    + self.processing_delay_millis()
  }

  /// Time from transmission of a NON until its id may safely be reused,
  /// and how long we wait for a response to it
  pub fn non_lifetime_millis(&self) -> u64 {
    self.max_transmit_span_millis() + self.max_latency_millis()
  }

  /// How long message ids are remembered for deduplication
  pub fn dedup_window_millis(&self) -> u64 {
    self.dedup
        .window
        .map(|w| w.0)
        .unwrap_or_else(|| self.max_transmit_span_millis())
  }
}

#[cfg(feature = "serde")]
pub(crate) mod millis {
  use embedded_time::duration::Milliseconds;
  use serde::{Deserialize, Deserializer, Serializer};

  use crate::time::Millis;

  pub(crate) fn serialize<S: Serializer>(m: &Millis, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(m.0)
  }

  pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Millis, D::Error> {
    u64::deserialize(d).map(Milliseconds)
  }
}

#[cfg(feature = "serde")]
pub(crate) mod opt_millis {
  use embedded_time::duration::Milliseconds;
  use serde::{Deserialize, Deserializer, Serializer};

  use crate::time::Millis;

  pub(crate) fn serialize<S: Serializer>(m: &Option<Millis>, s: S) -> Result<S::Ok, S::Error> {
    match m {
      | Some(m) => s.serialize_some(&m.0),
      | None => s.serialize_none(),
    }
  }

  pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Millis>, D::Error> {
    Option::<u64>::deserialize(d).map(|m| m.map(Milliseconds))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dedup_window_follows_con() {
    let mut config = Config::default();
    assert_eq!(config.dedup_window_millis(), 45_000);

    config.msg.con.retry_strategy = Strategy::Delay { min: Milliseconds(10),
                                                      max: Milliseconds(10) };
    assert_eq!(config.dedup_window_millis(), 40);

    config.dedup.window = Some(Milliseconds(7));
    assert_eq!(config.dedup_window_millis(), 7);
  }

  macro_rules! block_size {
    ($($configured:literal => $used:literal),*) => {
      paste::paste! {
        $(
          #[test]
          fn [<block_size_ $configured _uses_ $used>]() {
            let mut config = Config::default();
            config.block.size = $configured;
            assert_eq!(config.block_size(), $used);
          }
        )*
      }
    };
  }

  block_size!(0 => 16, 17 => 16, 32 => 32, 1023 => 512, 1024 => 1024, 65535 => 1024);

  #[cfg(feature = "std_serde_json")]
  #[test]
  fn json_round_trip() {
    let mut config = Config::default();
    config.dedup.window = Some(Milliseconds(1_000));
    config.observe.confirmable_notifications = true;

    let json = serde_json::to_string(&config).unwrap();
    assert_eq!(Config::from_json_str(&json).unwrap(), config);
  }

  #[cfg(feature = "std_serde_json")]
  #[test]
  fn json_strategy() {
    let json = r#"{"msg": {"con": {"retry_strategy": {"Delay": {"min": 5, "max": 10}}}}}"#;
    let config = Config::from_json_str(json).unwrap();
    assert_eq!(config.msg.con.retry_strategy,
               Strategy::Delay { min: Milliseconds(5),
                                 max: Milliseconds(10) });
    assert_eq!(config.msg.con.max_retransmits, Attempts(4));
  }
}
