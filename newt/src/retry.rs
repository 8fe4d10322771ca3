use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::time::Millis;

/// A non-blocking timer that allows a fixed-delay or exponential-backoff retry,
/// that lives alongside some operation to retry.
///
/// It does not _contain_ the work to be done; the owner asks
/// [`RetryTimer::what_should_i_do`] whenever it wakes up, and
/// uses [`RetryTimer::deadline`] to know when to wake up next.
///
/// The delay before each retry is drawn at random from the
/// strategy's range, and never shorter than the delay before it.
///
/// ```
/// use embedded_time::duration::Milliseconds;
/// use newt::retry::{Attempts, RetryTimer, Strategy, YouShould};
///
/// let strategy = Strategy::Delay { min: Milliseconds(1000),
///                                  max: Milliseconds(1000) };
/// let mut retry = RetryTimer::new(Milliseconds(0), strategy, Attempts(2));
///
/// // attempt 1 happens before asking what_should_i_do
/// assert_eq!(retry.what_should_i_do(Milliseconds(999)),
///            Err(nb::Error::WouldBlock));
/// assert_eq!(retry.what_should_i_do(Milliseconds(1000)), Ok(YouShould::Retry));
///
/// // attempt 2 failed as well
/// assert_eq!(retry.what_should_i_do(Milliseconds(2000)), Ok(YouShould::Cry));
/// ```
#[derive(Debug, Clone)]
pub struct RetryTimer {
  deadline: Millis,
  delay: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
  rng: ChaCha8Rng,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer.what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted and the work that is
  /// being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl RetryTimer {
  /// Create a new retrier for work first attempted at `start`,
  /// seeding the jitter with `start`.
  ///
  /// `max_attempts` counts the first attempt.
  pub fn new(start: Millis, strategy: Strategy, max_attempts: Attempts) -> Self {
    Self::seeded(start, strategy, max_attempts, start.0)
  }

  /// Create a new retrier with an explicit jitter seed
  pub fn seeded(start: Millis, strategy: Strategy, max_attempts: Attempts, seed: u64) -> Self {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let delay = Milliseconds(strategy.draw(&mut rng));

    Self { deadline: Milliseconds(start.0.saturating_add(delay.0)),
           delay,
           strategy,
           attempts: Attempts(1),
           max_attempts,
           rng }
  }

  /// When the thing we keep trying fails, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self, now: Millis) -> nb::Result<YouShould, core::convert::Infallible> {
    if now.0 < self.deadline.0 {
      Err(nb::Error::WouldBlock)
    } else if self.attempts >= self.max_attempts {
      Ok(YouShould::Cry)
    } else {
      self.attempts.0 += 1;
      self.delay = self.next_delay();
      self.deadline = Milliseconds(now.0.saturating_add(self.delay.0));
      Ok(YouShould::Retry)
    }
  }

  /// The next time [`RetryTimer::what_should_i_do`] will
  /// yield something other than `WouldBlock`
  pub fn deadline(&self) -> Millis {
    self.deadline
  }

  /// The delay between the latest attempt and [`RetryTimer::deadline`]
  pub fn delay(&self) -> Millis {
    self.delay
  }

  /// Number of attempts performed so far (including the first)
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }

  fn next_delay(&mut self) -> Millis {
    let drawn = self.strategy.draw(&mut self.rng);
    let delay = match self.strategy {
      | Strategy::Delay { .. } => drawn,
      | Strategy::Exponential { .. } => {
        drawn.saturating_mul(2u64.saturating_pow((self.attempts.0 - 1) as u32))
      },
    };

    Milliseconds(delay.max(self.delay.0))
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Strategy {
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  ///
  /// After each failed attempt, double the delay before retrying again.
  Exponential {
    /// Minimum (inclusive) delay for second attempt
    #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
    init_min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for second attempt
    #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
    init_max: Milliseconds<u64>,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
    min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for attempts
    #[cfg_attr(feature = "serde", serde(with = "crate::config::millis"))]
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we should probably skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max.max(min)),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max.max(min)),
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  ///
  /// ```
  /// use embedded_time::duration::Milliseconds;
  /// use newt::retry::{Attempts, Strategy};
  ///
  /// let exp = Strategy::Exponential { init_min: Milliseconds(2000),
  ///                                   init_max: Milliseconds(3000) };
  /// // RFC7252 MAX_TRANSMIT_SPAN
  /// assert_eq!(exp.max_time(Attempts(4)), Milliseconds(45_000u64));
  /// ```
  pub fn max_time(&self, attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     init_max.0
                             .saturating_mul(2u64.saturating_pow(attempts.0 as u32).saturating_sub(1))
                   },
                   | Self::Delay { max: Milliseconds(max),
                                   .. } => max.saturating_mul(attempts.0 as u64),
                 })
  }

  fn draw(&self, rng: &mut ChaCha8Rng) -> u64 {
    if self.has_jitter() {
      rng.gen_range(self.range())
    } else {
      *self.range().start()
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn ms(n: u64) -> Millis {
    Milliseconds(n)
  }

  #[test]
  fn delay_retrier() {
    let mut retry = RetryTimer::new(ms(0),
                                    Strategy::Delay { min: ms(1000),
                                                      max: ms(1000) },
                                    Attempts(5));

    // attempt 1 happens before asking what_should_i_do
    assert_eq!(retry.what_should_i_do(ms(999)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(ms(1000)).unwrap(), YouShould::Retry);

    // delay is measured from the latest attempt
    assert_eq!(retry.deadline(), ms(2000));
    assert_eq!(retry.what_should_i_do(ms(1999)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(ms(2000)).unwrap(), YouShould::Retry);

    // late wake-ups do not let retries bunch up
    assert_eq!(retry.what_should_i_do(ms(10_000)).unwrap(), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(ms(10_000)).unwrap_err(),
               nb::Error::WouldBlock);
    assert_eq!(retry.what_should_i_do(ms(11_000)).unwrap(), YouShould::Retry);

    assert_eq!(retry.attempts(), Attempts(5));
    assert_eq!(retry.what_should_i_do(ms(12_000)).unwrap(), YouShould::Cry);
  }

  #[test]
  fn exponential_retrier() {
    let mut retry = RetryTimer::new(ms(0),
                                    Strategy::Exponential { init_min: ms(1000),
                                                            init_max: ms(1000) },
                                    Attempts(5));

    let mut now = 0;
    let mut delays = vec![];
    while let Ok(YouShould::Retry) | Err(nb::Error::WouldBlock) = retry.what_should_i_do(ms(now)) {
      if retry.deadline().0 > now {
        now = retry.deadline().0;
        delays.push(retry.delay().0);
      }
    }

    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000]);
    assert_eq!(now, 31_000);
  }

  #[test]
  fn jitter_stays_in_range_and_never_shrinks() {
    let strategy = Strategy::Exponential { init_min: ms(2000),
                                           init_max: ms(3000) };

    for seed in 0..64 {
      let mut retry = RetryTimer::seeded(ms(0), strategy, Attempts(5), seed);
      let first = retry.delay().0;
      assert!((2000..=3000).contains(&first));

      let mut prev = first;
      for n in 1..5u32 {
        let now = retry.deadline();
        assert_eq!(retry.what_should_i_do(now).unwrap(), YouShould::Retry);

        let d = retry.delay().0;
        assert!(d >= prev);
        assert!(d <= 3000 * 2u64.pow(n));
        prev = d;
      }

      assert_eq!(retry.what_should_i_do(retry.deadline()).unwrap(),
                 YouShould::Cry);
    }
  }

  #[test]
  fn max_time() {
    let exp = Strategy::Exponential { init_min: ms(100),
                                      init_max: ms(200) };
    assert_eq!(exp.max_time(Attempts(1)), ms(200));
    assert_eq!(exp.max_time(Attempts(3)), ms(1400));

    let delay = Strategy::Delay { min: ms(10),
                                  max: ms(50) };
    assert_eq!(delay.max_time(Attempts(4)), ms(200));
  }
}
