use embedded_time::clock::Error;
use embedded_time::duration::Milliseconds;

/// A duration, in milliseconds
pub type Millis = Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
///
/// The engine shares its clock between threads, so clocks
/// must also be [`Send`] + [`Sync`].
pub trait Clock: embedded_time::Clock<T = u64> + Send + Sync + 'static {}
impl<C: embedded_time::Clock<T = u64> + Send + Sync + 'static> Clock for C {}

/// Milliseconds elapsed between the clock's epoch and now
pub fn now_millis<C: Clock>(clock: &C) -> Result<Millis, Error> {
  clock.try_now()
       .and_then(|now| Millis::try_from(now.duration_since_epoch()).map_err(|_| Error::Unspecified))
}

/// Timeout configuration allowing for "never time out" as an option
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub enum Timeout {
  /// Timeout after some number of milliseconds has elapsed
  Millis(u64),
  /// Never time out
  Never,
}

impl Timeout {
  /// The instant this timeout elapses, if it elapses at all
  pub(crate) fn deadline(&self, from: std::time::Instant) -> Option<std::time::Instant> {
    match self {
      | Timeout::Millis(ms) => from.checked_add(std::time::Duration::from_millis(*ms)),
      | Timeout::Never => None,
    }
  }
}

/// Data associated with a timestamp (milliseconds since the clock's epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamped<T>(pub T, pub Millis);

impl<T> Stamped<T> {
  /// Borrow the data
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the data
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Get the timestamp
  pub fn time(&self) -> Millis {
    self.1
  }

  /// Throw away the timestamp
  pub fn discard_timestamp(self) -> T {
    self.0
  }

  /// Has more than `window` passed between the timestamp and `now`?
  pub fn is_older_than(&self, window: Millis, now: Millis) -> bool {
    now.0.saturating_sub(self.1 .0) > window.0
  }

  /// Map the data, keeping the timestamp
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Stamped<R> {
    Stamped(f(self.0), self.1)
  }
}
