use crate::error::What;

/// Where an exchange is in its lifecycle
///
/// ```text
///           +--------------------------(response)----------+
///           |                                              v
///  SENT --(empty ACK)--> ACKED --(response)--> COMPLETED   |
///   | ^                    |                               |
///   | +--(next block)------+------------------------------ +
///   |
///   +--(retries exhausted / lifetime over)--> TIMED_OUT
///   +--(cancel)--> CANCELLED
/// ```
///
/// `COMPLETED`, `TIMED_OUT` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
  /// We sent the request and are waiting for an ACK or a response
  Sent,
  /// The peer ACKed our CON request and will respond separately
  Acked,
  /// We received the response (or a RST)
  Completed,
  /// We gave up waiting
  TimedOut,
  /// Someone lost interest
  Cancelled,
}

impl State {
  /// Is this a final state?
  pub fn is_terminal(&self) -> bool {
    matches!(self, State::Completed | State::TimedOut | State::Cancelled)
  }
}

/// Things that happen to an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
  /// The retransmission timer fired; `exhausted` when there are no attempts left
  Timeout { exhausted: bool },
  /// The exchange outlived the time we are willing to wait for a response
  Expired,
  /// An empty ACK matched our CON
  EmptyAck,
  /// A response for an intermediate block arrived; the next block goes out
  Continue,
  /// The final response arrived
  Response,
  /// A RST matched our message
  Reset,
  /// The transport refused a message that will not be retransmitted
  Failed(What),
  /// The exchange was cancelled
  Cancel(CancelReason),
}

/// Why an exchange was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelReason {
  /// [`ExchangeHandle::cancel`](crate::exchange::ExchangeHandle::cancel)
  Requested,
  /// The caller's deadline passed
  Deadline,
}

impl From<CancelReason> for What {
  fn from(r: CancelReason) -> Self {
    match r {
      | CancelReason::Requested => What::Cancelled,
      | CancelReason::Deadline => What::DeadlineElapsed,
    }
  }
}

/// What the engine should do as a result of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Act {
  /// Nothing (stale or duplicate event)
  Nothing,
  /// Send the current message again and wait longer
  Retransmit,
  /// Stop retransmitting; wait for the separate response
  AwaitResponse,
  /// Send the next block of the transfer
  SendNext,
  /// Hand the response to whoever is waiting
  Deliver,
  /// Report this failure to whoever is waiting
  Fail(What),
}

impl State {
  /// The exchange state machine.
  ///
  /// Terminal states absorb every event, which makes a timer firing at the
  /// same moment as a cancellation (or response) resolve to exactly one outcome:
  /// whichever is applied first wins.
  pub(crate) fn step(self, event: Event) -> (State, Act) {
    use Event::*;
    use State::*;

    match (self, event) {
      | (s, _) if s.is_terminal() => (s, Act::Nothing),

      | (Sent, Timeout { exhausted: false }) => (Sent, Act::Retransmit),
      | (Sent, Timeout { exhausted: true }) => (TimedOut, Act::Fail(What::ExchangeTimeout)),
      | (Acked, Timeout { .. }) => (Acked, Act::Nothing),

      | (Sent, Expired) | (Acked, Expired) => (TimedOut, Act::Fail(What::ExchangeTimeout)),

      | (Sent, EmptyAck) => (Acked, Act::AwaitResponse),
      | (Acked, EmptyAck) => (Acked, Act::Nothing),

      | (Sent, Continue) | (Acked, Continue) => (Sent, Act::SendNext),
      | (Sent, Response) | (Acked, Response) => (Completed, Act::Deliver),
      | (Sent, Reset) | (Acked, Reset) => (Completed, Act::Fail(What::Reset)),
      | (Sent, Failed(what)) | (Acked, Failed(what)) => (TimedOut, Act::Fail(what)),

      | (Sent, Cancel(why)) | (Acked, Cancel(why)) => (Cancelled, Act::Fail(why.into())),

      | (s, _) => (s, Act::Nothing),
    }
  }
}
