use super::OptNumber;

/// Block1 / Block2 option values
pub mod block;

/// Content-Format values
pub mod content_format;

/// Observe option values
pub mod observe;

/// Properties of an option defined by RFC 7252, 7641, 7959, 8613 or 9175
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Known {
  /// The option's number
  pub number: OptNumber,
  /// Name of the constant in this module, e.g. `"URI_PATH"`
  pub name: &'static str,
  /// Shortest allowed value, in bytes
  pub min_len: usize,
  /// Longest allowed value, in bytes
  pub max_len: usize,
  /// Whether the option may occur more than once
  pub repeatable: bool,
}

impl Known {
  /// Is `len` within this option's value length bounds?
  pub fn len_ok(&self, len: usize) -> bool {
    (self.min_len..=self.max_len).contains(&len)
  }
}

macro_rules! known_options {
  ($($(#[doc = $doc:literal])* $name:ident = $n:literal, $min:literal..=$max:literal, repeat: $repeat:literal;)*) => {
    $(
      $(#[doc = $doc])*
      pub const $name: OptNumber = OptNumber($n);
    )*

    /// Look up an option by number
    ///
    /// ```
    /// use newt_msg::opt::known;
    ///
    /// assert_eq!(known::known(known::URI_PATH).map(|k| k.name), Some("URI_PATH"));
    /// assert_eq!(known::known(newt_msg::OptNumber(2)), None);
    /// ```
    pub fn known(n: OptNumber) -> Option<Known> {
      match n.0 {
        $(
          | $n => Some(Known { number: $name,
                               name: stringify!($name),
                               min_len: $min,
                               max_len: $max,
                               repeatable: $repeat }),
        )*
        | _ => None,
      }
    }
  };
}

known_options! {
  /// Makes a request conditional on the current ETag of the target resource
  IF_MATCH = 1, 0..=8, repeat: true;
  /// Internet host of the target resource
  URI_HOST = 3, 1..=255, repeat: false;
  /// Entity tag; a resource-local identifier of a representation
  ETAG = 4, 1..=8, repeat: true;
  /// Makes a request conditional on the nonexistence of the target resource
  IF_NONE_MATCH = 5, 0..=0, repeat: false;
  /// Register / deregister in a request, sequence number in a notification (RFC 7641)
  OBSERVE = 6, 0..=3, repeat: false;
  /// Transport-layer port of the target resource
  URI_PORT = 7, 0..=2, repeat: false;
  /// One segment of a relative URI created by the request
  LOCATION_PATH = 8, 0..=255, repeat: true;
  /// One segment of the path of the target resource
  URI_PATH = 11, 0..=255, repeat: true;
  /// Representation format of the payload
  CONTENT_FORMAT = 12, 0..=2, repeat: false;
  /// Seconds a response may be cached (and, for notifications, how fresh it is)
  MAX_AGE = 14, 0..=4, repeat: false;
  /// One argument of the query string of the target resource
  URI_QUERY = 15, 0..=255, repeat: true;
  /// Content-Format acceptable to the client
  ACCEPT = 17, 0..=2, repeat: false;
  /// One argument of the query of a relative URI created by the request
  LOCATION_QUERY = 20, 0..=255, repeat: true;
  /// Block of a response payload (RFC 7959)
  BLOCK2 = 23, 0..=3, repeat: false;
  /// Block of a request payload (RFC 7959)
  BLOCK1 = 27, 0..=3, repeat: false;
  /// Total size of a response payload being transferred in blocks (RFC 7959)
  SIZE2 = 28, 0..=4, repeat: false;
  /// Absolute URI of a request sent through a forward proxy
  PROXY_URI = 35, 1..=1034, repeat: false;
  /// Scheme of a request sent through a forward proxy
  PROXY_SCHEME = 39, 1..=255, repeat: false;
  /// Size of a request payload, or the largest one a server accepts
  SIZE1 = 60, 0..=4, repeat: false;
  /// Freshness token used to verify request liveness (RFC 9175)
  ECHO = 252, 1..=40, repeat: false;
  /// Suppresses responses of certain classes (RFC 7967)
  NO_RESPONSE = 258, 0..=1, repeat: false;
  /// Distinguishes concurrent block-wise operations on one resource (RFC 9175)
  REQUEST_TAG = 292, 0..=8, repeat: true;
}
