/// Media type of a payload, as carried by the Content-Format and
/// Accept options ([RFC7252 section 12.3](https://datatracker.ietf.org/doc/html/rfc7252#section-12.3)).
///
/// ```
/// use newt_msg::ContentFormat;
///
/// assert_eq!(ContentFormat::from(50), ContentFormat::Json);
/// assert_eq!(u16::from(ContentFormat::Cbor), 60);
/// assert_eq!(ContentFormat::LinkFormat.to_string(), "application/link-format");
/// assert_eq!(ContentFormat::Other(11050).to_string(), "content-format 11050");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentFormat {
  /// `text/plain; charset=utf-8`
  Text,
  /// `application/link-format`, used for resource discovery
  LinkFormat,
  /// `application/xml`
  Xml,
  /// `application/octet-stream`
  OctetStream,
  /// `application/exi`
  Exi,
  /// `application/json`
  Json,
  /// `application/cbor`
  Cbor,
  /// Any format without a variant of its own
  Other(u16),
}

const REGISTRY: [(ContentFormat, u16, &str); 7] =
  [(ContentFormat::Text, 0, "text/plain; charset=utf-8"),
   (ContentFormat::LinkFormat, 40, "application/link-format"),
   (ContentFormat::Xml, 41, "application/xml"),
   (ContentFormat::OctetStream, 42, "application/octet-stream"),
   (ContentFormat::Exi, 47, "application/exi"),
   (ContentFormat::Json, 50, "application/json"),
   (ContentFormat::Cbor, 60, "application/cbor")];

impl ContentFormat {
  fn registered(&self) -> Option<&'static (ContentFormat, u16, &'static str)> {
    REGISTRY.iter().find(|(f, _, _)| f == self)
  }
}

impl From<ContentFormat> for u16 {
  fn from(f: ContentFormat) -> Self {
    match f {
      | ContentFormat::Other(n) => n,
      | f => f.registered().map(|(_, n, _)| *n).unwrap_or_default(),
    }
  }
}

impl From<u16> for ContentFormat {
  fn from(n: u16) -> Self {
    REGISTRY.iter()
            .find(|(_, m, _)| *m == n)
            .map(|(f, _, _)| *f)
            .unwrap_or(ContentFormat::Other(n))
  }
}

impl core::fmt::Display for ContentFormat {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self.registered() {
      | Some((_, _, mime)) => write!(f, "{}", mime),
      | None => write!(f, "content-format {}", u16::from(*self)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registered_numbers_map_both_ways() {
    for (format, n, _) in REGISTRY {
      assert_eq!(u16::from(format), n);
      assert_eq!(ContentFormat::from(n), format);
    }
  }

  #[test]
  fn unregistered_numbers_are_kept() {
    assert_eq!(ContentFormat::from(112), ContentFormat::Other(112));
    assert_eq!(u16::from(ContentFormat::Other(112)), 112);
  }
}
