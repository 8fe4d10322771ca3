use std::collections::BTreeMap;

/// Values captured by a [`Pattern`], by name.
///
/// A trailing `*` is captured under the name `"*"`.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  Param(String),
  Rest,
}

/// A path pattern that requests are routed by.
///
/// Patterns are `/`-separated segments:
/// - `temp` matches exactly that segment
/// - `{id}` matches any one segment and captures it as `id`
/// - `*` as the last segment matches everything that is left (possibly nothing)
///
/// ```
/// use newt::server::Pattern;
///
/// let p = Pattern::parse("sensors/{id}/history");
/// let params = p.matches("sensors/12/history").unwrap();
/// assert_eq!(params.get("id").map(String::as_str), Some("12"));
///
/// assert!(p.matches("sensors/12").is_none());
/// assert!(p.matches("sensors/12/history/more").is_none());
///
/// let files = Pattern::parse("files/*");
/// assert_eq!(files.matches("files/a/b.txt").unwrap().get("*").map(String::as_str),
///            Some("a/b.txt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
  raw: String,
  segments: Vec<Segment>,
}

impl Pattern {
  /// Parse a pattern; leading, trailing and repeated slashes are ignored
  pub fn parse(pattern: &str) -> Self {
    let parts = pattern.split('/')
                       .filter(|s| !s.is_empty())
                       .collect::<Vec<_>>();
    let last = parts.len().saturating_sub(1);

    let segments = parts.iter()
                        .enumerate()
                        .map(|(ix, seg)| {
                          let param = seg.strip_prefix('{')
                                         .and_then(|s| s.strip_suffix('}'))
                                         .filter(|name| !name.is_empty());

                          match (param, *seg) {
                            | (Some(name), _) => Segment::Param(name.to_string()),
                            | (None, "*") if ix == last => Segment::Rest,
                            | (None, lit) => Segment::Literal(lit.to_string()),
                          }
                        })
                        .collect();

    Self { raw: parts.join("/"),
           segments }
  }

  /// The pattern, normalized
  pub fn as_str(&self) -> &str {
    &self.raw
  }

  /// Match a request path against this pattern, yielding the captures
  pub fn matches(&self, path: &str) -> Option<Params> {
    let mut segs = path.split('/').filter(|s| !s.is_empty());
    let mut params = Params::new();

    for seg in &self.segments {
      match seg {
        | Segment::Literal(lit) => {
          if segs.next()? != lit.as_str() {
            return None;
          }
        },
        | Segment::Param(name) => {
          params.insert(name.clone(), segs.next()?.to_string());
        },
        | Segment::Rest => {
          params.insert("*".to_string(), segs.collect::<Vec<_>>().join("/"));
          return Some(params);
        },
      }
    }

    match segs.next() {
      | None => Some(params),
      | Some(_) => None,
    }
  }
}

impl From<&str> for Pattern {
  fn from(s: &str) -> Self {
    Pattern::parse(s)
  }
}

impl core::fmt::Display for Pattern {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "/{}", self.raw)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn literal() {
    let p = Pattern::parse("/a/b/");
    assert_eq!(p.as_str(), "a/b");
    assert_eq!(p.matches("a/b"), Some(Params::new()));
    assert_eq!(p.matches("/a//b/"), Some(Params::new()));
    assert_eq!(p.matches("a"), None);
    assert_eq!(p.matches("a/c"), None);
  }

  #[test]
  fn root() {
    let p = Pattern::parse("");
    assert!(p.matches("").is_some());
    assert!(p.matches("a").is_none());
  }

  #[test]
  fn params() {
    let p = Pattern::parse("{kind}/{id}");
    let params = p.matches("sensor/4").unwrap();
    assert_eq!(params.get("kind").unwrap(), "sensor");
    assert_eq!(params.get("id").unwrap(), "4");
  }

  #[test]
  fn rest_may_be_empty() {
    let p = Pattern::parse("static/*");
    assert_eq!(p.matches("static").unwrap().get("*").unwrap(), "");
    assert!(p.matches("other").is_none());
  }

  #[test]
  fn star_in_the_middle_is_literal() {
    let p = Pattern::parse("a/*/b");
    assert!(p.matches("a/*/b").is_some());
    assert!(p.matches("a/x/b").is_none());
  }

  #[test]
  fn empty_braces_are_literal() {
    let p = Pattern::parse("{}");
    assert!(p.matches("{}").is_some());
    assert!(p.matches("x").is_none());
  }
}
