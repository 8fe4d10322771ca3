/// Version of the CoAP protocol that the message adheres to.
///
/// Only version 1 exists; anything else is rejected when parsing.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Version(pub u8);

impl Default for Version {
  fn default() -> Self {
    Version(1)
  }
}
