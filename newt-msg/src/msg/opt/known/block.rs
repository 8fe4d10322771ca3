/// Value of a Block1 or Block2 option (RFC 7959 section 2.2)
///
/// Three items of information are packed into one uint:
/// * the size of the block ([`Block::size`]), as the exponent `szx` in `2^(szx + 4)`
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of blocks with the given size.
///
/// ```text
/// NUM (4, 12 or 20 bits) | M | SZX (3 bits)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

impl Block {
  /// Largest block number representable in a 3 byte option value
  pub const MAX_NUM: u32 = (1 << 20) - 1;

  /// Create a block option value.
  ///
  /// `size` is clamped to `16..=1024` and rounded down to a power of two.
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    let num = num << 4;
    let more = u32::from(more) << 3;
    let szx = 15 - size.clamp(16, 1024).leading_zeros() - 4;

    Self(num | more | szx)
  }

  /// Block size in bytes
  pub fn size(&self) -> u16 {
    2u16.pow(self.szx().min(6) + 4)
  }

  /// Raw size exponent; `7` is reserved for BERT
  pub fn szx(&self) -> u32 {
    self.0 & 0b111
  }

  /// Is the size exponent the reserved value `7`?
  pub fn is_bert(&self) -> bool {
    self.szx() == 7
  }

  /// Do more blocks follow this one?
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) >> 3 == 1
  }

  /// Block number, counted in blocks of [`Block::size`] bytes
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }

  /// Offset of this block's first byte within the whole payload
  pub fn offset(&self) -> usize {
    self.num() as usize * usize::from(self.size())
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}

impl From<u32> for Block {
  fn from(n: u32) -> Self {
    Block(n)
  }
}
