//! Flex-pages and map items.
//!
//! A flex-page is the kernel's unit of memory mapping: a power-of-two-sized,
//! size-aligned region with an access mask. The root task also uses it as
//! its frame handle: every frame the broker owns or hands out is described
//! by exactly the bits the map-item ABI consumes.
//!
//! Packing: `raw = base | size_log2 << 4 | access`, with `base` aligned to
//! `1 << size_log2` and `size_log2 >= 12`. Raw zero is the nil flex-page;
//! `size_log2 == 1` marks the complete address space.

use crate::{Word, PAGE_BITS};
use bitflags::bitflags;

bitflags! {
    /// Access permissions of a flex-page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: Word {
        const R = 0b100;
        const W = 0b010;
        const X = 0b001;
        const RW = 0b110;
        const RWX = 0b111;
    }
}

const SIZE_SHIFT: u32 = 4;
const SIZE_MASK: Word = 0x3f;
const BASE_MASK: Word = !0x3ff;

/// A flex-page; doubles as the broker's frame handle.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Fpage(Word);

impl Fpage {
    pub const fn nil() -> Fpage {
        Fpage(0)
    }

    /// The whole address space (used in acceptors).
    pub const fn complete() -> Fpage {
        Fpage(1 << SIZE_SHIFT)
    }

    /// Build a flex-page over `base..base+size`.
    ///
    /// Returns `None` unless `size` is a power of two of at least one page
    /// and `base` is aligned to it.
    pub fn new(base: Word, size: usize, access: Access) -> Option<Fpage> {
        if !size.is_power_of_two() || size < (1 << PAGE_BITS) {
            return None;
        }
        if base & (size - 1) != 0 {
            return None;
        }
        let s = size.trailing_zeros() as Word;
        Some(Fpage(base | (s << SIZE_SHIFT) | access.bits()))
    }

    /// A request flex-page with the wildcard base (all ones): "any region
    /// of this size". Only meaningful in sigma0 requests.
    pub fn any(size: usize, access: Access) -> Option<Fpage> {
        let fp = Fpage::new(0, size, access)?;
        Some(Fpage(fp.raw() | BASE_MASK))
    }

    pub const fn from_raw(raw: Word) -> Fpage {
        Fpage(raw)
    }

    pub const fn raw(self) -> Word {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    pub fn is_complete(self) -> bool {
        self.size_log2() == 1
    }

    pub fn base(self) -> Word {
        self.0 & BASE_MASK
    }

    pub fn size_log2(self) -> u32 {
        ((self.0 >> SIZE_SHIFT) & SIZE_MASK) as u32
    }

    pub fn size(self) -> usize {
        1 << self.size_log2()
    }

    pub fn end(self) -> Word {
        self.base() + self.size()
    }

    pub fn access(self) -> Access {
        Access::from_bits_truncate(self.0)
    }

    /// Same region, different access mask.
    pub fn with_access(self, access: Access) -> Fpage {
        Fpage((self.0 & !Access::RWX.bits()) | access.bits())
    }

    pub fn contains(self, addr: Word) -> bool {
        addr >= self.base() && addr < self.end()
    }
}

impl core::fmt::Debug for Fpage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_nil() {
            write!(f, "fpage(nil)")
        } else if self.is_complete() {
            write!(f, "fpage(complete)")
        } else {
            write!(
                f,
                "fpage({:#x}..{:#x} {:?})",
                self.base(),
                self.end(),
                self.access()
            )
        }
    }
}

const ITEM_TYPE_MASK: Word = 0b1110;
const ITEM_TYPE_MAP: Word = 0b1000;

/// A typed map item: two message-register words asking the receiver's side
/// of the IPC to install a mapping of `fpage` at `send_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    word0: Word,
    word1: Word,
}

impl MapItem {
    pub fn new(fpage: Fpage) -> MapItem {
        MapItem {
            word0: (fpage.base() & BASE_MASK) | ITEM_TYPE_MAP,
            word1: fpage.raw(),
        }
    }

    /// The "nothing to map" item sigma0 answers rejects with.
    pub const fn reject() -> MapItem {
        MapItem {
            word0: ITEM_TYPE_MAP,
            word1: 0,
        }
    }

    pub const fn from_words(word0: Word, word1: Word) -> MapItem {
        MapItem { word0, word1 }
    }

    pub const fn words(self) -> (Word, Word) {
        (self.word0, self.word1)
    }

    pub fn is_map_item(self) -> bool {
        self.word0 & ITEM_TYPE_MASK == ITEM_TYPE_MAP
    }

    pub fn send_base(self) -> Word {
        self.word0 & BASE_MASK
    }

    pub fn fpage(self) -> Fpage {
        Fpage::from_raw(self.word1)
    }

    pub fn is_reject(self) -> bool {
        self.send_base() == 0 && self.fpage().is_nil()
    }
}
