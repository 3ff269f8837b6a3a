//! Owned message-register snapshots.
//!
//! The UTCB's message registers are live kernel state: constructing a reply
//! overwrites them. [`Msg`] is a plain copy, filled by receive and
//! serialized by send, so handlers always work on stable data.

use crate::fpage::MapItem;
use crate::tag::MsgTag;
use crate::Word;

/// Message registers per thread, MR0 (the tag) included.
pub const MR_COUNT: usize = 64;

#[derive(Clone)]
pub struct Msg {
    tag: MsgTag,
    mr: [Word; MR_COUNT],
}

impl Msg {
    pub fn new(tag: MsgTag) -> Msg {
        let mut mr = [0; MR_COUNT];
        mr[0] = tag.raw();
        Msg { tag, mr }
    }

    pub fn tag(&self) -> MsgTag {
        self.tag
    }

    pub fn set_tag(&mut self, tag: MsgTag) {
        self.tag = tag;
        self.mr[0] = tag.raw();
    }

    /// Message register `i`; payload starts at MR1.
    pub fn mr(&self, i: usize) -> Word {
        debug_assert!(i >= 1 && i < MR_COUNT);
        self.mr[i]
    }

    pub fn set_mr(&mut self, i: usize, value: Word) {
        debug_assert!(i >= 1 && i < MR_COUNT);
        self.mr[i] = value;
    }

    /// The untyped payload, MR1 through MR`u`.
    pub fn untyped_words(&self) -> &[Word] {
        &self.mr[1..=self.tag.untyped()]
    }

    /// Store a map item in the two registers starting at `i`.
    pub fn set_map_item(&mut self, i: usize, item: MapItem) {
        let (w0, w1) = item.words();
        self.set_mr(i, w0);
        self.set_mr(i + 1, w1);
    }

    /// Read a map item from the two registers starting at `i`.
    pub fn map_item(&self, i: usize) -> MapItem {
        MapItem::from_words(self.mr(i), self.mr(i + 1))
    }

    /// The first typed item of the message, if any.
    pub fn first_typed_item(&self) -> Option<MapItem> {
        if self.tag.typed() < 2 {
            return None;
        }
        Some(self.map_item(1 + self.tag.untyped()))
    }
}

impl core::fmt::Debug for Msg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Msg")
            .field("tag", &self.tag)
            .field("untyped", &self.untyped_words())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpage::{Access, Fpage};
    use crate::PAGE_SIZE;

    #[test]
    fn untyped_window_follows_tag() {
        let mut msg = Msg::new(MsgTag::new(7, 3, 0));
        msg.set_mr(1, 10);
        msg.set_mr(2, 20);
        msg.set_mr(3, 30);
        assert_eq!(msg.untyped_words(), &[10, 20, 30]);
    }

    #[test]
    fn typed_item_after_untyped() {
        let fp = Fpage::new(0x1_0000, PAGE_SIZE, Access::RW).unwrap();
        let mut msg = Msg::new(MsgTag::new(1, 2, 2));
        msg.set_mr(1, 0x100);
        msg.set_mr(2, 0x100);
        msg.set_map_item(3, MapItem::new(fp));

        let item = msg.first_typed_item().unwrap();
        assert_eq!(item.fpage(), fp);
    }

    #[test]
    fn no_typed_item_when_typed_zero() {
        let msg = Msg::new(MsgTag::new(1, 1, 0));
        assert!(msg.first_typed_item().is_none());
    }
}
