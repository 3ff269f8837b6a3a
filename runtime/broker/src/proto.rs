//! Wire protocol of the broker.
//!
//! IPC labels, per-handler error words, and the packing of symbolic names
//! into message registers. Client stubs use the same definitions, so the
//! encoding lives here and nowhere else.
//!
//! Names travel in up to [`NAME_WORDS_MAX`] untyped words, native byte
//! order within each word, NUL-terminated. Decoding produces an owned
//! string which is then compared in full; two names that agree for the
//! whole window but differ beyond it cannot exist, because every producer
//! of names (configuration parser, thread registration) enforces the same
//! length bound.

use alloc::string::String;
use alloc::vec::Vec;

use l4_api::{Msg, MsgTag, Word, MR_COUNT, WORD_BYTES};
use static_assertions::const_assert;

/// Request labels served by the broker loop.
pub const MAP_IO: Word = 1;
pub const ATTACH_INT: Word = 2;
pub const DETACH_INT: Word = 3;
pub const GET_USUAL_MEM: Word = 4;
pub const GET_NAMED_MEM: Word = 5;
pub const CREATE_THREAD: Word = 6;
pub const REGISTER_THREAD: Word = 7;
pub const GET_THREAD_ID: Word = 8;
pub const APP_THREADS: Word = 9;

/// Error words, per handler.
pub mod err {
    use l4_api::Word;

    pub mod map_io {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NO_DEVICE: Word = 2;
        pub const NO_PERMISSION: Word = 3;
    }

    /// ATTACH_INT / DETACH_INT. Success and failure share one register, so
    /// errors are sent negated (two's complement) to keep them apart from
    /// IRQ numbers.
    pub mod irq {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NO_DEVICE: Word = 2;
        pub const NO_PERMISSION: Word = 3;
        pub const INTERNAL: Word = 4;
    }

    pub mod usual_mem {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const UNSUPPORTED: Word = 2;
    }

    pub mod named_mem {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NO_REGION: Word = 2;
        pub const NO_PERMISSION: Word = 3;
    }

    pub mod create_thread {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NO_FREE_THREAD: Word = 2;
        /// Reserved: the priority ceiling is part of the application record
        /// and the query cannot fail once the record resolved.
        pub const MAX_PRIO_QUERY: Word = 3;
        pub const BAD_UTCB: Word = 4;
        pub const CREATE_FAILED: Word = 5;
    }

    pub mod register_thread {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NAME_TOO_LONG: Word = 2;
        pub const ALREADY_EXISTS: Word = 3;
    }

    pub mod get_thread_id {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NOT_FOUND: Word = 2;
    }

    pub mod app_threads {
        use super::Word;
        pub const NO_APP: Word = 1;
        pub const NO_SUCH_APP: Word = 2;
    }
}

/// Longest name on the wire, in words and bytes (NUL included).
pub const NAME_WORDS_MAX: usize = 8;
pub const NAME_LEN_MAX: usize = NAME_WORDS_MAX * WORD_BYTES;

const_assert!(NAME_WORDS_MAX < MR_COUNT - 1);

/// Pack a name into message-register words. `None` if the name (plus its
/// terminating NUL) exceeds the window.
pub fn pack_name(name: &str) -> Option<Vec<Word>> {
    let bytes = name.as_bytes();
    if bytes.len() + 1 > NAME_LEN_MAX {
        return None;
    }
    let words = (bytes.len() + 1).div_ceil(WORD_BYTES);
    let mut packed = Vec::new();
    for w in 0..words {
        let mut buf = [0u8; WORD_BYTES];
        for (i, slot) in buf.iter_mut().enumerate() {
            if let Some(&b) = bytes.get(w * WORD_BYTES + i) {
                *slot = b;
            }
        }
        packed.push(Word::from_ne_bytes(buf));
    }
    Some(packed)
}

/// Decode a name from untyped words. `None` when no terminating NUL exists
/// inside the window or the bytes are not UTF-8.
pub fn unpack_name(words: &[Word]) -> Option<String> {
    let mut bytes = Vec::new();
    for word in words.iter().take(NAME_WORDS_MAX) {
        for b in word.to_ne_bytes() {
            if b == 0 {
                return core::str::from_utf8(&bytes).ok().map(String::from);
            }
            bytes.push(b);
        }
    }
    None
}

/// The uniform error reply: one untyped word, no typed items, the
/// request's label, propagated flag clear.
pub fn error_reply(label: Word, code: Word) -> Msg {
    let mut reply = Msg::new(MsgTag::new(label, 1, 0));
    reply.set_mr(1, code);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn name_round_trip() {
        for name in ["greth", "a", "dma_pool", "x".repeat(NAME_LEN_MAX - 1).as_str()] {
            let words = pack_name(name).unwrap();
            assert!(words.len() <= NAME_WORDS_MAX);
            assert_eq!(unpack_name(&words).unwrap(), name);
        }
    }

    #[test]
    fn overlong_name_cannot_be_packed() {
        assert!(pack_name(&"x".repeat(NAME_LEN_MAX)).is_none());
    }

    #[test]
    fn unterminated_window_fails_to_decode() {
        let words = [Word::from_ne_bytes([b'x'; WORD_BYTES]); NAME_WORDS_MAX];
        assert!(unpack_name(&words).is_none());
    }

    #[test]
    fn empty_name_round_trips() {
        let words = pack_name("").unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(unpack_name(&words).unwrap(), "".to_string());
    }

    #[test]
    fn error_reply_shape() {
        let reply = error_reply(MAP_IO, err::map_io::NO_PERMISSION);
        assert_eq!(reply.tag().label(), MAP_IO);
        assert_eq!(reply.tag().untyped(), 1);
        assert_eq!(reply.tag().typed(), 0);
        assert!(!reply.tag().is_propagated());
        assert_eq!(reply.mr(1), 3);
    }
}
