//! L4-family kernel ABI for the taproot runtime.
//!
//! This crate is the only place that knows how the kernel encodes things:
//! flex-pages, map items, message tags, thread ids, and the system-call
//! surface (IPC, MemoryControl, ThreadControl, SpaceControl,
//! ExchangeRegisters, Schedule, SystemClock, the kernel debugger).
//!
//! # Backends
//!
//! Two mutually exclusive backends provide the same API:
//!
//! - **`mock`** (default): an in-process kernel per test thread. Incoming
//!   messages are scripted, outgoing messages and privileged calls are
//!   recorded, the clock is a monotonic counter. Host `cargo test` runs
//!   entirely against this backend.
//! - **`runtime`**: the real trap interface; only meaningful when building
//!   for the target.
//!
//! # Message snapshots
//!
//! `ipc::receive_any` and `ipc::call` return an owned [`Msg`] copied out of
//! the message registers before control returns to the caller. Building a
//! reply therefore can never clobber the request it answers.

#![no_std]

#[cfg(feature = "mock")]
extern crate std;

#[cfg(all(feature = "mock", feature = "runtime"))]
compile_error!("features `mock` and `runtime` are mutually exclusive");

#[cfg(not(any(feature = "mock", feature = "runtime")))]
compile_error!("select a kernel backend: feature `mock` or `runtime`");

pub mod debug;
pub mod fpage;
pub mod ipc;
pub mod kip;
pub mod msg;
#[cfg(feature = "runtime")]
pub mod sys;
pub mod syscall;
pub mod tag;
pub mod thread;
pub mod time;

#[cfg(feature = "mock")]
pub mod mock;

pub use fpage::{Access, Fpage, MapItem};
pub use msg::{Msg, MR_COUNT};
pub use tag::MsgTag;
pub use thread::ThreadId;

use static_assertions::const_assert;

/// Machine word; every message register holds one.
pub type Word = usize;

/// Bytes per word.
pub const WORD_BYTES: usize = core::mem::size_of::<Word>();

/// Smallest mappable unit.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_BITS: usize = 12;

const_assert!(PAGE_SIZE == 1 << PAGE_BITS);
const_assert!(WORD_BYTES == 4 || WORD_BYTES == 8);

/// Round `addr` down to a page boundary.
pub const fn page_down(addr: Word) -> Word {
    addr & !(PAGE_SIZE - 1)
}

/// Round `addr` up to a page boundary.
pub const fn page_up(addr: Word) -> Word {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Is `addr` a multiple of `align` (a power of two)?
pub const fn is_aligned(addr: Word, align: usize) -> bool {
    addr & (align - 1) == 0
}

/// IPC timeout. The broker only ever uses [`Timeout::NEVER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub Word);

impl Timeout {
    /// Block until the partner is ready.
    pub const NEVER: Timeout = Timeout(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(page_down(0x1234), 0x1000);
        assert_eq!(page_up(0x1234), 0x2000);
        assert_eq!(page_up(0x1000), 0x1000);
        assert!(is_aligned(0x2000, PAGE_SIZE));
        assert!(!is_aligned(0x2100, PAGE_SIZE));
    }
}
