//! Application registry.
//!
//! One record per configured application: its policy (permitted devices and
//! memories, priority ceiling), its slice of the global thread-number
//! space, a bit-set allocator over that slice, and the resolver that maps
//! addresses in the application's space back to frames the root task owns.
//!
//! The thread-number intervals of distinct applications are pairwise
//! disjoint and sit above the reserved kernel/root numbers; `by_caller`
//! exploits this to identify the requesting application on every IPC.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use l4_api::{Access, Fpage, ThreadId, Word};

use crate::RegistryError;

/// Thread id version used for application threads.
pub const APP_THREAD_VERSION: Word = 7;

/// Per-application thread indices 0 and 1 are reserved for the app's own
/// pager and its main thread.
pub const RESERVED_THREAD_SLOTS: u32 = 2;

/// Resolves an address range in an application's space to a frame owned by
/// the root task. Implemented by the bootstrap image loader; the broker
/// treats it as a black box.
pub trait AddressSpace {
    fn resolve(&self, vaddr: Word, len: usize, access: Access) -> Option<Fpage>;
}

/// Static configuration an application record is built from.
#[derive(Debug)]
pub struct AppParams {
    pub name: String,
    pub short_name: String,
    pub image_path: String,
    pub stack_size: usize,
    pub max_threads: u32,
    pub max_prio: Word,
    pub fpu: bool,
    pub permitted_devices: Vec<String>,
    pub permitted_memories: Vec<String>,
    pub args: Vec<String>,
}

pub struct AppRecord {
    pub params: AppParams,
    /// First global thread number of this application's interval.
    pub first_thrno: Word,
    /// UTCB area of the application's space.
    pub utcb_area: Fpage,
    space: Box<dyn AddressSpace>,
    /// Bit `i` set = thread number `first_thrno + i` is in use.
    thrno_used: u64,
}

impl AppRecord {
    pub fn new(
        params: AppParams,
        first_thrno: Word,
        utcb_area: Fpage,
        space: Box<dyn AddressSpace>,
    ) -> AppRecord {
        debug_assert!(params.max_threads as usize <= u64::BITS as usize);
        AppRecord {
            params,
            first_thrno,
            utcb_area,
            space,
            thrno_used: (1 << RESERVED_THREAD_SLOTS) - 1,
        }
    }

    /// Half-open interval of global thread numbers owned by this app.
    pub fn thrno_begin(&self) -> Word {
        self.first_thrno
    }

    pub fn thrno_end(&self) -> Word {
        self.first_thrno + self.params.max_threads as Word
    }

    pub fn owns_thrno(&self, number: Word) -> bool {
        number >= self.thrno_begin() && number < self.thrno_end()
    }

    /// The main thread doubles as the space identifier.
    pub fn space_id(&self) -> ThreadId {
        ThreadId::global(self.first_thrno + 1, APP_THREAD_VERSION)
    }

    pub fn max_prio(&self) -> Word {
        self.params.max_prio
    }

    /// Claim the lowest free thread number, if any.
    pub fn alloc_thrno(&mut self) -> Option<Word> {
        let free = !self.thrno_used;
        let index = free.trailing_zeros();
        if index >= self.params.max_threads {
            return None;
        }
        self.thrno_used |= 1 << index;
        Some(self.first_thrno + index as Word)
    }

    pub fn permits_device(&self, name: &str) -> bool {
        self.params.permitted_devices.iter().any(|d| d == name)
    }

    pub fn permits_memory(&self, name: &str) -> bool {
        self.params.permitted_memories.iter().any(|m| m == name)
    }

    pub fn resolve(&self, vaddr: Word, len: usize, access: Access) -> Option<Fpage> {
        self.space.resolve(vaddr, len, access)
    }
}

pub struct AppRegistry {
    apps: Vec<AppRecord>,
}

impl AppRegistry {
    pub fn new() -> AppRegistry {
        AppRegistry { apps: Vec::new() }
    }

    /// Add an application; its thread-number interval must not intersect
    /// any registered one.
    pub fn add(&mut self, app: AppRecord) -> Result<(), RegistryError> {
        let disjoint = self
            .apps
            .iter()
            .all(|a| app.thrno_end() <= a.thrno_begin() || a.thrno_end() <= app.thrno_begin());
        if !disjoint {
            return Err(RegistryError::Overlap);
        }
        self.apps.push(app);
        Ok(())
    }

    /// The application whose interval contains the caller's thread number.
    /// Runs on every request; a linear scan over the handful of apps.
    pub fn by_caller(&self, caller: ThreadId) -> Option<&AppRecord> {
        let number = caller.number();
        self.apps.iter().find(|a| a.owns_thrno(number))
    }

    pub fn by_caller_mut(&mut self, caller: ThreadId) -> Option<&mut AppRecord> {
        let number = caller.number();
        self.apps.iter_mut().find(|a| a.owns_thrno(number))
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppRecord> {
        self.apps.iter()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}
