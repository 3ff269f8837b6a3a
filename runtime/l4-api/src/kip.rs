//! Kernel interface page accessors.

use crate::thread::ThreadId;
use crate::Word;

/// First user-available thread number. By convention sigma0 runs at the
/// base, the root task at base + 1, and application threads from base + 2.
pub fn thread_user_base() -> Word {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| k.user_base)
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::thread_user_base()
    }
}

/// Sigma0's global thread id.
pub fn sigma0_id() -> ThreadId {
    ThreadId::global(thread_user_base(), 1)
}

/// The root task's own global thread id.
pub fn roottask_id() -> ThreadId {
    ThreadId::global(thread_user_base() + 1, 1)
}

/// First thread number available to applications.
pub fn app_thread_base() -> Word {
    thread_user_base() + 2
}
