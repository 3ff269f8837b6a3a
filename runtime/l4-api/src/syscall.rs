//! Privileged system calls the root task is allowed to make.

use thiserror::Error;

use crate::fpage::Fpage;
use crate::thread::ThreadId;
use crate::Word;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    #[error("kernel refused the call (code {0})")]
    Refused(Word),
}

/// Default memory attribute.
pub const MEM_ATTR_DEFAULT: Word = 0;
/// Disable caching for the flex-page batch.
pub const MEM_ATTR_NOT_CACHED: Word = 1;

/// Create or modify a thread.
///
/// A nil `space` deletes/clears the respective binding; creating a task
/// passes the thread's own id as `space`. `utcb_location` is the address of
/// the thread's UTCB inside its space's UTCB area.
pub fn thread_control(
    dest: ThreadId,
    space: ThreadId,
    scheduler: ThreadId,
    pager: ThreadId,
    utcb_location: Word,
) -> Result<(), SysError> {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            if let Some(code) = k.fail_thread_control.take() {
                return Err(SysError::Refused(code));
            }
            k.thread_controls.push(crate::mock::ThreadControlCall {
                dest,
                space,
                scheduler,
                pager,
                utcb_location,
            });
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::thread_control(dest, space, scheduler, pager, utcb_location)
    }
}

/// Configure a freshly created address space: KIP and UTCB windows.
pub fn space_control(space: ThreadId, kip_area: Fpage, utcb_area: Fpage) -> Result<(), SysError> {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            k.space_controls.push(crate::mock::SpaceControlCall {
                space,
                kip_area,
                utcb_area,
            });
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::space_control(space, kip_area, utcb_area)
    }
}

/// Set a thread's instruction and stack pointers (and resume it).
pub fn exchange_registers(dest: ThreadId, ip: Word, sp: Word) -> Result<(), SysError> {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            k.exchanges
                .push(crate::mock::ExchangeRegistersCall { dest, ip, sp });
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::exchange_registers(dest, ip, sp)
    }
}

/// Set a thread's priority.
pub fn schedule(dest: ThreadId, prio: Word) -> Result<(), SysError> {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            k.schedules.push(crate::mock::ScheduleCall { dest, prio });
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::schedule(dest, prio)
    }
}

/// Apply `attr0` to a batch of flex-pages.
pub fn memory_control(fpages: &[Fpage], attr0: Word) -> Result<(), SysError> {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            k.memory_controls.push(crate::mock::MemoryControlCall {
                fpages: fpages.to_vec(),
                attr0,
            });
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::memory_control(fpages, attr0)
    }
}
