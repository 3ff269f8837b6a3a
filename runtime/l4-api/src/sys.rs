//! Runtime backend: the real trap interface.
//!
//! The root task binary hands us the KIP and UTCB addresses at startup via
//! [`init`]. UTCB layout: words 0..64 are the message registers, word 64 is
//! the buffer acceptor, word 65 receives the sender id of the last
//! rendezvous. The KIP publishes the user thread-number base at word 4.

#![allow(clippy::missing_safety_doc)]

use core::ptr;

use crate::fpage::Fpage;
use crate::ipc::IpcError;
use crate::msg::{Msg, MR_COUNT};
use crate::syscall::SysError;
use crate::tag::MsgTag;
use crate::thread::ThreadId;
use crate::{Timeout, Word};

const SYS_IPC: Word = 1;
const SYS_THREAD_CONTROL: Word = 2;
const SYS_SPACE_CONTROL: Word = 3;
const SYS_MEMORY_CONTROL: Word = 4;
const SYS_EXCHANGE_REGISTERS: Word = 5;
const SYS_SCHEDULE: Word = 6;
const SYS_SYSTEM_CLOCK: Word = 7;
const SYS_KDB: Word = 8;
const SYS_PUT_STR: Word = 9;

const UTCB_ACCEPTOR: usize = MR_COUNT;
const UTCB_SENDER: usize = MR_COUNT + 1;
const KIP_USER_BASE: usize = 4;

static mut KIP: *const Word = ptr::null();
static mut UTCB: *mut Word = ptr::null_mut();

/// Record the KIP and UTCB locations. Must run before any other call in
/// this module; the root task does it first thing in `_start`.
pub unsafe fn init(kip: *const Word, utcb: *mut Word) {
    KIP = kip;
    UTCB = utcb;
}

fn utcb() -> *mut Word {
    let p = unsafe { UTCB };
    debug_assert!(!p.is_null());
    p
}

#[cfg(target_arch = "aarch64")]
unsafe fn trap3(nr: Word, a: Word, b: Word, c: Word) -> Word {
    let ret: Word;
    core::arch::asm!(
        "svc #0",
        in("x8") nr,
        inlateout("x0") a => ret,
        in("x1") b,
        in("x2") c,
        lateout("x3") _,
        options(nostack),
    );
    ret
}

#[cfg(target_arch = "x86_64")]
unsafe fn trap3(nr: Word, a: Word, b: Word, c: Word) -> Word {
    let ret: Word;
    core::arch::asm!(
        "syscall",
        in("rax") nr,
        inlateout("rdi") a => ret,
        in("rsi") b,
        in("rdx") c,
        lateout("rcx") _,
        lateout("r11") _,
        options(nostack),
    );
    ret
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
compile_error!("runtime backend: unsupported target architecture");

fn store_msg(msg: &Msg) {
    let p = utcb();
    unsafe {
        ptr::write(p, msg.tag().raw());
        let words = 1 + msg.tag().untyped() + msg.tag().typed();
        for i in 1..words {
            ptr::write(p.add(i), msg.mr(i));
        }
    }
}

fn load_msg() -> (ThreadId, Msg) {
    let p = utcb();
    unsafe {
        let tag = MsgTag::from_raw(ptr::read(p));
        let mut msg = Msg::new(tag);
        let words = 1 + tag.untyped() + tag.typed();
        for i in 1..words.min(MR_COUNT) {
            msg.set_mr(i, ptr::read(p.add(i)));
        }
        let from = ThreadId::from_raw(ptr::read(p.add(UTCB_SENDER)));
        (from, msg)
    }
}

fn accept_everything() {
    unsafe { ptr::write(utcb().add(UTCB_ACCEPTOR), Fpage::complete().raw()) }
}

fn ipc_result(code: Word) -> Result<(), IpcError> {
    match code {
        0 => Ok(()),
        1 => Err(IpcError::Timeout),
        2 => Err(IpcError::Canceled),
        3 => Err(IpcError::NoPartner),
        c => Err(IpcError::Kernel(c)),
    }
}

pub fn ipc_send(to: ThreadId, msg: &Msg, timeout: Timeout) -> Result<(), IpcError> {
    store_msg(msg);
    ipc_result(unsafe { trap3(SYS_IPC, to.raw(), ThreadId::nil().raw(), timeout.0) })
}

pub fn ipc_receive(from_spec: ThreadId, timeout: Timeout) -> Result<(ThreadId, Msg), IpcError> {
    accept_everything();
    ipc_result(unsafe { trap3(SYS_IPC, ThreadId::nil().raw(), from_spec.raw(), timeout.0) })?;
    Ok(load_msg())
}

pub fn ipc_call(to: ThreadId, msg: &Msg, timeout: Timeout) -> Result<Msg, IpcError> {
    store_msg(msg);
    accept_everything();
    ipc_result(unsafe { trap3(SYS_IPC, to.raw(), to.raw(), timeout.0) })?;
    Ok(load_msg().1)
}

fn sys_result(code: Word) -> Result<(), SysError> {
    if code == 0 {
        Ok(())
    } else {
        Err(SysError::Refused(code))
    }
}

pub fn thread_control(
    dest: ThreadId,
    space: ThreadId,
    scheduler: ThreadId,
    pager: ThreadId,
    utcb_location: Word,
) -> Result<(), SysError> {
    let p = utcb();
    unsafe {
        // scheduler, pager and UTCB location travel in MRs.
        ptr::write(p.add(1), scheduler.raw());
        ptr::write(p.add(2), pager.raw());
        ptr::write(p.add(3), utcb_location);
    }
    sys_result(unsafe { trap3(SYS_THREAD_CONTROL, dest.raw(), space.raw(), 0) })
}

pub fn space_control(space: ThreadId, kip_area: Fpage, utcb_area: Fpage) -> Result<(), SysError> {
    sys_result(unsafe { trap3(SYS_SPACE_CONTROL, space.raw(), kip_area.raw(), utcb_area.raw()) })
}

pub fn exchange_registers(dest: ThreadId, ip: Word, sp: Word) -> Result<(), SysError> {
    sys_result(unsafe { trap3(SYS_EXCHANGE_REGISTERS, dest.raw(), ip, sp) })
}

pub fn schedule(dest: ThreadId, prio: Word) -> Result<(), SysError> {
    sys_result(unsafe { trap3(SYS_SCHEDULE, dest.raw(), prio, 0) })
}

pub fn memory_control(fpages: &[Fpage], attr0: Word) -> Result<(), SysError> {
    let p = utcb();
    for (i, fp) in fpages.iter().enumerate().take(MR_COUNT - 1) {
        unsafe { ptr::write(p.add(1 + i), fp.raw()) };
    }
    sys_result(unsafe { trap3(SYS_MEMORY_CONTROL, fpages.len() as Word - 1, attr0, 0) })
}

pub fn system_clock() -> u64 {
    unsafe { trap3(SYS_SYSTEM_CLOCK, 0, 0, 0) as u64 }
}

pub fn put_str(s: &str) {
    unsafe { trap3(SYS_PUT_STR, s.as_ptr() as Word, s.len() as Word, 0) };
}

pub fn kdb(msg: &str) -> ! {
    unsafe { trap3(SYS_KDB, msg.as_ptr() as Word, msg.len() as Word, 0) };
    loop {
        core::hint::spin_loop();
    }
}

pub fn thread_user_base() -> Word {
    let kip = unsafe { KIP };
    debug_assert!(!kip.is_null());
    unsafe { ptr::read(kip.add(KIP_USER_BASE)) }
}
