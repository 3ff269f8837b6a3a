//! The taproot root task.
//!
//! First user-space program on the kernel. The kernel starts us with the
//! KIP address and our UTCB in the first two argument registers; from
//! there: install the allocator and logger, drain sigma0, parse the
//! configuration, launch the applications, then serve as their pager and
//! resource broker forever.

#![no_std]
#![no_main]

extern crate alloc;

mod allocator;

use core::panic::PanicInfo;

use l4_api::{debug, Word};

// Boot ramfs, linked in by the image build.
extern "C" {
    static _ramfs_start: u8;
    static _ramfs_end: u8;
}

const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct Stack([u8; BOOT_STACK_SIZE]);

#[no_mangle]
static mut BOOT_STACK: Stack = Stack([0; BOOT_STACK_SIZE]);

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    ".section .text._start",
    ".global _start",
    "_start:",
    "ldr x2, =BOOT_STACK",
    "mov x3, {stack_size}",
    "add x2, x2, x3",
    "mov sp, x2",
    "b rust_entry",
    stack_size = const BOOT_STACK_SIZE,
);

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    ".section .text._start",
    ".global _start",
    "_start:",
    "lea rsp, [rip + BOOT_STACK]",
    "add rsp, {stack_size}",
    "jmp rust_entry",
    stack_size = const BOOT_STACK_SIZE,
);

#[no_mangle]
extern "C" fn rust_entry(kip: *const Word, utcb: *mut Word) -> ! {
    unsafe { l4_api::sys::init(kip, utcb) };
    bootstrap::klog::init(log::LevelFilter::Info);
    log::info!("taproot: hello");

    let ramfs = unsafe {
        let start = core::ptr::addr_of!(_ramfs_start);
        let end = core::ptr::addr_of!(_ramfs_end);
        core::slice::from_raw_parts(start, end.offset_from(start) as usize)
    };

    match bootstrap::init(ramfs) {
        Ok(mut broker) => broker.run(),
        Err(e) => {
            log::error!("taproot: bootstrap failed: {e}");
            debug::kdb("taproot: bootstrap failed")
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("taproot: panic: {info}");
    debug::kdb("taproot: panic")
}
