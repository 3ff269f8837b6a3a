//! Sigma0 protocol client.
//!
//! Sigma0 owns all physical memory at boot. The root task drains it with
//! wildcard requests, starting at the largest request size and halving on
//! every rejection until a single page is refused; whatever is granted
//! lands in the memory pool. Device registers are requested page by page
//! and marked uncached.
//!
//! A request is two untyped words under the sigma0 protocol label: the
//! wanted flex-page and an attribute word. The answer carries one map
//! item; a nil flex-page with a zero send-base means "nothing left".

use broker::{DeviceTable, MemPool};
use l4_api::syscall::{self, MEM_ATTR_DEFAULT, MEM_ATTR_NOT_CACHED};
use l4_api::{
    ipc, kip, page_down, Access, Fpage, MapItem, Msg, MsgTag, Timeout, Word, PAGE_SIZE,
};

use crate::BootError;

/// First (largest) memory request: 2 GiB.
pub const REQUEST_MAX: usize = 0x8000_0000;

fn request(fpage: Fpage) -> Result<MapItem, BootError> {
    let mut msg = Msg::new(MsgTag::sigma0(2));
    msg.set_mr(1, fpage.raw());
    msg.set_mr(2, MEM_ATTR_DEFAULT);

    let reply = ipc::call(kip::sigma0_id(), &msg, Timeout::NEVER)?;
    let item = reply
        .first_typed_item()
        .filter(|item| item.is_map_item())
        .ok_or(BootError::Sigma0Protocol)?;
    Ok(item)
}

/// Drain sigma0 into the pool.
pub fn acquire_all_memory(pool: &mut MemPool) -> Result<(), BootError> {
    log::info!("sigma0: acquiring memory");

    let mut req_size = REQUEST_MAX;
    loop {
        let wanted = Fpage::any(req_size, Access::RWX).ok_or(BootError::Sigma0Protocol)?;
        let item = request(wanted)?;

        if item.is_reject() {
            if req_size == PAGE_SIZE {
                break;
            }
            req_size >>= 1;
            continue;
        }

        let frame = item.fpage();
        // Granted memory is mapped idempotently; touch it once so stale
        // contents never leak into applications.
        #[cfg(feature = "runtime")]
        unsafe {
            core::ptr::write_bytes(frame.base() as *mut u8, 0, frame.size());
        }
        pool.add(frame);
    }

    log::info!("sigma0: pool holds {:#x} bytes", pool.total_size());
    Ok(())
}

/// Request every page backing the configured devices and mark it uncached.
pub fn acquire_io_space(devices: &DeviceTable) -> Result<(), BootError> {
    for dev in devices.iter() {
        let first = page_down(dev.paddr as Word);
        let last = page_down((dev.paddr + dev.size - 1) as Word);
        let mut pa = first;
        loop {
            let wanted =
                Fpage::new(pa, PAGE_SIZE, Access::RW).ok_or(BootError::Sigma0Protocol)?;
            let item = request(wanted)?;
            if item.is_reject() {
                log::error!("sigma0: refused io page {pa:#x} of '{}'", dev.name);
                return Err(BootError::IoSpaceDenied(pa));
            }
            syscall::memory_control(&[item.fpage()], MEM_ATTR_NOT_CACHED)?;

            if pa == last {
                break;
            }
            pa += PAGE_SIZE;
        }
        log::info!(
            "sigma0: io space for '{}' at {:#x}..{:#x}",
            dev.name,
            first,
            last + PAGE_SIZE
        );
    }
    Ok(())
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use broker::MmioDevice;
    use l4_api::{mock, ThreadId};
    use std::boxed::Box;
    use std::vec::Vec;

    /// Sigma0 stand-in with a fixed budget: grants any request that still
    /// fits, from a bump pointer.
    fn install_sigma0(budget: usize) {
        mock::with(|k| {
            let mut next = 0x4000_0000usize;
            let mut left = budget;
            k.call_handler = Some(Box::new(move |to: ThreadId, req: &Msg| {
                assert_eq!(to.number(), 256, "requests must go to sigma0");
                let wanted = Fpage::from_raw(req.mr(1));
                let size = wanted.size();

                let mut reply = Msg::new(MsgTag::new(0, 0, 2));
                if size > left {
                    reply.set_map_item(1, MapItem::reject());
                } else {
                    let base = (next + size - 1) & !(size - 1);
                    let frame = Fpage::new(base, size, Access::RWX).unwrap();
                    next = base + size;
                    left -= size;
                    reply.set_map_item(1, MapItem::new(frame));
                }
                reply
            }));
        });
    }

    #[test]
    fn drains_sigma0_by_halving() {
        mock::reset();
        // 1 MiB + one page: forces halving from 2 GiB down to 1 MiB, then
        // down again to a single page.
        install_sigma0(0x10_0000 + 0x1000);

        let mut pool = MemPool::new();
        acquire_all_memory(&mut pool).unwrap();
        assert_eq!(pool.total_size(), 0x10_0000 + 0x1000);

        // Request sizes never grow back, and each rejected size is half
        // its predecessor.
        let sizes: Vec<usize> = mock::with(|k| {
            k.calls
                .iter()
                .map(|(_, m)| Fpage::from_raw(m.mr(1)).size())
                .collect()
        });
        for pair in sizes.windows(2) {
            assert!(pair[1] == pair[0] || pair[1] == pair[0] / 2);
        }
        assert_eq!(*sizes.last().unwrap(), PAGE_SIZE);
    }

    #[test]
    fn terminates_when_even_one_page_is_refused() {
        mock::reset();
        install_sigma0(0);
        let mut pool = MemPool::new();
        acquire_all_memory(&mut pool).unwrap();
        assert_eq!(pool.total_size(), 0);
        // 2 GiB halves to 4 KiB: 20 rejected requests
        assert_eq!(mock::with(|k| k.calls.len()), 20);
    }

    #[test]
    fn io_space_requests_each_device_page_uncached() {
        mock::reset();
        install_sigma0(usize::MAX);

        let mut devices = DeviceTable::new();
        devices
            .add(MmioDevice {
                name: "greth".into(),
                paddr: 0x8000_0100,
                size: 0x100,
                irq: 6,
            })
            .unwrap();
        devices
            .add(MmioDevice {
                name: "span".into(),
                paddr: 0x9000_0ff0,
                size: 0x20,
                irq: 7,
            })
            .unwrap();

        acquire_io_space(&devices).unwrap();

        mock::with(|k| {
            // greth fits one page, span straddles two
            assert_eq!(k.calls.len(), 3);
            assert_eq!(k.memory_controls.len(), 3);
            for mc in &k.memory_controls {
                assert_eq!(mc.attr0, MEM_ATTR_NOT_CACHED);
            }
        });
    }

    #[test]
    fn refused_io_page_is_fatal() {
        mock::reset();
        install_sigma0(0);
        let mut devices = DeviceTable::new();
        devices
            .add(MmioDevice {
                name: "greth".into(),
                paddr: 0x8000_0100,
                size: 0x100,
                irq: 6,
            })
            .unwrap();
        let err = acquire_io_space(&devices).unwrap_err();
        assert!(matches!(err, BootError::IoSpaceDenied(0x8000_0000)));
    }
}
