//! Application images and their address-space model.
//!
//! Loading an application allocates pool frames for every LOAD segment,
//! the stack and the UTCB area, and records each of them as a [`VmRegion`]
//! mapping an application-virtual range to the root-local frame behind it.
//! The resulting [`VSpace`] is the resolver the pager consults for the
//! lifetime of the application: nothing is mapped eagerly, faults pull the
//! pages in.

use alloc::vec::Vec;

use xmas_elf::program::Type;
use xmas_elf::ElfFile;

use broker::{AddressSpace, AppParams, MemPool};
use l4_api::{is_aligned, page_down, page_up, Access, Fpage, Word, PAGE_SIZE};

use crate::ramfs::Ramfs;
use crate::BootError;

/// Bytes per UTCB slot; thread `i` of an app owns slot `i` of its area.
pub const UTCB_SIZE: usize = 512;

/// Application stack top; the stack grows down from here.
const STACK_TOP: Word = 0xa000_0000;

/// Application UTCB area base; aligned generously so any legal area size
/// yields a valid flex-page.
const UTCB_AREA_BASE: Word = 0xb000_0000;

/// One virtual region backed by a root-local frame.
#[derive(Debug, Clone, Copy)]
pub struct VmRegion {
    pub vaddr: Word,
    pub size: usize,
    pub access: Access,
    pub local: Word,
}

/// The address-space model of one application.
#[derive(Debug)]
pub struct VSpace {
    regions: Vec<VmRegion>,
}

impl VSpace {
    pub fn new() -> VSpace {
        VSpace {
            regions: Vec::new(),
        }
    }

    pub fn push(&mut self, region: VmRegion) {
        debug_assert!(is_aligned(region.vaddr, PAGE_SIZE));
        debug_assert!(is_aligned(region.local, PAGE_SIZE));
        debug_assert!(is_aligned(region.size, PAGE_SIZE));
        self.regions.push(region);
    }

    pub fn regions(&self) -> &[VmRegion] {
        &self.regions
    }
}

impl Default for VSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for VSpace {
    /// Page-granular resolution: the request must sit inside one region
    /// and be allowed by it; the answer is the page containing `vaddr`.
    fn resolve(&self, vaddr: Word, len: usize, access: Access) -> Option<Fpage> {
        let region = self.regions.iter().find(|r| {
            vaddr >= r.vaddr && vaddr + len <= r.vaddr + r.size && r.access.contains(access)
        })?;
        let page = page_down(vaddr);
        Fpage::new(region.local + (page - region.vaddr), PAGE_SIZE, region.access)
    }
}

/// Everything bootstrap needs to start a loaded application.
#[derive(Debug)]
pub struct LoadedApp {
    pub space: VSpace,
    pub entry: Word,
    pub stack_top: Word,
    /// UTCB window in the application's space, as the kernel wants it.
    pub utcb_area: Fpage,
    /// Root-local address of the main thread's UTCB slot.
    pub main_utcb_location: Word,
}

fn segment_access(flags: xmas_elf::program::Flags) -> Access {
    let mut access = Access::empty();
    if flags.is_read() {
        access |= Access::R;
    }
    if flags.is_write() {
        access |= Access::W;
    }
    if flags.is_execute() {
        access |= Access::X;
    }
    access
}

/// Load `params.image_path` from the ramfs and build the app's address
/// space: ELF segments, stack, UTCB area.
pub fn load_app(
    ramfs: &Ramfs<'_>,
    params: &AppParams,
    pool: &mut MemPool,
) -> Result<LoadedApp, BootError> {
    let path = params
        .image_path
        .strip_prefix("ramfs:/")
        .unwrap_or(&params.image_path);
    let file = ramfs
        .find(path)
        .ok_or_else(|| BootError::NoFile(params.image_path.clone()))?;

    let elf = ElfFile::new(file).map_err(BootError::Elf)?;
    let mut space = VSpace::new();

    for ph in elf.program_iter() {
        if ph.get_type() != Ok(Type::Load) {
            continue;
        }
        let vaddr = ph.virtual_addr() as Word;
        let memsz = ph.mem_size() as usize;
        let filesz = ph.file_size() as usize;
        let offset = ph.offset() as usize;
        if memsz == 0 {
            continue;
        }
        if filesz > memsz || offset + filesz > file.len() {
            return Err(BootError::Elf("segment outside the image"));
        }

        let seg_start = page_down(vaddr);
        let span = page_up(vaddr + memsz) - seg_start;
        let frame = pool.allocate(span).ok_or(BootError::OutOfMemory(span))?;

        // Pool memory was zeroed when sigma0 granted it, so only the file
        // bytes need copying.
        #[cfg(feature = "runtime")]
        unsafe {
            let dst = (frame.base() + (vaddr - seg_start)) as *mut u8;
            core::ptr::copy_nonoverlapping(file.as_ptr().add(offset), dst, filesz);
        }

        space.push(VmRegion {
            vaddr: seg_start,
            size: span,
            access: segment_access(ph.flags()),
            local: frame.base(),
        });
    }
    if space.regions().is_empty() {
        return Err(BootError::Elf("no loadable segments"));
    }

    let entry = elf.header.pt2.entry_point() as Word;

    let stack_size = page_up(params.stack_size);
    let stack_frame = pool
        .allocate(stack_size)
        .ok_or(BootError::OutOfMemory(stack_size))?;
    space.push(VmRegion {
        vaddr: STACK_TOP - stack_size,
        size: stack_size,
        access: Access::RW,
        local: stack_frame.base(),
    });

    let utcb_span = page_up(params.max_threads as usize * UTCB_SIZE);
    let utcb_frame = pool
        .allocate(utcb_span)
        .ok_or(BootError::OutOfMemory(utcb_span))?;
    let utcb_area = Fpage::new(UTCB_AREA_BASE, utcb_frame.size(), Access::RW)
        .ok_or(BootError::Geometry("utcb area"))?;
    space.push(VmRegion {
        vaddr: UTCB_AREA_BASE,
        size: utcb_frame.size(),
        access: Access::RW,
        local: utcb_frame.base(),
    });

    log::info!(
        "image: '{}' entry={entry:#x} segments={} stack={stack_size:#x}",
        params.name,
        space.regions().len() - 2,
    );

    Ok(LoadedApp {
        space,
        entry,
        stack_top: STACK_TOP,
        utcb_area,
        // slot 0 is the app's own pager, slot 1 the main thread
        main_utcb_location: utcb_frame.base() + UTCB_SIZE,
    })
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::ramfs::build_archive;
    use std::string::ToString;
    use std::vec;
    use std::vec::Vec;

    /// Minimal statically-linked ELF64 with one LOAD segment.
    fn tiny_elf(entry: u64, vaddr: u64, code: &[u8], bss: usize) -> Vec<u8> {
        let mut image = Vec::new();
        // ELF header
        image.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        image.extend_from_slice(&[0; 8]);
        image.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        image.extend_from_slice(&0xb7u16.to_le_bytes()); // EM_AARCH64
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&entry.to_le_bytes());
        image.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
        image.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
        image.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
        image.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        image.extend_from_slice(&64u16.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(image.len(), 64);
        // program header: PT_LOAD, R+X
        let data_off = 64u64 + 56;
        image.extend_from_slice(&1u32.to_le_bytes());
        image.extend_from_slice(&5u32.to_le_bytes());
        image.extend_from_slice(&data_off.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes());
        image.extend_from_slice(&vaddr.to_le_bytes());
        image.extend_from_slice(&(code.len() as u64).to_le_bytes());
        image.extend_from_slice(&((code.len() + bss) as u64).to_le_bytes());
        image.extend_from_slice(&0x1000u64.to_le_bytes());
        image.extend_from_slice(code);
        image
    }

    fn params(max_threads: u32) -> AppParams {
        AppParams {
            name: "eth".to_string(),
            short_name: "eth".to_string(),
            image_path: "ramfs:/eth".to_string(),
            stack_size: 0x1000,
            max_threads,
            max_prio: 100,
            fpu: false,
            permitted_devices: vec![],
            permitted_memories: vec![],
            args: vec![],
        }
    }

    fn pool() -> MemPool {
        let mut pool = MemPool::new();
        pool.add(Fpage::new(0x0400_0000, 0x40_0000, Access::RWX).unwrap());
        pool
    }

    #[test]
    fn loads_segments_stack_and_utcb() {
        let elf = tiny_elf(0x1000_0040, 0x1000_0000, &[0x90; 0x80], 0x40);
        let archive = build_archive(&[("eth", &elf)]);
        let ramfs = Ramfs::new(&archive).unwrap();

        let mut pool = pool();
        let before = pool.total_size();
        let loaded = load_app(&ramfs, &params(4), &mut pool).unwrap();

        assert_eq!(loaded.entry, 0x1000_0040);
        assert_eq!(loaded.stack_top, 0xa000_0000);
        // code + stack + utcb
        assert_eq!(loaded.space.regions().len(), 3);
        assert!(pool.total_size() < before);

        let code = &loaded.space.regions()[0];
        assert_eq!(code.vaddr, 0x1000_0000);
        assert_eq!(code.access, Access::R.union(Access::X));
        assert_eq!(code.size, PAGE_SIZE);

        assert_eq!(loaded.utcb_area.base(), 0xb000_0000);
        assert_eq!(loaded.utcb_area.access(), Access::RW);
    }

    #[test]
    fn resolver_answers_with_the_containing_page() {
        let elf = tiny_elf(0x1000_0040, 0x1000_0000, &[0x90; 0x80], 0);
        let archive = build_archive(&[("eth", &elf)]);
        let ramfs = Ramfs::new(&archive).unwrap();
        let loaded = load_app(&ramfs, &params(2), &mut pool()).unwrap();

        let code_local = loaded.space.regions()[0].local;
        let frame = loaded.space.resolve(0x1000_0040, 4, Access::R).unwrap();
        assert_eq!(frame.base(), code_local);
        assert_eq!(frame.size(), PAGE_SIZE);

        // writing code is not allowed, unmapped addresses resolve to nothing
        assert!(loaded.space.resolve(0x1000_0040, 4, Access::W).is_none());
        assert!(loaded.space.resolve(0x5000_0000, 4, Access::R).is_none());

        // the stack resolves read-write
        assert!(loaded
            .space
            .resolve(0xa000_0000 - PAGE_SIZE, PAGE_SIZE, Access::RW)
            .is_some());
    }

    #[test]
    fn missing_image_is_an_error() {
        let archive = build_archive(&[]);
        let ramfs = Ramfs::new(&archive).unwrap();
        let err = load_app(&ramfs, &params(2), &mut pool()).unwrap_err();
        assert!(matches!(err, BootError::NoFile(_)));
    }

    #[test]
    fn garbage_image_is_an_error() {
        let archive = build_archive(&[("eth", b"not an elf at all")]);
        let ramfs = Ramfs::new(&archive).unwrap();
        let err = load_app(&ramfs, &params(2), &mut pool()).unwrap_err();
        assert!(matches!(err, BootError::Elf(_)));
    }

    #[test]
    fn truncated_segment_is_an_error() {
        let mut elf = tiny_elf(0x1000_0040, 0x1000_0000, &[0x90; 0x80], 0);
        elf.truncate(elf.len() - 0x40);
        let archive = build_archive(&[("eth", &elf)]);
        let ramfs = Ramfs::new(&archive).unwrap();
        let err = load_app(&ramfs, &params(2), &mut pool()).unwrap_err();
        assert!(matches!(err, BootError::Elf(_)));
    }
}
