//! Bring-up of the taproot root task.
//!
//! Everything that happens before the broker loop starts lives here:
//! acquiring all physical memory and the configured I/O space from sigma0,
//! parsing the system configuration out of the boot ramfs, preparing the
//! named memory regions, loading each application image and launching its
//! main thread. [`init`] runs the whole sequence and returns a fully
//! populated [`Broker`]; any failure is returned and the caller terminates
//! the root task, because a half-bootstrapped system cannot serve anyone.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod config;
pub mod image;
pub mod klog;
pub mod ramfs;
pub mod sigma0;
pub mod spawn;

use alloc::boxed::Box;
use alloc::string::String;

use thiserror::Error;

use broker::dispatch::LaunchError;
use broker::{
    AppRecord, AppRegistry, Broker, DeviceTable, MemPool, NamedMemRegistry, NamedThreadRegistry,
    RegionSpec, RegistryError,
};
use l4_api::ipc::IpcError;
use l4_api::syscall::{self, SysError, MEM_ATTR_NOT_CACHED};
use l4_api::{is_aligned, kip, Word, PAGE_SIZE};

pub use config::{ConfigError, SystemConfig};
pub use ramfs::{Ramfs, RamfsError};

/// Path of the system configuration inside the boot ramfs.
pub const CONFIG_PATH: &str = "config.sys";

#[derive(Error, Debug)]
pub enum BootError {
    #[error("ramfs: {0}")]
    Ramfs(#[from] RamfsError),
    #[error("config file is not text")]
    ConfigNotText,
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("sigma0 ipc failed: {0}")]
    Sigma0(#[from] IpcError),
    #[error("sigma0 protocol violation (reply without map item)")]
    Sigma0Protocol,
    #[error("sigma0 refused io page {0:#x}")]
    IoSpaceDenied(Word),
    #[error("out of pool memory ({0:#x} bytes requested)")]
    OutOfMemory(usize),
    #[error("named region '{0}': size not page aligned")]
    UnalignedRegion(String),
    #[error("named region '{0}': pool frame lacks the declared access")]
    BadFrameAccess(String),
    #[error("kernel call failed: {0}")]
    Sys(#[from] SysError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("file '{0}' not found in ramfs")]
    NoFile(String),
    #[error("elf image: {0}")]
    Elf(&'static str),
    #[error("bad flex-page geometry for {0}")]
    Geometry(&'static str),
    #[error("launch: {0}")]
    Launch(#[from] LaunchError),
}

/// Run the whole bootstrap sequence against the boot ramfs image and
/// return the broker, ready to serve.
pub fn init(ramfs_image: &[u8]) -> Result<Broker, BootError> {
    let ramfs = Ramfs::new(ramfs_image)?;
    let cfg_bytes = ramfs
        .find(CONFIG_PATH)
        .ok_or_else(|| BootError::NoFile(String::from(CONFIG_PATH)))?;
    let cfg_text = core::str::from_utf8(cfg_bytes).map_err(|_| BootError::ConfigNotText)?;
    let cfg = SystemConfig::parse(cfg_text)?;
    config::log_config(&cfg);

    let mut pool = MemPool::new();
    sigma0::acquire_all_memory(&mut pool)?;

    let mut devices = DeviceTable::new();
    for dev in cfg.devices {
        devices.add(dev)?;
    }
    sigma0::acquire_io_space(&devices)?;

    let named_mem = prepare_named_regions(cfg.memories, &mut pool)?;

    let mut apps = AppRegistry::new();
    let mut first_thrno = kip::app_thread_base();
    for params in cfg.apps {
        log::info!("bootstrap: starting app '{}'", params.name);
        let max_threads = params.max_threads;
        let loaded = image::load_app(&ramfs, &params, &mut pool)?;
        let record = AppRecord::new(params, first_thrno, loaded.utcb_area, Box::new(loaded.space));
        spawn::start_app(&record, loaded.entry, loaded.stack_top, loaded.main_utcb_location)?;
        apps.add(record)?;
        first_thrno += max_threads as Word;
    }

    Ok(Broker::new(
        pool,
        devices,
        named_mem,
        apps,
        NamedThreadRegistry::new(),
        Box::new(spawn::Launcher),
    ))
}

/// Carve each configured region out of the pool, narrow its access to the
/// declared mask and apply the caching attribute. Regions declared
/// uncached get MemoryControl(NotCached) exactly once, here.
fn prepare_named_regions(
    memories: alloc::vec::Vec<RegionSpec>,
    pool: &mut MemPool,
) -> Result<NamedMemRegistry, BootError> {
    let mut registry = NamedMemRegistry::new();
    for spec in memories {
        if !is_aligned(spec.size, PAGE_SIZE) {
            return Err(BootError::UnalignedRegion(spec.name));
        }
        let frame = pool
            .allocate(spec.size)
            .ok_or(BootError::OutOfMemory(spec.size))?;
        if !frame.access().contains(spec.access) {
            return Err(BootError::BadFrameAccess(spec.name));
        }
        let location = frame.with_access(spec.access);
        if !spec.cached {
            syscall::memory_control(&[location], MEM_ATTR_NOT_CACHED)?;
        }
        log::info!(
            "bootstrap: named region '{}' at {location:?} cached={} contig={}",
            spec.name,
            spec.cached as u8,
            spec.contig as u8,
        );
        registry.add(spec, location)?;
    }
    Ok(registry)
}
