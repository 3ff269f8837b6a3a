//! Pager and resource broker of the taproot root task.
//!
//! After bootstrap has acquired all physical memory, parsed the system
//! configuration and launched the configured applications, everything the
//! root task does goes through [`Broker::run`]: a single-threaded receive
//! loop that resolves page faults and serves resource requests (MMIO
//! windows, interrupt attachment, named memory, thread creation, the
//! symbolic thread directory).
//!
//! All state lives in five databases owned by the broker and populated
//! before the loop starts:
//!
//! - [`mpool::MemPool`]: every untyped frame obtained from sigma0
//! - [`devices::DeviceTable`]: named MMIO devices from the configuration
//! - [`named_mem::NamedMemRegistry`]: named, pre-attributed memory regions
//! - [`apps::AppRegistry`]: per-application policy and address spaces
//! - [`named_threads::NamedThreadRegistry`]: the thread name directory
//!
//! The loop itself is stateless between iterations; clients only ever see
//! either a reply or (for broker-internal failures) the kernel debugger.

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod apps;
pub mod devices;
pub mod dispatch;
pub mod mpool;
pub mod named_mem;
pub mod named_threads;
pub mod pager;
pub mod proto;

pub use apps::{AddressSpace, AppParams, AppRecord, AppRegistry, APP_THREAD_VERSION};
pub use devices::{DeviceTable, MmioDevice};
pub use dispatch::{Broker, LaunchError, ThreadLauncher, ThreadSpawn};
pub use mpool::MemPool;
pub use named_mem::{NamedMemRegistry, NamedRegion, RegionSpec};
pub use named_threads::{NamedThread, NamedThreadRegistry};

use thiserror::Error;

/// Errors of the name-keyed registries.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("name already registered")]
    AlreadyExists,
    #[error("name exceeds the wire limit")]
    NameTooLong,
    #[error("thread-number interval overlaps an existing application")]
    Overlap,
}
