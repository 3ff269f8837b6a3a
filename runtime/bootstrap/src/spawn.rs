//! Task and thread creation.
//!
//! Bringing a thread to life is always the same privileged sequence:
//! ThreadControl to create it inside its space with the root task as
//! pager, Schedule for its priority, ExchangeRegisters to point it at its
//! entry and stack. For an application's main thread the space itself is
//! created first (the main thread is the space identifier) and its KIP and
//! UTCB windows configured via SpaceControl.

use broker::dispatch::{LaunchError, ThreadLauncher, ThreadSpawn};
use broker::AppRecord;
use l4_api::{kip, syscall, Access, Fpage, ThreadId, Word, PAGE_SIZE};

use crate::BootError;

/// KIP window in every application's space.
const KIP_AREA_BASE: Word = 0xbfff_0000;

/// Create the application's space and start its main thread.
pub fn start_app(
    app: &AppRecord,
    entry: Word,
    stack_top: Word,
    main_utcb_location: Word,
) -> Result<(), BootError> {
    let main = app.space_id();
    let me = kip::roottask_id();

    // Creating a thread whose space is itself creates the task, inactive.
    syscall::thread_control(main, main, me, ThreadId::nil(), 0)?;

    let kip_area =
        Fpage::new(KIP_AREA_BASE, PAGE_SIZE, Access::R).ok_or(BootError::Geometry("kip area"))?;
    syscall::space_control(main, kip_area, app.utcb_area)?;

    // Activation: give it a UTCB and ourselves as pager.
    syscall::thread_control(main, main, me, me, main_utcb_location)?;
    syscall::schedule(main, app.max_prio())?;
    syscall::exchange_registers(main, entry, stack_top)?;

    log::info!(
        "spawn: app '{}' main thread {main:?} entry={entry:#x}",
        app.params.name
    );
    Ok(())
}

/// The broker-facing thread-creation helper: additional threads inside an
/// already running application.
pub struct Launcher;

impl ThreadLauncher for Launcher {
    fn create_thread(&mut self, spawn: &ThreadSpawn) -> Result<(), LaunchError> {
        syscall::thread_control(
            spawn.id,
            spawn.space,
            spawn.owner,
            kip::roottask_id(),
            spawn.utcb_location,
        )?;
        syscall::schedule(spawn.id, spawn.prio)?;
        syscall::exchange_registers(spawn.id, spawn.entry, spawn.stack + spawn.stack_size)?;
        log::info!(
            "spawn: thread {:?} in space {:?} prio={}",
            spawn.id,
            spawn.space,
            spawn.prio
        );
        Ok(())
    }
}
