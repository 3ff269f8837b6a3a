//! The broker dispatch loop.
//!
//! Single-threaded: block for one message, route it, reply, repeat. The
//! only suspension points are the receive at the top and the reply send;
//! everything in between is in-memory work plus non-blocking privileged
//! calls. Handlers return the reply message; errors clients can act on go
//! back on the wire, failures of the broker's own kernel calls end in the
//! kernel debugger.

use alloc::boxed::Box;

use thiserror::Error;

use l4_api::ipc::{self, IpcError};
use l4_api::syscall::{self, SysError};
use l4_api::{debug, time, Access, Msg, MsgTag, ThreadId, Timeout, Word, PAGE_SIZE};

use crate::apps::{AppRegistry, APP_THREAD_VERSION};
use crate::devices::DeviceTable;
use crate::mpool::MemPool;
use crate::named_mem::NamedMemRegistry;
use crate::named_threads::NamedThreadRegistry;
use crate::pager;
use crate::proto::{self, err};
use crate::RegistryError;

/// Everything the thread-creation helper needs to bring a thread to life
/// inside an existing application space.
#[derive(Debug, Clone, Copy)]
pub struct ThreadSpawn {
    pub id: ThreadId,
    /// Space identifier (the application's main thread).
    pub space: ThreadId,
    /// The requesting thread; becomes the scheduler of the new thread.
    pub owner: ThreadId,
    /// Root-local address of the new thread's UTCB page.
    pub utcb_location: Word,
    pub entry: Word,
    pub stack: Word,
    pub stack_size: usize,
    pub prio: Word,
    /// Short name, packed into one word for the kernel debugger.
    pub short_name: Word,
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("kernel refused thread creation: {0}")]
    Kernel(#[from] SysError),
}

/// The thread-creation helper; implemented by bootstrap over
/// ThreadControl / Schedule / ExchangeRegisters.
pub trait ThreadLauncher {
    fn create_thread(&mut self, spawn: &ThreadSpawn) -> Result<(), LaunchError>;
}

pub struct Broker {
    pool: MemPool,
    devices: DeviceTable,
    named_mem: NamedMemRegistry,
    apps: AppRegistry,
    named_threads: NamedThreadRegistry,
    launcher: Box<dyn ThreadLauncher>,
}

impl Broker {
    pub fn new(
        pool: MemPool,
        devices: DeviceTable,
        named_mem: NamedMemRegistry,
        apps: AppRegistry,
        named_threads: NamedThreadRegistry,
        launcher: Box<dyn ThreadLauncher>,
    ) -> Broker {
        Broker {
            pool,
            devices,
            named_mem,
            apps,
            named_threads,
            launcher,
        }
    }

    pub fn pool(&self) -> &MemPool {
        &self.pool
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn named_mem(&self) -> &NamedMemRegistry {
        &self.named_mem
    }

    pub fn apps(&self) -> &AppRegistry {
        &self.apps
    }

    pub fn named_threads(&self) -> &NamedThreadRegistry {
        &self.named_threads
    }

    /// Serve forever. A failed receive is logged and the loop continues;
    /// everything else either replies or stops in the kernel debugger.
    pub fn run(&mut self) -> ! {
        log::info!("broker: serving");
        loop {
            if let Err(e) = self.dispatch_once() {
                log::error!("broker: receive failed: {e}");
            }
        }
    }

    /// One iteration of the loop: receive, route, reply.
    pub fn dispatch_once(&mut self) -> Result<(), IpcError> {
        // The receive snapshots the message registers; reply construction
        // below cannot clobber the request.
        let (from, msg) = ipc::receive_any(Timeout::NEVER)?;

        let reply = if msg.tag().is_pagefault() {
            pager::handle_pagefault(&self.apps, from, &msg)
        } else {
            match msg.tag().label() {
                proto::MAP_IO => self.map_io(from, &msg),
                proto::ATTACH_INT => self.attach_detach_int(from, &msg, true),
                proto::DETACH_INT => self.attach_detach_int(from, &msg, false),
                proto::GET_USUAL_MEM => self.get_usual_mem(from, &msg),
                proto::GET_NAMED_MEM => self.get_named_mem(from, &msg),
                proto::CREATE_THREAD => self.create_thread(from, &msg),
                proto::REGISTER_THREAD => self.register_thread(from, &msg),
                proto::GET_THREAD_ID => self.get_thread_id(from, &msg),
                proto::APP_THREADS => self.app_threads(from, &msg),
                label => {
                    log::error!("broker: unexpected ipc label {label} from {from:?}");
                    debug::kdb("broker: unexpected ipc label");
                }
            }
        };

        self.send_reply(from, &reply);
        Ok(())
    }

    fn send_reply(&self, to: ThreadId, reply: &Msg) {
        if let Err(e) = ipc::send(to, reply, Timeout::NEVER) {
            log::error!("broker: reply to {to:?} failed: {e}");
            debug::kdb("broker: sending reply failed");
        }
    }

    /// MAP_IO: name in, (offset, size, map item) out.
    fn map_io(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::MAP_IO;
        let Some(app) = self.apps.by_caller(from) else {
            log::error!("map_io: no app for {from:?}");
            return proto::error_reply(label, err::map_io::NO_APP);
        };
        let Some(name) = proto::unpack_name(msg.untyped_words()) else {
            return proto::error_reply(label, err::map_io::NO_DEVICE);
        };
        let Some(dev) = self.devices.find(&name) else {
            log::error!("map_io: no such device '{name}'");
            return proto::error_reply(label, err::map_io::NO_DEVICE);
        };
        if !app.permits_device(&name) {
            log::error!("map_io: app '{}' has no permission for '{name}'", app.params.name);
            return proto::error_reply(label, err::map_io::NO_PERMISSION);
        }
        let Some(window) = dev.io_window() else {
            log::error!("map_io: device '{name}' has no mappable window");
            return proto::error_reply(label, err::map_io::NO_DEVICE);
        };

        let mut reply = Msg::new(MsgTag::new(label, 2, 2));
        reply.set_mr(1, dev.page_offset());
        reply.set_mr(2, dev.size as Word);
        reply.set_map_item(3, l4_api::MapItem::new(window));
        reply
    }

    /// ATTACH_INT / DETACH_INT: point the device's interrupt thread at the
    /// caller (or away from it). Errors go back negated; success is the
    /// plain IRQ number.
    fn attach_detach_int(&mut self, from: ThreadId, msg: &Msg, attach: bool) -> Msg {
        let label = if attach {
            proto::ATTACH_INT
        } else {
            proto::DETACH_INT
        };
        let fail = |code: Word| proto::error_reply(label, code.wrapping_neg());

        let Some(app) = self.apps.by_caller(from) else {
            log::error!("attach/detach: no app for {from:?}");
            return fail(err::irq::NO_APP);
        };
        let Some(name) = proto::unpack_name(msg.untyped_words()) else {
            return fail(err::irq::NO_DEVICE);
        };
        let Some(dev) = self.devices.find(&name) else {
            log::error!("attach/detach: no such device '{name}'");
            return fail(err::irq::NO_DEVICE);
        };
        if !app.permits_device(&name) {
            log::error!(
                "attach/detach: app '{}' has no permission for '{name}'",
                app.params.name
            );
            return fail(err::irq::NO_PERMISSION);
        }

        let pager = if attach { from } else { ThreadId::nil() };
        if let Err(e) = syscall::thread_control(
            ThreadId::interrupt(dev.irq),
            ThreadId::nil(),
            ThreadId::nil(),
            pager,
            0,
        ) {
            log::error!("attach/detach: thread_control on irq {} failed: {e}", dev.irq);
            return fail(err::irq::INTERNAL);
        }

        let mut reply = Msg::new(MsgTag::new(label, 1, 0));
        reply.set_mr(1, dev.irq);
        reply
    }

    /// GET_USUAL_MEM is reserved in the protocol but not offered; decline
    /// instead of dying.
    fn get_usual_mem(&mut self, from: ThreadId, _msg: &Msg) -> Msg {
        let label = proto::GET_USUAL_MEM;
        if self.apps.by_caller(from).is_none() {
            log::error!("usual_mem: no app for {from:?}");
            return proto::error_reply(label, err::usual_mem::NO_APP);
        }
        log::warn!("usual_mem: declined (not offered) for {from:?}");
        proto::error_reply(label, err::usual_mem::UNSUPPORTED)
    }

    /// GET_NAMED_MEM: name in; physical base, attributes and a map item
    /// with exactly the declared access out.
    fn get_named_mem(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::GET_NAMED_MEM;
        let Some(app) = self.apps.by_caller(from) else {
            log::error!("named_mem: no app for {from:?}");
            return proto::error_reply(label, err::named_mem::NO_APP);
        };
        let Some(name) = proto::unpack_name(msg.untyped_words()) else {
            return proto::error_reply(label, err::named_mem::NO_REGION);
        };
        if !app.permits_memory(&name) {
            log::error!(
                "named_mem: app '{}' has no permission for '{name}'",
                app.params.name
            );
            return proto::error_reply(label, err::named_mem::NO_PERMISSION);
        }
        let Some(region) = self.named_mem.lookup(&name) else {
            log::error!("named_mem: no such region '{name}'");
            return proto::error_reply(label, err::named_mem::NO_REGION);
        };

        let base = region.location.base() as u64;
        let mut reply = Msg::new(MsgTag::new(label, 4, 2));
        reply.set_mr(1, (base >> 32) as Word);
        reply.set_mr(2, (base & 0xffff_ffff) as Word);
        reply.set_mr(3, region.spec.cached as Word);
        reply.set_mr(4, region.spec.contig as Word);
        reply.set_map_item(5, l4_api::MapItem::new(region.location));
        reply
    }

    /// CREATE_THREAD: allocate a thread number, clamp the priority to the
    /// application ceiling, resolve the UTCB, hand off to the launcher.
    fn create_thread(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::CREATE_THREAD;
        let Some(app) = self.apps.by_caller_mut(from) else {
            log::error!("create_thread: no app for {from:?}");
            return proto::error_reply(label, err::create_thread::NO_APP);
        };

        let rem_utcb = msg.mr(1);
        let entry = msg.mr(2);
        let stack = msg.mr(3);
        let stack_size = msg.mr(4);
        let mut prio = msg.mr(5);
        let short_name = msg.mr(6);

        let max_prio = app.max_prio();
        if prio > max_prio {
            log::warn!("create_thread: prio {prio} above ceiling, clamping to {max_prio}");
            prio = max_prio;
        }

        let Some(newno) = app.alloc_thrno() else {
            log::error!("create_thread: app '{}' has no free thread numbers", app.params.name);
            return proto::error_reply(label, err::create_thread::NO_FREE_THREAD);
        };

        // The remote UTCB address must be backed read-write in the app's
        // space; the launcher needs our local view of it.
        let Some(utcb_frame) = app.resolve(rem_utcb, PAGE_SIZE, Access::RW) else {
            log::error!("create_thread: utcb {rem_utcb:#x} not backed rw");
            return proto::error_reply(label, err::create_thread::BAD_UTCB);
        };

        let spawn = ThreadSpawn {
            id: ThreadId::global(newno, APP_THREAD_VERSION),
            space: app.space_id(),
            owner: from,
            utcb_location: utcb_frame.base(),
            entry,
            stack,
            stack_size,
            prio,
            short_name,
        };
        if let Err(e) = self.launcher.create_thread(&spawn) {
            log::error!("create_thread: {e}");
            return proto::error_reply(label, err::create_thread::CREATE_FAILED);
        }

        let mut reply = Msg::new(MsgTag::new(label, 2, 0));
        reply.set_mr(1, 0);
        reply.set_mr(2, spawn.id.raw());
        reply
    }

    /// REGISTER_THREAD: record name -> caller, mint the key pair.
    fn register_thread(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::REGISTER_THREAD;
        if self.apps.by_caller(from).is_none() {
            log::error!("register_thread: no app for {from:?}");
            return proto::error_reply(label, err::register_thread::NO_APP);
        }
        // An unterminated window means the name overflows it.
        let Some(name) = proto::unpack_name(msg.untyped_words()) else {
            return proto::error_reply(label, err::register_thread::NAME_TOO_LONG);
        };

        let minted = self
            .named_threads
            .register(&name, from, &mut || time::system_clock() as Word);
        match minted {
            Ok((key0, key1)) => {
                log::info!("register_thread: '{name}' -> {from:?}");
                let mut reply = Msg::new(MsgTag::new(label, 3, 0));
                reply.set_mr(1, 0);
                reply.set_mr(2, key0);
                reply.set_mr(3, key1);
                reply
            }
            Err(RegistryError::NameTooLong) => {
                proto::error_reply(label, err::register_thread::NAME_TOO_LONG)
            }
            Err(_) => {
                log::error!("register_thread: '{name}' already registered");
                proto::error_reply(label, err::register_thread::ALREADY_EXISTS)
            }
        }
    }

    /// GET_THREAD_ID: directory lookup; returns the id and the same keys
    /// registration produced.
    fn get_thread_id(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::GET_THREAD_ID;
        if self.apps.by_caller(from).is_none() {
            log::error!("get_thread_id: no app for {from:?}");
            return proto::error_reply(label, err::get_thread_id::NO_APP);
        }
        let Some(name) = proto::unpack_name(msg.untyped_words()) else {
            return proto::error_reply(label, err::get_thread_id::NOT_FOUND);
        };
        let Some(rec) = self.named_threads.lookup(&name) else {
            log::error!("get_thread_id: '{name}' not registered");
            return proto::error_reply(label, err::get_thread_id::NOT_FOUND);
        };

        let mut reply = Msg::new(MsgTag::new(label, 4, 0));
        reply.set_mr(1, 0);
        reply.set_mr(2, rec.id.raw());
        reply.set_mr(3, rec.key0);
        reply.set_mr(4, rec.key1);
        reply
    }

    /// APP_THREADS: thread-number interval of the application owning the
    /// argument thread id.
    fn app_threads(&mut self, from: ThreadId, msg: &Msg) -> Msg {
        let label = proto::APP_THREADS;
        if self.apps.by_caller(from).is_none() {
            log::error!("app_threads: no app for {from:?}");
            return proto::error_reply(label, err::app_threads::NO_APP);
        }
        let target = ThreadId::from_raw(msg.mr(1));
        let Some(app) = self.apps.by_caller(target) else {
            log::error!("app_threads: {target:?} belongs to no app");
            return proto::error_reply(label, err::app_threads::NO_SUCH_APP);
        };

        let mut reply = Msg::new(MsgTag::new(label, 3, 0));
        reply.set_mr(1, 0);
        reply.set_mr(2, app.thrno_begin());
        reply.set_mr(3, app.thrno_end());
        reply
    }
}
