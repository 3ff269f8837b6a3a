//! Page-fault resolution.
//!
//! The kernel converts a fault into an IPC to the faulting thread's pager:
//! protocol label page-fault with the access bits, MR1 the faulting
//! address, MR2 the faulting instruction. The reply is a bare map item
//! under label zero.
//!
//! A fault the configured address space cannot satisfy is not a client
//! error: the application has no way to proceed without the mapping, and a
//! pager refusing its own configuration means the databases are wrong. We
//! report and stop in the kernel debugger instead of replying.

use l4_api::{debug, MapItem, Msg, MsgTag, ThreadId, WORD_BYTES};

use crate::apps::AppRegistry;

/// Build the map reply for a page-fault message, or divert to the kernel
/// debugger when the fault cannot be resolved.
pub fn handle_pagefault(apps: &AppRegistry, from: ThreadId, msg: &Msg) -> Msg {
    let access = msg.tag().pfault_access();
    let addr = msg.mr(1);
    let inst = msg.mr(2);

    let Some(app) = apps.by_caller(from) else {
        log::error!("pfault from unknown thread {from:?}: addr={addr:#x} inst={inst:#x}");
        debug::kdb("pager: fault from unknown thread");
    };

    // Cover one word at the faulting address with at least the faulting
    // access.
    let Some(frame) = app.resolve(addr, WORD_BYTES, access) else {
        log::error!(
            "pfault unresolved: app={} thr={} addr={addr:#x} acc={access:?} inst={inst:#x}",
            app.params.name,
            from.number(),
        );
        debug::kdb("pager: could not resolve fault");
    };

    let mut reply = Msg::new(MsgTag::new(0, 0, 2));
    reply.set_map_item(1, MapItem::new(frame));
    reply
}
