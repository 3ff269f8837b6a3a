//! In-process kernel for host tests.
//!
//! One kernel instance per test thread: incoming IPC is scripted by pushing
//! onto [`MockKernel::incoming`], everything the code under test emits
//! (replies, privileged calls, console output) is recorded for assertions.
//! The clock ticks once per read so clock-derived values are distinct and
//! reproducible.

use std::boxed::Box;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use crate::fpage::Fpage;
use crate::msg::Msg;
use crate::thread::ThreadId;
use crate::Word;

#[derive(Debug, Clone, Copy)]
pub struct ThreadControlCall {
    pub dest: ThreadId,
    pub space: ThreadId,
    pub scheduler: ThreadId,
    pub pager: ThreadId,
    pub utcb_location: Word,
}

#[derive(Debug, Clone, Copy)]
pub struct SpaceControlCall {
    pub space: ThreadId,
    pub kip_area: Fpage,
    pub utcb_area: Fpage,
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeRegistersCall {
    pub dest: ThreadId,
    pub ip: Word,
    pub sp: Word,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleCall {
    pub dest: ThreadId,
    pub prio: Word,
}

#[derive(Debug, Clone)]
pub struct MemoryControlCall {
    pub fpages: Vec<Fpage>,
    pub attr0: Word,
}

/// Responder invoked for `ipc::call` (the sigma0 side of a test).
pub type CallHandler = Box<dyn FnMut(ThreadId, &Msg) -> Msg>;

pub struct MockKernel {
    /// KIP thread-number base; sigma0 = base, root task = base + 1.
    pub user_base: Word,
    pub clock: u64,
    /// Messages `ipc::receive_any` will deliver, in order.
    pub incoming: VecDeque<(ThreadId, Msg)>,
    /// Messages sent with `ipc::send`.
    pub sent: Vec<(ThreadId, Msg)>,
    /// Requests issued with `ipc::call` (the reply comes from `call_handler`).
    pub calls: Vec<(ThreadId, Msg)>,
    pub call_handler: Option<CallHandler>,
    pub thread_controls: Vec<ThreadControlCall>,
    pub space_controls: Vec<SpaceControlCall>,
    pub exchanges: Vec<ExchangeRegistersCall>,
    pub schedules: Vec<ScheduleCall>,
    pub memory_controls: Vec<MemoryControlCall>,
    /// Make the next `thread_control` fail with the given code.
    pub fail_thread_control: Option<Word>,
    /// Make the next `ipc::send` fail with the given code.
    pub fail_send: Option<Word>,
    pub console: String,
}

impl MockKernel {
    fn new() -> MockKernel {
        MockKernel {
            user_base: 256,
            clock: 0,
            incoming: VecDeque::new(),
            sent: Vec::new(),
            calls: Vec::new(),
            call_handler: None,
            thread_controls: Vec::new(),
            space_controls: Vec::new(),
            exchanges: Vec::new(),
            schedules: Vec::new(),
            memory_controls: Vec::new(),
            fail_thread_control: None,
            fail_send: None,
            console: String::new(),
        }
    }
}

std::thread_local! {
    static KERNEL: RefCell<MockKernel> = RefCell::new(MockKernel::new());
}

/// Run `f` against this thread's kernel instance.
pub fn with<R>(f: impl FnOnce(&mut MockKernel) -> R) -> R {
    KERNEL.with(|k| f(&mut k.borrow_mut()))
}

/// Fresh kernel state; call at the top of every test.
pub fn reset() {
    KERNEL.with(|k| *k.borrow_mut() = MockKernel::new());
}

/// Run the registered call handler outside the state borrow, so the handler
/// itself may inspect or mutate the kernel.
pub(crate) fn run_call_handler(to: ThreadId, msg: &Msg) -> Option<Msg> {
    let mut handler = with(|k| k.call_handler.take())?;
    let reply = handler(to, msg);
    with(|k| {
        k.calls.push((to, msg.clone()));
        k.call_handler = Some(handler);
    });
    Some(reply)
}
