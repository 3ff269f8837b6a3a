//! Synchronous IPC.
//!
//! `receive_any` and `call` snapshot the message registers into an owned
//! [`Msg`] before returning; `send` serializes one back out. All broker
//! traffic uses never-timeouts, so a failure here means the kernel refused
//! the rendezvous, not that it timed out quietly.

use thiserror::Error;

use crate::msg::Msg;
use crate::thread::ThreadId;
use crate::{Timeout, Word};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    #[error("no partner ready")]
    NoPartner,
    #[error("ipc timed out")]
    Timeout,
    #[error("ipc canceled")]
    Canceled,
    #[error("kernel rejected ipc (code {0})")]
    Kernel(Word),
}

/// Block until any thread sends to us; returns the sender and a snapshot of
/// its message.
pub fn receive_any(timeout: Timeout) -> Result<(ThreadId, Msg), IpcError> {
    #[cfg(feature = "mock")]
    {
        let _ = timeout;
        crate::mock::with(|k| k.incoming.pop_front()).ok_or(IpcError::NoPartner)
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::ipc_receive(ThreadId::any(), timeout)
    }
}

/// Send `msg` to `to`.
pub fn send(to: ThreadId, msg: &Msg, timeout: Timeout) -> Result<(), IpcError> {
    #[cfg(feature = "mock")]
    {
        let _ = timeout;
        crate::mock::with(|k| {
            if let Some(code) = k.fail_send.take() {
                return Err(IpcError::Kernel(code));
            }
            k.sent.push((to, msg.clone()));
            Ok(())
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::ipc_send(to, msg, timeout)
    }
}

/// Send `msg` to `to` and wait for its reply, accepting mapped items.
pub fn call(to: ThreadId, msg: &Msg, timeout: Timeout) -> Result<Msg, IpcError> {
    #[cfg(feature = "mock")]
    {
        let _ = timeout;
        crate::mock::run_call_handler(to, msg).ok_or(IpcError::NoPartner)
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::ipc_call(to, msg, timeout)
    }
}
