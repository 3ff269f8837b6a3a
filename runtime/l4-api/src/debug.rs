//! Kernel debug console and debugger entry.

/// Write raw text to the kernel debug console.
pub fn put_str(s: &str) {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| k.console.push_str(s));
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::put_str(s);
    }
}

/// Drop into the kernel debugger. The broker calls this when its own view
/// of the system no longer matches the kernel's; there is nothing useful to
/// return to.
pub fn kdb(msg: &str) -> ! {
    #[cfg(feature = "mock")]
    {
        panic!("kernel debugger: {msg}");
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::kdb(msg)
    }
}
