//! Kernel clock.

/// Current system clock in ticks. Strictly monotonic on the mock backend so
/// consecutive reads never collide.
pub fn system_clock() -> u64 {
    #[cfg(feature = "mock")]
    {
        crate::mock::with(|k| {
            k.clock += 1;
            k.clock
        })
    }
    #[cfg(feature = "runtime")]
    {
        crate::sys::system_clock()
    }
}
