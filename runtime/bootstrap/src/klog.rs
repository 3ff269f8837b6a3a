//! `log` facade over the kernel debug console.
//!
//! Records are formatted into a fixed stack buffer (long lines are
//! truncated) and written out in one console call, so interleaving with
//! kernel output stays readable.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};

use l4_api::debug;

const LINE_MAX: usize = 256;

struct LineBuf {
    buf: [u8; LINE_MAX],
    len: usize,
}

impl LineBuf {
    fn new() -> LineBuf {
        LineBuf {
            buf: [0; LINE_MAX],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<bad utf8>")
    }
}

impl Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if self.len == LINE_MAX {
                break;
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

struct KernelLog;

static LOGGER: KernelLog = KernelLog;

impl Log for KernelLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut line = LineBuf::new();
        let _ = writeln!(
            line,
            "[{}] {}: {}",
            record.level().as_str().to_ascii_lowercase(),
            record.target(),
            record.args()
        );
        debug::put_str(line.as_str());
    }

    fn flush(&self) {}
}

/// Install the console logger. Safe to call more than once; later calls
/// only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use l4_api::mock;

    #[test]
    fn records_reach_the_console() {
        mock::reset();
        init(LevelFilter::Info);
        log::info!(target: "boot", "hello {}", 42);
        let console = mock::with(|k| k.console.clone());
        assert!(console.contains("[info] boot: hello 42"), "{console:?}");
    }

    #[test]
    fn long_lines_are_truncated_not_lost() {
        mock::reset();
        init(LevelFilter::Info);
        let long = "y".repeat(LINE_MAX * 2);
        log::info!(target: "boot", "{long}");
        let console = mock::with(|k| k.console.clone());
        assert!(!console.is_empty());
        assert!(console.len() <= LINE_MAX + 1);
    }
}
