//! System configuration parser.
//!
//! Plain text, three sections. A section begins with its bare name at
//! column zero; every row inside it starts with a tab, and the first
//! non-tab line ends it. `#` at the start of a line (or after the leading
//! tab) marks a comment.
//!
//! ```text
//! DEVICES
//! 	greth  0x80000100 0x100 6
//!
//! MEMORY
//! 	dma    0x2000 rw 0 1
//!
//! APPLICATIONS
//! 	{
//! 		name:         greth
//! 		short_name:   eth
//! 		file_path:    ramfs:/greth
//! 		stack_size:   0x1000
//! 		threads_max:  3
//! 		prio_max:     150
//! 		fpu:          on
//! 		devices:      greth
//! 		memory:       dma
//! 		args:
//! 	}
//! ```
//!
//! Addresses and sizes are hex (`0x` optional), IRQs, thread counts and
//! priorities decimal. Names are bounded by the wire limit so everything
//! parsed here can later travel in a request.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use thiserror::Error;

use broker::proto::NAME_LEN_MAX;
use broker::{AppParams, MmioDevice, RegionSpec};
use l4_api::{Access, Word};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {0}: expected {1} fields")]
    FieldCount(usize, usize),
    #[error("line {0}: bad number '{1}'")]
    BadNumber(usize, String),
    #[error("line {0}: name too long (limit {1})")]
    NameTooLong(usize, usize),
    #[error("line {0}: access must be r, w or rw")]
    BadAccess(usize),
    #[error("line {0}: device size must not be zero")]
    ZeroSize(usize),
    #[error("line {0}: unknown application key '{1}'")]
    UnknownKey(usize, String),
    #[error("line {0}: missing value for '{1}'")]
    MissingValue(usize, &'static str),
    #[error("line {0}: threads_max must be 1..=64")]
    BadThreadsMax(usize),
    #[error("line {0}: prio_max must be 1..=255")]
    BadPrioMax(usize),
    #[error("line {0}: fpu must be 'on' or 'off'")]
    BadFpu(usize),
    #[error("line {0}: application block incomplete (missing '{1}')")]
    IncompleteApp(usize, &'static str),
    #[error("application block opened at line {0} never closed")]
    UnclosedApp(usize),
}

#[derive(Debug)]
pub struct SystemConfig {
    pub devices: Vec<MmioDevice>,
    pub memories: Vec<RegionSpec>,
    pub apps: Vec<AppParams>,
}

#[derive(PartialEq)]
enum Section {
    None,
    Devices,
    Memory,
    Applications,
}

/// Application block under construction.
struct AppDraft {
    start_line: usize,
    name: String,
    short_name: String,
    image_path: String,
    stack_size: usize,
    max_threads: u32,
    max_prio: Word,
    fpu: bool,
    devices: Vec<String>,
    memories: Vec<String>,
    args: Vec<String>,
}

impl SystemConfig {
    pub fn parse(text: &str) -> Result<SystemConfig, ConfigError> {
        let mut cfg = SystemConfig {
            devices: Vec::new(),
            memories: Vec::new(),
            apps: Vec::new(),
        };
        let mut section = Section::None;
        let mut draft: Option<AppDraft> = None;

        for (index, line) in text.lines().enumerate() {
            let lineno = index + 1;
            if line.starts_with('#') || line.starts_with("\t#") {
                continue;
            }

            if !line.starts_with('\t') {
                // a non-tab line terminates the running section
                if let Some(open) = &draft {
                    return Err(ConfigError::UnclosedApp(open.start_line));
                }
                section = match line.trim_end() {
                    "DEVICES" => Section::Devices,
                    "MEMORY" => Section::Memory,
                    "APPLICATIONS" => Section::Applications,
                    _ => Section::None,
                };
                continue;
            }

            match section {
                Section::None => {}
                Section::Devices => cfg.devices.push(parse_device_row(lineno, line)?),
                Section::Memory => cfg.memories.push(parse_memory_row(lineno, line)?),
                Section::Applications => {
                    parse_app_line(lineno, line, &mut draft, &mut cfg.apps)?
                }
            }
        }

        if let Some(open) = &draft {
            return Err(ConfigError::UnclosedApp(open.start_line));
        }
        Ok(cfg)
    }
}

fn checked_name(lineno: usize, word: &str) -> Result<String, ConfigError> {
    if word.len() + 1 > NAME_LEN_MAX {
        return Err(ConfigError::NameTooLong(lineno, NAME_LEN_MAX - 1));
    }
    Ok(word.to_string())
}

fn parse_hex(lineno: usize, word: &str) -> Result<u64, ConfigError> {
    let digits = word
        .strip_prefix("0x")
        .or_else(|| word.strip_prefix("0X"))
        .unwrap_or(word);
    u64::from_str_radix(digits, 16).map_err(|_| ConfigError::BadNumber(lineno, word.to_string()))
}

fn parse_dec(lineno: usize, word: &str) -> Result<u64, ConfigError> {
    word.parse()
        .map_err(|_| ConfigError::BadNumber(lineno, word.to_string()))
}

fn parse_device_row(lineno: usize, line: &str) -> Result<MmioDevice, ConfigError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(ConfigError::FieldCount(lineno, 4));
    }
    let device = MmioDevice {
        name: checked_name(lineno, fields[0])?,
        paddr: parse_hex(lineno, fields[1])?,
        size: parse_hex(lineno, fields[2])?,
        irq: parse_dec(lineno, fields[3])? as Word,
    };
    if device.size == 0 {
        return Err(ConfigError::ZeroSize(lineno));
    }
    Ok(device)
}

fn parse_memory_row(lineno: usize, line: &str) -> Result<RegionSpec, ConfigError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ConfigError::FieldCount(lineno, 5));
    }
    let access = match fields[2] {
        "r" => Access::R,
        "w" => Access::W,
        "rw" => Access::RW,
        _ => return Err(ConfigError::BadAccess(lineno)),
    };
    Ok(RegionSpec {
        name: checked_name(lineno, fields[0])?,
        size: parse_hex(lineno, fields[1])? as usize,
        access,
        cached: parse_dec(lineno, fields[3])? != 0,
        contig: parse_dec(lineno, fields[4])? != 0,
    })
}

fn parse_name_list(lineno: usize, value: &str) -> Result<Vec<String>, ConfigError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| checked_name(lineno, w))
        .collect()
}

fn parse_app_line(
    lineno: usize,
    line: &str,
    draft: &mut Option<AppDraft>,
    apps: &mut Vec<AppParams>,
) -> Result<(), ConfigError> {
    let body = line.trim();

    let app = match draft {
        None => {
            if body == "{" {
                *draft = Some(AppDraft {
                    start_line: lineno,
                    name: String::new(),
                    short_name: String::new(),
                    image_path: String::new(),
                    stack_size: 0,
                    max_threads: 0,
                    max_prio: 0,
                    fpu: false,
                    devices: Vec::new(),
                    memories: Vec::new(),
                    args: Vec::new(),
                });
            }
            return Ok(());
        }
        Some(_) if body == "}" => {
            if let Some(app) = draft.take() {
                apps.push(app.finish(lineno)?);
            }
            return Ok(());
        }
        Some(app) => app,
    };

    let Some((key, value)) = body.split_once(':') else {
        return Err(ConfigError::UnknownKey(lineno, body.to_string()));
    };
    let key = key.trim();
    let value = value.trim();
    let require = |name: &'static str| -> Result<&str, ConfigError> {
        if value.is_empty() {
            Err(ConfigError::MissingValue(lineno, name))
        } else {
            Ok(value)
        }
    };

    match key {
        "name" => app.name = checked_name(lineno, require("name")?)?,
        "short_name" => app.short_name = checked_name(lineno, require("short_name")?)?,
        "file_path" => app.image_path = require("file_path")?.to_string(),
        "stack_size" => app.stack_size = parse_hex(lineno, require("stack_size")?)? as usize,
        "threads_max" => {
            let n = parse_dec(lineno, require("threads_max")?)?;
            if n == 0 || n > 64 {
                return Err(ConfigError::BadThreadsMax(lineno));
            }
            app.max_threads = n as u32;
        }
        "prio_max" => {
            let p = parse_dec(lineno, require("prio_max")?)?;
            if p == 0 || p > 0xff {
                return Err(ConfigError::BadPrioMax(lineno));
            }
            app.max_prio = p as Word;
        }
        "fpu" => {
            app.fpu = match require("fpu")? {
                "on" => true,
                "off" => false,
                _ => return Err(ConfigError::BadFpu(lineno)),
            }
        }
        "devices" => app.devices = parse_name_list(lineno, value)?,
        "memory" => app.memories = parse_name_list(lineno, value)?,
        "args" => {
            app.args = value
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(String::from)
                .collect()
        }
        _ => return Err(ConfigError::UnknownKey(lineno, key.to_string())),
    }
    Ok(())
}

impl AppDraft {
    fn finish(self, close_line: usize) -> Result<AppParams, ConfigError> {
        let missing = if self.name.is_empty() {
            Some("name")
        } else if self.image_path.is_empty() {
            Some("file_path")
        } else if self.max_threads == 0 {
            Some("threads_max")
        } else if self.max_prio == 0 {
            Some("prio_max")
        } else if self.stack_size == 0 {
            Some("stack_size")
        } else {
            None
        };
        if let Some(key) = missing {
            return Err(ConfigError::IncompleteApp(close_line, key));
        }
        Ok(AppParams {
            name: self.name,
            short_name: self.short_name,
            image_path: self.image_path,
            stack_size: self.stack_size,
            max_threads: self.max_threads,
            max_prio: self.max_prio,
            fpu: self.fpu,
            permitted_devices: self.devices,
            permitted_memories: self.memories,
            args: self.args,
        })
    }
}

/// Log the parsed configuration as tables, the way the boot console shows
/// it.
pub fn log_config(cfg: &SystemConfig) {
    log::info!("config: {} devices", cfg.devices.len());
    for (i, d) in cfg.devices.iter().enumerate() {
        log::info!(
            "  {i:2}  {:<12} pa={:#010x} sz={:#08x} irq={}",
            d.name,
            d.paddr,
            d.size,
            d.irq
        );
    }
    log::info!("config: {} memory regions", cfg.memories.len());
    for (i, m) in cfg.memories.iter().enumerate() {
        log::info!(
            "  {i:2}  {:<12} sz={:#08x} acc={:?} cached={} contig={}",
            m.name,
            m.size,
            m.access,
            m.cached as u8,
            m.contig as u8
        );
    }
    log::info!("config: {} applications", cfg.apps.len());
    for (i, a) in cfg.apps.iter().enumerate() {
        log::info!(
            "  {i:2}  {:<12} {:<6} {:<16} thrs={} prio={} fpu={} devs={:?} mems={:?}",
            a.name,
            a.short_name,
            a.image_path,
            a.max_threads,
            a.max_prio,
            a.fpu as u8,
            a.permitted_devices,
            a.permitted_memories
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# board configuration\n\
DEVICES\n\
\tgreth   0x80000100 0x100 6\n\
\t# the console uart\n\
\tuart    0x80000200 0x20  3\n\
\n\
MEMORY\n\
\tdma     0x2000 rw 0 1\n\
\tshm     0x1000 r  1 0\n\
\n\
APPLICATIONS\n\
\t{\n\
\t\tname:         greth\n\
\t\tshort_name:   eth\n\
\t\tfile_path:    ramfs:/greth\n\
\t\tstack_size:   0x1000\n\
\t\tthreads_max:  4\n\
\t\tprio_max:     150\n\
\t\tfpu:          on\n\
\t\tdevices:      greth\n\
\t\tmemory:       dma, shm\n\
\t\targs:         -v, eth0\n\
\t}\n\
\t{\n\
\t\tname:         console\n\
\t\tshort_name:   con\n\
\t\tfile_path:    ramfs:/console\n\
\t\tstack_size:   0x2000\n\
\t\tthreads_max:  2\n\
\t\tprio_max:     100\n\
\t\tfpu:          off\n\
\t\tdevices:      uart\n\
\t\tmemory:\n\
\t\targs:\n\
\t}\n\
";

    #[test]
    fn parses_all_three_sections() {
        let cfg = SystemConfig::parse(SAMPLE).unwrap();

        assert_eq!(cfg.devices.len(), 2);
        assert_eq!(cfg.devices[0].name, "greth");
        assert_eq!(cfg.devices[0].paddr, 0x8000_0100);
        assert_eq!(cfg.devices[0].size, 0x100);
        assert_eq!(cfg.devices[0].irq, 6);

        assert_eq!(cfg.memories.len(), 2);
        assert_eq!(cfg.memories[0].access, Access::RW);
        assert!(!cfg.memories[0].cached);
        assert!(cfg.memories[0].contig);
        assert_eq!(cfg.memories[1].access, Access::R);

        assert_eq!(cfg.apps.len(), 2);
        let eth = &cfg.apps[0];
        assert_eq!(eth.name, "greth");
        assert_eq!(eth.short_name, "eth");
        assert_eq!(eth.stack_size, 0x1000);
        assert_eq!(eth.max_threads, 4);
        assert_eq!(eth.max_prio, 150);
        assert!(eth.fpu);
        assert_eq!(eth.permitted_devices, ["greth"]);
        assert_eq!(eth.permitted_memories, ["dma", "shm"]);
        assert_eq!(eth.args, ["-v", "eth0"]);

        assert!(!cfg.apps[1].fpu);
        assert!(cfg.apps[1].permitted_memories.is_empty());
        assert!(cfg.apps[1].args.is_empty());
    }

    #[test]
    fn non_tab_line_terminates_a_section() {
        let text = "DEVICES\n\tgreth 0x80000100 0x100 6\nstray\n\tuart 0x80000200 0x20 3\n";
        let cfg = SystemConfig::parse(text).unwrap();
        // the uart row follows the terminator and is outside any section
        assert_eq!(cfg.devices.len(), 1);
    }

    #[test]
    fn comments_are_skipped_everywhere() {
        let text = "# top\nDEVICES\n\t# inside\n\tgreth 0x80000100 0x100 6\n";
        let cfg = SystemConfig::parse(text).unwrap();
        assert_eq!(cfg.devices.len(), 1);
    }

    #[test]
    fn rejects_zero_and_oversized_threads_max() {
        for bad in ["0", "65", "1000"] {
            let text = format!(
                "APPLICATIONS\n\t{{\n\t\tname: a\n\t\tfile_path: ramfs:/a\n\
                 \t\tstack_size: 0x1000\n\t\tthreads_max: {bad}\n\t\tprio_max: 10\n\t}}\n"
            );
            let err = SystemConfig::parse(&text).unwrap_err();
            assert_eq!(err, ConfigError::BadThreadsMax(6), "threads_max={bad}");
        }
        // 64 is the inclusive maximum
        let text = "APPLICATIONS\n\t{\n\t\tname: a\n\t\tfile_path: ramfs:/a\n\
                    \t\tstack_size: 0x1000\n\t\tthreads_max: 64\n\t\tprio_max: 10\n\t}\n";
        assert_eq!(SystemConfig::parse(text).unwrap().apps[0].max_threads, 64);
    }

    #[test]
    fn rejects_out_of_range_prio() {
        let text = "APPLICATIONS\n\t{\n\t\tname: a\n\t\tfile_path: ramfs:/a\n\
                    \t\tstack_size: 0x1000\n\t\tthreads_max: 2\n\t\tprio_max: 256\n\t}\n";
        assert_eq!(
            SystemConfig::parse(text).unwrap_err(),
            ConfigError::BadPrioMax(7)
        );
    }

    #[test]
    fn rejects_bad_access_and_field_counts() {
        let err = SystemConfig::parse("MEMORY\n\tdma 0x2000 rx 0 1\n").unwrap_err();
        assert_eq!(err, ConfigError::BadAccess(2));

        let err = SystemConfig::parse("DEVICES\n\tgreth 0x80000100 0x100\n").unwrap_err();
        assert_eq!(err, ConfigError::FieldCount(2, 4));
    }

    #[test]
    fn rejects_zero_sized_devices() {
        let err = SystemConfig::parse("DEVICES\n\tnull 0x80000000 0x0 1\n").unwrap_err();
        assert_eq!(err, ConfigError::ZeroSize(2));
    }

    #[test]
    fn rejects_unknown_app_keys_and_unclosed_blocks() {
        let text = "APPLICATIONS\n\t{\n\t\tbogus: 1\n\t}\n";
        assert!(matches!(
            SystemConfig::parse(text).unwrap_err(),
            ConfigError::UnknownKey(3, _)
        ));

        let text = "APPLICATIONS\n\t{\n\t\tname: a\n";
        assert_eq!(
            SystemConfig::parse(text).unwrap_err(),
            ConfigError::UnclosedApp(2)
        );
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "x".repeat(NAME_LEN_MAX);
        let text = format!("DEVICES\n\t{long} 0x80000000 0x100 1\n");
        assert!(matches!(
            SystemConfig::parse(&text).unwrap_err(),
            ConfigError::NameTooLong(2, _)
        ));
    }

    #[test]
    fn incomplete_app_block_is_rejected() {
        let text = "APPLICATIONS\n\t{\n\t\tname: a\n\t}\n";
        assert!(matches!(
            SystemConfig::parse(text).unwrap_err(),
            ConfigError::IncompleteApp(4, "file_path")
        ));
    }

    #[test]
    fn fpu_must_be_on_or_off() {
        let text = "APPLICATIONS\n\t{\n\t\tfpu: maybe\n\t}\n";
        assert_eq!(SystemConfig::parse(text).unwrap_err(), ConfigError::BadFpu(3));
    }
}
