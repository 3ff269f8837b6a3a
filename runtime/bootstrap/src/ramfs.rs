//! Boot ramfs: a read-only archive linked into the boot image.
//!
//! Format, all integers little-endian, records 4-byte aligned:
//!
//! ```text
//! "RFS1"
//! repeat:
//!   name_len: u32      (0 terminates the archive)
//!   data_len: u32
//!   name      [name_len bytes, padded to 4]
//!   data      [data_len bytes, padded to 4]
//! ```
//!
//! The configuration file and every application image are read from here;
//! nothing is ever written.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamfsError {
    #[error("bad archive magic")]
    BadMagic,
    #[error("truncated archive")]
    Truncated,
}

const MAGIC: &[u8; 4] = b"RFS1";

#[derive(Debug)]
pub struct Ramfs<'a> {
    records: &'a [u8],
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

impl<'a> Ramfs<'a> {
    pub fn new(image: &'a [u8]) -> Result<Ramfs<'a>, RamfsError> {
        let Some((magic, records)) = image.split_at_checked(4) else {
            return Err(RamfsError::BadMagic);
        };
        if magic != MAGIC {
            return Err(RamfsError::BadMagic);
        }
        // Walk the records once so lookups can't run off a truncated image.
        let fs = Ramfs { records };
        let mut iter = fs.iter_raw();
        for entry in &mut iter {
            entry?;
        }
        Ok(fs)
    }

    /// Look a file up by exact path.
    pub fn find(&self, path: &str) -> Option<&'a [u8]> {
        self.iter()
            .find(|(name, _)| *name == path)
            .map(|(_, data)| data)
    }

    /// All files, in archive order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a [u8])> {
        self.iter_raw().filter_map(|entry| entry.ok())
    }

    fn iter_raw(&self) -> RawIter<'a> {
        RawIter {
            rest: self.records,
        }
    }
}

struct RawIter<'a> {
    rest: &'a [u8],
}

impl<'a> RawIter<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], RamfsError> {
        let (head, tail) = self
            .rest
            .split_at_checked(n)
            .ok_or(RamfsError::Truncated)?;
        self.rest = tail;
        Ok(head)
    }

    fn take_u32(&mut self) -> Result<u32, RamfsError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn next_entry(&mut self) -> Result<Option<(&'a str, &'a [u8])>, RamfsError> {
        if self.rest.len() < 4 {
            return Ok(None);
        }
        let name_len = self.take_u32()? as usize;
        if name_len == 0 {
            self.rest = &[];
            return Ok(None);
        }
        let data_len = self.take_u32()? as usize;
        let name = self.take(pad4(name_len))?;
        let data = self.take(pad4(data_len))?;
        let name = core::str::from_utf8(&name[..name_len]).map_err(|_| RamfsError::Truncated)?;
        Ok(Some((name, &data[..data_len])))
    }
}

impl<'a> Iterator for RawIter<'a> {
    type Item = Result<(&'a str, &'a [u8]), RamfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

/// Build an archive from `(path, contents)` pairs. Test and tooling aid;
/// the real archive is produced by the image build.
#[cfg(feature = "mock")]
pub fn build_archive(entries: &[(&str, &[u8])]) -> alloc::vec::Vec<u8> {
    let mut image = alloc::vec::Vec::new();
    image.extend_from_slice(MAGIC);
    for (name, data) in entries {
        image.extend_from_slice(&(name.len() as u32).to_le_bytes());
        image.extend_from_slice(&(data.len() as u32).to_le_bytes());
        image.extend_from_slice(name.as_bytes());
        image.resize(pad4(image.len()), 0);
        image.extend_from_slice(data);
        image.resize(pad4(image.len()), 0);
    }
    image.extend_from_slice(&0u32.to_le_bytes());
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_round_trip() {
        let image = build_archive(&[
            ("config.sys", b"DEVICES\n"),
            ("greth", &[0x7f, b'E', b'L', b'F', 9, 9, 9]),
        ]);
        let fs = Ramfs::new(&image).unwrap();

        assert_eq!(fs.find("config.sys").unwrap(), b"DEVICES\n");
        assert_eq!(fs.find("greth").unwrap().len(), 7);
        assert!(fs.find("missing").is_none());
        assert_eq!(fs.iter().count(), 2);
    }

    #[test]
    fn empty_archive_is_valid() {
        let image = build_archive(&[]);
        let fs = Ramfs::new(&image).unwrap();
        assert_eq!(fs.iter().count(), 0);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert_eq!(Ramfs::new(b"TAR0").unwrap_err(), RamfsError::BadMagic);
        assert_eq!(Ramfs::new(b"RF").unwrap_err(), RamfsError::BadMagic);
    }

    #[test]
    fn truncated_archive_is_rejected() {
        let mut image = build_archive(&[("config.sys", b"hello world")]);
        image.truncate(image.len() - 8);
        assert_eq!(Ramfs::new(&image).unwrap_err(), RamfsError::Truncated);
    }

    #[test]
    fn lookup_is_exact() {
        let image = build_archive(&[("greth", b"x")]);
        let fs = Ramfs::new(&image).unwrap();
        assert!(fs.find("gret").is_none());
        assert!(fs.find("greth2").is_none());
    }
}
