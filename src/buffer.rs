use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use parking_lot::Mutex;

use crate::error::{HeapError, Result};
use crate::format::IdSize;

/// Read-only view over the raw dump file, addressable at arbitrary byte
/// offsets. Callers never learn whether the file is memory-mapped or read
/// through a paged fallback; both backings are safe for concurrent readers.
pub struct DumpBuffer {
    len: u64,
    backing: Backing,
}

enum Backing {
    Mapped(memmap2::Mmap),
    // seek+read on a shared handle, serialized on a lock
    Paged(Mutex<File>),
}

impl DumpBuffer {
    pub fn open(path: impl AsRef<Path>) -> Result<DumpBuffer> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let backing = match unsafe { memmap2::MmapOptions::new().map(&file) } {
            Ok(map) => Backing::Mapped(map),
            Err(e) => {
                info!(
                    "cannot map {}: {}, falling back to paged reads",
                    path.display(),
                    e
                );
                Backing::Paged(Mutex::new(file))
            }
        };
        Ok(DumpBuffer { len, backing })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: u64, wanted: usize) -> Result<()> {
        if offset.checked_add(wanted as u64).map_or(true, |e| e > self.len) {
            return Err(HeapError::Truncated { offset, wanted });
        }
        Ok(())
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        self.check(offset, 1)?;
        match &self.backing {
            Backing::Mapped(map) => Ok(map[offset as usize]),
            Backing::Paged(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                Ok(f.read_u8()?)
            }
        }
    }

    pub fn read_u16(&self, offset: u64) -> Result<u16> {
        self.check(offset, 2)?;
        match &self.backing {
            Backing::Mapped(map) => {
                let s = &map[offset as usize..offset as usize + 2];
                Ok(u16::from_be_bytes(s.try_into().unwrap()))
            }
            Backing::Paged(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                Ok(f.read_u16::<BigEndian>()?)
            }
        }
    }

    pub fn read_u32(&self, offset: u64) -> Result<u32> {
        self.check(offset, 4)?;
        match &self.backing {
            Backing::Mapped(map) => {
                let s = &map[offset as usize..offset as usize + 4];
                Ok(u32::from_be_bytes(s.try_into().unwrap()))
            }
            Backing::Paged(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                Ok(f.read_u32::<BigEndian>()?)
            }
        }
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        self.check(offset, 8)?;
        match &self.backing {
            Backing::Mapped(map) => {
                let s = &map[offset as usize..offset as usize + 8];
                Ok(u64::from_be_bytes(s.try_into().unwrap()))
            }
            Backing::Paged(file) => {
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                Ok(f.read_u64::<BigEndian>()?)
            }
        }
    }

    /// Reads one identifier at the dump's fixed width, widened to u64.
    pub fn read_id(&self, offset: u64, id_size: IdSize) -> Result<u64> {
        match id_size {
            IdSize::U4 => Ok(u64::from(self.read_u32(offset)?)),
            IdSize::U8 => self.read_u64(offset),
        }
    }

    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.check(offset, len)?;
        match &self.backing {
            Backing::Mapped(map) => Ok(map[offset as usize..offset as usize + len].to_vec()),
            Backing::Paged(file) => {
                let mut buf = vec![0u8; len];
                let mut f = file.lock();
                f.seek(SeekFrom::Start(offset))?;
                f.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn buffer_with(bytes: &[u8]) -> (tempfile::NamedTempFile, DumpBuffer) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        let buf = DumpBuffer::open(f.path()).unwrap();
        (f, buf)
    }

    #[test]
    fn primitive_reads_are_big_endian() {
        let (_f, buf) = buffer_with(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(buf.read_u8(0).unwrap(), 0x01);
        assert_eq!(buf.read_u16(0).unwrap(), 0x0102);
        assert_eq!(buf.read_u32(2).unwrap(), 0x0304_0506);
        assert_eq!(buf.read_u64(0).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn id_width_follows_the_dump() {
        let (_f, buf) = buffer_with(&[0, 0, 0, 0, 0, 0, 0, 0x2a]);
        assert_eq!(buf.read_id(4, IdSize::U4).unwrap(), 0x2a);
        assert_eq!(buf.read_id(0, IdSize::U8).unwrap(), 0x2a);
    }

    #[test]
    fn reads_past_end_are_truncation_errors() {
        let (_f, buf) = buffer_with(&[1, 2, 3]);
        assert!(matches!(
            buf.read_u32(1),
            Err(HeapError::Truncated { offset: 1, wanted: 4 })
        ));
        assert!(buf.read_u8(2).is_ok());
        assert!(buf.read_u8(3).is_err());
    }

    #[test]
    fn missing_file_propagates_io_error() {
        let r = DumpBuffer::open("/nonexistent/dump.hprof");
        assert!(matches!(r, Err(HeapError::Io(_))));
    }
}
