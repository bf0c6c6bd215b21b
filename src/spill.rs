use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tempfile::NamedTempFile;

use crate::error::Result;

const DEFAULT_CAPACITY: usize = 1 << 16;
const SPILL_PREFIX: &str = "hprof-heap-";
const SPILL_SUFFIX: &str = ".gc";
// longs per chunk when reversing a spilled buffer
const REVERT_CHUNK: usize = 4096;

/// Append-only sequence of 64-bit integers that lives in memory until the
/// capacity threshold is exceeded, then transparently spills to a temp
/// file. Writing and reading are distinct modes: `start_reading` closes
/// the writer and positions the single read cursor at the start.
///
/// One instance is strictly single-writer/single-reader; no internal
/// synchronization. The backing file is removed on drop (the temp-file
/// handle doubles as the delete-on-exit safety net) or by `reset`.
pub struct LongBuffer {
    memory: Vec<i64>,
    capacity: usize,
    count: usize,
    backing: Option<Spill>,
    read_pos: usize,
    reading: bool,
}

struct Spill {
    file: NamedTempFile,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
}

impl LongBuffer {
    pub fn new() -> LongBuffer {
        LongBuffer::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> LongBuffer {
        LongBuffer {
            memory: Vec::new(),
            capacity,
            count: 0,
            backing: None,
            read_pos: 0,
            reading: false,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }

    pub(crate) fn spilled(&self) -> bool {
        self.backing.is_some()
    }

    /// Appends one value. Until the threshold is reached values stay in
    /// the in-memory array; the first overflowing write creates the temp
    /// file, flushes the whole array to it, and all subsequent writes
    /// append to the growing file. I/O failures propagate.
    pub fn write_long(&mut self, value: i64) -> Result<()> {
        assert!(!self.reading, "write after start_reading");
        if self.backing.is_none() && self.memory.len() < self.capacity {
            self.memory.push(value);
        } else {
            let writer = self.spill_writer()?;
            writer.write_i64::<BigEndian>(value)?;
        }
        self.count += 1;
        Ok(())
    }

    fn spill_writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.backing.is_none() {
            let file = tempfile::Builder::new()
                .prefix(SPILL_PREFIX)
                .suffix(SPILL_SUFFIX)
                .tempfile()?;
            debug!("spilling {} longs to {}", self.memory.len(), file.path().display());
            let mut writer = BufWriter::new(file.reopen()?);
            for v in &self.memory {
                writer.write_i64::<BigEndian>(*v)?;
            }
            self.memory = Vec::new();
            self.backing = Some(Spill {
                file,
                writer: Some(writer),
                reader: None,
            });
        }
        let spill = self.backing.as_mut().expect("just created");
        if spill.writer.is_none() {
            // reopen in append mode after a revert closed the writer
            let mut file = spill.file.reopen()?;
            file.seek(SeekFrom::End(0))?;
            spill.writer = Some(BufWriter::new(file));
        }
        Ok(spill.writer.as_mut().expect("writer open"))
    }

    /// Switches to read mode: flushes and closes the writer, then rewinds.
    pub fn start_reading(&mut self) -> Result<()> {
        if let Some(spill) = &mut self.backing {
            if let Some(mut writer) = spill.writer.take() {
                writer.flush()?;
            }
        }
        self.reading = true;
        self.rewind()
    }

    /// Repositions the read cursor at the first value.
    pub fn rewind(&mut self) -> Result<()> {
        self.read_pos = 0;
        if let Some(spill) = &mut self.backing {
            spill.reader = Some(BufReader::new(spill.file.reopen()?));
        }
        Ok(())
    }

    /// Next value in insertion order, `None` once all `len()` values have
    /// been read.
    pub fn read_long(&mut self) -> Result<Option<i64>> {
        assert!(self.reading, "read before start_reading");
        if self.read_pos >= self.count {
            return Ok(None);
        }
        let value = match &mut self.backing {
            None => self.memory[self.read_pos],
            Some(spill) => spill
                .reader
                .as_mut()
                .expect("rewound before reading")
                .read_i64::<BigEndian>()?,
        };
        self.read_pos += 1;
        Ok(Some(value))
    }

    /// New buffer holding the same values in reverse insertion order.
    /// A spilled buffer is reversed by reading its file backwards in
    /// chunks, so the working set stays bounded.
    pub fn revert_buffer(&mut self) -> Result<LongBuffer> {
        let mut reversed = LongBuffer::with_capacity(self.capacity);
        match &mut self.backing {
            None => {
                for v in self.memory.iter().rev() {
                    reversed.write_long(*v)?;
                }
            }
            Some(spill) => {
                if let Some(mut writer) = spill.writer.take() {
                    writer.flush()?;
                }
                let mut file = spill.file.reopen()?;
                let mut remaining = self.count;
                while remaining > 0 {
                    let chunk = remaining.min(REVERT_CHUNK);
                    remaining -= chunk;
                    file.seek(SeekFrom::Start(remaining as u64 * 8))?;
                    let mut values = Vec::with_capacity(chunk);
                    for _ in 0..chunk {
                        values.push(file.read_i64::<BigEndian>()?);
                    }
                    for v in values.iter().rev() {
                        reversed.write_long(*v)?;
                    }
                }
            }
        }
        Ok(reversed)
    }

    /// Discards all contents and the backing file, returning to empty
    /// in-memory write mode.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.count = 0;
        self.read_pos = 0;
        self.reading = false;
        // dropping the NamedTempFile removes the file
        self.backing = None;
    }
}

impl Default for LongBuffer {
    fn default() -> Self {
        LongBuffer::new()
    }
}
