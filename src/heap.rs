use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::buffer::DumpBuffer;
use crate::error::{HeapError, Result};
use crate::format::{
    read_header, DumpHeader, FieldType, IdSize, INSTANCE_DUMP, OBJECT_ARRAY_DUMP,
    PRIMITIVE_ARRAY_DUMP, TAG_HEAP_SUMMARY,
};
use crate::index::ObjectIndex;
use crate::names::NameTables;
use crate::object::{ClassDump, HeapObject};
use crate::progress::{NoopProgress, ProgressSink};
use crate::reach::{self, ReachableSet};
use crate::roots::{GcRoot, GcRoots};
use crate::scanner::{scan_heap_dump, scan_top_level, walk_records, TagBounds};

/// Live-set statistics, either read from the dump's summary record or
/// computed from the index when the record is absent.
#[derive(Debug, Clone, Copy)]
pub struct HeapSummary {
    pub total_live_bytes: u64,
    pub total_live_instances: u64,
    pub total_allocated_bytes: Option<u64>,
    pub total_allocated_instances: Option<u64>,
}

/// Handle over one opened dump. The file is read-only for the life of
/// the handle; everything derived from it (tag bounds, offset index,
/// GC roots, name tables, reachability) is built lazily, exactly once,
/// and cached here. All views into the dump borrow this handle.
pub struct Heap {
    buf: DumpBuffer,
    header: DumpHeader,
    top_bounds: HashMap<u8, TagBounds>,
    sub_bounds: HashMap<u8, TagBounds>,
    dump_ranges: Vec<(u64, u64)>,
    segment: usize,
    total_dumps: usize,
    progress: Arc<dyn ProgressSink>,
    names: OnceCell<NameTables>,
    index: OnceCell<ObjectIndex>,
    roots: OnceCell<GcRoots>,
    reach: OnceCell<ReachableSet>,
    summary: OnceCell<HeapSummary>,
    thread_memo: Mutex<Option<(u32, GcRoot)>>,
}

impl Heap {
    /// Opens the first (usually only) dump in the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Heap> {
        Heap::open_with(path, 0, Arc::new(NoopProgress))
    }

    /// Opens the n-th dump of a multi-dump file (0-based).
    pub fn open_segment(path: impl AsRef<Path>, segment: usize) -> Result<Heap> {
        Heap::open_with(path, segment, Arc::new(NoopProgress))
    }

    /// Opens a dump with a host-supplied progress sink; all long scans
    /// of this handle publish through it.
    pub fn open_with(
        path: impl AsRef<Path>,
        segment: usize,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Heap> {
        let path = path.as_ref();
        let buf = DumpBuffer::open(path)?;
        let (header, first_record) = read_header(&buf)?;
        info!(
            "opening {} ({}, {}-byte ids)",
            path.display(),
            header.banner,
            header.id_size.bytes()
        );
        let top = scan_top_level(&buf, first_record, progress.as_ref())?;
        debug!(
            "scanned {} top-level records, {} dump(s)",
            top.records,
            top.dumps.len()
        );
        if top.dumps.is_empty() {
            return Err(HeapError::InvalidFormat(
                "file contains no heap dump records".to_string(),
            ));
        }
        if segment >= top.dumps.len() {
            return Err(HeapError::SegmentOutOfRange {
                requested: segment,
                available: top.dumps.len(),
            });
        }
        let dump_ranges = top.dumps[segment].clone();
        let sub = scan_heap_dump(&buf, header.id_size, &dump_ranges, progress.as_ref())?;
        debug!("scanned {} sub-records in segment {}", sub.records, segment);
        Ok(Heap {
            buf,
            header,
            top_bounds: top.bounds,
            sub_bounds: sub.bounds,
            dump_ranges,
            segment,
            total_dumps: top.dumps.len(),
            progress,
            names: OnceCell::new(),
            index: OnceCell::new(),
            roots: OnceCell::new(),
            reach: OnceCell::new(),
            summary: OnceCell::new(),
            thread_memo: Mutex::new(None),
        })
    }

    pub fn id_size(&self) -> IdSize {
        self.header.id_size
    }

    pub fn banner(&self) -> &str {
        &self.header.banner
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.header.timestamp_ms
    }

    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn dump_count(&self) -> usize {
        self.total_dumps
    }

    pub(crate) fn buffer(&self) -> &DumpBuffer {
        &self.buf
    }

    pub(crate) fn progress(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }

    pub(crate) fn top_bounds(&self, tag: u8) -> Option<TagBounds> {
        self.top_bounds.get(&tag).copied()
    }

    pub(crate) fn sub_bounds(&self, tag: u8) -> Option<TagBounds> {
        self.sub_bounds.get(&tag).copied()
    }

    pub(crate) fn dump_ranges(&self) -> &[(u64, u64)] {
        &self.dump_ranges
    }

    pub(crate) fn index(&self) -> Result<&ObjectIndex> {
        self.index.get_or_try_init(|| ObjectIndex::build(self))
    }

    fn names(&self) -> Result<&NameTables> {
        self.names.get_or_try_init(|| NameTables::build(self))
    }

    fn roots_data(&self) -> Result<&GcRoots> {
        self.roots.get_or_try_init(|| GcRoots::build(self))
    }

    pub(crate) fn string(&self, id: u64) -> Result<Option<String>> {
        self.names()?.string(self, id)
    }

    pub(crate) fn class_name(&self, class_id: u64) -> Result<Option<String>> {
        self.names()?.class_name(self, class_id)
    }

    /// All GC roots, sorted ascending by (kind, object id), one per
    /// distinct object id.
    pub fn gc_roots(&self) -> Result<&[GcRoot]> {
        Ok(self.roots_data()?.sorted())
    }

    /// Is the object with this id a GC root, and of what kind?
    pub fn gc_root(&self, object_id: u64) -> Result<Option<&GcRoot>> {
        Ok(self.roots_data()?.by_id(object_id))
    }

    /// The thread-object root for a thread serial number. A single-slot
    /// memo remembers the most recent hit; a miss scans the root list.
    pub fn thread_gc_root(&self, thread_serial: u32) -> Result<Option<GcRoot>> {
        if let Some((serial, root)) = *self.thread_memo.lock() {
            if serial == thread_serial {
                return Ok(Some(root));
            }
        }
        let found = self.roots_data()?.find_thread_root(thread_serial);
        if let Some(root) = found {
            *self.thread_memo.lock() = Some((thread_serial, root));
        }
        Ok(found)
    }

    /// The object (instance, object array, or primitive array) with the
    /// given id, if the dump contains one.
    pub fn instance_by_id(&self, id: u64) -> Result<Option<HeapObject<'_>>> {
        match self.index()?.offset_of_instance(id) {
            None => Ok(None),
            Some(offset) => HeapObject::at(self, offset).map(Some),
        }
    }

    pub fn class_by_id(&self, class_id: u64) -> Result<Option<ClassDump<'_>>> {
        Ok(self
            .index()?
            .offset_of_class(class_id)
            .map(|offset| ClassDump::new(self, offset)))
    }

    pub fn class_by_name(&self, name: &str) -> Result<Option<ClassDump<'_>>> {
        match self.names()?.class_id_by_name(name) {
            None => Ok(None),
            Some(class_id) => self.class_by_id(class_id),
        }
    }

    /// All classes of the dump, in record order.
    pub fn classes(&self) -> Result<Vec<ClassDump<'_>>> {
        Ok(self
            .index()?
            .class_offsets()
            .iter()
            .map(|&offset| ClassDump::new(self, offset))
            .collect())
    }

    pub fn instance_count(&self) -> Result<usize> {
        Ok(self.index()?.instance_count())
    }

    pub fn class_count(&self) -> Result<usize> {
        Ok(self.index()?.class_count())
    }

    /// The ids of `class_id` and, transitively, of every subclass.
    fn class_closure(&self, class_id: u64) -> Result<HashSet<u64>> {
        let index = self.index()?;
        let mut children: HashMap<u64, Vec<u64>> = HashMap::new();
        for &offset in index.class_offsets() {
            let class = ClassDump::new(self, offset);
            children
                .entry(class.super_class_id()?)
                .or_default()
                .push(class.id()?);
        }
        let mut closure = HashSet::new();
        let mut queue = VecDeque::from([class_id]);
        while let Some(id) = queue.pop_front() {
            if !closure.insert(id) {
                continue;
            }
            if let Some(subs) = children.get(&id) {
                queue.extend(subs.iter().copied());
            }
        }
        Ok(closure)
    }

    /// Instances and object arrays of one class, in record order,
    /// optionally including instances of subclasses. Primitive arrays
    /// have no class-dump record and are never returned here.
    pub fn instances_of(
        &self,
        class_id: u64,
        include_subclasses: bool,
    ) -> Result<Vec<HeapObject<'_>>> {
        let index = self.index()?;
        let wanted: HashSet<u64> = if include_subclasses {
            self.class_closure(class_id)?
        } else {
            HashSet::from([class_id])
        };
        let id = self.id_size().bytes() as u64;
        let mut offsets = Vec::new();
        for (_, entry) in index.instance_entries() {
            let tag = self.buf.read_u8(entry.offset)?;
            let object_class = match tag {
                INSTANCE_DUMP => self.buf.read_id(entry.offset + 1 + id + 4, self.id_size())?,
                OBJECT_ARRAY_DUMP => {
                    self.buf
                        .read_id(entry.offset + 1 + id + 4 + 4, self.id_size())?
                }
                _ => continue,
            };
            if wanted.contains(&object_class) {
                offsets.push(entry.offset);
            }
        }
        offsets.sort_unstable();
        offsets
            .into_iter()
            .map(|offset| HeapObject::at(self, offset))
            .collect()
    }

    /// Live-set statistics: read from the summary record when present,
    /// otherwise computed by summing indexed object sizes.
    pub fn summary(&self) -> Result<&HeapSummary> {
        self.summary.get_or_try_init(|| {
            if let Some(bounds) = self.top_bounds(TAG_HEAP_SUMMARY) {
                let mut found = None;
                walk_records(&self.buf, bounds, |tag, payload, _length| {
                    if tag == TAG_HEAP_SUMMARY && found.is_none() {
                        found = Some(HeapSummary {
                            total_live_bytes: u64::from(self.buf.read_u32(payload)?),
                            total_live_instances: u64::from(self.buf.read_u32(payload + 4)?),
                            total_allocated_bytes: Some(self.buf.read_u64(payload + 8)?),
                            total_allocated_instances: Some(self.buf.read_u64(payload + 16)?),
                        });
                    }
                    Ok(())
                })?;
                if let Some(summary) = found {
                    return Ok(summary);
                }
            }
            self.computed_summary()
        })
    }

    fn computed_summary(&self) -> Result<HeapSummary> {
        let index = self.index()?;
        let id = self.id_size().bytes() as u64;
        let mut bytes = 0u64;
        for (_, entry) in index.instance_entries() {
            let tag = self.buf.read_u8(entry.offset)?;
            bytes += match tag {
                INSTANCE_DUMP => u64::from(self.buf.read_u32(entry.offset + 1 + id + 4 + id)?),
                OBJECT_ARRAY_DUMP => {
                    u64::from(self.buf.read_u32(entry.offset + 1 + id + 4)?) * id
                }
                PRIMITIVE_ARRAY_DUMP => {
                    let count = u64::from(self.buf.read_u32(entry.offset + 1 + id + 4)?);
                    let ty = self.buf.read_u8(entry.offset + 1 + id + 4 + 4)?;
                    let element = FieldType::from_tag(ty).map_or(1, |t| t.size(self.id_size()));
                    count * element as u64
                }
                _ => 0,
            };
        }
        Ok(HeapSummary {
            total_live_bytes: bytes,
            total_live_instances: index.instance_count() as u64,
            total_allocated_bytes: None,
            total_allocated_instances: None,
        })
    }

    /// Transitive closure from the GC roots, computed once and cached.
    pub fn reachable(&self) -> Result<&ReachableSet> {
        self.reach.get_or_try_init(|| reach::compute(self))
    }

    /// Whether the object or class with this id is reachable from any
    /// GC root. Unindexed ids are unreachable by definition.
    pub fn is_reachable(&self, id: u64) -> Result<bool> {
        let set = self.reachable()?;
        if let Some(ordinal) = self.index()?.ordinal_of(id) {
            return Ok(set.is_marked(ordinal));
        }
        Ok(set.class_reached(id))
    }

    #[cfg(test)]
    pub(crate) fn thread_memo_state(&self) -> Option<(u32, GcRoot)> {
        *self.thread_memo.lock()
    }
}
