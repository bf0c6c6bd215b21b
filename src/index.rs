use std::collections::HashMap;

use crate::error::Result;
use crate::format::{CLASS_DUMP, INSTANCE_DUMP, OBJECT_ARRAY_DUMP, PRIMITIVE_ARRAY_DUMP};
use crate::heap::Heap;
use crate::progress::ProgressTicker;
use crate::scanner::walk_sub_records;

/// Random-access index over the selected dump: object and class
/// identifiers mapped to the byte offset of their record. Built lazily,
/// exactly once per `Heap`, by a single pass over the dump ranges;
/// afterwards every lookup is a hash probe.
///
/// Instances additionally get a dense ordinal in file order, which the
/// reachability pass uses to key its mark bitset.
pub(crate) struct ObjectIndex {
    instances: HashMap<u64, InstanceEntry>,
    classes: HashMap<u64, u64>,
    class_offsets: Vec<u64>,
}

#[derive(Clone, Copy)]
pub(crate) struct InstanceEntry {
    pub offset: u64,
    pub ordinal: u32,
}

impl ObjectIndex {
    pub(crate) fn build(heap: &Heap) -> Result<ObjectIndex> {
        let buf = heap.buffer();
        let id_size = heap.id_size();
        let ranges = heap.dump_ranges();
        let span_start = ranges.first().map_or(0, |r| r.0);
        let span_end = ranges.last().map_or(0, |r| r.1);
        let mut ticker = ProgressTicker::new(heap.progress(), span_start, span_end);
        let mut instances: HashMap<u64, InstanceEntry> = HashMap::new();
        let mut classes: HashMap<u64, u64> = HashMap::new();
        let mut class_offsets: Vec<u64> = Vec::new();
        for &(start, end) in ranges {
            walk_sub_records(buf, id_size, start, end, |tag, offset, _size| {
                ticker.step(offset);
                match tag {
                    INSTANCE_DUMP | OBJECT_ARRAY_DUMP | PRIMITIVE_ARRAY_DUMP => {
                        let id = buf.read_id(offset + 1, id_size)?;
                        let ordinal = instances.len() as u32;
                        instances
                            .entry(id)
                            .or_insert(InstanceEntry { offset, ordinal });
                    }
                    CLASS_DUMP => {
                        let id = buf.read_id(offset + 1, id_size)?;
                        if classes.insert(id, offset).is_none() {
                            class_offsets.push(offset);
                        }
                    }
                    _ => {}
                }
                Ok(())
            })?;
        }
        ticker.finish();
        info!(
            "indexed {} instances and {} classes",
            instances.len(),
            classes.len()
        );
        Ok(ObjectIndex {
            instances,
            classes,
            class_offsets,
        })
    }

    pub(crate) fn offset_of_instance(&self, id: u64) -> Option<u64> {
        self.instances.get(&id).map(|e| e.offset)
    }

    pub(crate) fn ordinal_of(&self, id: u64) -> Option<u32> {
        self.instances.get(&id).map(|e| e.ordinal)
    }

    pub(crate) fn offset_of_class(&self, id: u64) -> Option<u64> {
        self.classes.get(&id).copied()
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn class_offsets(&self) -> &[u64] {
        &self.class_offsets
    }

    pub(crate) fn instance_entries(&self) -> impl Iterator<Item = (&u64, &InstanceEntry)> {
        self.instances.iter()
    }
}
