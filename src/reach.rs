use std::collections::HashSet;

use fixedbitset::FixedBitSet;

use crate::error::Result;
use crate::heap::Heap;
use crate::object::{ClassDump, HeapObject};
use crate::spill::LongBuffer;

/// Result of the transitive closure from the GC roots. The mark bitset
/// is keyed by dense instance ordinals, so its footprint is one bit per
/// object regardless of id width.
pub struct ReachableSet {
    marks: FixedBitSet,
    classes: HashSet<u64>,
    reachable: usize,
    total: usize,
}

impl ReachableSet {
    pub fn reachable_count(&self) -> usize {
        self.reachable
    }

    pub fn total_count(&self) -> usize {
        self.total
    }

    pub fn unreachable_count(&self) -> usize {
        self.total - self.reachable
    }

    pub(crate) fn is_marked(&self, ordinal: u32) -> bool {
        self.marks.contains(ordinal as usize)
    }

    pub(crate) fn class_reached(&self, class_id: u64) -> bool {
        self.classes.contains(&class_id)
    }
}

/// Breadth-first traversal over object references, seeded from every GC
/// root. The frontier lives in spill buffers so an arbitrarily wide
/// level never exhausts memory; expansion follows instance fields,
/// object-array elements, and static fields of reached classes.
pub(crate) fn compute(heap: &Heap) -> Result<ReachableSet> {
    let index = heap.index()?;
    let total = index.instance_count();
    let mut marks = FixedBitSet::with_capacity(total);
    let mut classes: HashSet<u64> = HashSet::new();
    let mut reachable = 0usize;
    let mut frontier = LongBuffer::new();
    for root in heap.gc_roots()? {
        frontier.write_long(root.object_id as i64)?;
    }
    let mut refs: Vec<u64> = Vec::new();
    while frontier.has_data() {
        frontier.start_reading()?;
        let mut next = LongBuffer::new();
        while let Some(value) = frontier.read_long()? {
            let id = value as u64;
            if id == 0 {
                continue;
            }
            refs.clear();
            if let Some(ordinal) = index.ordinal_of(id) {
                if marks.put(ordinal as usize) {
                    continue;
                }
                reachable += 1;
                let offset = index.offset_of_instance(id).expect("indexed above");
                HeapObject::at(heap, offset)?.reference_ids(&mut refs)?;
            } else if let Some(offset) = index.offset_of_class(id) {
                if !classes.insert(id) {
                    continue;
                }
                ClassDump::new(heap, offset).static_reference_ids(&mut refs)?;
            } else {
                debug!("reference to unindexed id 0x{:x}", id);
                continue;
            }
            for &r in &refs {
                next.write_long(r as i64)?;
            }
        }
        frontier = next;
    }
    info!("transitive closure marked {} of {} objects", reachable, total);
    Ok(ReachableSet {
        marks,
        classes,
        reachable,
        total,
    })
}
