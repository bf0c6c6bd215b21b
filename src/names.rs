use std::collections::HashMap;

use crate::error::Result;
use crate::format::{TAG_LOAD_CLASS, TAG_UTF8};
use crate::heap::Heap;
use crate::scanner::walk_records;

/// Offset-based tables resolving identifiers to human-readable names.
/// String payloads stay in the dump; the table stores (offset, length)
/// pairs and materializes a `String` only on lookup. Class names are the
/// one eager exception: the reverse name→class map needs them decoded.
pub(crate) struct NameTables {
    strings: HashMap<u64, (u64, u32)>,
    class_names: HashMap<u64, u64>,
    by_name: HashMap<String, u64>,
}

impl NameTables {
    pub(crate) fn build(heap: &Heap) -> Result<NameTables> {
        let buf = heap.buffer();
        let id_bytes = heap.id_size().bytes() as u64;
        let mut strings: HashMap<u64, (u64, u32)> = HashMap::new();
        if let Some(bounds) = heap.top_bounds(TAG_UTF8) {
            walk_records(buf, bounds, |tag, payload, length| {
                if tag == TAG_UTF8 && length >= id_bytes {
                    let id = buf.read_id(payload, heap.id_size())?;
                    strings.insert(id, (payload + id_bytes, (length - id_bytes) as u32));
                }
                Ok(())
            })?;
        }
        let mut class_names: HashMap<u64, u64> = HashMap::new();
        if let Some(bounds) = heap.top_bounds(TAG_LOAD_CLASS) {
            walk_records(buf, bounds, |tag, payload, _length| {
                if tag == TAG_LOAD_CLASS {
                    let class_id = buf.read_id(payload + 4, heap.id_size())?;
                    let name_id = buf.read_id(payload + 4 + id_bytes + 4, heap.id_size())?;
                    class_names.insert(class_id, name_id);
                }
                Ok(())
            })?;
        }
        let mut by_name = HashMap::new();
        for (&class_id, &name_id) in &class_names {
            if let Some((offset, len)) = strings.get(&name_id) {
                let bytes = buf.read_bytes(*offset, *len as usize)?;
                let name = String::from_utf8_lossy(&bytes).replace('/', ".");
                by_name.insert(name, class_id);
            }
        }
        debug!(
            "name tables: {} strings, {} loaded classes",
            strings.len(),
            class_names.len()
        );
        Ok(NameTables {
            strings,
            class_names,
            by_name,
        })
    }

    pub(crate) fn string(&self, heap: &Heap, id: u64) -> Result<Option<String>> {
        match self.strings.get(&id) {
            None => Ok(None),
            Some(&(offset, len)) => {
                let bytes = heap.buffer().read_bytes(offset, len as usize)?;
                Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
            }
        }
    }

    /// Dotted name of the class with the given object id.
    pub(crate) fn class_name(&self, heap: &Heap, class_id: u64) -> Result<Option<String>> {
        match self.class_names.get(&class_id) {
            None => Ok(None),
            Some(&name_id) => Ok(self
                .string(heap, name_id)?
                .map(|raw| raw.replace('/', "."))),
        }
    }

    pub(crate) fn class_id_by_name(&self, name: &str) -> Option<u64> {
        self.by_name.get(name).copied()
    }
}
