use std::collections::HashMap;

use crate::buffer::DumpBuffer;
use crate::error::Result;
use crate::format::*;
use crate::progress::{ProgressSink, ProgressTicker};

/// Byte range of the dump over which one record tag occurs. Bounds for a
/// tag that recurs in several heap segments are unioned into a single
/// (min start, max end) window; anything walking such a window must
/// re-read the tag at each record and dispatch by it, since the union is
/// a worst-case superset that can interleave other tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagBounds {
    pub tag: u8,
    pub start: u64,
    pub end: u64,
}

impl TagBounds {
    pub fn new(tag: u8, start: u64, end: u64) -> TagBounds {
        TagBounds { tag, start, end }
    }

    pub fn union(self, other: TagBounds) -> TagBounds {
        debug_assert_eq!(self.tag, other.tag);
        TagBounds {
            tag: self.tag,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

fn merge(bounds: &mut HashMap<u8, TagBounds>, b: TagBounds) {
    bounds
        .entry(b.tag)
        .and_modify(|cur| *cur = cur.union(b))
        .or_insert(b);
}

/// Result of the single forward pass over the top-level record stream.
pub(crate) struct TopLevelScan {
    pub bounds: HashMap<u8, TagBounds>,
    /// One entry per selectable dump; each dump is a list of payload
    /// (start, end) ranges. A 0x0C heap-dump record is a dump of its
    /// own; all 0x1C segments together form one dump.
    pub dumps: Vec<Vec<(u64, u64)>>,
    pub records: u64,
}

/// Walks (tag, time, length) headers from `first_record` to the end of
/// the file without interpreting payloads, accumulating per-tag bounds
/// and the list of heap dumps. Trailing garbage that does not frame a
/// whole record is ignored with a warning.
pub(crate) fn scan_top_level(
    buf: &DumpBuffer,
    first_record: u64,
    sink: &dyn ProgressSink,
) -> Result<TopLevelScan> {
    let mut bounds = HashMap::new();
    let mut dumps: Vec<Vec<(u64, u64)>> = Vec::new();
    let mut segmented: Option<usize> = None;
    let mut ticker = ProgressTicker::new(sink, first_record, buf.len());
    let mut cursor = first_record;
    while cursor < buf.len() {
        if buf.len() - cursor < RECORD_HEADER_BYTES {
            warn!(
                "truncated record header at offset 0x{:x}, ignoring trailing {} byte(s)",
                cursor,
                buf.len() - cursor
            );
            break;
        }
        let tag = buf.read_u8(cursor)?;
        let length = u64::from(buf.read_u32(cursor + 5)?);
        let payload = cursor + RECORD_HEADER_BYTES;
        let end = payload + length;
        if end > buf.len() {
            warn!(
                "record 0x{:02x} at offset 0x{:x} runs past the end of the file, ignoring",
                tag, cursor
            );
            break;
        }
        merge(&mut bounds, TagBounds::new(tag, cursor, end));
        match tag {
            TAG_HEAP_DUMP => dumps.push(vec![(payload, end)]),
            TAG_HEAP_DUMP_SEGMENT => match segmented {
                Some(i) => dumps[i].push((payload, end)),
                None => {
                    segmented = Some(dumps.len());
                    dumps.push(vec![(payload, end)]);
                }
            },
            _ => {}
        }
        cursor = end;
        ticker.step(cursor);
    }
    let records = ticker.records();
    ticker.finish();
    Ok(TopLevelScan {
        bounds,
        dumps,
        records,
    })
}

/// Walks the uniformly framed top-level records inside `bounds`,
/// handing (tag, payload offset, payload length) to the callback. The
/// callback filters by tag; a union window may interleave other tags.
pub(crate) fn walk_records(
    buf: &DumpBuffer,
    bounds: TagBounds,
    mut f: impl FnMut(u8, u64, u64) -> Result<()>,
) -> Result<()> {
    let mut cursor = bounds.start;
    while cursor + RECORD_HEADER_BYTES <= bounds.end {
        let tag = buf.read_u8(cursor)?;
        let length = u64::from(buf.read_u32(cursor + 5)?);
        f(tag, cursor + RECORD_HEADER_BYTES, length)?;
        cursor += RECORD_HEADER_BYTES + length;
    }
    Ok(())
}

/// Per-tag bounds of the heap-dump sub-records of the selected dump.
pub(crate) struct SubScan {
    pub bounds: HashMap<u8, TagBounds>,
    pub records: u64,
}

pub(crate) fn scan_heap_dump(
    buf: &DumpBuffer,
    id_size: IdSize,
    ranges: &[(u64, u64)],
    sink: &dyn ProgressSink,
) -> Result<SubScan> {
    let mut bounds = HashMap::new();
    let span_start = ranges.first().map_or(0, |r| r.0);
    let span_end = ranges.last().map_or(0, |r| r.1);
    let mut ticker = ProgressTicker::new(sink, span_start, span_end);
    let mut records = 0u64;
    for &(start, end) in ranges {
        walk_sub_records(buf, id_size, start, end, |tag, offset, size| {
            merge(&mut bounds, TagBounds::new(tag, offset, offset + size));
            records += 1;
            ticker.step(offset);
            Ok(())
        })?;
    }
    ticker.finish();
    Ok(SubScan { bounds, records })
}

/// Walks heap-dump sub-records in [start, end), handing
/// (tag, record offset, record size) to the callback. Sub-records carry
/// no length field; each record's size is derived from its tag. An
/// unrecognized tag aborts the rest of the range with a warning rather
/// than failing the scan.
pub(crate) fn walk_sub_records(
    buf: &DumpBuffer,
    id_size: IdSize,
    start: u64,
    end: u64,
    mut f: impl FnMut(u8, u64, u64) -> Result<()>,
) -> Result<()> {
    let mut cursor = start;
    while cursor < end {
        let tag = buf.read_u8(cursor)?;
        match sub_record_size(buf, cursor, tag, id_size)? {
            Some(size) => {
                f(tag, cursor, size)?;
                cursor += size;
            }
            None => {
                warn!(
                    "unknown sub-record tag 0x{:02x} at offset 0x{:x}, skipping rest of range",
                    tag, cursor
                );
                break;
            }
        }
    }
    Ok(())
}

/// Total byte size (including the tag byte) of the sub-record starting
/// at `offset`, or `None` for a tag this engine cannot size.
pub(crate) fn sub_record_size(
    buf: &DumpBuffer,
    offset: u64,
    tag: u8,
    id_size: IdSize,
) -> Result<Option<u64>> {
    let id = id_size.bytes() as u64;
    let size = match tag {
        ROOT_UNKNOWN | ROOT_STICKY_CLASS | ROOT_MONITOR_USED | ROOT_INTERNED_STRING
        | ROOT_FINALIZING | ROOT_DEBUGGER | ROOT_REFERENCE_CLEANUP | ROOT_VM_INTERNAL => 1 + id,
        ROOT_JNI_GLOBAL => 1 + 2 * id,
        ROOT_JNI_LOCAL | ROOT_JAVA_FRAME | ROOT_JNI_MONITOR | ROOT_THREAD_OBJECT => 1 + id + 8,
        ROOT_NATIVE_STACK | ROOT_THREAD_BLOCK => 1 + id + 4,
        HEAP_DUMP_INFO => 1 + 4 + id,
        INSTANCE_DUMP => {
            let data = u64::from(buf.read_u32(offset + 1 + id + 4 + id)?);
            1 + id + 4 + id + 4 + data
        }
        OBJECT_ARRAY_DUMP => {
            let count = u64::from(buf.read_u32(offset + 1 + id + 4)?);
            1 + id + 4 + 4 + id + count * id
        }
        PRIMITIVE_ARRAY_DUMP => {
            let count = u64::from(buf.read_u32(offset + 1 + id + 4)?);
            let ty = buf.read_u8(offset + 1 + id + 4 + 4)?;
            match FieldType::from_tag(ty) {
                Some(t) => 1 + id + 4 + 4 + 1 + count * t.size(id_size) as u64,
                None => return Ok(None),
            }
        }
        CLASS_DUMP => return class_dump_size(buf, offset, id_size),
        _ => return Ok(None),
    };
    Ok(Some(size))
}

fn class_dump_size(buf: &DumpBuffer, offset: u64, id_size: IdSize) -> Result<Option<u64>> {
    let id = id_size.bytes() as u64;
    // tag, class id, stack serial, super/loader/signers/protection-domain
    // and two reserved ids, instance size
    let mut cursor = offset + 1 + id + 4 + 6 * id + 4;
    let cp_count = buf.read_u16(cursor)?;
    cursor += 2;
    for _ in 0..cp_count {
        let ty = buf.read_u8(cursor + 2)?;
        match FieldType::from_tag(ty) {
            Some(t) => cursor += 2 + 1 + t.size(id_size) as u64,
            None => return Ok(None),
        }
    }
    let static_count = buf.read_u16(cursor)?;
    cursor += 2;
    for _ in 0..static_count {
        let ty = buf.read_u8(cursor + id)?;
        match FieldType::from_tag(ty) {
            Some(t) => cursor += id + 1 + t.size(id_size) as u64,
            None => return Ok(None),
        }
    }
    let field_count = buf.read_u16(cursor)?;
    cursor += 2;
    cursor += u64::from(field_count) * (id + 1);
    Ok(Some(cursor - offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::testdump::{DumpBuilder, SubRecords};

    #[test]
    fn union_is_min_start_max_end() {
        let a = TagBounds::new(0x21, 100, 200);
        let b = TagBounds::new(0x21, 300, 400);
        assert_eq!(a.union(b), TagBounds::new(0x21, 100, 400));
        assert_eq!(b.union(a), TagBounds::new(0x21, 100, 400));
    }

    #[test]
    fn top_level_scan_finds_dumps_and_bounds() {
        let mut builder = DumpBuilder::new(IdSize::U8);
        builder.utf8(0x10, "java/lang/Object");
        let mut sub = SubRecords::new(IdSize::U8);
        sub.root_unknown(0x100);
        builder.heap_dump(&sub);
        let mut sub2 = SubRecords::new(IdSize::U8);
        sub2.root_unknown(0x200);
        builder.heap_dump(&sub2);
        let (_file, buf) = builder.into_buffer();
        let (_, first) = read_header(&buf).unwrap();
        let scan = scan_top_level(&buf, first, &NoopProgress).unwrap();
        assert_eq!(scan.dumps.len(), 2);
        assert_eq!(scan.records, 3);
        assert!(scan.bounds.contains_key(&TAG_UTF8));
        assert!(scan.bounds.contains_key(&TAG_HEAP_DUMP));
        assert!(!scan.bounds.contains_key(&TAG_STACK_TRACE));
    }

    #[test]
    fn segments_union_into_one_dump() {
        let mut builder = DumpBuilder::new(IdSize::U8);
        let mut sub = SubRecords::new(IdSize::U8);
        sub.root_unknown(0x100);
        builder.heap_dump_segment(&sub);
        let mut sub2 = SubRecords::new(IdSize::U8);
        sub2.root_unknown(0x200);
        builder.heap_dump_segment(&sub2);
        builder.heap_dump_end();
        let (_file, buf) = builder.into_buffer();
        let (_, first) = read_header(&buf).unwrap();
        let scan = scan_top_level(&buf, first, &NoopProgress).unwrap();
        assert_eq!(scan.dumps.len(), 1);
        assert_eq!(scan.dumps[0].len(), 2);
    }

    #[test]
    fn sub_scan_collects_per_tag_bounds() {
        let mut builder = DumpBuilder::new(IdSize::U8);
        let mut sub = SubRecords::new(IdSize::U8);
        sub.root_jni_global(0x100, 0x1);
        sub.instance(0x200, 0x50, &[0u8; 16]);
        sub.root_jni_global(0x300, 0x2);
        builder.heap_dump(&sub);
        let (_file, buf) = builder.into_buffer();
        let (header, first) = read_header(&buf).unwrap();
        let scan = scan_top_level(&buf, first, &NoopProgress).unwrap();
        let sub_scan =
            scan_heap_dump(&buf, header.id_size, &scan.dumps[0], &NoopProgress).unwrap();
        assert_eq!(sub_scan.records, 3);
        let jni = sub_scan.bounds[&ROOT_JNI_GLOBAL];
        let inst = sub_scan.bounds[&INSTANCE_DUMP];
        // the two jni-global roots straddle the instance record, so
        // their unioned window contains it
        assert!(jni.start < inst.start && inst.end < jni.end);
        // walking the union re-validates the tag at each record
        let mut seen = vec![];
        walk_sub_records(&buf, header.id_size, jni.start, jni.end, |tag, offset, _| {
            if tag == ROOT_JNI_GLOBAL {
                seen.push(offset);
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn unknown_sub_tag_stops_the_range_without_error() {
        let mut builder = DumpBuilder::new(IdSize::U8);
        let mut sub = SubRecords::new(IdSize::U8);
        sub.root_unknown(0x100);
        sub.raw(&[0x77, 0, 0, 0]); // not a valid sub-record tag
        builder.heap_dump(&sub);
        let (_file, buf) = builder.into_buffer();
        let (header, first) = read_header(&buf).unwrap();
        let scan = scan_top_level(&buf, first, &NoopProgress).unwrap();
        let sub_scan =
            scan_heap_dump(&buf, header.id_size, &scan.dumps[0], &NoopProgress).unwrap();
        assert_eq!(sub_scan.records, 1);
        assert!(sub_scan.bounds.contains_key(&ROOT_UNKNOWN));
    }

    #[test]
    fn class_dump_size_covers_field_tables() {
        let mut builder = DumpBuilder::new(IdSize::U8);
        let mut sub = SubRecords::new(IdSize::U8);
        sub.class_dump(
            0x50,
            0,
            16,
            &[(0x11, crate::object::FieldValue::Object(0x200))],
            &[(0x12, FieldType::Long), (0x13, FieldType::Object)],
        );
        sub.root_unknown(0x100);
        builder.heap_dump(&sub);
        let (_file, buf) = builder.into_buffer();
        let (header, first) = read_header(&buf).unwrap();
        let scan = scan_top_level(&buf, first, &NoopProgress).unwrap();
        let sub_scan =
            scan_heap_dump(&buf, header.id_size, &scan.dumps[0], &NoopProgress).unwrap();
        // both records were sized and visited
        assert_eq!(sub_scan.records, 2);
        assert!(sub_scan.bounds.contains_key(&CLASS_DUMP));
        assert!(sub_scan.bounds.contains_key(&ROOT_UNKNOWN));
    }
}
