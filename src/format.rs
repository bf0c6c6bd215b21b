use crate::buffer::DumpBuffer;
use crate::error::{HeapError, Result};

// Top-level record tags. Each record is framed as
// (tag: u8, time: u32, length: u32, payload).
pub const TAG_UTF8: u8 = 0x01;
pub const TAG_LOAD_CLASS: u8 = 0x02;
pub const TAG_UNLOAD_CLASS: u8 = 0x03;
pub const TAG_STACK_FRAME: u8 = 0x04;
pub const TAG_STACK_TRACE: u8 = 0x05;
pub const TAG_ALLOC_SITES: u8 = 0x06;
pub const TAG_HEAP_SUMMARY: u8 = 0x07;
pub const TAG_START_THREAD: u8 = 0x0A;
pub const TAG_END_THREAD: u8 = 0x0B;
pub const TAG_HEAP_DUMP: u8 = 0x0C;
pub const TAG_CPU_SAMPLES: u8 = 0x0D;
pub const TAG_CONTROL_SETTINGS: u8 = 0x0E;
pub const TAG_HEAP_DUMP_SEGMENT: u8 = 0x1C;
pub const TAG_HEAP_DUMP_END: u8 = 0x2C;

// Sub-record tags inside a heap dump. These carry no length field; the
// size of each record is a fixed function of its tag (and, for dumps of
// classes/instances/arrays, of counts read from the record itself).
pub const ROOT_UNKNOWN: u8 = 0xFF;
pub const ROOT_JNI_GLOBAL: u8 = 0x01;
pub const ROOT_JNI_LOCAL: u8 = 0x02;
pub const ROOT_JAVA_FRAME: u8 = 0x03;
pub const ROOT_NATIVE_STACK: u8 = 0x04;
pub const ROOT_STICKY_CLASS: u8 = 0x05;
pub const ROOT_THREAD_BLOCK: u8 = 0x06;
pub const ROOT_MONITOR_USED: u8 = 0x07;
pub const ROOT_THREAD_OBJECT: u8 = 0x08;
pub const ROOT_INTERNED_STRING: u8 = 0x89;
pub const ROOT_FINALIZING: u8 = 0x8A;
pub const ROOT_DEBUGGER: u8 = 0x8B;
pub const ROOT_REFERENCE_CLEANUP: u8 = 0x8C;
pub const ROOT_VM_INTERNAL: u8 = 0x8D;
pub const ROOT_JNI_MONITOR: u8 = 0x8E;
pub const CLASS_DUMP: u8 = 0x20;
pub const INSTANCE_DUMP: u8 = 0x21;
pub const OBJECT_ARRAY_DUMP: u8 = 0x22;
pub const PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
// Android extension carrying a heap id; recognized and skipped.
pub const HEAP_DUMP_INFO: u8 = 0xFE;

/// Identifier width of the whole file, auto-detected from the header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IdSize {
    U4,
    U8,
}

impl IdSize {
    pub fn bytes(self) -> usize {
        match self {
            IdSize::U4 => 4,
            IdSize::U8 => 8,
        }
    }

    pub fn from_u32(v: u32) -> Option<IdSize> {
        match v {
            4 => Some(IdSize::U4),
            8 => Some(IdSize::U8),
            _ => None,
        }
    }
}

/// HPROF basic types, as tagged in class field tables and primitive
/// array records.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldType {
    Object = 2,
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl FieldType {
    pub fn from_tag(v: u8) -> Option<FieldType> {
        match v {
            2 => Some(FieldType::Object),
            4 => Some(FieldType::Boolean),
            5 => Some(FieldType::Char),
            6 => Some(FieldType::Float),
            7 => Some(FieldType::Double),
            8 => Some(FieldType::Byte),
            9 => Some(FieldType::Short),
            10 => Some(FieldType::Int),
            11 => Some(FieldType::Long),
            _ => None,
        }
    }

    /// On-disk size of one value of this type. Object references are the
    /// dump's id width.
    pub fn size(self, id_size: IdSize) -> usize {
        match self {
            FieldType::Object => id_size.bytes(),
            FieldType::Boolean | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Float | FieldType::Int => 4,
            FieldType::Double | FieldType::Long => 8,
        }
    }
}

/// Size of a top-level record header: tag + timestamp + length.
pub const RECORD_HEADER_BYTES: u64 = 9;

const BANNER_PREFIX: &str = "JAVA PROFILE";
const MAX_BANNER_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct DumpHeader {
    pub banner: String,
    pub id_size: IdSize,
    pub timestamp_ms: u64,
}

/// Parses the fixed header: NUL-terminated format banner, identifier
/// size, and the dump timestamp. Returns the header and the offset of
/// the first record.
pub fn read_header(buf: &DumpBuffer) -> Result<(DumpHeader, u64)> {
    let probe = buf.read_bytes(0, MAX_BANNER_BYTES.min(buf.len() as usize))?;
    let nul = probe
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| HeapError::InvalidFormat("missing format banner".to_string()))?;
    let banner = String::from_utf8_lossy(&probe[..nul]).to_string();
    if !banner.starts_with(BANNER_PREFIX) {
        return Err(HeapError::InvalidFormat(format!(
            "unrecognized format banner {:?}",
            banner
        )));
    }
    let mut cursor = nul as u64 + 1;
    let raw_id_size = buf.read_u32(cursor)?;
    let id_size = IdSize::from_u32(raw_id_size).ok_or_else(|| {
        HeapError::InvalidFormat(format!("unsupported identifier size {}", raw_id_size))
    })?;
    cursor += 4;
    let hi = buf.read_u32(cursor)?;
    let lo = buf.read_u32(cursor + 4)?;
    cursor += 8;
    let header = DumpHeader {
        banner,
        id_size,
        timestamp_ms: (u64::from(hi) << 32) | u64::from(lo),
    };
    Ok((header, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdump::DumpBuilder;

    #[test]
    fn header_round_trip() {
        let builder = DumpBuilder::new(IdSize::U8);
        let (_file, buf) = builder.into_buffer();
        let (header, first_record) = read_header(&buf).unwrap();
        assert_eq!(header.banner, "JAVA PROFILE 1.0.2");
        assert_eq!(header.id_size, IdSize::U8);
        // 19-byte banner + 4 + 8
        assert_eq!(first_record, 31);
    }

    #[test]
    fn four_byte_ids_are_detected() {
        let builder = DumpBuilder::new(IdSize::U4);
        let (_file, buf) = builder.into_buffer();
        let (header, _) = read_header(&buf).unwrap();
        assert_eq!(header.id_size, IdSize::U4);
    }

    #[test]
    fn garbage_banner_is_rejected() {
        let (_file, buf) = crate::testdump::raw_buffer(b"NOT A DUMP\0\x00\x00\x00\x08");
        assert!(matches!(
            read_header(&buf),
            Err(HeapError::InvalidFormat(_))
        ));
    }

    #[test]
    fn field_type_sizes_follow_id_width() {
        assert_eq!(FieldType::Object.size(IdSize::U4), 4);
        assert_eq!(FieldType::Object.size(IdSize::U8), 8);
        assert_eq!(FieldType::Char.size(IdSize::U8), 2);
        assert_eq!(FieldType::Double.size(IdSize::U4), 8);
    }
}
