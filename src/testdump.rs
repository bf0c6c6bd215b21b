//! Builders for synthetic dumps used across the test modules. They emit
//! byte-exact tag streams so tests exercise the same parsing paths as a
//! real dump.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::buffer::DumpBuffer;
use crate::format::*;
use crate::object::FieldValue;

pub(crate) fn raw_buffer(bytes: &[u8]) -> (NamedTempFile, DumpBuffer) {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    let buf = DumpBuffer::open(f.path()).unwrap();
    (f, buf)
}

fn push_id(out: &mut Vec<u8>, id_size: IdSize, id: u64) {
    match id_size {
        IdSize::U4 => out.extend_from_slice(&(id as u32).to_be_bytes()),
        IdSize::U8 => out.extend_from_slice(&id.to_be_bytes()),
    }
}

fn push_value(out: &mut Vec<u8>, id_size: IdSize, value: FieldValue) {
    match value {
        FieldValue::Object(v) => push_id(out, id_size, v),
        FieldValue::Boolean(v) => out.push(u8::from(v)),
        FieldValue::Byte(v) => out.push(v as u8),
        FieldValue::Char(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        FieldValue::Float(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
        FieldValue::Double(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
    }
}

pub(crate) struct DumpBuilder {
    bytes: Vec<u8>,
    id_size: IdSize,
}

impl DumpBuilder {
    pub(crate) fn new(id_size: IdSize) -> DumpBuilder {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"JAVA PROFILE 1.0.2\0");
        bytes.extend_from_slice(&(id_size.bytes() as u32).to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        DumpBuilder { bytes, id_size }
    }

    fn record(&mut self, tag: u8, payload: &[u8]) {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        self.bytes
            .extend_from_slice(&(payload.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(payload);
    }

    pub(crate) fn utf8(&mut self, id: u64, s: &str) {
        let mut payload = Vec::new();
        push_id(&mut payload, self.id_size, id);
        payload.extend_from_slice(s.as_bytes());
        self.record(TAG_UTF8, &payload);
    }

    pub(crate) fn load_class(&mut self, serial: u32, class_id: u64, name_id: u64) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&serial.to_be_bytes());
        push_id(&mut payload, self.id_size, class_id);
        payload.extend_from_slice(&0u32.to_be_bytes());
        push_id(&mut payload, self.id_size, name_id);
        self.record(TAG_LOAD_CLASS, &payload);
    }

    pub(crate) fn heap_summary(
        &mut self,
        live_bytes: u32,
        live_instances: u32,
        alloc_bytes: u64,
        alloc_instances: u64,
    ) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&live_bytes.to_be_bytes());
        payload.extend_from_slice(&live_instances.to_be_bytes());
        payload.extend_from_slice(&alloc_bytes.to_be_bytes());
        payload.extend_from_slice(&alloc_instances.to_be_bytes());
        self.record(TAG_HEAP_SUMMARY, &payload);
    }

    pub(crate) fn heap_dump(&mut self, sub: &SubRecords) {
        self.record(TAG_HEAP_DUMP, &sub.bytes);
    }

    pub(crate) fn heap_dump_segment(&mut self, sub: &SubRecords) {
        self.record(TAG_HEAP_DUMP_SEGMENT, &sub.bytes);
    }

    pub(crate) fn heap_dump_end(&mut self) {
        self.record(TAG_HEAP_DUMP_END, &[]);
    }

    pub(crate) fn write_to_temp(&self) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&self.bytes).unwrap();
        f.flush().unwrap();
        f
    }

    pub(crate) fn into_buffer(self) -> (NamedTempFile, DumpBuffer) {
        let f = self.write_to_temp();
        let buf = DumpBuffer::open(f.path()).unwrap();
        (f, buf)
    }
}

pub(crate) struct SubRecords {
    bytes: Vec<u8>,
    id_size: IdSize,
}

impl SubRecords {
    pub(crate) fn new(id_size: IdSize) -> SubRecords {
        SubRecords {
            bytes: Vec::new(),
            id_size,
        }
    }

    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    fn root(&mut self, tag: u8, id: u64) {
        self.bytes.push(tag);
        push_id(&mut self.bytes, self.id_size, id);
    }

    pub(crate) fn root_unknown(&mut self, id: u64) {
        self.root(ROOT_UNKNOWN, id);
    }

    pub(crate) fn root_jni_global(&mut self, id: u64, ref_id: u64) {
        self.root(ROOT_JNI_GLOBAL, id);
        push_id(&mut self.bytes, self.id_size, ref_id);
    }

    pub(crate) fn root_jni_local(&mut self, id: u64, thread_serial: u32, frame: u32) {
        self.root(ROOT_JNI_LOCAL, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
        self.bytes.extend_from_slice(&frame.to_be_bytes());
    }

    pub(crate) fn root_java_frame(&mut self, id: u64, thread_serial: u32, frame: u32) {
        self.root(ROOT_JAVA_FRAME, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
        self.bytes.extend_from_slice(&frame.to_be_bytes());
    }

    pub(crate) fn root_native_stack(&mut self, id: u64, thread_serial: u32) {
        self.root(ROOT_NATIVE_STACK, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
    }

    pub(crate) fn root_sticky_class(&mut self, id: u64) {
        self.root(ROOT_STICKY_CLASS, id);
    }

    pub(crate) fn root_thread_block(&mut self, id: u64, thread_serial: u32) {
        self.root(ROOT_THREAD_BLOCK, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
    }

    pub(crate) fn root_monitor_used(&mut self, id: u64) {
        self.root(ROOT_MONITOR_USED, id);
    }

    pub(crate) fn root_thread_object(&mut self, id: u64, thread_serial: u32, stack_serial: u32) {
        self.root(ROOT_THREAD_OBJECT, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
        self.bytes.extend_from_slice(&stack_serial.to_be_bytes());
    }

    /// Interned-string, finalizing, debugger, reference-cleanup, and
    /// vm-internal roots all carry just the object id.
    pub(crate) fn root_simple(&mut self, tag: u8, id: u64) {
        self.root(tag, id);
    }

    pub(crate) fn root_jni_monitor(&mut self, id: u64, thread_serial: u32, frame: u32) {
        self.root(ROOT_JNI_MONITOR, id);
        self.bytes.extend_from_slice(&thread_serial.to_be_bytes());
        self.bytes.extend_from_slice(&frame.to_be_bytes());
    }

    pub(crate) fn class_dump(
        &mut self,
        class_id: u64,
        super_id: u64,
        instance_size: u32,
        statics: &[(u64, FieldValue)],
        fields: &[(u64, FieldType)],
    ) {
        self.bytes.push(CLASS_DUMP);
        push_id(&mut self.bytes, self.id_size, class_id);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        push_id(&mut self.bytes, self.id_size, super_id);
        for _ in 0..5 {
            // loader, signers, protection domain, two reserved ids
            push_id(&mut self.bytes, self.id_size, 0);
        }
        self.bytes.extend_from_slice(&instance_size.to_be_bytes());
        self.bytes.extend_from_slice(&0u16.to_be_bytes()); // constant pool
        self.bytes
            .extend_from_slice(&(statics.len() as u16).to_be_bytes());
        for &(name_id, value) in statics {
            push_id(&mut self.bytes, self.id_size, name_id);
            self.bytes.push(value.kind() as u8);
            push_value(&mut self.bytes, self.id_size, value);
        }
        self.bytes
            .extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for &(name_id, kind) in fields {
            push_id(&mut self.bytes, self.id_size, name_id);
            self.bytes.push(kind as u8);
        }
    }

    pub(crate) fn instance(&mut self, id: u64, class_id: u64, data: &[u8]) {
        self.bytes.push(INSTANCE_DUMP);
        push_id(&mut self.bytes, self.id_size, id);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        push_id(&mut self.bytes, self.id_size, class_id);
        self.bytes
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(data);
    }

    pub(crate) fn instance_with_values(&mut self, id: u64, class_id: u64, values: &[FieldValue]) {
        let mut data = Vec::new();
        for &value in values {
            push_value(&mut data, self.id_size, value);
        }
        self.instance(id, class_id, &data);
    }

    pub(crate) fn object_array(&mut self, id: u64, class_id: u64, elements: &[u64]) {
        self.bytes.push(OBJECT_ARRAY_DUMP);
        push_id(&mut self.bytes, self.id_size, id);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        self.bytes
            .extend_from_slice(&(elements.len() as u32).to_be_bytes());
        push_id(&mut self.bytes, self.id_size, class_id);
        for &e in elements {
            push_id(&mut self.bytes, self.id_size, e);
        }
    }

    pub(crate) fn primitive_array(&mut self, id: u64, kind: FieldType, count: u32) {
        self.bytes.push(PRIMITIVE_ARRAY_DUMP);
        push_id(&mut self.bytes, self.id_size, id);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        self.bytes.extend_from_slice(&count.to_be_bytes());
        self.bytes.push(kind as u8);
        let element = kind.size(self.id_size);
        self.bytes
            .extend(std::iter::repeat(0u8).take(count as usize * element));
    }
}
