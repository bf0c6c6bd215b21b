use smallvec::SmallVec;

use crate::error::{HeapError, Result};
use crate::format::{FieldType, CLASS_DUMP, INSTANCE_DUMP, OBJECT_ARRAY_DUMP, PRIMITIVE_ARRAY_DUMP};
use crate::heap::Heap;

// guards the superclass-chain walk against a corrupted, cyclic hierarchy
const MAX_CLASS_CHAIN: usize = 512;

/// One decoded field or array-element value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(u64),
}

impl FieldValue {
    pub fn as_object_id(&self) -> Option<u64> {
        match self {
            FieldValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> FieldType {
        match self {
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Short(_) => FieldType::Short,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Object(_) => FieldType::Object,
        }
    }
}

/// Reads one value of the given type at `offset`.
pub(crate) fn read_value(heap: &Heap, offset: u64, kind: FieldType) -> Result<FieldValue> {
    let buf = heap.buffer();
    Ok(match kind {
        FieldType::Object => FieldValue::Object(buf.read_id(offset, heap.id_size())?),
        FieldType::Boolean => FieldValue::Boolean(buf.read_u8(offset)? != 0),
        FieldType::Byte => FieldValue::Byte(buf.read_u8(offset)? as i8),
        FieldType::Char => FieldValue::Char(buf.read_u16(offset)?),
        FieldType::Short => FieldValue::Short(buf.read_u16(offset)? as i16),
        FieldType::Int => FieldValue::Int(buf.read_u32(offset)? as i32),
        FieldType::Long => FieldValue::Long(buf.read_u64(offset)? as i64),
        FieldType::Float => FieldValue::Float(f32::from_bits(buf.read_u32(offset)?)),
        FieldType::Double => FieldValue::Double(f64::from_bits(buf.read_u64(offset)?)),
    })
}

/// Name id and type of one declared instance field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub name_id: u64,
    pub kind: FieldType,
}

/// Name id, type, and stored value of one static field.
#[derive(Debug, Clone, Copy)]
pub struct StaticField {
    pub name_id: u64,
    pub value: FieldValue,
}

pub(crate) type FieldList = SmallVec<[FieldDescriptor; 8]>;
pub(crate) type StaticList = SmallVec<[StaticField; 4]>;

/// View over a class-dump record. Owns nothing; every accessor re-reads
/// the raw bytes at the stored offset.
pub struct ClassDump<'h> {
    heap: &'h Heap,
    offset: u64,
}

impl<'h> ClassDump<'h> {
    pub(crate) fn new(heap: &'h Heap, offset: u64) -> ClassDump<'h> {
        ClassDump { heap, offset }
    }

    fn id_bytes(&self) -> u64 {
        self.heap.id_size().bytes() as u64
    }

    pub fn id(&self) -> Result<u64> {
        self.heap.buffer().read_id(self.offset + 1, self.heap.id_size())
    }

    pub fn super_class_id(&self) -> Result<u64> {
        let id = self.id_bytes();
        self.heap
            .buffer()
            .read_id(self.offset + 1 + id + 4, self.heap.id_size())
    }

    pub fn super_class(&self) -> Result<Option<ClassDump<'h>>> {
        let super_id = self.super_class_id()?;
        if super_id == 0 {
            return Ok(None);
        }
        self.heap.class_by_id(super_id)
    }

    /// Declared size in bytes of one instance of this class.
    pub fn instance_size(&self) -> Result<u32> {
        let id = self.id_bytes();
        self.heap.buffer().read_u32(self.offset + 1 + id + 4 + 6 * id)
    }

    /// Dotted class name, if the dump carries load-class records for it.
    pub fn name(&self) -> Result<Option<String>> {
        self.heap.class_name(self.id()?)
    }

    fn after_constant_pool(&self) -> Result<u64> {
        let buf = self.heap.buffer();
        let id = self.id_bytes();
        let mut cursor = self.offset + 1 + id + 4 + 6 * id + 4;
        let cp_count = buf.read_u16(cursor)?;
        cursor += 2;
        for _ in 0..cp_count {
            let ty = buf.read_u8(cursor + 2)?;
            let kind = FieldType::from_tag(ty).ok_or_else(|| {
                HeapError::InvalidFormat(format!("bad constant-pool entry type 0x{:02x}", ty))
            })?;
            cursor += 2 + 1 + kind.size(self.heap.id_size()) as u64;
        }
        Ok(cursor)
    }

    pub fn static_fields(&self) -> Result<StaticList> {
        let buf = self.heap.buffer();
        let id = self.id_bytes();
        let mut cursor = self.after_constant_pool()?;
        let count = buf.read_u16(cursor)?;
        cursor += 2;
        let mut out = StaticList::new();
        for _ in 0..count {
            let name_id = buf.read_id(cursor, self.heap.id_size())?;
            let ty = buf.read_u8(cursor + id)?;
            let kind = FieldType::from_tag(ty).ok_or_else(|| {
                HeapError::InvalidFormat(format!("bad static field type 0x{:02x}", ty))
            })?;
            let value = read_value(self.heap, cursor + id + 1, kind)?;
            out.push(StaticField { name_id, value });
            cursor += id + 1 + kind.size(self.heap.id_size()) as u64;
        }
        Ok(out)
    }

    /// Fields declared by this class itself, in record order. Inherited
    /// fields live in the superclass records.
    pub fn instance_fields(&self) -> Result<FieldList> {
        let buf = self.heap.buffer();
        let id = self.id_bytes();
        let mut cursor = self.after_constant_pool()?;
        let static_count = buf.read_u16(cursor)?;
        cursor += 2;
        for _ in 0..static_count {
            let ty = buf.read_u8(cursor + id)?;
            let kind = FieldType::from_tag(ty).ok_or_else(|| {
                HeapError::InvalidFormat(format!("bad static field type 0x{:02x}", ty))
            })?;
            cursor += id + 1 + kind.size(self.heap.id_size()) as u64;
        }
        let count = buf.read_u16(cursor)?;
        cursor += 2;
        let mut out = FieldList::new();
        for _ in 0..count {
            let name_id = buf.read_id(cursor, self.heap.id_size())?;
            let ty = buf.read_u8(cursor + id)?;
            let kind = FieldType::from_tag(ty).ok_or_else(|| {
                HeapError::InvalidFormat(format!("bad instance field type 0x{:02x}", ty))
            })?;
            out.push(FieldDescriptor { name_id, kind });
            cursor += id + 1;
        }
        Ok(out)
    }

    pub(crate) fn static_reference_ids(&self, out: &mut Vec<u64>) -> Result<()> {
        for field in self.static_fields()? {
            if let Some(id) = field.value.as_object_id() {
                if id != 0 {
                    out.push(id);
                }
            }
        }
        Ok(())
    }
}

/// View over an instance-dump record.
pub struct Instance<'h> {
    heap: &'h Heap,
    offset: u64,
}

impl<'h> Instance<'h> {
    pub(crate) fn new(heap: &'h Heap, offset: u64) -> Instance<'h> {
        Instance { heap, offset }
    }

    fn id_bytes(&self) -> u64 {
        self.heap.id_size().bytes() as u64
    }

    pub fn id(&self) -> Result<u64> {
        self.heap.buffer().read_id(self.offset + 1, self.heap.id_size())
    }

    pub fn class_id(&self) -> Result<u64> {
        let id = self.id_bytes();
        self.heap
            .buffer()
            .read_id(self.offset + 1 + id + 4, self.heap.id_size())
    }

    pub fn class(&self) -> Result<Option<ClassDump<'h>>> {
        self.heap.class_by_id(self.class_id()?)
    }

    fn fields_data_offset(&self) -> u64 {
        let id = self.id_bytes();
        self.offset + 1 + id + 4 + id + 4
    }

    /// Resolves the named field by walking the class chain from the
    /// instance's own class upward, summing field widths to locate the
    /// value bytes. The first match wins, so a field shadowed in a
    /// subclass resolves to the subclass slot, as it does in the VM.
    pub fn field_value(&self, name: &str) -> Result<Option<FieldValue>> {
        let mut cursor = self.fields_data_offset();
        let mut class = self.class()?;
        let mut depth = 0;
        while let Some(c) = class {
            depth += 1;
            if depth > MAX_CLASS_CHAIN {
                warn!("class chain of instance 0x{:x} exceeds {} levels", self.id()?, MAX_CLASS_CHAIN);
                break;
            }
            for field in c.instance_fields()? {
                if self.heap.string(field.name_id)?.as_deref() == Some(name) {
                    return read_value(self.heap, cursor, field.kind).map(Some);
                }
                cursor += field.kind.size(self.heap.id_size()) as u64;
            }
            class = c.super_class()?;
        }
        Ok(None)
    }

    /// All fields of the instance with resolved names and values, own
    /// class first, then the super chain.
    pub fn fields(&self) -> Result<Vec<(String, FieldValue)>> {
        let mut out = Vec::new();
        let mut cursor = self.fields_data_offset();
        let mut class = self.class()?;
        let mut depth = 0;
        while let Some(c) = class {
            depth += 1;
            if depth > MAX_CLASS_CHAIN {
                break;
            }
            for field in c.instance_fields()? {
                let name = self
                    .heap
                    .string(field.name_id)?
                    .unwrap_or_else(|| format!("field@0x{:x}", field.name_id));
                out.push((name, read_value(self.heap, cursor, field.kind)?));
                cursor += field.kind.size(self.heap.id_size()) as u64;
            }
            class = c.super_class()?;
        }
        Ok(out)
    }

    pub(crate) fn reference_ids(&self, out: &mut Vec<u64>) -> Result<()> {
        let mut cursor = self.fields_data_offset();
        let mut class = self.class()?;
        let mut depth = 0;
        while let Some(c) = class {
            depth += 1;
            if depth > MAX_CLASS_CHAIN {
                break;
            }
            for field in c.instance_fields()? {
                if field.kind == FieldType::Object {
                    let id = self.heap.buffer().read_id(cursor, self.heap.id_size())?;
                    if id != 0 {
                        out.push(id);
                    }
                }
                cursor += field.kind.size(self.heap.id_size()) as u64;
            }
            class = c.super_class()?;
        }
        Ok(())
    }
}

/// View over an object-array-dump record.
pub struct ObjectArrayDump<'h> {
    heap: &'h Heap,
    offset: u64,
}

impl<'h> ObjectArrayDump<'h> {
    pub(crate) fn new(heap: &'h Heap, offset: u64) -> ObjectArrayDump<'h> {
        ObjectArrayDump { heap, offset }
    }

    fn id_bytes(&self) -> u64 {
        self.heap.id_size().bytes() as u64
    }

    pub fn id(&self) -> Result<u64> {
        self.heap.buffer().read_id(self.offset + 1, self.heap.id_size())
    }

    pub fn length(&self) -> Result<u32> {
        let id = self.id_bytes();
        self.heap.buffer().read_u32(self.offset + 1 + id + 4)
    }

    pub fn class_id(&self) -> Result<u64> {
        let id = self.id_bytes();
        self.heap
            .buffer()
            .read_id(self.offset + 1 + id + 4 + 4, self.heap.id_size())
    }

    pub fn item(&self, index: u32) -> Result<ArrayItemValue<'h>> {
        let length = self.length()?;
        if index >= length {
            return Err(HeapError::InvalidFormat(format!(
                "array index {} out of bounds (length {})",
                index, length
            )));
        }
        Ok(ArrayItemValue {
            heap: self.heap,
            array_offset: self.offset,
            index,
        })
    }

    pub(crate) fn reference_ids(&self, out: &mut Vec<u64>) -> Result<()> {
        let id = self.id_bytes();
        let elements = self.offset + 1 + id + 4 + 4 + id;
        for i in 0..u64::from(self.length()?) {
            let v = self
                .heap
                .buffer()
                .read_id(elements + i * id, self.heap.id_size())?;
            if v != 0 {
                out.push(v);
            }
        }
        Ok(())
    }
}

/// One element slot of an object array: pure offset arithmetic until
/// `instance()` indirects through the heap index. A cycle in the target
/// graph is just a repeated index lookup, never an in-memory cycle.
pub struct ArrayItemValue<'h> {
    heap: &'h Heap,
    array_offset: u64,
    index: u32,
}

impl<'h> ArrayItemValue<'h> {
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Byte offset of this element's identifier within the dump:
    /// the array's fixed header (tag, id, stack serial, length, class
    /// id) plus `index` id widths.
    pub fn item_offset(&self) -> u64 {
        let id = self.heap.id_size().bytes() as u64;
        self.array_offset + 1 + id + 4 + 4 + id + u64::from(self.index) * id
    }

    pub fn instance_id(&self) -> Result<u64> {
        self.heap
            .buffer()
            .read_id(self.item_offset(), self.heap.id_size())
    }

    pub fn instance(&self) -> Result<Option<HeapObject<'h>>> {
        let id = self.instance_id()?;
        if id == 0 {
            return Ok(None);
        }
        self.heap.instance_by_id(id)
    }
}

/// View over a primitive-array-dump record.
pub struct PrimitiveArrayDump<'h> {
    heap: &'h Heap,
    offset: u64,
}

impl<'h> PrimitiveArrayDump<'h> {
    pub(crate) fn new(heap: &'h Heap, offset: u64) -> PrimitiveArrayDump<'h> {
        PrimitiveArrayDump { heap, offset }
    }

    fn id_bytes(&self) -> u64 {
        self.heap.id_size().bytes() as u64
    }

    pub fn id(&self) -> Result<u64> {
        self.heap.buffer().read_id(self.offset + 1, self.heap.id_size())
    }

    pub fn length(&self) -> Result<u32> {
        let id = self.id_bytes();
        self.heap.buffer().read_u32(self.offset + 1 + id + 4)
    }

    pub fn element_type(&self) -> Result<FieldType> {
        let id = self.id_bytes();
        let ty = self.heap.buffer().read_u8(self.offset + 1 + id + 4 + 4)?;
        FieldType::from_tag(ty).ok_or_else(|| {
            HeapError::InvalidFormat(format!("bad primitive array element type 0x{:02x}", ty))
        })
    }

    pub fn element(&self, index: u32) -> Result<FieldValue> {
        let length = self.length()?;
        if index >= length {
            return Err(HeapError::InvalidFormat(format!(
                "array index {} out of bounds (length {})",
                index, length
            )));
        }
        let kind = self.element_type()?;
        let id = self.id_bytes();
        let data = self.offset + 1 + id + 4 + 4 + 1;
        read_value(
            self.heap,
            data + u64::from(index) * kind.size(self.heap.id_size()) as u64,
            kind,
        )
    }
}

/// An object materialized from an offset: the tag at the offset decides
/// the concrete view. Classes are looked up separately via
/// [`Heap::class_by_id`].
pub enum HeapObject<'h> {
    Instance(Instance<'h>),
    ObjectArray(ObjectArrayDump<'h>),
    PrimitiveArray(PrimitiveArrayDump<'h>),
}

impl<'h> HeapObject<'h> {
    pub(crate) fn at(heap: &'h Heap, offset: u64) -> Result<HeapObject<'h>> {
        let tag = heap.buffer().read_u8(offset)?;
        match tag {
            INSTANCE_DUMP => Ok(HeapObject::Instance(Instance::new(heap, offset))),
            OBJECT_ARRAY_DUMP => Ok(HeapObject::ObjectArray(ObjectArrayDump::new(heap, offset))),
            PRIMITIVE_ARRAY_DUMP => Ok(HeapObject::PrimitiveArray(PrimitiveArrayDump::new(
                heap, offset,
            ))),
            CLASS_DUMP => Err(HeapError::InvalidFormat(
                "class dump where an object dump was expected".to_string(),
            )),
            other => Err(HeapError::InvalidFormat(format!(
                "unexpected tag 0x{:02x} at object offset 0x{:x}",
                other, offset
            ))),
        }
    }

    pub fn id(&self) -> Result<u64> {
        match self {
            HeapObject::Instance(o) => o.id(),
            HeapObject::ObjectArray(o) => o.id(),
            HeapObject::PrimitiveArray(o) => o.id(),
        }
    }

    pub fn as_instance(&self) -> Option<&Instance<'h>> {
        match self {
            HeapObject::Instance(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_array(&self) -> Option<&ObjectArrayDump<'h>> {
        match self {
            HeapObject::ObjectArray(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_primitive_array(&self) -> Option<&PrimitiveArrayDump<'h>> {
        match self {
            HeapObject::PrimitiveArray(o) => Some(o),
            _ => None,
        }
    }

    /// Outgoing object references: field values for instances, element
    /// ids for object arrays. Primitive arrays reference nothing.
    pub(crate) fn reference_ids(&self, out: &mut Vec<u64>) -> Result<()> {
        match self {
            HeapObject::Instance(o) => o.reference_ids(out),
            HeapObject::ObjectArray(o) => o.reference_ids(out),
            HeapObject::PrimitiveArray(_) => Ok(()),
        }
    }
}
