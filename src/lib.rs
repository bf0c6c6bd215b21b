#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

mod buffer;
pub mod cli;
mod error;
mod format;
mod heap;
mod index;
mod names;
mod object;
mod progress;
mod reach;
mod roots;
mod scanner;
mod spill;
#[cfg(test)]
mod testdump;

pub use crate::buffer::DumpBuffer;
pub use crate::error::{HeapError, Result};
pub use crate::format::{FieldType, IdSize};
pub use crate::heap::{Heap, HeapSummary};
pub use crate::object::{
    ArrayItemValue, ClassDump, FieldDescriptor, FieldValue, HeapObject, Instance, ObjectArrayDump,
    PrimitiveArrayDump, StaticField,
};
pub use crate::progress::{LogProgress, NoopProgress, ProgressSink, PROGRESS_MAX};
pub use crate::reach::ReachableSet;
pub use crate::roots::{GcRoot, GcRootKind, RootDetail};
pub use crate::scanner::TagBounds;
pub use crate::spill::LongBuffer;
