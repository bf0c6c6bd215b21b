use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;

use crate::error::Result;
use crate::format::*;
use crate::heap::Heap;
use crate::scanner::walk_sub_records;

/// The kinds of GC root a dump can tag. Declaration order is both the
/// fixed processing order and the primary sort key of the root list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug)]
#[clap(rename_all = "verbatim")]
pub enum GcRootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    InternedString,
    Finalizing,
    Debugger,
    ReferenceCleanup,
    VmInternal,
    JniMonitor,
}

lazy_static! {
    static ref KIND_ORDER: [GcRootKind; 15] = [
        GcRootKind::Unknown,
        GcRootKind::JniGlobal,
        GcRootKind::JniLocal,
        GcRootKind::JavaFrame,
        GcRootKind::NativeStack,
        GcRootKind::StickyClass,
        GcRootKind::ThreadBlock,
        GcRootKind::MonitorUsed,
        GcRootKind::ThreadObject,
        GcRootKind::InternedString,
        GcRootKind::Finalizing,
        GcRootKind::Debugger,
        GcRootKind::ReferenceCleanup,
        GcRootKind::VmInternal,
        GcRootKind::JniMonitor,
    ];
}

impl GcRootKind {
    pub fn tag(self) -> u8 {
        match self {
            GcRootKind::Unknown => ROOT_UNKNOWN,
            GcRootKind::JniGlobal => ROOT_JNI_GLOBAL,
            GcRootKind::JniLocal => ROOT_JNI_LOCAL,
            GcRootKind::JavaFrame => ROOT_JAVA_FRAME,
            GcRootKind::NativeStack => ROOT_NATIVE_STACK,
            GcRootKind::StickyClass => ROOT_STICKY_CLASS,
            GcRootKind::ThreadBlock => ROOT_THREAD_BLOCK,
            GcRootKind::MonitorUsed => ROOT_MONITOR_USED,
            GcRootKind::ThreadObject => ROOT_THREAD_OBJECT,
            GcRootKind::InternedString => ROOT_INTERNED_STRING,
            GcRootKind::Finalizing => ROOT_FINALIZING,
            GcRootKind::Debugger => ROOT_DEBUGGER,
            GcRootKind::ReferenceCleanup => ROOT_REFERENCE_CLEANUP,
            GcRootKind::VmInternal => ROOT_VM_INTERNAL,
            GcRootKind::JniMonitor => ROOT_JNI_MONITOR,
        }
    }
}

impl fmt::Display for GcRootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind-specific extra fields carried by some root records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootDetail {
    None,
    JniRef {
        ref_id: u64,
    },
    Thread {
        thread_serial: u32,
    },
    Frame {
        thread_serial: u32,
        frame_number: u32,
    },
    ThreadObject {
        thread_serial: u32,
        stack_trace_serial: u32,
    },
}

/// One GC-root occurrence, keyed by the rooted object's id. At most one
/// descriptor is retained per distinct id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcRoot {
    pub kind: GcRootKind,
    pub object_id: u64,
    pub detail: RootDetail,
}

impl GcRoot {
    pub fn thread_serial(&self) -> Option<u32> {
        match self.detail {
            RootDetail::Thread { thread_serial }
            | RootDetail::Frame { thread_serial, .. }
            | RootDetail::ThreadObject { thread_serial, .. } => Some(thread_serial),
            _ => None,
        }
    }

    pub fn frame_number(&self) -> Option<u32> {
        match self.detail {
            RootDetail::Frame { frame_number, .. } => Some(frame_number),
            _ => None,
        }
    }
}

fn decode_root(heap: &Heap, kind: GcRootKind, offset: u64) -> Result<GcRoot> {
    let buf = heap.buffer();
    let id_size = heap.id_size();
    let id = id_size.bytes() as u64;
    let object_id = buf.read_id(offset + 1, id_size)?;
    let detail = match kind {
        GcRootKind::JniGlobal => RootDetail::JniRef {
            ref_id: buf.read_id(offset + 1 + id, id_size)?,
        },
        GcRootKind::JniLocal | GcRootKind::JavaFrame | GcRootKind::JniMonitor => {
            RootDetail::Frame {
                thread_serial: buf.read_u32(offset + 1 + id)?,
                frame_number: buf.read_u32(offset + 1 + id + 4)?,
            }
        }
        GcRootKind::NativeStack | GcRootKind::ThreadBlock => RootDetail::Thread {
            thread_serial: buf.read_u32(offset + 1 + id)?,
        },
        GcRootKind::ThreadObject => RootDetail::ThreadObject {
            thread_serial: buf.read_u32(offset + 1 + id)?,
            stack_trace_serial: buf.read_u32(offset + 1 + id + 4)?,
        },
        _ => RootDetail::None,
    };
    Ok(GcRoot {
        kind,
        object_id,
        detail,
    })
}

/// All roots of the dump: the id-keyed map is the source of truth, the
/// sorted list a derived view. Built once, immutable afterwards.
pub(crate) struct GcRoots {
    by_id: HashMap<u64, GcRoot>,
    sorted: Vec<GcRoot>,
}

impl GcRoots {
    pub(crate) fn build(heap: &Heap) -> Result<GcRoots> {
        let buf = heap.buffer();
        let id_size = heap.id_size();
        let mut by_id: HashMap<u64, GcRoot> = HashMap::new();
        for kind in KIND_ORDER.iter().copied() {
            let bounds = match heap.sub_bounds(kind.tag()) {
                Some(b) => b,
                // a dump with no roots of this kind contributes nothing
                None => continue,
            };
            walk_sub_records(buf, id_size, bounds.start, bounds.end, |tag, offset, _| {
                if tag != kind.tag() {
                    // other tags interleaved in the unioned window
                    return Ok(());
                }
                let root = decode_root(heap, kind, offset)?;
                if let Some(prev) = by_id.insert(root.object_id, root) {
                    if prev.kind != root.kind {
                        warn!(
                            "object 0x{:x} tagged as both {} and {} root, keeping {}",
                            root.object_id, prev.kind, root.kind, root.kind
                        );
                    }
                }
                Ok(())
            })?;
        }
        let mut sorted: Vec<GcRoot> = by_id.values().copied().collect();
        sorted.sort_by_key(|r| (r.kind, r.object_id));
        info!("resolved {} GC roots", sorted.len());
        Ok(GcRoots { by_id, sorted })
    }

    pub(crate) fn sorted(&self) -> &[GcRoot] {
        &self.sorted
    }

    pub(crate) fn by_id(&self, object_id: u64) -> Option<&GcRoot> {
        self.by_id.get(&object_id)
    }

    pub(crate) fn find_thread_root(&self, thread_serial: u32) -> Option<GcRoot> {
        self.sorted
            .iter()
            .find(|r| {
                r.kind == GcRootKind::ThreadObject && r.thread_serial() == Some(thread_serial)
            })
            .copied()
    }
}
