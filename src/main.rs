#[macro_use]
extern crate log;

use anyhow::Result;
use clap::Parser;

use hprof_heap::cli::{Args, ClassesArgs, Commands, InstanceArgs, RootsArgs};
use hprof_heap::{FieldValue, Heap, HeapObject};

fn parse_object_id(s: &str) -> Result<u64> {
    let id = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(id)
}

fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Boolean(v) => v.to_string(),
        FieldValue::Byte(v) => v.to_string(),
        FieldValue::Char(v) => v.to_string(),
        FieldValue::Short(v) => v.to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::Long(v) => v.to_string(),
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Double(v) => v.to_string(),
        FieldValue::Object(0) => "null".to_string(),
        FieldValue::Object(id) => format!("0x{:x}", id),
    }
}

fn summary(heap: &Heap) -> Result<()> {
    println!("format\t{}", heap.banner());
    println!("id size\t{} bytes", heap.id_size().bytes());
    println!("dumps\t{}", heap.dump_count());
    println!("classes\t{}", heap.class_count()?);
    println!("instances\t{}", heap.instance_count()?);
    println!("gc roots\t{}", heap.gc_roots()?.len());
    let s = heap.summary()?;
    println!("live bytes\t{}", s.total_live_bytes);
    if let Some(allocated) = s.total_allocated_bytes {
        println!("allocated bytes\t{}", allocated);
    }
    Ok(())
}

fn roots(heap: &Heap, args: &RootsArgs) -> Result<()> {
    println!("kind\tobject\tthread\tframe");
    for root in heap.gc_roots()? {
        if let Some(kind) = args.kind {
            if root.kind != kind {
                continue;
            }
        }
        let thread = root
            .thread_serial()
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let frame = root
            .frame_number()
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        println!("{}\t0x{:x}\t{}\t{}", root.kind, root.object_id, thread, frame);
    }
    Ok(())
}

fn classes(heap: &Heap, args: &ClassesArgs) -> Result<()> {
    if args.counts {
        println!("class\tname\tinstances");
    } else {
        println!("class\tname");
    }
    for class in heap.classes()? {
        let id = class.id()?;
        let name = class
            .name()?
            .unwrap_or_else(|| format!("class@0x{:x}", id));
        if let Some(filter) = &args.filter {
            if !name.contains(filter.as_str()) {
                continue;
            }
        }
        if args.counts {
            let count = heap.instances_of(id, false)?.len();
            println!("0x{:x}\t{}\t{}", id, name, count);
        } else {
            println!("0x{:x}\t{}", id, name);
        }
    }
    Ok(())
}

fn instance(heap: &Heap, args: &InstanceArgs) -> Result<()> {
    let id = parse_object_id(&args.id)?;
    match heap.instance_by_id(id)? {
        Some(HeapObject::Instance(instance)) => {
            let class_name = instance
                .class()?
                .map(|c| c.name())
                .transpose()?
                .flatten()
                .unwrap_or_else(|| format!("class@0x{:x}", instance.class_id().unwrap_or(0)));
            println!("instance 0x{:x} of {}", id, class_name);
            if let Some(root) = heap.gc_root(id)? {
                println!("gc root\t{}", root.kind);
            }
            for (name, value) in instance.fields()? {
                println!("{}\t{}", name, format_value(&value));
            }
        }
        Some(HeapObject::ObjectArray(array)) => {
            println!("object array 0x{:x}, {} element(s)", id, array.length()?);
            for i in 0..array.length()? {
                let item = array.item(i)?;
                println!(
                    "[{}]\t{}",
                    i,
                    format_value(&FieldValue::Object(item.instance_id()?))
                );
            }
        }
        Some(HeapObject::PrimitiveArray(array)) => {
            println!(
                "primitive array 0x{:x}, {} {:?} element(s)",
                id,
                array.length()?,
                array.element_type()?
            );
        }
        None => match heap.class_by_id(id)? {
            Some(class) => {
                let name = class
                    .name()?
                    .unwrap_or_else(|| format!("class@0x{:x}", id));
                println!("class 0x{:x} {}", id, name);
                println!("instance size\t{}", class.instance_size()?);
            }
            None => {
                warn!("no object with id 0x{:x} in this dump", id);
            }
        },
    }
    Ok(())
}

fn reach(heap: &Heap) -> Result<()> {
    let set = heap.reachable()?;
    println!("objects\treachable\tunreachable");
    println!(
        "{}\t{}\t{}",
        set.total_count(),
        set.reachable_count(),
        set.unreachable_count()
    );
    Ok(())
}

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("analyzing {}", args.path);
    let heap = Heap::open_segment(&args.path, args.segment)?;
    match &args.command {
        Commands::Summary => summary(&heap),
        Commands::Roots(a) => roots(&heap, a),
        Commands::Classes(a) => classes(&heap, a),
        Commands::Instance(a) => instance(&heap, a),
        Commands::Reach => reach(&heap),
    }
}
