use clap::{Parser, Subcommand};

use crate::roots::GcRootKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the heap dump file
    #[arg(required = true)]
    pub path: String,

    /// Dump index within a multi-dump file (0-based)
    #[arg(short, long, default_value_t = 0)]
    pub segment: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser, Debug, Clone)]
pub struct RootsArgs {
    /// Only show roots of this kind
    #[arg(short, long, value_enum)]
    pub kind: Option<GcRootKind>,
}

#[derive(Parser, Debug, Clone)]
pub struct ClassesArgs {
    /// Only show classes whose name contains this substring
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Also count the instances of each class (triggers a full scan)
    #[arg(short, long, default_value_t = false)]
    pub counts: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct InstanceArgs {
    /// Object id, hex (0x1a2b) or decimal
    #[arg(short, long)]
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Summary,
    Roots(RootsArgs),
    Classes(ClassesArgs),
    Instance(InstanceArgs),
    Reach,
}
