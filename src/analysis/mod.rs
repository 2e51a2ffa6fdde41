//! Analysis passes over decoded objects, fixups and globals.
//!
//! The passes run in a fixed order (see `pipeline`): fixup targets become
//! globals, code objects get their data maps and plain disassembly, branch
//! and access-size analysis enrich the global table, the structure builder
//! merges everything into per-object item lists, and data objects get a
//! second data-map pass driven by the finalized structure.

pub mod access;
pub mod branches;
pub mod map;
pub mod structure;
pub mod tracer;

pub use access::analyze_access_sizes;
pub use branches::{analyze_branches, resolve_branch, BranchTable, ResolvedBranch};
pub use map::{add_fixup_globals, build_code_map, build_data_map, compute_global_spans};
pub use structure::{build_structure, finalize_structure, NameCounters};
pub use tracer::{trace_from, Block};
