//! Core data model shared by the format readers, analyses and writers.

pub mod data_map;
pub mod fixup;
pub mod global;
pub mod line;
pub mod module;
pub mod object;
pub mod structure;

pub use data_map::{DataMap, DataMapEntry, MapSource};
pub use fixup::{Fixup, FixupTable};
pub use global::{Access, AccessSize, Global, GlobalId, GlobalTable, Provenance};
pub use line::AsmLine;
pub use module::{Module, ModuleRange};
pub use object::{BadCode, BadCodeKind, DecodeMode, Hint, Object, ObjectKind, StructMember};
pub use structure::{insert_item, InsertMode, ItemKind, StructureItem};
