//! Output side: annotated-disassembly formatting, data-line
//! deduplication and file writing.

pub mod dedup;
pub mod format;
pub mod writer;

pub use dedup::{dedup_lines, dedup_lines_with_map, remap_range};
pub use format::{comment_box, format_object};
pub use writer::{write_module_outputs, write_object_outputs};
