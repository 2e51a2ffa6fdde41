//! Linear-executable (LE/LX) input layer.
//!
//! `header` consumes the structured header tree produced by the external
//! report parser; `fixups` decodes the raw fixup-section bytes that the
//! tree points at.

pub mod fixups;
pub mod header;

pub use fixups::{build_table, decode_fixups, DecodedFixups, FixupRecord, FixupTarget};
pub use header::{FixupLocation, HeaderInput, ObjectFlags};
