//! Annotated disassembly reconstruction for 32-bit LE/LX protected-mode
//! DOS executables.
//!
//! The library turns three inputs into per-object and per-module
//! annotated disassembly listings:
//! - a structured header/object/module/global tree produced by an
//!   external report parser (`formats::le::header`),
//! - the raw fixup-section bytes of the executable
//!   (`formats::le::fixups`),
//! - per-range instruction text from a disassembler backend (`disasm`).
//!
//! `pipeline::run` wires the stages together: fixup decoding, data-map
//! construction, disassembly synthesis, branch/reference/access-size
//! analysis, structure building and naming, formatting and data-line
//! deduplication.

/// Core data model: objects, fixups, globals, modules, data maps,
/// structure items and parsed listing lines.
pub mod core;

/// Analysis passes: branch resolution, access sizes, data maps,
/// structure building, execution-flow tracing.
pub mod analysis;

/// Disassembler backends and the disassembly synthesizer.
pub mod disasm;

/// Error types.
pub mod error;

/// Input formats (LE/LX header tree and fixup section).
pub mod formats;

/// Tracing/logging setup.
pub mod logging;

/// Formatting, deduplication and file output.
pub mod output;

/// Batch orchestration.
pub mod pipeline;

pub use error::{LxError, Result};
pub use pipeline::{run, run_files, Disassembly};
