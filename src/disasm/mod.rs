//! Instruction-level disassembly adapters.
//!
//! Always-on adapters:
//! - objdump as an external process (the reference backend)
//! - iced-x86 in-process for x86
//!
//! Both produce the same columnar line shape consumed by the synthesizer;
//! lines failing that shape are per-line decode failures, not whole-call
//! failures.

pub mod data;
pub mod iced;
pub mod objdump;
pub mod synth;

use crate::error::Result;

/// Synchronous per-range disassembler over a raw byte buffer.
pub trait Disassembler {
    /// Disassembles `[start, end)` of `data`, one columnar line per
    /// instruction. A failure marks only this range unresolved.
    fn disassemble_range(&self, data: &[u8], start: u32, end: u32) -> Result<Vec<String>>;

    fn name(&self) -> &str;
}
