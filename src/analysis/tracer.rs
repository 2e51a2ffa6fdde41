//! Standalone execution-flow tracer.
//!
//! Starting from an entry point, hypothesized code blocks are pulled off
//! a worklist, disassembled, and scanned with the branch resolver; every
//! newly resolved target becomes a new block. A block's end is known
//! only after disassembly: the first unconditional flow break (`ret`,
//! `jmp`, `iret`) terminates it, otherwise it runs to the object end.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::branches::{resolve_branch, ResolvedBranch};
use crate::core::fixup::FixupTable;
use crate::core::line::AsmLine;
use crate::core::object::Object;
use crate::disasm::Disassembler;

/// A hypothesized code region discovered by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub object: u32,
    pub start: u32,
    /// Filled in after the block has been disassembled.
    pub end: Option<u32>,
    pub lines: Vec<String>,
}

fn ends_flow(mnemonic: &str) -> bool {
    matches!(mnemonic, "ret" | "retf" | "iret" | "iretd" | "jmp")
}

/// Traces reachable code from `entry` (object, offset). Returns the
/// disassembled blocks sorted by (object, start).
pub fn trace_from(
    objects: &[Object],
    fixups: &FixupTable,
    dis: &dyn Disassembler,
    entry: (u32, u32),
) -> Vec<Block> {
    let mut worklist = vec![entry];
    let mut seen: BTreeSet<(u32, u32)> = BTreeSet::new();
    seen.insert(entry);
    let mut blocks = Vec::new();

    while let Some((object_num, start)) = worklist.pop() {
        let Some(object) = objects.iter().find(|o| o.num == object_num) else {
            warn!(object = object_num, start = format_args!("{:#x}", start),
                "block in unknown object dropped");
            continue;
        };
        if start >= object.size() {
            warn!(object = object_num, start = format_args!("{:#x}", start),
                "block start beyond object end dropped");
            continue;
        }
        let mut block = Block { object: object_num, start, end: None, lines: Vec::new() };

        let output = match dis.disassemble_range(&object.data, start, object.size()) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(object = object_num, start = format_args!("{:#x}", start), error = %e,
                    "disassembler call failed, block left unresolved");
                blocks.push(block);
                continue;
            }
        };

        let enqueue = |target: (u32, u32), seen: &mut BTreeSet<(u32, u32)>,
                           worklist: &mut Vec<(u32, u32)>| {
            if seen.insert(target) {
                worklist.push(target);
            }
        };

        for line in output {
            let asm = AsmLine::parse(&line);
            block.lines.push(line);
            let Some(asm) = asm else { continue };
            block.end = Some(asm.end());
            match resolve_branch(&asm, object_num, fixups) {
                ResolvedBranch::Target(obj, off) => {
                    enqueue((obj, off), &mut seen, &mut worklist)
                }
                ResolvedBranch::Table(table) => {
                    for &e in &table.entries {
                        enqueue(e, &mut seen, &mut worklist);
                    }
                }
                ResolvedBranch::NotABranch | ResolvedBranch::Unresolved => {}
            }
            let mnemonic = asm.text.split_whitespace().next().unwrap_or("");
            if ends_flow(mnemonic) {
                break;
            }
        }
        blocks.push(block);
    }

    blocks.sort_by_key(|b| (b.object, b.start));
    debug!(blocks = blocks.len(), "trace finished");
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::object::ObjectKind;
    use crate::disasm::iced::IcedDisassembler;

    #[test]
    fn test_trace_follows_direct_call() {
        // 0x0: call 0x10; ret. 0x10: ret.
        let mut data = vec![0x90u8; 0x20];
        data[0] = 0xe8; // call rel32 = 0x0b -> 0x10
        data[1..5].copy_from_slice(&0x0bu32.to_le_bytes());
        data[5] = 0xc3;
        data[0x10] = 0xc3;
        let object = Object::new(1, ObjectKind::Code, data, 0x20, false, vec![]);
        let fixups = FixupTable::new(vec![]);
        let blocks = trace_from(&[object], &fixups, &IcedDisassembler::default(), (1, 0));
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].end, Some(6));
        assert_eq!(blocks[1].start, 0x10);
        assert_eq!(blocks[1].end, Some(0x11));
    }

    #[test]
    fn test_trace_does_not_revisit_blocks() {
        // 0x0: jmp 0x0 (self loop).
        let mut data = vec![0x90u8; 0x10];
        data[0] = 0xeb; // jmp rel8
        data[1] = 0xfe; // -2 -> 0x0
        let object = Object::new(1, ObjectKind::Code, data, 0x10, false, vec![]);
        let fixups = FixupTable::new(vec![]);
        let blocks = trace_from(&[object], &fixups, &IcedDisassembler::default(), (1, 0));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].end, Some(2));
    }
}
