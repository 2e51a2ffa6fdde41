//! Access-size inference from fixup-covered instruction lines.
//!
//! For every fixup whose source lies inside an instruction, the operand
//! text is probed for the fixup's target offset: an explicit `SIZE PTR`
//! before the bare offset gives a scalar access, `SIZE PTR [...+offset]`
//! gives a table access, and mov/cmp with a segment-prefixed direct
//! operand paired against a register gives the register's width. The
//! segment prefix is mandatory for the register pairing; without a
//! dereference the literal is just a value and tells us nothing.

use regex::Regex;
use tracing::{debug, error, warn};

use crate::core::fixup::{Fixup, FixupTable};
use crate::core::global::{Access, AccessSize, GlobalTable};
use crate::core::line::AsmLine;
use crate::core::object::{Object, ObjectKind};

const SEG: &str = "(?:cs:|ds:|es:|fs:|gs:|ss:)";
const REG32: &str = "(?:eax|ebx|ecx|edx|esp|ebp|esi|edi)";
const REG16: &str = "(?:ax|bx|cx|dx|sp|bp|si|di)";
const REG8: &str = "(?:al|ah|bl|bh|cl|ch|dl|dh)";

/// `PTR` probes embed the target offset, so they are built per fixup;
/// `{}` is replaced by the offset literal before compilation. Group 1
/// captures the size keyword; the second form marks a table access.
const PTR_PROBES: [(&str, bool); 2] = [
    (r"([A-Z]+) PTR (?:cs:|ds:|es:|fs:|gs:|ss:)?{}", false),
    (r"([A-Z]+) PTR (?:cs:|ds:|es:|fs:|gs:|ss:)?\[.+{}\]", true),
];

fn compile(pattern: String) -> Option<Regex> {
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!(pattern, error = %e, "access size pattern failed to compile");
            None
        }
    }
}

/// Infers the access implied by one fixup inside one instruction line.
fn infer(asm: &AsmLine, operand: &str, fixup: &Fixup) -> Option<Access> {
    let literal = format!("0x{:x}", fixup.target_offset);

    // Bail out if the offset value appears more than once; there is no
    // way to tell the fixup site apart from an equal static number.
    let finder = compile(format!("0x0*{:x}", fixup.target_offset))?;
    if finder.find_iter(operand).count() > 1 {
        warn!(
            offset = format_args!("{:#x}", fixup.target_offset),
            line = %asm.text,
            "multiple matches for fixup target offset"
        );
        return None;
    }

    for (template, table) in PTR_PROBES {
        let re = compile(template.replace("{}", &literal))?;
        if let Some(caps) = re.captures(operand) {
            let keyword = &caps[1];
            let Some(size) = AccessSize::parse(keyword) else {
                warn!(keyword, "unknown access size keyword");
                return None;
            };
            return Some(Access { size, table });
        }
    }

    // Register pairing, both operand orders, segment prefix mandatory.
    let mnemonic = asm.text.split_whitespace().next().unwrap_or("");
    if mnemonic == "mov" || mnemonic == "cmp" {
        let pairings = [
            (REG32, AccessSize::Dword),
            (REG16, AccessSize::Word),
            (REG8, AccessSize::Byte),
        ];
        for (reg, size) in pairings {
            let load = compile(format!("{reg},{SEG}{literal}"))?;
            let store = compile(format!("{SEG}{literal},{reg}"))?;
            if load.is_match(operand) || store.is_match(operand) {
                return Some(Access { size, table: false });
            }
        }
    }
    None
}

/// Scans every code object's plain disassembly and records inferred
/// access sizes on the globals at the fixup targets.
pub fn analyze_access_sizes(objects: &[Object], fixups: &FixupTable, globals: &mut GlobalTable) {
    debug!("analyzing access sizes");
    let mut added = 0usize;
    for object in objects.iter().filter(|o| o.kind == ObjectKind::Code) {
        for line in &object.plain {
            let Some(asm) = AsmLine::parse(line) else { continue };
            let hits: Vec<Fixup> = fixups
                .covering(object.num, asm.offset, asm.end())
                .to_vec();
            if hits.is_empty() {
                continue;
            }
            let operand = asm
                .text
                .split_once(char::is_whitespace)
                .map(|(_, rest)| rest)
                .unwrap_or("");
            for fixup in &hits {
                let Some(access) = infer(&asm, operand, fixup) else {
                    continue;
                };
                if !globals.contains(fixup.target_object, fixup.target_offset) {
                    error!(
                        target_object = fixup.target_object,
                        target_offset = format_args!("{:#x}", fixup.target_offset),
                        "no global for fixup target while recording access size"
                    );
                    continue;
                }
                globals.record_access(fixup.target_object, fixup.target_offset, access);
                added += 1;
            }
        }
    }
    debug!(added, "access sizes recorded");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::global::Provenance;

    fn fixup(sofs: u32, tofs: u32) -> Fixup {
        Fixup {
            num: 1,
            source_object: 1,
            source_offset: sofs,
            target_object: 2,
            target_offset: tofs,
        }
    }

    fn probe(text: &str, tofs: u32) -> Option<Access> {
        let asm = AsmLine::new(0x10, vec![0x90; 6], text);
        let operand = text.split_once(' ').map(|(_, r)| r).unwrap_or("");
        infer(&asm, operand, &fixup(0x12, tofs))
    }

    #[test]
    fn test_explicit_ptr_scalar() {
        let access = probe("mov DWORD PTR ds:0x24850,eax", 0x24850).unwrap();
        assert_eq!(access.size, AccessSize::Dword);
        assert!(!access.table);
    }

    #[test]
    fn test_explicit_ptr_table() {
        let access = probe("mov al,BYTE PTR [edx+0x457e2]", 0x457e2).unwrap();
        assert_eq!(access.size, AccessSize::Byte);
        assert!(access.table);
        assert_eq!(access.to_string(), "BYTES");
    }

    #[test]
    fn test_register_pairing_requires_segment_prefix() {
        assert_eq!(
            probe("mov ax,ds:0x4ade", 0x4ade).map(|a| a.size),
            Some(AccessSize::Word)
        );
        // Without a dereference the literal is only a value.
        assert_eq!(probe("mov ax,0x4ade", 0x4ade), None);
    }

    #[test]
    fn test_ambiguous_offset_bails_out() {
        assert_eq!(probe("mov DWORD PTR ds:0x100,0x100", 0x100), None);
    }

    #[test]
    fn test_analyze_records_on_global() {
        let mut object = Object::new(1, ObjectKind::Code, vec![0x90; 0x40], 0x40, false, vec![]);
        object.plain =
            vec!["      10:\ta1 50 48 02 00\tmov eax,ds:0x24850".to_string()];
        let fixups = FixupTable::new(vec![Fixup {
            num: 1,
            source_object: 1,
            source_offset: 0x11,
            target_object: 2,
            target_offset: 0x24850,
        }]);
        let mut globals = GlobalTable::default();
        globals.insert(None, None, 2, 0x24850, ObjectKind::Data, Provenance::FixupData);
        analyze_access_sizes(&[object], &fixups, &mut globals);
        let id = globals.at(2, 0x24850)[0];
        assert_eq!(
            globals.get(id).access_sizes,
            vec![Access { size: AccessSize::Dword, table: false }]
        );
    }
}
