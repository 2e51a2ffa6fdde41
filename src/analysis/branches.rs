//! Branch and reference resolution over synthesized instruction text.
//!
//! Three operand forms are recognized for call/jump/loop instructions:
//! a bare constant (direct, overridden by a single covering fixup), an
//! indirect operand with constant displacement (double indirection via
//! two fixup lookups), and a scaled-index operand with constant base
//! (branch table, walked at 4-byte stride). Everything else stays
//! unresolved. The same logic backs the inline analysis here and the
//! worklist tracer.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::fixup::FixupTable;
use crate::core::global::{GlobalTable, Provenance};
use crate::core::line::AsmLine;
use crate::core::object::{Object, ObjectKind};

static DIRECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^0x([0-9a-fA-F]+)$").unwrap_or_else(|e| panic!("direct operand regex: {e}"))
});

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]+ PTR (?:(?:cs|ds|es|fs|gs|ss):)?\[?0x([0-9a-fA-F]+)\]?$")
        .unwrap_or_else(|e| panic!("reference operand regex: {e}"))
});

static TABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Z]+ PTR )?(?:(?:cs|ds|es|fs|gs|ss):)?\[e?[a-z]{2,3}\*[248]\+0x([0-9a-fA-F]+)\]$")
        .unwrap_or_else(|e| panic!("table operand regex: {e}"))
});

/// A resolved branch table: its base location plus the accepted entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTable {
    /// Object and offset of the branching instruction.
    pub source_object: u32,
    pub source_offset: u32,
    /// Table origin, as resolved through the base fixup.
    pub base_object: u32,
    pub base_offset: u32,
    /// Accepted `(object, offset)` targets, in slot order.
    pub entries: Vec<(u32, u32)>,
}

/// What a branching instruction resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBranch {
    /// Not a call/jump/loop instruction.
    NotABranch,
    /// Recognized form, but unresolvable (ambiguous or missing fixups).
    Unresolved,
    /// One direct or double-indirect target.
    Target(u32, u32),
    /// Branch table walk result.
    Table(BranchTable),
}

fn is_branch(mnemonic: &str) -> bool {
    mnemonic == "call" || mnemonic.starts_with('j') || mnemonic.starts_with("loop")
}

/// Resolves one instruction line of `object` against the fixup table.
pub fn resolve_branch(asm: &AsmLine, object: u32, fixups: &FixupTable) -> ResolvedBranch {
    let (mnemonic, operand) = match asm.text.split_once(char::is_whitespace) {
        Some((m, o)) => (m, o.trim()),
        None => (asm.text.as_str(), ""),
    };
    if !is_branch(mnemonic) {
        return ResolvedBranch::NotABranch;
    }

    if let Some(caps) = DIRECT_RE.captures(operand) {
        let Ok(value) = u32::from_str_radix(&caps[1], 16) else {
            return ResolvedBranch::Unresolved;
        };
        // A covering fixup is authoritative; the encoded value is a stub.
        return match fixups.covering_single(object, asm.offset, asm.end()) {
            Ok(fixup) => ResolvedBranch::Target(fixup.target_object, fixup.target_offset),
            Err(0) => ResolvedBranch::Target(object, value),
            Err(n) => {
                warn!(
                    object,
                    offset = format_args!("{:#x}", asm.offset),
                    matches = n,
                    "multiple fixups cover direct branch, skipped"
                );
                ResolvedBranch::Unresolved
            }
        };
    }

    if REFERENCE_RE.is_match(operand) {
        let storage = match fixups.covering_single(object, asm.offset, asm.end()) {
            Ok(fixup) => (fixup.target_object, fixup.target_offset),
            Err(n) => {
                warn!(
                    object,
                    offset = format_args!("{:#x}", asm.offset),
                    matches = n,
                    "indirect branch displacement has no single fixup"
                );
                return ResolvedBranch::Unresolved;
            }
        };
        return match fixups.covering_single(storage.0, storage.1, storage.1 + 4) {
            Ok(fixup) => ResolvedBranch::Target(fixup.target_object, fixup.target_offset),
            Err(n) => {
                warn!(
                    object = storage.0,
                    offset = format_args!("{:#x}", storage.1),
                    matches = n,
                    "indirect branch storage has no single fixup"
                );
                ResolvedBranch::Unresolved
            }
        };
    }

    if TABLE_RE.is_match(operand) {
        let (base_object, base_offset) =
            match fixups.covering_single(object, asm.offset, asm.end()) {
                Ok(fixup) => (fixup.target_object, fixup.target_offset),
                Err(n) => {
                    warn!(
                        object,
                        offset = format_args!("{:#x}", asm.offset),
                        matches = n,
                        "branch table base has no single fixup"
                    );
                    return ResolvedBranch::Unresolved;
                }
            };
        let mut entries = Vec::new();
        let mut slot = base_offset;
        loop {
            // Acceptance: exactly one fixup in the slot, aligned to it.
            match fixups.covering_single(base_object, slot, slot + 4) {
                Ok(fixup) if fixup.source_offset == slot => {
                    entries.push((fixup.target_object, fixup.target_offset));
                }
                _ => break,
            }
            slot += 4;
        }
        debug!(
            object = base_object,
            base = format_args!("{:#x}", base_offset),
            entries = entries.len(),
            "branch table walked"
        );
        return ResolvedBranch::Table(BranchTable {
            source_object: object,
            source_offset: asm.offset,
            base_object,
            base_offset,
            entries,
        });
    }

    // Common and harmless, e.g. `jmp ebx`.
    debug!(object, offset = format_args!("{:#x}", asm.offset), operand, "unrecognized branch operand");
    ResolvedBranch::Unresolved
}

fn add_target(
    target: (u32, u32),
    kinds: &BTreeMap<u32, ObjectKind>,
    globals: &mut GlobalTable,
) {
    if globals.contains(target.0, target.1) {
        return;
    }
    let kind = kinds.get(&target.0).copied().unwrap_or(ObjectKind::Code);
    globals.insert(None, None, target.0, target.1, kind, Provenance::BranchAnalysis);
}

/// Inline analysis: scans the plain disassembly of every code object and
/// adds a global for each newly resolved target. Returns the branch
/// tables encountered, for the dumps.
pub fn analyze_branches(
    objects: &[Object],
    fixups: &FixupTable,
    globals: &mut GlobalTable,
) -> Vec<BranchTable> {
    let kinds: BTreeMap<u32, ObjectKind> = objects.iter().map(|o| (o.num, o.kind)).collect();
    let mut tables = Vec::new();
    let before = globals.len();
    for object in objects.iter().filter(|o| o.kind == ObjectKind::Code) {
        debug!(object = object.num, "analyzing branches");
        for line in &object.plain {
            let Some(asm) = AsmLine::parse(line) else { continue };
            match resolve_branch(&asm, object.num, fixups) {
                ResolvedBranch::Target(obj, off) => add_target((obj, off), &kinds, globals),
                ResolvedBranch::Table(table) => {
                    for &entry in &table.entries {
                        add_target(entry, &kinds, globals);
                    }
                    tables.push(table);
                }
                ResolvedBranch::NotABranch | ResolvedBranch::Unresolved => {}
            }
        }
    }
    debug!(
        added = globals.len() - before,
        tables = tables.len(),
        "branch analysis finished"
    );
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixup::Fixup;

    fn fixup(num: u32, so: u32, sofs: u32, to: u32, tofs: u32) -> Fixup {
        Fixup {
            num,
            source_object: so,
            source_offset: sofs,
            target_object: to,
            target_offset: tofs,
        }
    }

    fn line(offset: u32, len: usize, text: &str) -> AsmLine {
        AsmLine::new(offset, vec![0x90; len], text)
    }

    #[test]
    fn test_direct_without_fixup() {
        let fixups = FixupTable::new(vec![]);
        let asm = line(0x10, 5, "call 0x39bd");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::Target(1, 0x39bd));
    }

    #[test]
    fn test_direct_fixup_overrides_stub_value() {
        let fixups = FixupTable::new(vec![fixup(1, 1, 0x11, 2, 0x8000)]);
        let asm = line(0x10, 5, "jmp 0x39bd");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::Target(2, 0x8000));
    }

    #[test]
    fn test_direct_ambiguous_fixups_unresolved() {
        let fixups = FixupTable::new(vec![
            fixup(1, 1, 0x11, 2, 0x8000),
            fixup(2, 1, 0x13, 2, 0x9000),
        ]);
        let asm = line(0x10, 6, "call 0x39bd");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::Unresolved);
    }

    #[test]
    fn test_reference_double_indirection() {
        // Displacement fixup points at a storage dword in object 2, whose
        // own fixup points at the real target (import stub pattern).
        let fixups = FixupTable::new(vec![
            fixup(1, 1, 0x12, 2, 0x100),
            fixup(2, 2, 0x100, 1, 0x4000),
        ]);
        let asm = line(0x10, 6, "call DWORD PTR ds:0x24850");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::Target(1, 0x4000));
    }

    #[test]
    fn test_branch_table_walk_stops_without_fixup() {
        // Base fixup plus three table slots; the fourth slot has none.
        let fixups = FixupTable::new(vec![
            fixup(1, 1, 0x12, 2, 0x200),
            fixup(2, 2, 0x200, 1, 0x1000),
            fixup(3, 2, 0x204, 1, 0x2000),
            fixup(4, 2, 0x208, 1, 0x3000),
        ]);
        let asm = line(0x10, 7, "jmp DWORD PTR [eax*4+0x200]");
        match resolve_branch(&asm, 1, &fixups) {
            ResolvedBranch::Table(table) => {
                assert_eq!(table.base_object, 2);
                assert_eq!(table.base_offset, 0x200);
                assert_eq!(
                    table.entries,
                    vec![(1, 0x1000), (1, 0x2000), (1, 0x3000)]
                );
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_branch_table_stops_on_misaligned_fixup() {
        let fixups = FixupTable::new(vec![
            fixup(1, 1, 0x12, 2, 0x200),
            fixup(2, 2, 0x200, 1, 0x1000),
            fixup(3, 2, 0x205, 1, 0x2000),
        ]);
        let asm = line(0x10, 7, "call DWORD PTR [ebx*4+0x200]");
        match resolve_branch(&asm, 1, &fixups) {
            ResolvedBranch::Table(table) => assert_eq!(table.entries, vec![(1, 0x1000)]),
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_register_operand_unresolved() {
        let fixups = FixupTable::new(vec![]);
        let asm = line(0x10, 2, "jmp ebx");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::Unresolved);
        let asm = line(0x12, 2, "mov eax,ebx");
        assert_eq!(resolve_branch(&asm, 1, &fixups), ResolvedBranch::NotABranch);
    }

    #[test]
    fn test_analyze_adds_globals_for_new_targets() {
        let mut object = Object::new(1, ObjectKind::Code, vec![0x90; 0x100], 0x100, false, vec![]);
        object.plain = vec![
            "      10:\te8 a8 29 00 00\tcall 0x39bd".to_string(),
            "      15:\tc3\tret".to_string(),
        ];
        let fixups = FixupTable::new(vec![]);
        let mut globals = GlobalTable::default();
        let tables = analyze_branches(&[object], &fixups, &mut globals);
        assert!(tables.is_empty());
        assert_eq!(globals.len(), 1);
        let id = globals.at(1, 0x39bd)[0];
        assert_eq!(globals.get(id).source, Provenance::BranchAnalysis);
    }
}
