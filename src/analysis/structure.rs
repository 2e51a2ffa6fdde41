//! Structure builder: merges every discovered entity of an object into
//! one start-sorted item list, then finalizes it in a single forward
//! pass (parent tracking, synthesized names, deferred sizing).
//!
//! Name counters are keyed by parent name, not label, and are shared
//! across objects so items under a parent that spans objects keep
//! consecutive numbers.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::global::{GlobalTable, Provenance};
use crate::core::module::Module;
use crate::core::object::{Object, ObjectKind};
use crate::core::structure::{insert_item, InsertMode, ItemKind, StructureItem};

/// Merges object bounds, virtual padding, module ranges, hints, globals
/// and bad-code regions into the object's structure list.
pub fn build_structure(object: &mut Object, modules: &[Module], globals: &GlobalTable) {
    debug!(object = object.num, "building structure");
    let mut items: Vec<StructureItem> = Vec::new();

    insert_item(
        &mut items,
        StructureItem::new(ItemKind::ObjectStart { objnum: object.num }, 0)
            .with_range(object.size())
            .with_names(format!("Object {}", object.num), format!("object_{}", object.num)),
        InsertMode::Default,
    );

    if object.padding() > 0 {
        insert_item(
            &mut items,
            StructureItem::new(
                ItemKind::VirtualPaddingStart { size: object.padding() },
                object.stored_size,
            )
            .with_range(object.size())
            .with_names("Virtual padding", "virtual_padding"),
            InsertMode::Default,
        );
        insert_item(
            &mut items,
            StructureItem::new(ItemKind::VirtualPaddingEnd, object.size())
                .with_names("Virtual padding", "virtual_padding"),
            InsertMode::Default,
        );
    }

    for module in modules {
        for range in module.ranges_in(object.num) {
            let start_index = insert_item(
                &mut items,
                StructureItem::new(ItemKind::ModuleStart { modnum: module.num }, range.offset)
                    .with_range(range.end())
                    .with_names(module.name.clone(), module.label()),
                InsertMode::Default,
            );
            insert_item(
                &mut items,
                StructureItem::new(ItemKind::ModuleEnd { modnum: module.num }, range.end())
                    .with_names(module.name.clone(), module.label()),
                InsertMode::EndBiased { start_index },
            );
        }
    }

    for hint in &object.hints {
        let start_index = insert_item(
            &mut items,
            StructureItem::new(
                ItemKind::HintStart {
                    hintnum: hint.num,
                    kind: hint.kind,
                    mode: hint.mode.clone(),
                    length: hint.length(),
                    comment: hint.comment.clone(),
                },
                hint.start,
            )
            .with_range(hint.end)
            .with_names(format!("Hint {}", hint.num), format!("hint_{}", hint.num)),
            InsertMode::StartBiased,
        );
        insert_item(
            &mut items,
            StructureItem::new(ItemKind::HintEnd { hintnum: hint.num }, hint.end),
            InsertMode::EndBiased { start_index },
        );
    }

    for global in globals.iter_sorted() {
        if global.object != object.num {
            continue;
        }
        let kind = match (global.kind, global.source) {
            (ObjectKind::Code, Provenance::DebugInfo) => ItemKind::Function,
            (ObjectKind::Code, Provenance::FixupData) => ItemKind::Reference,
            (ObjectKind::Code, Provenance::BranchAnalysis) => ItemKind::Branch,
            (ObjectKind::Data, _) => ItemKind::Variable,
        };
        let mut item = StructureItem::new(kind, global.offset).with_source(global.source);
        if let Some(name) = &global.name {
            item = item.with_names(name.clone(), name.clone());
        }
        item.access_sizes = global.access_sizes.clone();
        item.global = Some(global.id);
        insert_item(&mut items, item, InsertMode::Default);
    }

    for bad in &object.bad_code {
        let start_index = insert_item(
            &mut items,
            StructureItem::new(
                ItemKind::BadCodeStart {
                    badnum: bad.num,
                    kind: bad.kind,
                    length: bad.length(),
                    context: bad.context.clone(),
                },
                bad.start,
            )
            .with_range(bad.end)
            .with_names(format!("Bad code {}", bad.num), format!("bad_code_{}", bad.num)),
            InsertMode::StartBiased,
        );
        insert_item(
            &mut items,
            StructureItem::new(ItemKind::BadCodeEnd { badnum: bad.num }, bad.end),
            InsertMode::EndBiased { start_index },
        );
    }

    insert_item(
        &mut items,
        StructureItem::new(ItemKind::ObjectEnd { objnum: object.num }, object.size())
            .with_names(format!("Object {}", object.num), format!("object_{}", object.num)),
        InsertMode::Default,
    );

    object.structure = items;
}

/// Per-parent, per-kind counters for synthesized item names. One
/// instance spans all objects of a run.
#[derive(Debug, Clone, Default)]
pub struct NameCounters {
    counts: BTreeMap<(String, &'static str), u32>,
}

impl NameCounters {
    fn next(&mut self, parent: &str, kind: &'static str) -> u32 {
        let n = self.counts.entry((parent.to_string(), kind)).or_insert(0);
        *n += 1;
        *n
    }
}

fn is_parent_kind(item: &StructureItem) -> bool {
    matches!(
        item.kind,
        ItemKind::ObjectStart { .. } | ItemKind::ModuleStart { .. } | ItemKind::Function
    ) || (item.kind == ItemKind::Variable && item.is_debug_sourced())
}

fn is_scope_terminator(item: &StructureItem) -> bool {
    matches!(
        item.kind,
        ItemKind::ObjectStart { .. }
            | ItemKind::ObjectEnd { .. }
            | ItemKind::ModuleStart { .. }
            | ItemKind::ModuleEnd { .. }
            | ItemKind::Function
    ) || (item.kind == ItemKind::Variable && item.is_debug_sourced())
}

/// Close the item at `index` at `end`, unless already sized, and carry
/// the length over to its originating global.
fn close_item(items: &mut [StructureItem], index: usize, end: u32, globals: &mut GlobalTable) {
    let item = &mut items[index];
    if item.end.is_some() {
        return;
    }
    let end = end.max(item.start);
    item.end = Some(end);
    item.length = Some(end - item.start);
    if let Some(id) = item.global {
        globals.get_mut(id).length = Some(end - item.start);
    }
}

/// Finalizes an object's structure: names anonymous items, sizes
/// open-ended ones, and back-fills names/modules onto globals.
pub fn finalize_structure(
    object: &mut Object,
    globals: &mut GlobalTable,
    counters: &mut NameCounters,
) {
    debug!(object = object.num, items = object.structure.len(), "finalizing structure");
    let items = &mut object.structure;
    let mut parent: Option<(String, String)> = None;
    let mut current_module: Option<u32> = None;
    let mut pending: Vec<usize> = Vec::new();

    for i in 0..items.len() {
        if let ItemKind::ModuleStart { modnum } = items[i].kind {
            current_module = Some(modnum);
        }

        // Naming.
        if items[i].name.is_none() || items[i].label.is_none() {
            match &parent {
                Some((pname, plabel)) => {
                    let word = items[i].kind.word();
                    let n = counters.next(pname, word);
                    let label_word: String = word.replace(' ', "_");
                    items[i].name = Some(format!("{pname} {word} {n}"));
                    items[i].label = Some(format!("{plabel}_{label_word}_{n}"));
                }
                None => {
                    warn!(
                        object = object.num,
                        start = format_args!("{:#x}", items[i].start),
                        kind = items[i].kind.word(),
                        "anonymous item without parent scope left unnamed"
                    );
                }
            }
        }

        // Back-fill the originating global.
        if let Some(id) = items[i].global {
            let global = globals.get_mut(id);
            if global.name.is_none() {
                global.name = items[i].label.clone();
            }
            if global.module.is_none() {
                global.module = current_module;
            }
        }

        if is_parent_kind(&items[i]) {
            if let (Some(name), Some(label)) = (items[i].name.clone(), items[i].label.clone()) {
                parent = Some((name, label));
            }
        }

        // Sizing.
        let start = items[i].start;
        if is_scope_terminator(&items[i]) {
            for &p in &pending {
                close_item(items, p, start, globals);
            }
            pending.clear();
            match items[i].kind {
                ItemKind::ModuleEnd { .. } => current_module = None,
                ItemKind::Function => pending.push(i),
                ItemKind::Variable => pending.push(i),
                _ => {}
            }
        } else if matches!(
            items[i].kind,
            ItemKind::Branch | ItemKind::Reference | ItemKind::Variable
        ) {
            // A bare item closes the most recently pending bare item,
            // whatever its kind, unless that one came from debug info.
            if let Some(&p) = pending.last() {
                let bare = matches!(
                    items[p].kind,
                    ItemKind::Branch | ItemKind::Reference | ItemKind::Variable
                );
                if bare && !items[p].is_debug_sourced() {
                    close_item(items, p, start, globals);
                    pending.pop();
                }
            }
            pending.push(i);
        }
    }

    if !pending.is_empty() {
        warn!(object = object.num, left = pending.len(), "pending items survived finalization");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::module::ModuleRange;

    fn object_with(kind: ObjectKind, size: usize) -> Object {
        Object::new(1, kind, vec![0x90; size], size as u32, false, vec![])
    }

    fn build(globals: &GlobalTable, modules: &[Module]) -> Object {
        let mut object = object_with(ObjectKind::Code, 0x100);
        build_structure(&mut object, modules, globals);
        object
    }

    #[test]
    fn test_build_orders_items_and_links_globals() {
        let mut globals = GlobalTable::default();
        let id = globals.insert(
            Some("main_".into()),
            Some(3),
            1,
            0x10,
            ObjectKind::Code,
            Provenance::DebugInfo,
        );
        let modules = vec![Module::new(
            3,
            "main.c".into(),
            vec![ModuleRange { object: 1, offset: 0, size: 0x100 }],
        )];
        let object = build(&globals, &modules);
        let kinds: Vec<&'static str> = object.structure.iter().map(|s| s.kind.word()).collect();
        assert_eq!(
            kinds,
            vec!["object start", "module start", "function", "module end", "object end"]
        );
        assert_eq!(object.structure[2].global, Some(id));
    }

    #[test]
    fn test_finalize_names_and_sizes_branches() {
        let mut globals = GlobalTable::default();
        globals.insert(Some("main_".into()), None, 1, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals.insert(None, None, 1, 0x20, ObjectKind::Code, Provenance::BranchAnalysis);
        globals.insert(None, None, 1, 0x40, ObjectKind::Code, Provenance::BranchAnalysis);
        let mut object = build(&globals, &[]);
        let mut counters = NameCounters::default();
        finalize_structure(&mut object, &mut globals, &mut counters);

        let branches: Vec<&StructureItem> = object
            .structure
            .iter()
            .filter(|s| s.kind == ItemKind::Branch)
            .collect();
        assert_eq!(branches[0].name.as_deref(), Some("main_ branch 1"));
        assert_eq!(branches[0].label.as_deref(), Some("main__branch_1"));
        assert_eq!(branches[1].name.as_deref(), Some("main_ branch 2"));
        // First branch is closed by the second, second by object end.
        assert_eq!(branches[0].end, Some(0x20 + 0x20));
        assert_eq!(branches[1].end, Some(0x100));
        // Names propagate to the anonymous globals.
        let g = globals.at(1, 0x20)[0];
        assert_eq!(globals.get(g).name.as_deref(), Some("main__branch_1"));
    }

    #[test]
    fn test_bare_item_closes_most_recent_pending_of_any_kind() {
        let mut globals = GlobalTable::default();
        globals.insert(Some("f".into()), None, 1, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals.insert(None, None, 1, 0x10, ObjectKind::Code, Provenance::BranchAnalysis);
        globals.insert(None, None, 1, 0x20, ObjectKind::Data, Provenance::FixupData);
        globals.insert(None, None, 1, 0x30, ObjectKind::Code, Provenance::BranchAnalysis);
        let mut object = build(&globals, &[]);
        finalize_structure(&mut object, &mut globals, &mut NameCounters::default());

        let end_at = |kind: ItemKind, start: u32| {
            object
                .structure
                .iter()
                .find(|s| s.kind == kind && s.start == start)
                .unwrap()
                .end
        };
        // The variable at 0x20 closes the branch at 0x10, and the bare
        // branch at 0x30 closes the variable, not the earlier branch.
        assert_eq!(end_at(ItemKind::Branch, 0x10), Some(0x20));
        assert_eq!(end_at(ItemKind::Variable, 0x20), Some(0x30));
        assert_eq!(end_at(ItemKind::Branch, 0x30), Some(0x100));
    }

    #[test]
    fn test_finalize_function_sized_by_next_function() {
        let mut globals = GlobalTable::default();
        globals.insert(Some("f1".into()), None, 1, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals.insert(Some("f2".into()), None, 1, 0x30, ObjectKind::Code, Provenance::DebugInfo);
        let mut object = build(&globals, &[]);
        finalize_structure(&mut object, &mut globals, &mut NameCounters::default());
        let funcs: Vec<&StructureItem> = object
            .structure
            .iter()
            .filter(|s| s.kind == ItemKind::Function)
            .collect();
        assert_eq!(funcs[0].end, Some(0x30));
        assert_eq!(funcs[1].end, Some(0x100));
        let f1 = globals.at(1, 0x0)[0];
        assert_eq!(globals.get(f1).length, Some(0x30));
    }

    #[test]
    fn test_finalize_is_deterministic() {
        let mut globals_a = GlobalTable::default();
        globals_a.insert(Some("f".into()), None, 1, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals_a.insert(None, None, 1, 0x10, ObjectKind::Code, Provenance::BranchAnalysis);
        let mut globals_b = globals_a.clone();

        let mut first = build(&globals_a, &[]);
        let mut second = build(&globals_b, &[]);
        finalize_structure(&mut first, &mut globals_a, &mut NameCounters::default());
        finalize_structure(&mut second, &mut globals_b, &mut NameCounters::default());
        assert_eq!(first.structure, second.structure);
    }

    #[test]
    fn test_counters_shared_across_objects() {
        // Same parent name in two objects keeps numbering consecutive.
        let mut globals = GlobalTable::default();
        globals.insert(Some("lib".into()), None, 1, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals.insert(None, None, 1, 0x10, ObjectKind::Code, Provenance::BranchAnalysis);
        globals.insert(Some("lib".into()), None, 2, 0x0, ObjectKind::Code, Provenance::DebugInfo);
        globals.insert(None, None, 2, 0x10, ObjectKind::Code, Provenance::BranchAnalysis);

        let mut counters = NameCounters::default();
        let mut obj1 = object_with(ObjectKind::Code, 0x40);
        build_structure(&mut obj1, &[], &globals);
        finalize_structure(&mut obj1, &mut globals, &mut counters);
        let mut obj2 = Object::new(2, ObjectKind::Code, vec![0x90; 0x40], 0x40, false, vec![]);
        build_structure(&mut obj2, &[], &globals);
        finalize_structure(&mut obj2, &mut globals, &mut counters);

        let branch2 = obj2
            .structure
            .iter()
            .find(|s| s.kind == ItemKind::Branch)
            .unwrap();
        assert_eq!(branch2.name.as_deref(), Some("lib branch 2"));
    }

    #[test]
    fn test_virtual_padding_items() {
        let mut object = Object::new(1, ObjectKind::Data, vec![0x41; 0x80], 0x100, false, vec![]);
        build_structure(&mut object, &[], &GlobalTable::default());
        let kinds: Vec<&'static str> = object.structure.iter().map(|s| s.kind.word()).collect();
        assert_eq!(
            kinds,
            vec!["object start", "virtual padding start", "virtual padding end", "object end"]
        );
        assert_eq!(object.structure[1].start, 0x80);
        assert_eq!(object.structure[1].length, Some(0x80));
    }
}
