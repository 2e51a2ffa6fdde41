//! Data-map construction.
//!
//! Code objects get their map before disassembly: whole-object default,
//! module ranges, debug globals sized by next-global distance (clipped to
//! module bounds), hints last. Data objects get a second pass only after
//! code analysis, because their entry modes depend on observed access
//! sizes carried by the finalized structure items.

use std::collections::BTreeMap;

use tracing::{debug, error, warn};

use crate::core::data_map::{DataMap, DataMapEntry, MapSource};
use crate::core::fixup::FixupTable;
use crate::core::global::{AccessSize, GlobalId, GlobalTable, Provenance};
use crate::core::module::Module;
use crate::core::object::{DecodeMode, Object, ObjectKind};
use crate::core::structure::ItemKind;

/// Adds a global for every fixup target not already known. Kind follows
/// the target object's kind; targets in unknown objects are skipped.
pub fn add_fixup_globals(fixups: &FixupTable, objects: &[Object], globals: &mut GlobalTable) {
    let kinds: BTreeMap<u32, ObjectKind> = objects.iter().map(|o| (o.num, o.kind)).collect();
    let before = globals.len();
    for fixup in fixups.iter() {
        if globals.contains(fixup.target_object, fixup.target_offset) {
            continue;
        }
        let Some(&kind) = kinds.get(&fixup.target_object) else {
            warn!(
                object = fixup.target_object,
                offset = format_args!("{:#x}", fixup.target_offset),
                "fixup targets unknown object, no global added"
            );
            continue;
        };
        globals.insert(
            None,
            None,
            fixup.target_object,
            fixup.target_offset,
            kind,
            Provenance::FixupData,
        );
    }
    debug!(added = globals.len() - before, total = globals.len(), "globals from fixup targets");
}

/// Per-module `(start, end)` bounds inside one object, sorted descending.
/// Descending order lets the clipping loop find the innermost range that
/// still starts at or before a global.
fn module_bounds(object_num: u32, modules: &[Module]) -> BTreeMap<u32, Vec<(u32, u32)>> {
    let mut bounds: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
    for module in modules {
        let mut ranges: Vec<(u32, u32)> = module
            .ranges_in(object_num)
            .map(|r| (r.offset, r.end()))
            .collect();
        if ranges.is_empty() {
            continue;
        }
        ranges.sort();
        ranges.reverse();
        bounds.insert(module.num, ranges);
    }
    bounds
}

/// Sizes each debug-info global of `object` by the distance to the next
/// one (object end for the last), clipped to its module's range bounds.
pub fn compute_global_spans(object: &Object, modules: &[Module], globals: &mut GlobalTable) {
    let ids: Vec<GlobalId> = globals
        .iter_sorted()
        .filter(|g| g.object == object.num && g.source == Provenance::DebugInfo)
        .map(|g| g.id)
        .collect();
    let offsets: Vec<u32> = ids.iter().map(|&id| globals.get(id).offset).collect();
    let bounds = module_bounds(object.num, modules);

    for (i, &id) in ids.iter().enumerate() {
        let offset = offsets[i];
        let mut span = match offsets.get(i + 1) {
            Some(&next) => next.saturating_sub(offset),
            None => object.size().saturating_sub(offset),
        };
        if let Some(module) = globals.get(id).module {
            if let Some(ranges) = bounds.get(&module) {
                for &(start, end) in ranges {
                    if offset < start {
                        continue;
                    }
                    if offset + span > end {
                        span = end.saturating_sub(offset);
                    }
                    break;
                }
            }
        }
        globals.get_mut(id).span = Some(span);
    }
}

fn insert_logged(map: &mut DataMap, entry: DataMapEntry, what: &str) {
    let (start, end) = (entry.start, entry.end);
    if let Err(e) = map.insert(entry) {
        warn!(
            start = format_args!("{:#x}", start),
            end = format_args!("{:#x}", end),
            error = %e,
            "skipping {what} data map entry"
        );
    }
}

fn insert_hints(object_num: u32, hints: &[crate::core::object::Hint], map: &mut DataMap) {
    for hint in hints {
        if hint.mode == DecodeMode::Comment {
            continue;
        }
        debug!(
            object = object_num,
            hint = hint.num,
            start = format_args!("{:#x}", hint.start),
            end = format_args!("{:#x}", hint.end),
            mode = %hint.mode,
            "applying hint"
        );
        insert_logged(
            map,
            DataMapEntry::new(hint.start, hint.end, hint.kind, hint.mode.clone(), MapSource::Hint),
            "hint",
        );
    }
}

/// Builds the data map of a code object. Call `compute_global_spans`
/// first; globals without a span are skipped here.
pub fn build_code_map(object: &mut Object, modules: &[Module], globals: &GlobalTable) {
    debug!(object = object.num, "building data map");
    let mut map = DataMap::for_object(object.size(), object.kind);

    for module in modules {
        for range in module.ranges_in(object.num) {
            insert_logged(
                &mut map,
                DataMapEntry::new(
                    range.offset,
                    range.end().min(object.size()),
                    object.kind,
                    DecodeMode::Default,
                    MapSource::Module,
                ),
                "module",
            );
        }
    }

    for global in globals.iter_sorted() {
        if global.object != object.num || global.source != Provenance::DebugInfo {
            continue;
        }
        let Some(span) = global.span else { continue };
        insert_logged(
            &mut map,
            DataMapEntry::new(
                global.offset,
                global.offset + span,
                global.kind,
                DecodeMode::Default,
                MapSource::Global,
            ),
            "global",
        );
    }

    insert_hints(object.num, &object.hints, &mut map);
    map.check_consistency(object.num);
    object.data_map = map;
}

/// Decode mode for a variable item, from its observed access sizes.
fn variable_mode(sizes: &[crate::core::global::Access]) -> DecodeMode {
    const ORDER: [(AccessSize, DecodeMode); 6] = [
        (AccessSize::Byte, DecodeMode::Bytes),
        (AccessSize::Word, DecodeMode::Words),
        (AccessSize::Dword, DecodeMode::Dwords),
        (AccessSize::Fword, DecodeMode::Fwords),
        (AccessSize::Qword, DecodeMode::Qwords),
        (AccessSize::Tbyte, DecodeMode::Tbytes),
    ];
    if sizes.is_empty() {
        return DecodeMode::AutoStrings;
    }
    for (size, mode) in ORDER {
        if sizes.iter().any(|a| a.size == size) {
            return mode;
        }
    }
    error!(?sizes, "unmapped access sizes, falling back to default mode");
    DecodeMode::Default
}

/// Builds the data map of a data object from its finalized structure,
/// then fixup-backed dwords, then hints. Requires structure finalization.
pub fn build_data_map(object: &mut Object, modules: &[Module], fixups: &FixupTable) {
    debug!(object = object.num, "building data map (second pass)");
    let mut map = DataMap::for_object(object.size(), object.kind);

    for module in modules {
        for range in module.ranges_in(object.num) {
            insert_logged(
                &mut map,
                DataMapEntry::new(
                    range.offset,
                    range.end().min(object.size()),
                    object.kind,
                    DecodeMode::Default,
                    MapSource::Module,
                ),
                "module",
            );
        }
    }

    for item in &object.structure {
        let (kind, mode) = match &item.kind {
            ItemKind::Function | ItemKind::Branch => (ObjectKind::Code, DecodeMode::Default),
            ItemKind::Variable => (ObjectKind::Data, variable_mode(&item.access_sizes)),
            _ => continue,
        };
        let Some(end) = item.end else {
            warn!(
                start = format_args!("{:#x}", item.start),
                kind = item.kind.word(),
                "unsized structure item skipped in data map"
            );
            continue;
        };
        insert_logged(
            &mut map,
            DataMapEntry::new(item.start, end.min(object.size()), kind, mode, MapSource::Structure),
            "structure",
        );
    }

    for fixup in fixups.for_source_object(object.num) {
        insert_logged(
            &mut map,
            DataMapEntry::new(
                fixup.source_offset,
                (fixup.source_offset + 4).min(object.size()),
                ObjectKind::Data,
                DecodeMode::Dwords,
                MapSource::Fixup,
            ),
            "fixup",
        );
    }

    insert_hints(object.num, &object.hints, &mut map);
    map.check_consistency(object.num);
    object.data_map = map;
}
