//! Structure items: the labeling/annotation layer of an object's output.
//!
//! Items are kept in one list per object, sorted by start offset. End
//! offsets are often unknown at creation and carried as `Option`, to be
//! filled in by the finalization pass of the structure builder.

use serde::{Deserialize, Serialize};

use crate::core::global::{Access, GlobalId, Provenance};
use crate::core::object::{BadCodeKind, DecodeMode, ObjectKind};

/// What a structure item marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemKind {
    ObjectStart { objnum: u32 },
    ObjectEnd { objnum: u32 },
    ModuleStart { modnum: u32 },
    ModuleEnd { modnum: u32 },
    Function,
    Branch,
    Reference,
    Variable,
    HintStart {
        hintnum: u32,
        kind: ObjectKind,
        mode: DecodeMode,
        length: u32,
        comment: Option<String>,
    },
    HintEnd { hintnum: u32 },
    BadCodeStart {
        badnum: u32,
        kind: BadCodeKind,
        length: u32,
        context: Vec<String>,
    },
    BadCodeEnd { badnum: u32 },
    VirtualPaddingStart { size: u32 },
    VirtualPaddingEnd,
}

impl ItemKind {
    /// Lowercase word used when synthesizing names for anonymous items.
    pub fn word(&self) -> &'static str {
        match self {
            ItemKind::ObjectStart { .. } => "object start",
            ItemKind::ObjectEnd { .. } => "object end",
            ItemKind::ModuleStart { .. } => "module start",
            ItemKind::ModuleEnd { .. } => "module end",
            ItemKind::Function => "function",
            ItemKind::Branch => "branch",
            ItemKind::Reference => "reference",
            ItemKind::Variable => "variable",
            ItemKind::HintStart { .. } => "hint start",
            ItemKind::HintEnd { .. } => "hint end",
            ItemKind::BadCodeStart { .. } => "bad code start",
            ItemKind::BadCodeEnd { .. } => "bad code end",
            ItemKind::VirtualPaddingStart { .. } => "virtual padding start",
            ItemKind::VirtualPaddingEnd => "virtual padding end",
        }
    }
}

/// One formatting/labeling annotation at an offset or range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureItem {
    pub kind: ItemKind,
    pub start: u32,
    /// End offset; deferred for items sized by the finalization pass.
    pub end: Option<u32>,
    pub length: Option<u32>,
    /// Human-readable name; synthesized when still `None` at finalization.
    pub name: Option<String>,
    /// Label form of the name, used for `label:` lines.
    pub label: Option<String>,
    /// Provenance for function/branch/variable/reference items.
    pub source: Option<Provenance>,
    /// Access sizes copied from the originating global.
    pub access_sizes: Vec<Access>,
    /// Originating global, if any (side link for back-filling).
    pub global: Option<GlobalId>,
}

impl StructureItem {
    pub fn new(kind: ItemKind, start: u32) -> Self {
        StructureItem {
            kind,
            start,
            end: None,
            length: None,
            name: None,
            label: None,
            source: None,
            access_sizes: Vec::new(),
            global: None,
        }
    }

    pub fn with_range(mut self, end: u32) -> Self {
        self.end = Some(end);
        self.length = Some(end - self.start);
        self
    }

    pub fn with_names(mut self, name: impl Into<String>, label: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.label = Some(label.into());
        self
    }

    pub fn with_source(mut self, source: Provenance) -> Self {
        self.source = Some(source);
        self
    }

    pub fn is_debug_sourced(&self) -> bool {
        self.source == Some(Provenance::DebugInfo)
    }
}

/// Insertion tie-break policy for equal start offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// After existing items with equal offset.
    Default,
    /// After equal-offset items, but before equal-offset variables
    /// (used for hint and bad-code start items).
    StartBiased,
    /// Before existing items with equal offset, searching only after the
    /// matching start item (used for end items).
    EndBiased { start_index: usize },
}

/// Insert `item` into the start-sorted `structure`; returns its index.
pub fn insert_item(
    structure: &mut Vec<StructureItem>,
    item: StructureItem,
    mode: InsertMode,
) -> usize {
    match mode {
        InsertMode::Default => {
            let i = structure
                .iter()
                .position(|s| s.start > item.start)
                .unwrap_or(structure.len());
            structure.insert(i, item);
            i
        }
        InsertMode::StartBiased => {
            let mut i = structure
                .iter()
                .position(|s| s.start > item.start)
                .unwrap_or(structure.len());
            while i > 0
                && structure[i - 1].start == item.start
                && structure[i - 1].kind == ItemKind::Variable
            {
                i -= 1;
            }
            structure.insert(i, item);
            i
        }
        InsertMode::EndBiased { start_index } => {
            let i = structure[start_index + 1..]
                .iter()
                .position(|s| s.start >= item.start)
                .map(|p| start_index + 1 + p)
                .unwrap_or(structure.len());
            structure.insert(i, item);
            i
        }
    }
}
