//! Globals: named or inferred code/data entry points at (object, offset).
//!
//! Globals start out from debug info and grow as fixup targets and branch
//! targets are discovered. Structure items refer back to their originating
//! global through the stable `GlobalId` assigned at creation, never through
//! object identity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::object::ObjectKind;

/// Where a global came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    DebugInfo,
    FixupData,
    BranchAnalysis,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::DebugInfo => write!(f, "debug info"),
            Provenance::FixupData => write!(f, "fixup data"),
            Provenance::BranchAnalysis => write!(f, "branch analysis"),
        }
    }
}

/// Observed operand access width at a referenced location.
///
/// The plural variants mark scaled-index (table) accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessSize {
    Byte,
    Word,
    Dword,
    Fword,
    Qword,
    Tbyte,
}

impl AccessSize {
    /// Parse an objdump-style `PTR` size keyword.
    pub fn parse(s: &str) -> Option<AccessSize> {
        match s {
            "BYTE" => Some(AccessSize::Byte),
            "WORD" => Some(AccessSize::Word),
            "DWORD" => Some(AccessSize::Dword),
            "FWORD" => Some(AccessSize::Fword),
            "QWORD" => Some(AccessSize::Qword),
            "TBYTE" => Some(AccessSize::Tbyte),
            _ => None,
        }
    }
}

impl fmt::Display for AccessSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessSize::Byte => write!(f, "BYTE"),
            AccessSize::Word => write!(f, "WORD"),
            AccessSize::Dword => write!(f, "DWORD"),
            AccessSize::Fword => write!(f, "FWORD"),
            AccessSize::Qword => write!(f, "QWORD"),
            AccessSize::Tbyte => write!(f, "TBYTE"),
        }
    }
}

/// One observed access: width plus whether it was a scaled (table) access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Access {
    pub size: AccessSize,
    pub table: bool,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.table {
            write!(f, "{}S", self.size)
        } else {
            write!(f, "{}", self.size)
        }
    }
}

/// Stable identifier for a global, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

/// A named or inferred code/data entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub id: GlobalId,
    /// Name; `None` until finalized by the structure builder.
    pub name: Option<String>,
    /// Owning module index; `None` until finalized.
    pub module: Option<u32>,
    pub object: u32,
    pub offset: u32,
    pub kind: ObjectKind,
    pub source: Provenance,
    /// Byte length, back-filled by structure finalization.
    pub length: Option<u32>,
    /// Distance to the next debug global, used to size data-map entries.
    pub span: Option<u32>,
    /// Observed access sizes, in first-seen order.
    pub access_sizes: Vec<Access>,
}

/// All known globals plus the (object, offset) lookup index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalTable {
    globals: Vec<Global>,
    #[serde(skip)]
    by_location: BTreeMap<(u32, u32), Vec<GlobalId>>,
}

impl GlobalTable {
    /// Add a global; returns its id. Several globals may share a location
    /// (aliases), so this never replaces an existing entry.
    pub fn insert(
        &mut self,
        name: Option<String>,
        module: Option<u32>,
        object: u32,
        offset: u32,
        kind: ObjectKind,
        source: Provenance,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            id,
            name,
            module,
            object,
            offset,
            kind,
            source,
            length: None,
            span: None,
            access_sizes: Vec::new(),
        });
        self.by_location.entry((object, offset)).or_default().push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    pub fn get(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: GlobalId) -> &mut Global {
        &mut self.globals[id.0 as usize]
    }

    /// Ids of all globals at (object, offset), in insertion order.
    pub fn at(&self, object: u32, offset: u32) -> &[GlobalId] {
        self.by_location
            .get(&(object, offset))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, object: u32, offset: u32) -> bool {
        self.by_location.contains_key(&(object, offset))
    }

    /// Globals in (object, offset, id) order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = &Global> {
        self.by_location
            .values()
            .flatten()
            .map(move |&id| self.get(id))
    }

    /// Record an observed access size on every global at a location.
    pub fn record_access(&mut self, object: u32, offset: u32, access: Access) {
        let ids: Vec<GlobalId> = self.at(object, offset).to_vec();
        for id in ids {
            let g = self.get_mut(id);
            if !g.access_sizes.contains(&access) {
                g.access_sizes.push(access);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_share_location() {
        let mut table = GlobalTable::default();
        let a = table.insert(
            Some("P_CONT".into()),
            None,
            1,
            0xed84,
            ObjectKind::Code,
            Provenance::DebugInfo,
        );
        let b = table.insert(
            Some("P_START".into()),
            None,
            1,
            0xed84,
            ObjectKind::Code,
            Provenance::DebugInfo,
        );
        assert_eq!(table.at(1, 0xed84), &[a, b]);
        assert!(table.contains(1, 0xed84));
        assert!(!table.contains(1, 0xed85));
    }

    #[test]
    fn test_record_access_dedups() {
        let mut table = GlobalTable::default();
        table.insert(None, None, 2, 0x100, ObjectKind::Data, Provenance::FixupData);
        let acc = Access {
            size: AccessSize::Dword,
            table: false,
        };
        table.record_access(2, 0x100, acc);
        table.record_access(2, 0x100, acc);
        let id = table.at(2, 0x100)[0];
        assert_eq!(table.get(id).access_sizes, vec![acc]);
    }

    #[test]
    fn test_iter_sorted_orders_by_location() {
        let mut table = GlobalTable::default();
        table.insert(None, None, 2, 0x10, ObjectKind::Data, Provenance::FixupData);
        table.insert(None, None, 1, 0x20, ObjectKind::Code, Provenance::FixupData);
        let locs: Vec<(u32, u32)> = table.iter_sorted().map(|g| (g.object, g.offset)).collect();
        assert_eq!(locs, vec![(1, 0x20), (2, 0x10)]);
    }
}
