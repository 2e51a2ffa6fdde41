//! Normalized fixup (relocation) records and their lookup indices.
//!
//! A fixup links one pointer site in a source object to a target
//! (object, offset). Raw records are decoded from the fixup section by
//! `formats::le::fixups`; this module holds the normalized form used by
//! every analysis stage, plus the by-source and by-target indices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One normalized fixup record.
///
/// `source_offset` is object-relative: page-relative stored offsets have
/// already been rebased by the cumulative size of the object's earlier
/// pages. Records straddling a page boundary exist twice in the raw record
/// table (with complementary signed offsets) but normalize to the same
/// `(source, target)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixup {
    /// Record ordinal in the raw record table (1-based).
    pub num: u32,
    pub source_object: u32,
    /// Object-relative source byte offset.
    pub source_offset: u32,
    pub target_object: u32,
    pub target_offset: u32,
}

/// Sorted fixup store with source- and target-side lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixupTable {
    /// All fixups, sorted by (source_object, source_offset).
    fixups: Vec<Fixup>,
    /// Map from (target_object, target_offset) to indices into `fixups`.
    #[serde(skip)]
    by_target: BTreeMap<(u32, u32), Vec<usize>>,
}

impl FixupTable {
    /// Build the table from decoded records, collapsing page-boundary
    /// duplicates (identical source and target after rebasing).
    pub fn new(mut fixups: Vec<Fixup>) -> Self {
        fixups.sort_by_key(|f| (f.source_object, f.source_offset, f.num));
        fixups.dedup_by(|a, b| {
            a.source_object == b.source_object
                && a.source_offset == b.source_offset
                && a.target_object == b.target_object
                && a.target_offset == b.target_offset
        });
        let mut by_target: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
        for (i, f) in fixups.iter().enumerate() {
            by_target
                .entry((f.target_object, f.target_offset))
                .or_default()
                .push(i);
        }
        FixupTable { fixups, by_target }
    }

    pub fn len(&self) -> usize {
        self.fixups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixup> {
        self.fixups.iter()
    }

    /// All fixups whose source lies in `object`, in source-offset order.
    pub fn for_source_object(&self, object: u32) -> &[Fixup] {
        let start = self
            .fixups
            .partition_point(|f| f.source_object < object);
        let end = self.fixups.partition_point(|f| f.source_object <= object);
        &self.fixups[start..end]
    }

    /// Fixups whose source offset falls within `[start, end)` of `object`.
    pub fn covering(&self, object: u32, start: u32, end: u32) -> &[Fixup] {
        let base = self.for_source_object(object);
        let lo = base.partition_point(|f| f.source_offset < start);
        let hi = base.partition_point(|f| f.source_offset < end);
        &base[lo..hi]
    }

    /// The single fixup covering `[start, end)`, if there is exactly one.
    /// Returns `Err(n)` with the match count when zero or several match.
    pub fn covering_single(&self, object: u32, start: u32, end: u32) -> Result<&Fixup, usize> {
        let hits = self.covering(object, start, end);
        match hits {
            [one] => Ok(one),
            _ => Err(hits.len()),
        }
    }

    /// Fixups whose target is exactly (object, offset).
    pub fn targeting(&self, object: u32, offset: u32) -> impl Iterator<Item = &Fixup> {
        self.by_target
            .get(&(object, offset))
            .into_iter()
            .flatten()
            .map(|&i| &self.fixups[i])
    }
}
