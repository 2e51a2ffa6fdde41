//! The data map: an ordered, gap-free partition of an object's bytes into
//! typed, mode-tagged decode ranges.
//!
//! A map starts out as one entry covering the whole object and is refined
//! by successive override insertions: each insert splices the new entry
//! into the existing ones, replacing whatever it overlaps and keeping the
//! clipped head of the first and tail of the last overlapped entry. Later
//! inserts therefore always win, which is why hints are inserted last.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::core::object::{DecodeMode, ObjectKind};
use crate::error::{LxError, Result};

/// What produced a data-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapSource {
    /// Whole-object default entry.
    Object,
    /// Module bounds from debug info.
    Module,
    /// Debug-info global, sized by next-global distance.
    Global,
    /// Structure item sizes (data-object second pass).
    Structure,
    /// Fixup-backed dword in a data object.
    Fixup,
    /// User hint; always inserted last.
    Hint,
}

impl fmt::Display for MapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapSource::Object => write!(f, "object"),
            MapSource::Module => write!(f, "module"),
            MapSource::Global => write!(f, "global"),
            MapSource::Structure => write!(f, "structure"),
            MapSource::Fixup => write!(f, "fixup"),
            MapSource::Hint => write!(f, "hint"),
        }
    }
}

/// Maximal non-overlapping `[start, end)` sub-range of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMapEntry {
    pub start: u32,
    pub end: u32,
    pub kind: ObjectKind,
    pub mode: DecodeMode,
    pub source: MapSource,
}

impl DataMapEntry {
    pub fn new(start: u32, end: u32, kind: ObjectKind, mode: DecodeMode, source: MapSource) -> Self {
        DataMapEntry { start, end, kind, mode, source }
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Ordered sequence of entries tiling `[0, object.size())`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMap {
    entries: Vec<DataMapEntry>,
}

impl DataMap {
    /// Initialize with the whole-object default entry.
    pub fn for_object(size: u32, kind: ObjectKind) -> Self {
        DataMap {
            entries: vec![DataMapEntry::new(
                0,
                size,
                kind,
                DecodeMode::Default,
                MapSource::Object,
            )],
        }
    }

    pub fn entries(&self) -> &[DataMapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splice `entry` into the map.
    ///
    /// Zero-length entries are ignored (frequent for zero-sized globals).
    /// Re-inserting an entry identical to the single entry it would replace
    /// is a no-op. Anything else removes the overlapped run and reinserts
    /// the clipped head, the entry, and the clipped tail.
    pub fn insert(&mut self, entry: DataMapEntry) -> Result<()> {
        if entry.is_empty() {
            return Ok(());
        }

        // Rightmost existing entry starting at or before the new start.
        let start_index = match self
            .entries
            .iter()
            .rposition(|e| entry.start >= e.start)
        {
            Some(i) => i,
            None => return Err(LxError::SpliceFailed("no splice start item")),
        };

        // First entry from there whose end reaches the new end.
        let end_index = match self.entries[start_index..]
            .iter()
            .position(|e| entry.end <= e.end)
        {
            Some(i) => start_index + i,
            None => return Err(LxError::SpliceFailed("no splice end item")),
        };

        if start_index == end_index && self.entries[start_index] == entry {
            return Ok(());
        }

        let head = self.entries[start_index].clone();
        let tail = self.entries[end_index].clone();
        self.entries.drain(start_index..=end_index);

        // Reversed insertion keeps start_index valid.
        if tail.end > entry.end {
            self.entries.insert(
                start_index,
                DataMapEntry::new(entry.end, tail.end, tail.kind, tail.mode, tail.source),
            );
        }
        self.entries.insert(start_index, entry.clone());
        if head.start < entry.start {
            self.entries.insert(
                start_index,
                DataMapEntry::new(head.start, entry.start, head.kind, head.mode, head.source),
            );
        }
        Ok(())
    }

    /// Verify the tiling invariant: non-empty, first entry at 0, no holes.
    /// Violations are logged, not fatal; returns the issue count.
    pub fn check_consistency(&self, object_num: u32) -> usize {
        let mut issues = 0;
        if self.entries.is_empty() {
            warn!(object = object_num, "data map is empty");
            issues += 1;
        }
        if let Some(first) = self.entries.first() {
            if first.start != 0 {
                warn!(
                    object = object_num,
                    start = format_args!("{:#x}", first.start),
                    "first data map entry does not start at 0x0"
                );
                issues += 1;
            }
        }
        for w in self.entries.windows(2) {
            if w[0].end != w[1].start {
                warn!(
                    object = object_num,
                    end = format_args!("{:#x}", w[0].end),
                    next_start = format_args!("{:#x}", w[1].start),
                    "hole between data map entries"
                );
                issues += 1;
            }
        }
        issues
    }
}
