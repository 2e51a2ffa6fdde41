//! Fixup-section decoder.
//!
//! The page table is an array of monotonically non-decreasing 32-bit
//! offsets into the record table, with one extra trailing sentinel; the
//! byte slice `[offsets[i], offsets[i+1])` holds page i's records. Record
//! entries have variable sizes depending on bits in their first two bytes.
//! Source offsets are stored page-relative (signed, records straddling a
//! page boundary appear once per adjacent page) and are rebased to
//! object-relative offsets after decoding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::core::fixup::{Fixup, FixupTable};
use crate::error::{LxError, Result};
use crate::formats::le::header::FixupLocation;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(LxError::TruncatedField {
                field,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn i16(&mut self, field: &'static str) -> Result<i16> {
        let b = self.take(2, field)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        let b = self.take(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Little-endian unsigned value of 1, 2 or 4 bytes.
    fn uint(&mut self, n: usize, field: &'static str) -> Result<u32> {
        let b = self.take(n, field)?;
        let mut v = 0u32;
        for (i, byte) in b.iter().enumerate() {
            v |= (*byte as u32) << (8 * i);
        }
        Ok(v)
    }
}

/// Decoded target variant of one fixup record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixupTarget {
    /// Internal reference; 16-bit selector fixups carry no offset.
    Internal { object: u32, offset: Option<u32> },
    ImportOrdinal {
        module: u32,
        procedure_name_offset: u32,
        additive: Option<u32>,
    },
    ImportName {
        module: u32,
        import_ordinal: u32,
        additive: Option<u32>,
    },
    Entry { ordinal: u32, additive: Option<u32> },
}

/// One decoded fixup record, before normalization into the fixup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixupRecord {
    /// Record ordinal across the whole record table (1-based).
    pub num: u32,
    /// Page the record was stored under (header page numbering).
    pub page: u32,
    /// Byte offset of the record inside the record table.
    pub table_offset: u32,
    /// Encoded size of the record in bytes.
    pub size: u32,
    /// Source type nibble of the source-flags byte (0x00..0x08).
    pub source_type: u8,
    /// Source refers to a 16:16 alias.
    pub alias: bool,
    /// Page-relative signed source offsets; one entry unless the record
    /// used the list form.
    pub source_offsets: Vec<i16>,
    pub target: FixupTarget,
    /// Parent object, filled in by rebasing.
    pub source_object: Option<u32>,
    /// Object-relative source offsets, filled in by rebasing.
    pub object_offsets: Vec<u32>,
}

/// Decodes the page-offset table. Stops (keeping earlier values) at a
/// non-monotonic or out-of-bounds offset or a truncated trailing entry.
pub fn decode_page_table(data: &[u8], record_table_len: usize) -> Vec<u32> {
    let mut values = Vec::new();
    let mut cursor = Cursor::new(data);
    while cursor.remaining() > 0 {
        match cursor.u32("page table value") {
            Ok(value) => {
                if let Some(&last) = values.last() {
                    if value < last {
                        warn!(value, last, "page table offset decreased, aborting decode");
                        break;
                    }
                }
                if value as usize > record_table_len {
                    warn!(value, "page table offset out of bounds, aborting decode");
                    break;
                }
                values.push(value);
            }
            Err(e) => {
                warn!(error = %e, "aborting page table decode");
                break;
            }
        }
    }
    values
}

fn decode_record(cursor: &mut Cursor<'_>, page: u32, num: u32) -> Result<FixupRecord> {
    let source_flags = cursor.u8("source flags")?;
    let source_type = source_flags & 0x0f;
    let alias = source_flags & 0x10 != 0;
    let list = source_flags & 0x20 != 0;

    let target_flags = cursor.u8("target flags")?;
    let target_type = target_flags & 0x03;
    let additive = target_flags & 0x04 != 0;
    let off32 = target_flags & 0x10 != 0;
    let add32 = target_flags & 0x20 != 0;
    let obj16 = target_flags & 0x40 != 0;
    let ord8 = target_flags & 0x80 != 0;

    let wide = |wide32: bool| if wide32 { 4 } else { 2 };
    let objw = if obj16 { 2 } else { 1 };

    // Source offset field first: either a single signed word or the
    // length of the offset list that trails the record.
    let mut source_offsets = Vec::new();
    let list_len = if list {
        cursor.u8("source offset list length")? as usize
    } else {
        source_offsets.push(cursor.i16("source offset")?);
        0
    };

    let target = match target_type {
        0x00 => {
            let object = cursor.uint(objw, "target object")?;
            // Source type 0x02 is a 16-bit selector fixup without an offset.
            let offset = if source_type != 0x02 {
                Some(cursor.uint(wide(off32), "target offset")?)
            } else {
                None
            };
            FixupTarget::Internal { object, offset }
        }
        0x01 => {
            let module = cursor.uint(objw, "target module ordinal")?;
            let name_off = cursor.uint(wide(off32), "target procedure name offset")?;
            let add = if additive {
                Some(cursor.uint(wide(add32), "target additive value")?)
            } else {
                None
            };
            FixupTarget::ImportOrdinal {
                module,
                procedure_name_offset: name_off,
                additive: add,
            }
        }
        0x02 => {
            let module = cursor.uint(objw, "target module ordinal")?;
            let ordw = if ord8 { 1 } else { wide(off32) };
            let import_ordinal = cursor.uint(ordw, "target import ordinal")?;
            let add = if additive {
                Some(cursor.uint(wide(add32), "target additive value")?)
            } else {
                None
            };
            FixupTarget::ImportName {
                module,
                import_ordinal,
                additive: add,
            }
        }
        0x03 => {
            let ordinal = cursor.uint(objw, "target entry ordinal")?;
            let add = if additive {
                Some(cursor.uint(wide(add32), "target additive value")?)
            } else {
                None
            };
            FixupTarget::Entry { ordinal, additive: add }
        }
        other => {
            return Err(LxError::InvalidTargetType {
                page,
                record: num,
                value: other,
            })
        }
    };

    // The trailing source offset list follows the target data.
    for _ in 0..list_len {
        source_offsets.push(cursor.i16("source offset list entry")?);
    }

    Ok(FixupRecord {
        num,
        page,
        table_offset: 0,
        size: 0,
        source_type,
        alias,
        source_offsets,
        target,
        source_object: None,
        object_offsets: Vec::new(),
    })
}

/// Decodes all per-page records. A truncated or invalid record aborts only
/// the remaining decode of its page; records already decoded are kept.
pub fn decode_records(page_offsets: &[u32], record_data: &[u8]) -> Vec<FixupRecord> {
    let mut records = Vec::new();
    let mut num = 1u32;
    for (i, pair) in page_offsets.windows(2).enumerate() {
        let page = i as u32 + 1;
        let slice = &record_data[pair[0] as usize..pair[1] as usize];
        let mut cursor = Cursor::new(slice);
        while cursor.remaining() > 0 {
            let before = cursor.pos;
            match decode_record(&mut cursor, page, num) {
                Ok(mut record) => {
                    record.table_offset = pair[0] + before as u32;
                    record.size = (cursor.pos - before) as u32;
                    records.push(record);
                    num += 1;
                }
                Err(e) => {
                    warn!(page, record = num, error = %e, "aborting record decode for page");
                    break;
                }
            }
        }
    }
    records
}

/// Rebases page-relative source offsets to object-relative ones, using the
/// cumulative stored size of each object's earlier pages.
pub fn rebase(records: &mut [FixupRecord], page_layout: &[(u32, Vec<(u32, u32)>)]) {
    let mut page_base: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
    for (object, pages) in page_layout {
        let mut offset = 0u32;
        for (page, len) in pages {
            page_base.insert(*page, (*object, offset));
            offset += len;
        }
    }
    for record in records.iter_mut() {
        match page_base.get(&record.page) {
            Some(&(object, base)) => {
                record.source_object = Some(object);
                record.object_offsets = record
                    .source_offsets
                    .iter()
                    .map(|&o| (base as i64 + o as i64) as u32)
                    .collect();
            }
            None => {
                warn!(page = record.page, record = record.num, "record page not in any object");
            }
        }
    }
}

/// Decodes a length-prefixed import name table.
pub fn decode_name_table(data: &[u8], table: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = Cursor::new(data);
    while cursor.remaining() > 0 {
        let length = match cursor.u8("string length") {
            Ok(l) => l,
            Err(e) => {
                warn!(table, error = %e, "aborting name table decode");
                break;
            }
        };
        if length == 0 {
            warn!(table, string = names.len() + 1, "empty import name");
        } else if length > 127 {
            warn!(table, string = names.len() + 1, "import name longer than 127 characters");
        }
        match cursor.take(length as usize, "string") {
            Ok(bytes) => names.push(String::from_utf8_lossy(bytes).into_owned()),
            Err(e) => {
                warn!(table, error = %e, "aborting name table decode");
                break;
            }
        }
    }
    names
}

/// All decoded fixup-section contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodedFixups {
    pub records: Vec<FixupRecord>,
    pub import_modules: Vec<String>,
    pub import_procedures: Vec<String>,
}

/// Decodes the whole fixup section and rebases source offsets.
pub fn decode_fixups(
    raw: &[u8],
    location: &FixupLocation,
    page_layout: &[(u32, Vec<(u32, u32)>)],
) -> Result<DecodedFixups> {
    let (page_data, record_data, module_data, procedure_data) = location.tables(raw)?;
    let offsets = decode_page_table(page_data, record_data.len());
    let mut records = decode_records(&offsets, record_data);
    rebase(&mut records, page_layout);
    debug!(
        pages = offsets.len().saturating_sub(1),
        records = records.len(),
        "fixup section decoded"
    );
    Ok(DecodedFixups {
        records,
        import_modules: decode_name_table(module_data, "module"),
        import_procedures: decode_name_table(procedure_data, "procedure"),
    })
}

/// Normalizes internal-reference records into the fixup table, one entry
/// per source offset. Import and entry-table targets carry no internal
/// (object, offset) and are left out of the indices.
pub fn build_table(records: &[FixupRecord]) -> FixupTable {
    let mut fixups = Vec::new();
    for record in records {
        let Some(source_object) = record.source_object else {
            continue;
        };
        match record.target {
            FixupTarget::Internal {
                object,
                offset: Some(offset),
            } => {
                for &source_offset in &record.object_offsets {
                    fixups.push(Fixup {
                        num: record.num,
                        source_object,
                        source_offset,
                        target_object: object,
                        target_offset: offset,
                    });
                }
            }
            _ => {
                debug!(record = record.num, "non-internal fixup target not indexed");
            }
        }
    }
    FixupTable::new(fixups)
}

#[cfg(test)]
mod tests {
    use super::*;

    // source flags 0x07: 32-bit offset fixup, single source offset.
    // target flags 0x10: internal reference, 32-bit target offset,
    // 8-bit object number.
    fn internal_record(source: i16, target_object: u8, target_offset: u32) -> Vec<u8> {
        let mut out = vec![0x07, 0x10];
        out.extend_from_slice(&source.to_le_bytes());
        out.push(target_object);
        out.extend_from_slice(&target_offset.to_le_bytes());
        out
    }

    fn layout() -> Vec<(u32, Vec<(u32, u32)>)> {
        vec![(1, vec![(1, 0x1000), (2, 0x1000)])]
    }

    #[test]
    fn test_page_table_decode_stops_on_decrease() {
        let mut data = Vec::new();
        for v in [0u32, 16, 8, 24] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_page_table(&data, 1024), vec![0, 16]);
    }

    #[test]
    fn test_decode_and_rebase_internal_record() {
        let record = internal_record(0x20, 2, 0x44);
        let offsets = vec![0, record.len() as u32];
        let mut records = decode_records(&offsets, &record);
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].table_offset, records[0].size), (0, 9));
        rebase(&mut records, &layout());
        assert_eq!(records[0].source_object, Some(1));
        assert_eq!(records[0].object_offsets, vec![0x20]);
        let table = build_table(&records);
        let f: Vec<_> = table.iter().collect();
        assert_eq!(
            (f[0].source_offset, f[0].target_object, f[0].target_offset),
            (0x20, 2, 0x44)
        );
    }

    #[test]
    fn test_page_boundary_duplicates_collapse() {
        // Same site stored once per adjacent page with complementary
        // signed offsets: 0xffe relative to page 1, -2 relative to page 2.
        let page1 = internal_record(0x0ffe, 2, 0x44);
        let page2 = internal_record(-2, 2, 0x44);
        let offsets = vec![0, page1.len() as u32, (page1.len() + page2.len()) as u32];
        let mut data = page1;
        data.extend_from_slice(&page2);
        let mut records = decode_records(&offsets, &data);
        assert_eq!(records.len(), 2);
        rebase(&mut records, &layout());
        assert_eq!(records[0].object_offsets, vec![0x0ffe]);
        assert_eq!(records[1].object_offsets, vec![0x0ffe]);
        let table = build_table(&records);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_source_offset_list_expands() {
        // List flag set: count byte instead of a source offset, entries
        // trail the target data.
        let mut data = vec![0x27, 0x10, 2];
        data.push(2); // target object
        data.extend_from_slice(&0x80u32.to_le_bytes());
        data.extend_from_slice(&0x10i16.to_le_bytes());
        data.extend_from_slice(&0x18i16.to_le_bytes());
        let offsets = vec![0, data.len() as u32];
        let mut records = decode_records(&offsets, &data);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_offsets, vec![0x10, 0x18]);
        rebase(&mut records, &layout());
        let table = build_table(&records);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_truncated_record_keeps_earlier_records() {
        let good = internal_record(0x10, 2, 0x44);
        let mut data = good.clone();
        data.extend_from_slice(&[0x07, 0x10, 0x20]); // cut mid source offset
        let offsets = vec![0, data.len() as u32];
        let records = decode_records(&offsets, &data);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_offsets, vec![0x10]);
    }

    #[test]
    fn test_selector_fixup_has_no_target_offset() {
        // Source type 0x02 (16-bit selector), internal target: object only.
        let data = vec![0x02, 0x00, 0x10, 0x00, 0x03];
        let offsets = vec![0, data.len() as u32];
        let records = decode_records(&offsets, &data);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].target,
            FixupTarget::Internal { object: 3, offset: None }
        );
    }
}
