//! Structured header tree: objects, pages, modules, globals and hints.
//!
//! The tree is produced by a separate report parser and handed to this
//! crate as serialized JSON; it is treated as read-only input. This module
//! deserializes it and builds the working model used by the pipeline.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::global::{GlobalTable, Provenance};
use crate::core::module::{Module, ModuleRange};
use crate::core::object::{DecodeMode, Hint, Object, ObjectKind};
use crate::error::{LxError, Result};

bitflags! {
    /// Object flags as stored in the executable header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ObjectFlags: u32 {
        const READABLE    = 0x0001;
        const WRITABLE    = 0x0002;
        const EXECUTABLE  = 0x0004;
        const RESOURCE    = 0x0008;
        const DISCARDABLE = 0x0010;
        const SHARED      = 0x0020;
        const PRELOAD     = 0x0040;
        const BIG         = 0x2000;
    }
}

/// Location of the fixup section inside the executable file. All table
/// offsets are relative to the executable header, like the page-table
/// offset itself; the raw section bytes start at the page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupLocation {
    pub file_offset: u64,
    pub section_size: u32,
    pub page_table_offset: u32,
    pub record_table_offset: u32,
    pub module_table_offset: u32,
    pub procedure_table_offset: u32,
}

impl FixupLocation {
    /// File offset of the first byte of the section (the page table).
    pub fn file_start(&self) -> u64 {
        self.file_offset + self.page_table_offset as u64
    }

    /// Slices raw section bytes into (page, record, module, procedure)
    /// table data. Short input is clamped with a warning.
    pub fn tables<'a>(&self, raw: &'a [u8]) -> Result<(&'a [u8], &'a [u8], &'a [u8], &'a [u8])> {
        if self.record_table_offset < self.page_table_offset
            || self.module_table_offset < self.record_table_offset
            || self.procedure_table_offset < self.module_table_offset
        {
            return Err(LxError::MissingSection("ordered fixup table offsets"));
        }
        if raw.len() != self.section_size as usize {
            warn!(
                expected = self.section_size,
                got = raw.len(),
                "fixup section length does not match header size"
            );
        }
        let rel = |off: u32| (off - self.page_table_offset) as usize;
        let clamp = |i: usize| i.min(raw.len());
        Ok((
            &raw[clamp(0)..clamp(rel(self.record_table_offset))],
            &raw[clamp(rel(self.record_table_offset))..clamp(rel(self.module_table_offset))],
            &raw[clamp(rel(self.module_table_offset))..clamp(rel(self.procedure_table_offset))],
            &raw[clamp(rel(self.procedure_table_offset))..clamp(self.section_size as usize)],
        ))
    }
}

/// One page of stored object data, in header page numbering (pages are
/// numbered consecutively across all objects, starting at 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInput {
    pub num: u32,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A hint as written by the user: either `start`/`end` or
/// `start`/`length`, a kind word and a decode-mode string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintInput {
    pub start: u32,
    #[serde(default)]
    pub end: Option<u32>,
    #[serde(default)]
    pub length: Option<u32>,
    pub kind: String,
    pub mode: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectInput {
    pub num: u32,
    pub flags: u32,
    pub virtual_size: u32,
    #[serde(default)]
    pub pages: Vec<PageInput>,
    #[serde(default)]
    pub hints: Vec<HintInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRangeInput {
    pub object: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInput {
    pub num: u32,
    pub name: String,
    #[serde(default)]
    pub ranges: Vec<ModuleRangeInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub module: Option<u32>,
    pub object: u32,
    pub offset: u32,
    pub kind: String,
}

/// The whole header tree as handed over by the report parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderInput {
    pub objects: Vec<ObjectInput>,
    #[serde(default)]
    pub modules: Vec<ModuleInput>,
    #[serde(default)]
    pub globals: Vec<GlobalInput>,
    /// Object number of the implicit default data object, if any.
    #[serde(default)]
    pub auto_data_object: Option<u32>,
    #[serde(default)]
    pub fixup_section: Option<FixupLocation>,
}

fn parse_kind(s: &str) -> Option<ObjectKind> {
    match s {
        "code" => Some(ObjectKind::Code),
        "data" => Some(ObjectKind::Data),
        _ => None,
    }
}

impl HeaderInput {
    pub fn load(path: &Path) -> Result<HeaderInput> {
        let file = File::open(path)?;
        let input: HeaderInput = serde_json::from_reader(BufReader::new(file))?;
        if input.objects.is_empty() {
            return Err(LxError::MissingSection("object table"));
        }
        Ok(input)
    }

    /// Builds working objects: stored page data concatenated, padded with
    /// zeros up to the virtual size, hints parsed and numbered.
    pub fn build_objects(&self) -> Result<Vec<Object>> {
        let mut objects = Vec::with_capacity(self.objects.len());
        for obj in &self.objects {
            let mut data = Vec::new();
            for page in &obj.pages {
                data.extend_from_slice(&page.data);
            }
            let flags = ObjectFlags::from_bits_truncate(obj.flags);
            let kind = if flags.contains(ObjectFlags::EXECUTABLE) {
                ObjectKind::Code
            } else {
                ObjectKind::Data
            };
            let mut hints = Vec::with_capacity(obj.hints.len());
            for (i, h) in obj.hints.iter().enumerate() {
                let end = match (h.end, h.length) {
                    (Some(end), _) => end,
                    (None, Some(len)) => h.start + len,
                    (None, None) => {
                        return Err(LxError::InvalidMode(format!(
                            "object {} hint {}: neither end nor length given",
                            obj.num,
                            i + 1
                        )))
                    }
                };
                let kind = parse_kind(&h.kind)
                    .ok_or_else(|| LxError::InvalidMode(h.kind.clone()))?;
                let mode = DecodeMode::parse(&h.mode)
                    .ok_or_else(|| LxError::InvalidMode(h.mode.clone()))?;
                hints.push(Hint {
                    num: i as u32 + 1,
                    start: h.start,
                    end,
                    kind,
                    mode,
                    comment: h.comment.clone(),
                });
            }
            let default_data = self.auto_data_object == Some(obj.num);
            objects.push(Object::new(
                obj.num,
                kind,
                data,
                obj.virtual_size,
                default_data,
                hints,
            ));
        }
        Ok(objects)
    }

    pub fn build_modules(&self) -> Vec<Module> {
        self.modules
            .iter()
            .map(|m| {
                Module::new(
                    m.num,
                    m.name.clone(),
                    m.ranges
                        .iter()
                        .map(|r| ModuleRange {
                            object: r.object,
                            offset: r.offset,
                            size: r.size,
                        })
                        .collect(),
                )
            })
            .collect()
    }

    /// Builds the debug-info global table; entries with an unknown kind
    /// word are dropped with a warning.
    pub fn build_globals(&self) -> GlobalTable {
        let mut table = GlobalTable::default();
        for g in &self.globals {
            let Some(kind) = parse_kind(&g.kind) else {
                warn!(kind = %g.kind, object = g.object, offset = g.offset,
                    "global with unknown kind dropped");
                continue;
            };
            table.insert(
                g.name.clone(),
                g.module,
                g.object,
                g.offset,
                kind,
                Provenance::DebugInfo,
            );
        }
        table
    }

    /// Per-object page layout `(object, [(page num, stored length)])`,
    /// used to rebase page-relative fixup source offsets.
    pub fn page_layout(&self) -> Vec<(u32, Vec<(u32, u32)>)> {
        self.objects
            .iter()
            .map(|o| {
                (
                    o.num,
                    o.pages.iter().map(|p| (p.num, p.data.len() as u32)).collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_flags_serde_round_trip() {
        let flags = ObjectFlags::READABLE | ObjectFlags::EXECUTABLE | ObjectFlags::BIG;
        let json = serde_json::to_string(&flags).unwrap();
        let back: ObjectFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }

    fn sample() -> HeaderInput {
        HeaderInput {
            objects: vec![
                ObjectInput {
                    num: 1,
                    flags: 0x2045,
                    virtual_size: 0x20,
                    pages: vec![
                        PageInput { num: 1, data: vec![0x90; 0x10] },
                        PageInput { num: 2, data: vec![0xc3; 0x8] },
                    ],
                    hints: vec![],
                },
                ObjectInput {
                    num: 2,
                    flags: 0x2043,
                    virtual_size: 0x10,
                    pages: vec![PageInput { num: 3, data: vec![0x41; 0x10] }],
                    hints: vec![HintInput {
                        start: 0,
                        end: None,
                        length: Some(4),
                        kind: "data".into(),
                        mode: "dwords".into(),
                        comment: None,
                    }],
                },
            ],
            modules: vec![],
            globals: vec![GlobalInput {
                name: Some("main_".into()),
                module: Some(1),
                object: 1,
                offset: 0,
                kind: "code".into(),
            }],
            auto_data_object: Some(2),
            fixup_section: None,
        }
    }

    #[test]
    fn test_build_objects_kind_padding_and_hints() {
        let objects = sample().build_objects().unwrap();
        assert_eq!(objects[0].kind, ObjectKind::Code);
        assert_eq!(objects[0].stored_size, 0x18);
        assert_eq!(objects[0].data.len(), 0x20);
        assert_eq!(&objects[0].data[0x18..], &[0u8; 8]);
        assert_eq!(objects[1].kind, ObjectKind::Data);
        assert!(objects[1].default_data_object);
        assert_eq!(objects[1].hints[0].end, 4);
        assert_eq!(objects[1].hints[0].mode, DecodeMode::Dwords);
    }

    #[test]
    fn test_build_globals_drops_unknown_kind() {
        let mut input = sample();
        input.globals.push(GlobalInput {
            name: None,
            module: None,
            object: 1,
            offset: 8,
            kind: "bss".into(),
        });
        let table = input.build_globals();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_page_layout() {
        let layout = sample().page_layout();
        assert_eq!(layout[0], (1, vec![(1, 0x10), (2, 0x8)]));
        assert_eq!(layout[1], (2, vec![(3, 0x10)]));
    }

    #[test]
    fn test_fixup_location_tables() {
        let loc = FixupLocation {
            file_offset: 0,
            section_size: 10,
            page_table_offset: 0x80,
            record_table_offset: 0x84,
            module_table_offset: 0x88,
            procedure_table_offset: 0x88,
        };
        let raw: Vec<u8> = (0..10).collect();
        let (page, record, module, procedure) = loc.tables(&raw).unwrap();
        assert_eq!(page, &raw[0..4]);
        assert_eq!(record, &raw[4..8]);
        assert!(module.is_empty());
        assert_eq!(procedure, &raw[8..10]);
    }
}
