//! Object type: one top-level memory/segment unit of the executable.
//!
//! Objects are created once from the header tree and then mutated in place
//! by every later pipeline stage (data map, plain disassembly, structure,
//! formatted disassembly). They are never destroyed mid-run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::data_map::DataMap;
use crate::core::structure::StructureItem;

/// Whether an object carries machine code or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Code,
    Data,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Code => write!(f, "code"),
            ObjectKind::Data => write!(f, "data"),
        }
    }
}

/// How a byte range should be rendered when treated as data (or code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecodeMode {
    /// Object-kind default: instructions for code, bytes for data.
    Default,
    /// Byte defines with printable-character comments.
    Bytes,
    /// Little-endian fixed-width values.
    Words,
    Dwords,
    Fwords,
    Qwords,
    Tbytes,
    /// One single string, not necessarily NUL-terminated.
    String,
    /// Consecutive NUL-terminated strings.
    Strings,
    /// ASCII string auto-detection, bytes elsewhere.
    AutoStrings,
    /// Fixed struct layout expanded member by member.
    Struct(Vec<StructMember>),
    /// Comment-only hint mode; never enters the data map.
    Comment,
}

impl DecodeMode {
    /// Parse a hint mode string, e.g. `dwords` or `struct:word:chars[8]`.
    pub fn parse(s: &str) -> Option<DecodeMode> {
        match s {
            "default" => Some(DecodeMode::Default),
            "bytes" => Some(DecodeMode::Bytes),
            "words" => Some(DecodeMode::Words),
            "dwords" => Some(DecodeMode::Dwords),
            "fwords" => Some(DecodeMode::Fwords),
            "qwords" => Some(DecodeMode::Qwords),
            "tbytes" => Some(DecodeMode::Tbytes),
            "string" => Some(DecodeMode::String),
            "strings" => Some(DecodeMode::Strings),
            "auto-strings" => Some(DecodeMode::AutoStrings),
            "comment" => Some(DecodeMode::Comment),
            _ if s.starts_with("struct:") => {
                let members: Option<Vec<StructMember>> = s
                    .split(':')
                    .skip(1)
                    .map(StructMember::parse)
                    .collect();
                members.filter(|m| !m.is_empty()).map(DecodeMode::Struct)
            }
            _ => None,
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeMode::Default => write!(f, "default"),
            DecodeMode::Bytes => write!(f, "bytes"),
            DecodeMode::Words => write!(f, "words"),
            DecodeMode::Dwords => write!(f, "dwords"),
            DecodeMode::Fwords => write!(f, "fwords"),
            DecodeMode::Qwords => write!(f, "qwords"),
            DecodeMode::Tbytes => write!(f, "tbytes"),
            DecodeMode::String => write!(f, "string"),
            DecodeMode::Strings => write!(f, "strings"),
            DecodeMode::AutoStrings => write!(f, "auto-strings"),
            DecodeMode::Struct(members) => {
                write!(f, "struct")?;
                for m in members {
                    write!(f, ":{}", m)?;
                }
                Ok(())
            }
            DecodeMode::Comment => write!(f, "comment"),
        }
    }
}

/// One member of a `struct:` decode mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructMember {
    /// Decode mode applied to this member's bytes.
    pub mode: Box<DecodeMode>,
    /// Member length in bytes.
    pub length: u32,
}

impl StructMember {
    /// Parse one member spec, e.g. `dword`, `chars[8]`, `words[4]`.
    pub fn parse(s: &str) -> Option<StructMember> {
        let elem_size = |name: &str| match name {
            "char" | "chars" | "byte" | "bytes" => Some(1u32),
            "word" | "words" => Some(2),
            "dword" | "dwords" => Some(4),
            "fword" | "fwords" => Some(6),
            "qword" | "qwords" => Some(8),
            "tbyte" | "tbytes" => Some(10),
            _ => None,
        };
        let member = |name: &str, count: u32| {
            let size = elem_size(name)?;
            let mode = match name {
                "char" | "chars" => DecodeMode::String,
                "byte" | "bytes" => DecodeMode::Bytes,
                "word" | "words" => DecodeMode::Words,
                "dword" | "dwords" => DecodeMode::Dwords,
                "fword" | "fwords" => DecodeMode::Fwords,
                "qword" | "qwords" => DecodeMode::Qwords,
                "tbyte" | "tbytes" => DecodeMode::Tbytes,
                _ => return None,
            };
            Some(StructMember {
                mode: Box::new(mode),
                length: size * count,
            })
        };
        if let Some(open) = s.find('[') {
            if !s.ends_with(']') {
                return None;
            }
            let count: u32 = s[open + 1..s.len() - 1].parse().ok()?;
            member(&s[..open], count)
        } else {
            member(s, 1)
        }
    }
}

impl fmt::Display for StructMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.mode, self.length)
    }
}

/// A user-authored override describing how a byte range should be decoded.
///
/// Hints have strict priority over every automatically inferred data-map
/// entry covering the same range; the builder inserts them last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    /// 1-based hint ordinal within its object.
    pub num: u32,
    pub start: u32,
    pub end: u32,
    pub kind: ObjectKind,
    pub mode: DecodeMode,
    pub comment: Option<String>,
}

impl Hint {
    pub fn length(&self) -> u32 {
        self.end - self.start
    }
}

/// One detected bad-code anomaly: padding bytes after a `ret`/`jmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BadCodeKind {
    ZeroAfterRet,
    ZeroAfterJmp,
}

impl fmt::Display for BadCodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadCodeKind::ZeroAfterRet => write!(f, "zero after ret"),
            BadCodeKind::ZeroAfterJmp => write!(f, "zero after jmp"),
        }
    }
}

/// Record of one bad-code region, with a short context of surrounding lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadCode {
    /// 1-based ordinal within its object.
    pub num: u32,
    pub start: u32,
    pub end: u32,
    pub kind: BadCodeKind,
    /// Source lines around the terminating instruction.
    pub context: Vec<String>,
}

impl BadCode {
    pub fn length(&self) -> u32 {
        self.end - self.start
    }
}

/// One top-level memory/segment unit of the executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    /// Object number as assigned by the executable header (1-based).
    pub num: u32,
    pub kind: ObjectKind,
    /// Size of the stored data, before virtual padding.
    pub stored_size: u32,
    /// Load-time size; the difference to `stored_size` is zero-filled.
    pub virtual_size: u32,
    /// Stored bytes plus virtual padding; `data.len() == size()`.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Marks the header's implicit default data object.
    pub default_data_object: bool,
    /// User hints for this object, sorted by ordinal.
    pub hints: Vec<Hint>,
    /// Derived state, filled in by later stages.
    pub data_map: DataMap,
    pub bad_code: Vec<BadCode>,
    pub plain: Vec<String>,
    pub formatted: Vec<String>,
    pub structure: Vec<StructureItem>,
    /// Per-module line ranges into `formatted`, recorded by the formatter.
    pub module_lines: Vec<(u32, std::ops::Range<usize>)>,
}

impl Object {
    pub fn new(
        num: u32,
        kind: ObjectKind,
        mut data: Vec<u8>,
        virtual_size: u32,
        default_data_object: bool,
        mut hints: Vec<Hint>,
    ) -> Self {
        let stored_size = data.len() as u32;
        if stored_size < virtual_size {
            data.resize(virtual_size as usize, 0);
        }
        hints.sort_by_key(|h| h.num);
        Object {
            num,
            kind,
            stored_size,
            virtual_size,
            data,
            default_data_object,
            hints,
            data_map: DataMap::default(),
            bad_code: Vec::new(),
            plain: Vec::new(),
            formatted: Vec::new(),
            structure: Vec::new(),
            module_lines: Vec::new(),
        }
    }

    /// Total size handled by the pipeline: stored data plus virtual padding.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Virtual padding length, zero when the object is fully stored.
    pub fn padding(&self) -> u32 {
        self.size() - self.stored_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_padding() {
        let obj = Object::new(1, ObjectKind::Code, vec![0x90; 100], 256, false, vec![]);
        assert_eq!(obj.stored_size, 100);
        assert_eq!(obj.size(), 256);
        assert_eq!(obj.padding(), 156);
        assert_eq!(&obj.data[100..], &[0u8; 156][..]);
    }

    #[test]
    fn test_decode_mode_parse() {
        assert_eq!(DecodeMode::parse("dwords"), Some(DecodeMode::Dwords));
        assert_eq!(DecodeMode::parse("auto-strings"), Some(DecodeMode::AutoStrings));
        assert_eq!(DecodeMode::parse("nonsense"), None);

        let mode = DecodeMode::parse("struct:word:chars[8]:dwords[2]").unwrap();
        match mode {
            DecodeMode::Struct(members) => {
                assert_eq!(members.len(), 3);
                assert_eq!(members[0].length, 2);
                assert_eq!(*members[1].mode, DecodeMode::String);
                assert_eq!(members[1].length, 8);
                assert_eq!(members[2].length, 8);
            }
            other => panic!("expected struct mode, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_mode_struct_rejects_empty() {
        assert_eq!(DecodeMode::parse("struct:"), None);
        assert_eq!(DecodeMode::parse("struct:frob"), None);
    }
}
