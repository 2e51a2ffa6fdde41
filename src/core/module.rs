//! Modules: debug-info groupings of byte ranges per compilation unit.

use serde::{Deserialize, Serialize};

/// One (object, offset, size) range attributed to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRange {
    pub object: u32,
    pub offset: u32,
    pub size: u32,
}

impl ModuleRange {
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

/// A source compilation unit recovered from debug info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Module index from the debug info (1-based).
    pub num: u32,
    /// Debug-derived name, often a source path like `dos\dllload.c`.
    pub name: String,
    /// Disjoint ranges owned by this module, sorted by (object, offset).
    pub ranges: Vec<ModuleRange>,
}

impl Module {
    pub fn new(num: u32, name: String, mut ranges: Vec<ModuleRange>) -> Self {
        ranges.sort_by_key(|r| (r.object, r.offset));
        Module { num, name, ranges }
    }

    /// Ranges of this module inside one object, in offset order.
    pub fn ranges_in(&self, object: u32) -> impl Iterator<Item = &ModuleRange> {
        self.ranges.iter().filter(move |r| r.object == object)
    }

    /// Filename component of the module name (DOS-style paths).
    pub fn basename(&self) -> &str {
        self.name
            .rsplit(|c| c == '\\' || c == '/')
            .next()
            .unwrap_or(&self.name)
    }

    /// Label form of the basename: lowercase, dots replaced.
    pub fn label(&self) -> String {
        self.basename().to_ascii_lowercase().replace('.', "_")
    }

    /// Library modules carry bare names without a file-type suffix.
    pub fn is_library(&self) -> bool {
        !self.basename().contains('.')
    }
}
