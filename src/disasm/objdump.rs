//! External objdump backend.
//!
//! objdump only reads from files, so each call writes the buffer to a
//! temporary file and invokes one blocking process per range. Output is
//! reduced to the listing body following the `<.data>` section heading.

use std::io::Write;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::disasm::Disassembler;
use crate::error::{LxError, Result};

static SECTION_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]+) <\.data(\+0x[0-9a-fA-F]+)?>:$")
        .unwrap_or_else(|e| panic!("section heading regex: {e}"))
});

pub struct ObjdumpDisassembler {
    program: String,
}

impl ObjdumpDisassembler {
    pub fn new(program: impl Into<String>) -> Self {
        ObjdumpDisassembler {
            program: program.into(),
        }
    }
}

impl Default for ObjdumpDisassembler {
    fn default() -> Self {
        ObjdumpDisassembler::new("objdump")
    }
}

impl Disassembler for ObjdumpDisassembler {
    fn disassemble_range(&self, data: &[u8], start: u32, end: u32) -> Result<Vec<String>> {
        let mut tmpfile = NamedTempFile::new()?;
        tmpfile.write_all(data)?;

        debug!(start, end, program = %self.program, "running external disassembler");
        let output = Command::new(&self.program)
            .args([
                "--disassemble-all",
                "--disassemble-zeroes",
                "--wide",
                "--architecture=i386",
                "--disassembler-options=intel,i386",
                "--target=binary",
            ])
            .arg(format!("--start-address={start:#x}"))
            .arg(format!("--stop-address={end:#x}"))
            .arg(tmpfile.path())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LxError::Disassembler(format!(
                "{} failed with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines: Vec<String> = stdout.lines().map(str::to_string).collect();
        if let Some(i) = lines.iter().position(|l| SECTION_HEADING_RE.is_match(l)) {
            lines.drain(..=i);
        }
        Ok(lines)
    }

    fn name(&self) -> &str {
        "objdump"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_heading_matches() {
        assert!(SECTION_HEADING_RE.is_match("00000000 <.data>:"));
        assert!(SECTION_HEADING_RE.is_match("00001000 <.data+0x1000>:"));
        assert!(!SECTION_HEADING_RE.is_match("Disassembly of section .data:"));
    }
}
