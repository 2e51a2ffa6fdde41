//! Columnar listing lines.
//!
//! Every body line of a listing has the shape
//! `<hex offset>:\t<hex bytes>\t<text>[;<comment>]`; label and comment
//! lines carry no offset column. Formatted output keeps the same shape so
//! later passes can re-parse lines they did not themselves produce.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([0-9a-fA-F]+):\t([0-9a-f ]+?)\t+([^;]*?)(?:;(.*))?$")
        .unwrap_or_else(|e| panic!("body line regex: {e}"))
});

/// One parsed body line of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsmLine {
    pub offset: u32,
    /// Raw bytes backing the line, as decoded from the hex column.
    pub bytes: Vec<u8>,
    /// Mnemonic plus operands, or a data define directive.
    pub text: String,
    pub comment: Option<String>,
}

impl AsmLine {
    pub fn new(offset: u32, bytes: Vec<u8>, text: impl Into<String>) -> Self {
        AsmLine {
            offset,
            bytes,
            text: text.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// End offset (exclusive) of the bytes this line covers.
    pub fn end(&self) -> u32 {
        self.offset + self.bytes.len() as u32
    }

    /// Parses a body line; returns `None` for labels, comments and blanks.
    pub fn parse(line: &str) -> Option<AsmLine> {
        let caps = BODY_RE.captures(line)?;
        let offset = u32::from_str_radix(&caps[1], 16).ok()?;
        let mut bytes = Vec::new();
        for tok in caps[2].split_whitespace() {
            bytes.push(u8::from_str_radix(tok, 16).ok()?);
        }
        let text = caps[3].trim_end().to_string();
        let comment = caps
            .get(4)
            .map(|m| m.as_str().trim().to_string())
            .filter(|c| !c.is_empty());
        Some(AsmLine {
            offset,
            bytes,
            text,
            comment,
        })
    }

    fn hex_bytes(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() * 3);
        for (i, b) in self.bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{b:02x}"));
        }
        out
    }

    /// Renders the line back into columnar form.
    pub fn render(&self) -> String {
        let mut out = format!("{:8x}:\t{}\t{}", self.offset, self.hex_bytes(), self.text);
        if let Some(c) = &self.comment {
            // Fixup and alias comments sit in a fixed far column.
            while out.len() < 100 {
                out.push(' ');
            }
            out.push(';');
            out.push_str(c);
        }
        out
    }
}
