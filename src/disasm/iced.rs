//! In-process x86 backend built on iced-x86.
//!
//! Emits the same columnar line shape as the objdump backend, so the rest
//! of the pipeline does not care which one produced a range.

use iced_x86::{Decoder, DecoderOptions, Formatter, IntelFormatter, MemorySizeOptions};

use crate::core::line::AsmLine;
use crate::disasm::Disassembler;
use crate::error::Result;

pub struct IcedDisassembler {
    bits: u32,
}

impl IcedDisassembler {
    pub fn new() -> Self {
        IcedDisassembler { bits: 32 }
    }

    fn formatter() -> IntelFormatter {
        let mut formatter = IntelFormatter::new();
        let options = formatter.options_mut();
        options.set_hex_prefix("0x");
        options.set_hex_suffix("");
        options.set_uppercase_hex(false);
        options.set_uppercase_keywords(true);
        options.set_space_after_operand_separator(false);
        options.set_memory_size_options(MemorySizeOptions::Always);
        formatter
    }
}

impl Default for IcedDisassembler {
    fn default() -> Self {
        IcedDisassembler::new()
    }
}

impl Disassembler for IcedDisassembler {
    fn disassemble_range(&self, data: &[u8], start: u32, end: u32) -> Result<Vec<String>> {
        let stop = (end as usize).min(data.len());
        let mut formatter = Self::formatter();
        let mut lines = Vec::new();
        let mut offset = start as usize;
        while offset < stop {
            let mut decoder = Decoder::new(self.bits, &data[offset..stop], DecoderOptions::NONE);
            decoder.set_ip(offset as u64);
            let instr = decoder.decode();
            if instr.is_invalid() {
                lines.push(
                    AsmLine::new(offset as u32, vec![data[offset]], "(bad)").render(),
                );
                offset += 1;
                continue;
            }
            let mut text = String::new();
            formatter.format(&instr, &mut text);
            let bytes = data[offset..offset + instr.len()].to_vec();
            lines.push(AsmLine::new(offset as u32, bytes, text).render());
            offset += instr.len();
        }
        Ok(lines)
    }

    fn name(&self) -> &str {
        "iced-x86"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_sequence() {
        // push ebp; mov ebp,esp; ret
        let data = [0x55, 0x89, 0xe5, 0xc3];
        let dis = IcedDisassembler::new();
        let lines = dis.disassemble_range(&data, 0, 4).unwrap();
        assert_eq!(lines.len(), 3);
        let first = AsmLine::parse(&lines[0]).unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(first.bytes, vec![0x55]);
        assert!(first.text.starts_with("push"));
        let last = AsmLine::parse(&lines[2]).unwrap();
        assert_eq!(last.offset, 3);
        assert_eq!(last.text, "ret");
    }

    #[test]
    fn test_range_clamped_to_buffer() {
        let data = [0x90, 0x90];
        let dis = IcedDisassembler::new();
        let lines = dis.disassemble_range(&data, 0, 16).unwrap();
        assert_eq!(lines.len(), 2);
    }
}
