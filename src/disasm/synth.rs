//! Disassembly synthesizer: walks an object's data map and produces the
//! plain line list, sending code ranges to the disassembler backend and
//! expanding data ranges locally.
//!
//! Code ranges carry in-line anomaly recovery: a `ret`/`jmp` immediately
//! followed by zero bytes marks the zero run as padding, records a
//! bad-code entry and resumes decoding at the first non-zero byte.

use tracing::warn;

use crate::core::line::AsmLine;
use crate::core::object::{BadCode, BadCodeKind, Object, ObjectKind};
use crate::disasm::data::{data_lines, define_byte};
use crate::disasm::Disassembler;

/// Disassembles `[start, end)` as code, appending lines to `out` and new
/// bad-code records to `bad`. Returns the offset reached.
pub fn code_lines(
    dis: &dyn Disassembler,
    data: &[u8],
    start: u32,
    end: u32,
    bad: &mut Vec<BadCode>,
    out: &mut Vec<String>,
) -> u32 {
    let stop = (end as usize).min(data.len());
    let mut offset = start as usize;
    let mut again = true;
    while again && offset < stop {
        again = false;
        let output = match dis.disassemble_range(data, offset as u32, stop as u32) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(start = offset, end = stop, error = %e, "disassembler call failed, range left unresolved");
                break;
            }
        };
        for (i, line) in output.iter().enumerate() {
            out.push(line.clone());
            let Some(asm) = AsmLine::parse(line) else {
                warn!(line = i + 1, text = %line, "invalid assembly line");
                continue;
            };
            offset = asm.end() as usize;

            let mnemonic = asm.text.split_whitespace().next().unwrap_or("");
            if (mnemonic == "ret" || mnemonic == "jmp") && offset < stop && data[offset] == 0 {
                let kind = if mnemonic == "ret" {
                    BadCodeKind::ZeroAfterRet
                } else {
                    BadCodeKind::ZeroAfterJmp
                };
                let context: Vec<String> = output
                    [i.saturating_sub(1)..(i + 3).min(output.len())]
                    .to_vec();
                let bad_start = offset as u32;
                while offset < stop && data[offset] == 0 {
                    out.push(define_byte(offset as u32, 0, false));
                    offset += 1;
                }
                bad.push(BadCode {
                    num: bad.len() as u32 + 1,
                    start: bad_start,
                    end: offset as u32,
                    kind,
                    context,
                });
                if offset < stop {
                    again = true;
                }
                break;
            }
        }
    }
    offset as u32
}

/// Builds an object's plain disassembly from its finalized data map.
pub fn synthesize_object(object: &mut Object, dis: &dyn Disassembler) {
    let mut lines = Vec::new();
    let mut bad = Vec::new();
    for entry in object.data_map.entries() {
        let reached = match entry.kind {
            ObjectKind::Code => code_lines(
                dis,
                &object.data,
                entry.start,
                entry.end,
                &mut bad,
                &mut lines,
            ),
            ObjectKind::Data => {
                data_lines(&object.data, entry.start, entry.end, &entry.mode, &mut lines)
            }
        };
        if reached != entry.end {
            // Best effort: the next entry proceeds from its own start.
            warn!(
                object = object.num,
                start = entry.start,
                end = entry.end,
                reached,
                "synthesized range does not match data-map entry"
            );
        }
    }
    // Bad-code numbering restarts per object.
    object.plain = lines;
    object.bad_code = bad;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disasm::iced::IcedDisassembler;

    #[test]
    fn test_zero_after_ret_recovery() {
        // ret; 00; 00; nop
        let data = [0xc3, 0x00, 0x00, 0x90];
        let dis = IcedDisassembler::new();
        let mut bad = Vec::new();
        let mut out = Vec::new();
        let reached = code_lines(&dis, &data, 0, 4, &mut bad, &mut out);
        assert_eq!(reached, 4);
        // One ret, two padding defines, one resumed instruction.
        assert_eq!(out.len(), 4);
        assert!(AsmLine::parse(&out[0]).unwrap().text.starts_with("ret"));
        assert!(out[1].contains("db"));
        assert!(out[2].contains("db"));
        assert!(AsmLine::parse(&out[3]).unwrap().text.starts_with("nop"));
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].kind, BadCodeKind::ZeroAfterRet);
        assert_eq!((bad[0].start, bad[0].end), (1, 3));
        assert_eq!(bad[0].length(), 2);
    }

    #[test]
    fn test_trailing_zeros_end_range() {
        let data = [0xc3, 0x00, 0x00];
        let dis = IcedDisassembler::new();
        let mut bad = Vec::new();
        let mut out = Vec::new();
        let reached = code_lines(&dis, &data, 0, 3, &mut bad, &mut out);
        assert_eq!(reached, 3);
        assert_eq!(bad.len(), 1);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_plain_run_without_anomaly() {
        let data = [0x55, 0x89, 0xe5, 0xc3];
        let dis = IcedDisassembler::new();
        let mut bad = Vec::new();
        let mut out = Vec::new();
        let reached = code_lines(&dis, &data, 0, 4, &mut bad, &mut out);
        assert_eq!(reached, 4);
        assert!(bad.is_empty());
        assert_eq!(out.len(), 3);
    }
}
