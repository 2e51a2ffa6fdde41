//! Define-line generation for data ranges.
//!
//! Emits `db`/`dw`/`dd`/`df`/`dq`/`dt` lines in the same columnar shape as
//! instruction lines. Values are rendered little-endian; string modes fold
//! printable runs into quoted parts and keep other bytes as hex values.

use tracing::warn;

use crate::core::object::{DecodeMode, StructMember};

/// Escapable control bytes that may legitimately appear inside strings.
const STRING_CONTROL: [u8; 8] = [7, 8, 9, 10, 11, 12, 13, 27];

fn escape_char(value: u8) -> String {
    match value {
        0 => "\\0".into(),
        7 => "\\a".into(),
        8 => "\\b".into(),
        9 => "\\t".into(),
        10 => "\\n".into(),
        11 => "\\v".into(),
        12 => "\\f".into(),
        13 => "\\r".into(),
        27 => "\\e".into(),
        32..=126 => (value as char).to_string(),
        _ => String::new(),
    }
}

fn is_printable(value: u8) -> bool {
    (32..=126).contains(&value)
}

fn hex_column(values: &[u8]) -> String {
    values
        .iter()
        .map(|v| format!("{v:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn define_line(offset: u32, values: &[u8], directive: &str, operand: &str) -> String {
    format!(
        "{:8x}:\t{:<20} \t{:<6} {}",
        offset,
        hex_column(values),
        directive,
        operand
    )
}

/// One `db` line for a single byte, optionally with a decimal/character
/// comment in the far column.
pub fn define_byte(offset: u32, value: u8, comment: bool) -> String {
    let line = define_line(offset, &[value], "db", &format!("0x{value:02x}"));
    if comment {
        format!("{:<100}; dec: {:>3}, chr: '{}'", line, value, escape_char(value))
    } else {
        line
    }
}

/// String parts: printable runs are quoted, everything else stays numeric.
enum StrPart {
    Text(String),
    Value(u8),
}

fn push_part(parts: &mut Vec<StrPart>, value: u8) {
    if is_printable(value) {
        match parts.last_mut() {
            Some(StrPart::Text(t)) => t.push(value as char),
            _ => parts.push(StrPart::Text((value as char).to_string())),
        }
    } else {
        parts.push(StrPart::Value(value));
    }
}

fn render_parts(parts: &[StrPart], two_digit_hex: bool) -> String {
    parts
        .iter()
        .map(|p| match p {
            StrPart::Text(t) => format!("\"{t}\""),
            StrPart::Value(v) if two_digit_hex => format!("0x{v:02x}"),
            StrPart::Value(v) => format!("0x{v:x}"),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn bytes_lines(data: &[u8], start: u32, end: u32, out: &mut Vec<String>) -> u32 {
    let stop = (end as usize).min(data.len());
    let mut offset = start as usize;
    while offset < stop {
        out.push(define_byte(offset as u32, data[offset], true));
        offset += 1;
    }
    offset as u32
}

fn fixed_width_lines(
    data: &[u8],
    start: u32,
    end: u32,
    directive: &str,
    size: usize,
    out: &mut Vec<String>,
) -> u32 {
    let stop = (end as usize).min(data.len());
    let mut offset = start as usize;
    while offset < stop {
        if offset < data.len().saturating_sub(size) && offset + size <= end as usize {
            let values = &data[offset..offset + size];
            let value: String = values.iter().rev().map(|v| format!("{v:02x}")).collect();
            out.push(define_line(offset as u32, values, directive, &format!("0x{value}")));
            offset += size;
        } else {
            // Trailing partial element falls back to byte defines.
            out.push(define_byte(offset as u32, data[offset], true));
            offset += 1;
        }
    }
    offset as u32
}

/// One string covering the whole range, not necessarily NUL-terminated.
fn single_string_lines(data: &[u8], start: u32, end: u32, out: &mut Vec<String>) -> u32 {
    let stop = (end as usize).min(data.len());
    let mut parts = Vec::new();
    let mut values = Vec::new();
    for &value in &data[start as usize..stop] {
        values.push(value);
        push_part(&mut parts, value);
    }
    if !values.is_empty() {
        out.push(define_line(start, &values, "db", &render_parts(&parts, false)));
    }
    stop as u32
}

/// Consecutive NUL-terminated strings; the last one need not be terminated.
fn strings_lines(data: &[u8], start: u32, end: u32, out: &mut Vec<String>) -> u32 {
    let stop = (end as usize).min(data.len());
    let mut offset = start as usize;
    while offset < stop {
        // One line per string, the terminator included in its values.
        let line_end = match memchr::memchr(0, &data[offset..stop]) {
            Some(pos) => offset + pos + 1,
            None => stop,
        };
        let values = &data[offset..line_end];
        let mut parts = Vec::new();
        for &value in values {
            push_part(&mut parts, value);
        }
        out.push(define_line(offset as u32, values, "db", &render_parts(&parts, false)));
        offset = line_end;
    }
    offset as u32
}

/// ASCII string auto-detection with byte fallback. Candidate strings need
/// at least `min_len` string-safe bytes and a NUL terminator.
fn auto_strings_lines(data: &[u8], start: u32, end: u32, out: &mut Vec<String>) -> u32 {
    const MIN_LEN: usize = 3;
    let stop = (end as usize).min(data.len());
    let mut offset = start as usize;
    while offset < stop {
        let string_safe = |v: u8| is_printable(v) || STRING_CONTROL.contains(&v);
        let candidate = offset + MIN_LEN < data.len()
            && offset + MIN_LEN < end as usize
            && data[offset..offset + MIN_LEN].iter().all(|&v| string_safe(v));
        if !candidate {
            out.push(define_byte(offset as u32, data[offset], true));
            offset += 1;
            continue;
        }
        let line_ofs = offset;
        let mut is_string = true;
        let mut parts = Vec::new();
        let mut values = Vec::new();
        while offset < stop {
            let value = data[offset];
            values.push(value);
            if is_printable(value) || value == 0 || STRING_CONTROL.contains(&value) {
                push_part(&mut parts, value);
            } else {
                // NUL termination required, so this cannot be a string.
                is_string = false;
                break;
            }
            offset += 1;
            if value == 0 {
                break;
            }
        }
        if values.last() != Some(&0) {
            is_string = false;
        }
        if is_string {
            out.push(define_line(line_ofs as u32, &values, "db", &render_parts(&parts, true)));
        } else {
            // False positive: re-emit the scanned span as plain bytes.
            for ofs in line_ofs..offset {
                out.push(define_byte(ofs as u32, data[ofs], true));
            }
        }
    }
    offset as u32
}

fn struct_lines(
    data: &[u8],
    start: u32,
    end: u32,
    members: &[StructMember],
    out: &mut Vec<String>,
) -> u32 {
    let stop = (end as usize).min(data.len()) as u32;
    let mut offset = start;
    // Each outer iteration decodes one full struct.
    while offset < stop {
        let before = offset;
        for member in members {
            let member_end = offset + member.length;
            let next = data_lines(data, offset, member_end.min(stop), &member.mode, out);
            if next - offset != member.length {
                warn!(
                    offset = next,
                    length = member.length,
                    mode = %member.mode,
                    "failed to decode struct member"
                );
            }
            offset = next;
        }
        if offset == before {
            warn!(offset, "struct decode made no progress, stopping");
            break;
        }
    }
    offset
}

/// Expands one data range into define lines per decode mode; returns the
/// offset reached (normally `min(end, data.len())`).
pub fn data_lines(
    data: &[u8],
    start: u32,
    end: u32,
    mode: &DecodeMode,
    out: &mut Vec<String>,
) -> u32 {
    match mode {
        DecodeMode::Default | DecodeMode::Bytes => bytes_lines(data, start, end, out),
        DecodeMode::Words => fixed_width_lines(data, start, end, "dw", 2, out),
        DecodeMode::Dwords => fixed_width_lines(data, start, end, "dd", 4, out),
        DecodeMode::Fwords => fixed_width_lines(data, start, end, "df", 6, out),
        DecodeMode::Qwords => fixed_width_lines(data, start, end, "dq", 8, out),
        DecodeMode::Tbytes => fixed_width_lines(data, start, end, "dt", 10, out),
        DecodeMode::String => single_string_lines(data, start, end, out),
        DecodeMode::Strings => strings_lines(data, start, end, out),
        DecodeMode::AutoStrings => auto_strings_lines(data, start, end, out),
        DecodeMode::Struct(members) => struct_lines(data, start, end, members, out),
        DecodeMode::Comment => {
            warn!(start, end, "comment mode reached the data expander, treating as bytes");
            bytes_lines(data, start, end, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::line::AsmLine;

    #[test]
    fn test_define_byte_comment() {
        let line = define_byte(0x10, b'A', true);
        assert!(line.contains("db"));
        assert!(line.contains("0x41"));
        assert!(line.contains("dec:  65, chr: 'A'"));
        let parsed = AsmLine::parse(&line).unwrap();
        assert_eq!(parsed.bytes, vec![0x41]);
    }

    #[test]
    fn test_dwords_little_endian() {
        let data = [0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0];
        let mut out = Vec::new();
        let next = data_lines(&data, 0, 4, &DecodeMode::Dwords, &mut out);
        assert_eq!(next, 4);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("dd"));
        assert!(out[0].contains("0x12345678"));
    }

    #[test]
    fn test_words_trailing_partial_falls_back_to_bytes() {
        let data = [0x01, 0x02, 0x03, 0xaa, 0xbb];
        let mut out = Vec::new();
        let next = data_lines(&data, 0, 3, &DecodeMode::Words, &mut out);
        assert_eq!(next, 3);
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("dw"));
        assert!(out[0].contains("0x0201"));
        assert!(out[1].contains("db"));
    }

    #[test]
    fn test_strings_split_at_nul() {
        let data = b"AB\0CD\0";
        let mut out = Vec::new();
        data_lines(data, 0, 6, &DecodeMode::Strings, &mut out);
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("\"AB\",0x0"));
        assert!(out[1].contains("\"CD\",0x0"));
    }

    #[test]
    fn test_auto_strings_detects_terminated_string() {
        let mut data = b"Hello\0".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        let mut out = Vec::new();
        data_lines(&data, 0, data.len() as u32, &DecodeMode::AutoStrings, &mut out);
        assert!(out[0].contains("\"Hello\",0x00"));
        // Remaining two bytes decode individually.
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_auto_strings_rejects_unterminated_candidate() {
        let data = [b'A', b'B', b'C', b'D', 0xff, 0x01];
        let mut out = Vec::new();
        data_lines(&data, 0, 6, &DecodeMode::AutoStrings, &mut out);
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|l| l.contains("db")));
        assert!(out.iter().all(|l| !l.contains('"')));
    }

    #[test]
    fn test_struct_repeats_until_range_end() {
        // struct { word; bytes[2] } twice over 8 bytes.
        let members = vec![
            StructMember::parse("word").unwrap(),
            StructMember::parse("bytes[2]").unwrap(),
        ];
        let data = [1u8, 0, 2, 3, 4, 0, 5, 6];
        let mut out = Vec::new();
        let next = data_lines(&data, 0, 8, &DecodeMode::Struct(members), &mut out);
        assert_eq!(next, 8);
        assert_eq!(out.iter().filter(|l| l.contains("dw")).count(), 2);
        assert_eq!(out.iter().filter(|l| l.contains("db")).count(), 4);
    }
}
