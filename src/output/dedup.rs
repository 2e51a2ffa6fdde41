//! Data-line deduplication: collapses runs of identical data-definition
//! lines into a single `N dup(...)` line.
//!
//! A run requires the same directive, operand, comment and backing bytes
//! on contiguous offsets; any other line (blank, label, comment,
//! instruction) breaks it. The index map returned by the `_with_map`
//! variant lets callers remap recorded line ranges.

use crate::core::line::AsmLine;

const DIRECTIVES: [&str; 6] = ["db", "dw", "dd", "df", "dq", "dt"];

struct DataLine {
    asm: AsmLine,
    directive: String,
    operand: String,
}

fn parse_data_line(line: &str) -> Option<DataLine> {
    let asm = AsmLine::parse(line)?;
    let (directive, operand) = asm.text.split_once(char::is_whitespace)?;
    if !DIRECTIVES.contains(&directive) {
        return None;
    }
    Some(DataLine {
        directive: directive.to_string(),
        operand: operand.trim().to_string(),
        asm,
    })
}

fn same_run(prev: &DataLine, next: &DataLine) -> bool {
    next.directive == prev.directive
        && next.operand == prev.operand
        && next.asm.bytes == prev.asm.bytes
        && next.asm.comment == prev.asm.comment
        && next.asm.offset == prev.asm.end()
}

fn render_dup(first: &DataLine, count: usize) -> String {
    let hex: Vec<String> = first.asm.bytes.iter().map(|b| format!("{b:02x}")).collect();
    let mut line = format!(
        "{:8x}:\t{:<20} \t{:<6} {} dup({})",
        first.asm.offset,
        hex.join(" "),
        first.directive,
        count,
        first.operand
    );
    if let Some(comment) = &first.asm.comment {
        line = format!("{line:<100}; {comment}");
    }
    line
}

/// Deduplicates `lines`, also returning for every input line index the
/// index of the output line that represents it.
pub fn dedup_lines_with_map(lines: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut out: Vec<String> = Vec::new();
    let mut map: Vec<usize> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let Some(first) = parse_data_line(&lines[i]) else {
            map.push(out.len());
            out.push(lines[i].clone());
            i += 1;
            continue;
        };
        let mut run = 1;
        let mut last = first;
        while i + run < lines.len() {
            let Some(next) = parse_data_line(&lines[i + run]) else { break };
            if !same_run(&last, &next) {
                break;
            }
            last = next;
            run += 1;
        }
        if run >= 2 {
            let first = parse_data_line(&lines[i]).unwrap_or(last);
            let index = out.len();
            out.push(render_dup(&first, run));
            for _ in 0..run {
                map.push(index);
            }
        } else {
            map.push(out.len());
            out.push(lines[i].clone());
        }
        i += run;
    }
    (out, map)
}

/// Deduplicates `lines`, discarding the index map.
pub fn dedup_lines(lines: &[String]) -> Vec<String> {
    dedup_lines_with_map(lines).0
}

/// Remaps a recorded `[start, end)` line range through a dedup map.
pub fn remap_range(range: &std::ops::Range<usize>, map: &[usize]) -> std::ops::Range<usize> {
    if range.start >= range.end || map.is_empty() {
        return 0..0;
    }
    let start = map[range.start.min(map.len() - 1)];
    let end = map[(range.end - 1).min(map.len() - 1)] + 1;
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_line(offset: u32) -> String {
        format!("{:8x}:\t{:<20} \t{:<6} {}", offset, "00", "db", "0x0")
    }

    #[test]
    fn test_five_identical_lines_merge() {
        let lines: Vec<String> = (0..5).map(db_line).collect();
        let out = dedup_lines(&lines);
        assert_eq!(out.len(), 1);
        assert!(out[0].contains("db"));
        assert!(out[0].contains("5 dup(0x0)"));
        // The merged line starts at the run's first offset.
        assert!(out[0].trim_start().starts_with("0:"));
    }

    #[test]
    fn test_blank_line_breaks_run() {
        let mut lines: Vec<String> = (0..3).map(db_line).collect();
        lines.push(String::new());
        lines.extend((3..5).map(db_line));
        let out = dedup_lines(&lines);
        assert_eq!(out.len(), 3);
        assert!(out[0].contains("3 dup(0x0)"));
        assert!(out[1].is_empty());
        assert!(out[2].contains("2 dup(0x0)"));
    }

    #[test]
    fn test_differing_operands_do_not_merge() {
        let lines = vec![
            format!("{:8x}:\t{:<20} \t{:<6} {}", 0, "41", "db", "0x41"),
            format!("{:8x}:\t{:<20} \t{:<6} {}", 1, "42", "db", "0x42"),
        ];
        assert_eq!(dedup_lines(&lines).len(), 2);
    }

    #[test]
    fn test_non_contiguous_offsets_do_not_merge() {
        let lines = vec![db_line(0), db_line(2)];
        assert_eq!(dedup_lines(&lines).len(), 2);
    }

    #[test]
    fn test_map_remaps_ranges() {
        let mut lines: Vec<String> = (0..4).map(db_line).collect();
        lines.push("label:".to_string());
        let (out, map) = dedup_lines_with_map(&lines);
        assert_eq!(out.len(), 2);
        assert_eq!(map, vec![0, 0, 0, 0, 1]);
        assert_eq!(remap_range(&(0..5), &map), 0..2);
        assert_eq!(remap_range(&(4..5), &map), 1..2);
    }
}
