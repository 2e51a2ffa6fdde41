//! Formatter: combines an object's plain line list with its finalized
//! structure into the annotated disassembly.
//!
//! Structure items materialize as boxed comment headers or bare label
//! lines at their start offset. Instruction lines get fixup-driven label
//! substitution (only the single unambiguous textual match is replaced),
//! direct call/jump substitution from resolved globals, and a trailing
//! fixup comment column. Per-module line ranges are recorded on the fly
//! for the module output split.

use regex::Regex;
use tracing::{debug, error, warn};

use crate::core::fixup::{Fixup, FixupTable};
use crate::core::global::GlobalTable;
use crate::core::line::AsmLine;
use crate::core::object::Object;
use crate::core::structure::ItemKind;

const BOX_BORDER: char = '-';
const BOX_SPACING: usize = 2;

fn wrap(paragraph: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Renders paragraphs as a bordered comment box of the given width.
pub fn comment_box(
    content: &[String],
    width: usize,
    spacing_top: usize,
    spacing_bottom: usize,
) -> Vec<String> {
    let inner_width = width.saturating_sub(1 + 2 * BOX_SPACING + 1);
    let outer: String = std::iter::once(';')
        .chain(std::iter::repeat(BOX_BORDER).take(width.saturating_sub(1)))
        .collect();
    let inner = |text: &str| {
        format!(
            ";{pad}{text:<inner_width$}{pad}{BOX_BORDER}",
            pad = " ".repeat(BOX_SPACING)
        )
    };

    let mut out = vec![outer.clone()];
    for _ in 0..spacing_top {
        out.push(inner(""));
    }
    for paragraph in content {
        if paragraph.is_empty() {
            out.push(inner(""));
            continue;
        }
        for line in wrap(paragraph, inner_width) {
            out.push(inner(&line));
        }
    }
    for _ in 0..spacing_bottom {
        out.push(inner(""));
    }
    out.push(outer);
    out
}

fn pad_comment(line: &str, comment: &str) -> String {
    format!("{line:<100}; {comment}")
}

/// Maps each plain-line start offset to the fixups covering that line.
fn map_fixups(object: &Object, records: &[Fixup]) -> Vec<(u32, Vec<Fixup>)> {
    let mut map = Vec::new();
    let mut index = 0;
    for (i, line) in object.plain.iter().enumerate() {
        if index >= records.len() {
            break;
        }
        let Some(asm) = AsmLine::parse(line) else {
            warn!(line = i + 1, text = %line, "invalid assembly line");
            continue;
        };
        let mut covering = Vec::new();
        while index < records.len()
            && records[index].source_offset >= asm.offset
            && records[index].source_offset < asm.end()
        {
            covering.push(records[index]);
            index += 1;
        }
        if !covering.is_empty() {
            map.push((asm.offset, covering));
        }
    }
    while index < records.len() {
        let record = &records[index];
        warn!(
            source_offset = format_args!("{:#x}", record.source_offset),
            target_object = record.target_object,
            target_offset = format_args!("{:#x}", record.target_offset),
            "fixup record beyond disassembly range"
        );
        index += 1;
    }
    map
}

fn global_names(globals: &GlobalTable, object: u32, offset: u32) -> Vec<String> {
    globals
        .at(object, offset)
        .iter()
        .filter_map(|&id| globals.get(id).name.clone())
        .collect()
}

/// Substitutes the one unambiguous textual match of a fixup's target
/// offset with the target global's label.
fn substitute_fixup(
    line: &mut String,
    operand: &str,
    record: &Fixup,
    globals: &GlobalTable,
) {
    let names = global_names(globals, record.target_object, record.target_offset);
    let Some(first) = names.first() else {
        warn!(
            target_object = record.target_object,
            target_offset = format_args!("{:#x}", record.target_offset),
            line = %line,
            "no named global for fixup target"
        );
        return;
    };
    // Disassemblers may zero-pad the literal, so match `0x0*<off>` up
    // to a non-hex-digit boundary instead of the exact text.
    let pattern = format!("(0x0*{:x})(?:[^0-9a-f]|$)", record.target_offset);
    let finder = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            error!(pattern, error = %e, "fixup target pattern failed to compile");
            return;
        }
    };
    let mut found = finder.captures_iter(operand);
    let Some(caps) = found.next() else {
        warn!(target = %pattern, line = %line, "failed to match fixup target offset");
        return;
    };
    if found.next().is_some() {
        warn!(target = %pattern, line = %line, "multiple matches for fixup target offset");
        return;
    }
    let Some(literal) = caps.get(1) else {
        return;
    };
    *line = line.replacen(
        literal.as_str(),
        &format!("@obj{}:{}", record.target_object, first),
        1,
    );
    if names.len() > 1 {
        *line = pad_comment(line, &format!("aliases: {}", names.join(", ")));
    }
}

/// Substitutes a direct call/jump/loop constant with a global's name.
fn substitute_branch(line: &mut String, asm: &AsmLine, object: u32, globals: &GlobalTable) {
    let (mnemonic, operand) = match asm.text.split_once(char::is_whitespace) {
        Some((m, o)) => (m, o.trim()),
        None => return,
    };
    if mnemonic != "call" && !mnemonic.starts_with('j') && !mnemonic.starts_with("loop") {
        return;
    }
    if !operand.starts_with("0x") {
        return;
    }
    let Ok(offset) = u32::from_str_radix(&operand[2..], 16) else {
        return;
    };
    let names = global_names(globals, object, offset);
    let Some(first) = names.first() else {
        warn!(
            object,
            offset = format_args!("{:#x}", offset),
            line = %line,
            "no global for direct branch target"
        );
        return;
    };
    *line = line.replacen(operand, first, 1);
    if names.len() > 1 {
        *line = pad_comment(line, &format!("aliases: {}", names.join(", ")));
    }
}

/// Builds `object.formatted` and `object.module_lines` from the plain
/// disassembly and finalized structure.
pub fn format_object(object: &mut Object, globals: &GlobalTable, fixups: &FixupTable) {
    debug!(object = object.num, "formatting disassembly");
    let records = fixups.for_source_object(object.num);
    let fixup_map = map_fixups(object, records);
    let fixups_at = |offset: u32| {
        fixup_map
            .iter()
            .find(|(o, _)| *o == offset)
            .map(|(_, r)| r.as_slice())
            .unwrap_or(&[])
    };

    let mut out: Vec<String> = Vec::new();
    let mut module_lines: Vec<(u32, std::ops::Range<usize>)> = Vec::new();
    let mut open_module: Option<(u32, usize)> = None;
    let mut struct_index = 0;
    let mut current_offset = 0u32;

    for i in 0..=object.plain.len() {
        let asm = if i < object.plain.len() {
            let asm = AsmLine::parse(&object.plain[i]);
            if let Some(a) = &asm {
                current_offset = a.offset;
            } else {
                warn!(line = i + 1, text = %object.plain[i], "invalid assembly line");
            }
            asm
        } else {
            current_offset = object.size();
            None
        };

        while struct_index < object.structure.len()
            && object.structure[struct_index].start <= current_offset
        {
            let item = object.structure[struct_index].clone();
            struct_index += 1;

            let mut pre = Vec::new();
            if item.start < current_offset {
                warn!(
                    object = object.num,
                    name = item.name.as_deref().unwrap_or("?"),
                    offset = format_args!("{:#x}", current_offset),
                    "misplaced structure item"
                );
                pre.push(format!("; misplaced item, should be at offset 0x{:x}", item.start));
            }

            match &item.kind {
                ItemKind::ObjectStart { objnum } => {
                    out.extend(pre);
                    out.extend(comment_box(&[format!("Object {objnum}")], 80, 1, 1));
                }
                ItemKind::ObjectEnd { objnum } => {
                    if let Some((num, start)) = open_module.take() {
                        module_lines.push((num, start..out.len()));
                    }
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(&[format!("End of object {objnum}")], 80, 1, 1));
                }
                ItemKind::ModuleStart { modnum } => {
                    open_module = Some((*modnum, out.len() + 1));
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(
                        &[format!(
                            "Module {}: {}",
                            modnum,
                            item.name.as_deref().unwrap_or("?")
                        )],
                        80,
                        1,
                        1,
                    ));
                }
                ItemKind::ModuleEnd { modnum } => {
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(
                        &[format!(
                            "End of module {} ({})",
                            modnum,
                            item.name.as_deref().unwrap_or("?")
                        )],
                        80,
                        1,
                        1,
                    ));
                    if let Some((num, start)) = open_module.take() {
                        module_lines.push((num, start..out.len()));
                    }
                }
                ItemKind::VirtualPaddingStart { size } => {
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(
                        &[
                            format!("End of actual data of object {}", object.num),
                            format!("Start of virtual size padding data ({size} bytes)"),
                        ],
                        80,
                        1,
                        1,
                    ));
                }
                ItemKind::VirtualPaddingEnd => {
                    if let Some((num, start)) = open_module.take() {
                        module_lines.push((num, start..out.len()));
                    }
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(
                        &["End of virtual size padding data".to_string()],
                        80,
                        1,
                        1,
                    ));
                }
                ItemKind::HintStart { hintnum, kind, mode, length, comment } => {
                    out.extend(pre);
                    let mut content =
                        vec![format!("Hint {hintnum} ({kind}, {mode}, {length} bytes):")];
                    if let Some(c) = comment {
                        content.push(c.clone());
                    }
                    out.extend(comment_box(&content, 50, 0, 0));
                }
                ItemKind::HintEnd { hintnum } => {
                    out.extend(pre);
                    out.extend(comment_box(&[format!("End of hint {hintnum}")], 50, 0, 0));
                }
                ItemKind::BadCodeStart { badnum, kind, length, context } => {
                    out.extend(pre);
                    out.extend(comment_box(&[format!("Bad code {badnum} ({kind}):")], 50, 0, 0));
                    for ctx in context {
                        out.push(format!(";{}", ctx.get(1..).unwrap_or("")));
                    }
                    out.extend(comment_box(
                        &[format!("Padding data ({length} bytes):")],
                        50,
                        0,
                        0,
                    ));
                }
                ItemKind::BadCodeEnd { badnum } => {
                    out.extend(pre);
                    out.extend(comment_box(&[format!("End of bad code {badnum}")], 50, 0, 0));
                }
                ItemKind::Function => {
                    out.push(String::new());
                    out.extend(pre);
                    out.extend(comment_box(
                        &[format!("Function '{}'", item.name.as_deref().unwrap_or("?"))],
                        50,
                        0,
                        0,
                    ));
                    out.push(format!("{}:", item.label.as_deref().unwrap_or("?")));
                }
                ItemKind::Branch | ItemKind::Reference | ItemKind::Variable => {
                    out.extend(pre);
                    out.push(format!("{}:", item.label.as_deref().unwrap_or("?")));
                }
            }

            if !item.access_sizes.is_empty() {
                let label = if item.access_sizes.len() > 1 {
                    "access sizes"
                } else {
                    "access size"
                };
                let sizes: Vec<String> =
                    item.access_sizes.iter().map(|a| a.to_string()).collect();
                if let Some(last) = out.pop() {
                    out.push(pad_comment(&last, &format!("{label}: {}", sizes.join(", "))));
                }
            }
        }

        if i < object.plain.len() {
            let mut line = object.plain[i].clone();
            if let Some(asm) = &asm {
                let operand = asm
                    .text
                    .split_once(char::is_whitespace)
                    .map(|(_, rest)| rest.trim().to_string())
                    .unwrap_or_default();
                let covering = fixups_at(asm.offset);
                for record in covering {
                    substitute_fixup(&mut line, &operand, record, globals);
                }
                substitute_branch(&mut line, asm, object.num, globals);
                if !covering.is_empty() {
                    let comments: Vec<String> = covering
                        .iter()
                        .map(|r| {
                            format!(
                                "fixup: num: {}, src obj: {}, src ofs: 0x{:x}, dst obj: {}, dst ofs: 0x{:x}",
                                r.num, r.source_object, r.source_offset, r.target_object, r.target_offset
                            )
                        })
                        .collect();
                    line = pad_comment(&line, &comments.join("; "));
                }
            }
            out.push(line);
        }
    }

    debug!(object = object.num, lines = out.len(), "formatted disassembly");
    object.formatted = out;
    object.module_lines = module_lines;
}
