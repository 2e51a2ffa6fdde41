//! File output: per-object dumps and the per-module disassembly split.
//!
//! Each object produces its raw bytes, structure and data map as JSON,
//! and the plain and formatted listings. Each module collects its
//! recorded line ranges across all objects into one `.asm` unit; modules
//! without a file-type suffix (libraries) share a single `library` unit.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::module::Module;
use crate::core::object::Object;
use crate::error::Result;
use crate::output::format::comment_box;

fn object_path(dir: &Path, prefix: &str, num: u32, suffix: &str) -> PathBuf {
    dir.join(format!("{prefix}_object_{num}_{suffix}"))
}

/// Writes all per-object output files for one object.
pub fn write_object_outputs(dir: &Path, prefix: &str, object: &Object) -> Result<()> {
    fs::create_dir_all(dir)?;
    debug!(object = object.num, "writing object outputs");
    fs::write(object_path(dir, prefix, object.num, "data.bin"), &object.data)?;
    fs::write(
        object_path(dir, prefix, object.num, "structure.json"),
        serde_json::to_string_pretty(&object.structure)?,
    )?;
    fs::write(
        object_path(dir, prefix, object.num, "data_map.json"),
        serde_json::to_string_pretty(object.data_map.entries())?,
    )?;
    fs::write(
        object_path(dir, prefix, object.num, "disasm_plain.asm"),
        object.plain.join("\n") + "\n",
    )?;
    fs::write(
        object_path(dir, prefix, object.num, "disasm_formatted.asm"),
        object.formatted.join("\n") + "\n",
    )?;
    Ok(())
}

/// The formatted-line chunks recorded for one module, across objects.
fn module_chunks(module: &Module, objects: &[Object]) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    for object in objects {
        for (num, range) in &object.module_lines {
            if *num == module.num {
                chunks.push(object.formatted[range.clone()].to_vec());
            }
        }
    }
    chunks
}

/// Writes one output unit per module; library modules (no file-type
/// suffix in their name) are concatenated into one shared unit.
pub fn write_module_outputs(
    dir: &Path,
    prefix: &str,
    objects: &[Object],
    modules: &[Module],
) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut library: Vec<String> = Vec::new();
    let mut written = 0usize;

    for module in modules {
        let chunks = module_chunks(module, objects);
        if chunks.is_empty() {
            debug!(module = module.num, name = %module.name, "module has no recorded lines");
            continue;
        }
        let mut lines: Vec<String> = Vec::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            if i > 0 {
                lines.push(String::new());
            }
            lines.extend(chunk);
        }

        if module.is_library() {
            if !library.is_empty() {
                library.push(String::new());
            }
            library.extend(comment_box(
                &[format!("Library module {}: {}", module.num, module.name)],
                80,
                1,
                1,
            ));
            library.push(String::new());
            library.extend(lines);
            continue;
        }

        let mut name = module.basename().to_string();
        if !name.to_ascii_lowercase().ends_with(".asm") {
            name.push_str(".asm");
        }
        let path = dir.join(format!("{prefix}_module_{:03}_{name}", module.num));
        fs::write(path, lines.join("\n") + "\n")?;
        written += 1;
    }

    if !library.is_empty() {
        fs::write(
            dir.join(format!("{prefix}_modules_library.asm")),
            library.join("\n") + "\n",
        )?;
        written += 1;
    }
    info!(files = written, "module outputs written");
    Ok(())
}
