//! Batch orchestration: header tree in, annotated disassembly out.
//!
//! Single-threaded and deterministic; every stage fully consumes the
//! previous stage's output. Degraded conditions along the way are
//! warnings; only missing mandatory inputs abort the run, so a failed
//! range still leaves best-effort results for everything else.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::analysis::{
    add_fixup_globals, analyze_access_sizes, analyze_branches, build_code_map, build_data_map,
    build_structure, compute_global_spans, finalize_structure, BranchTable, NameCounters,
};
use crate::core::fixup::FixupTable;
use crate::core::global::GlobalTable;
use crate::core::module::Module;
use crate::core::object::{Object, ObjectKind};
use crate::disasm::synth::synthesize_object;
use crate::disasm::Disassembler;
use crate::error::{LxError, Result};
use crate::formats::le::{build_table, decode_fixups, FixupLocation, HeaderInput};
use crate::output::{
    dedup_lines_with_map, format_object, remap_range, write_module_outputs, write_object_outputs,
};

/// Everything a finished run produces, before file output.
#[derive(Debug)]
pub struct Disassembly {
    pub objects: Vec<Object>,
    pub modules: Vec<Module>,
    pub globals: GlobalTable,
    pub fixups: FixupTable,
    pub import_modules: Vec<String>,
    pub import_procedures: Vec<String>,
    pub branch_tables: Vec<BranchTable>,
}

/// Reads the raw fixup-section bytes out of the executable image.
pub fn read_fixup_section(path: &Path, location: &FixupLocation) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    // Read-only map of an input file the run never mutates.
    let map = unsafe { Mmap::map(&file)? };
    let start = (location.file_start() as usize).min(map.len());
    let end = (start + location.section_size as usize).min(map.len());
    if end - start < location.section_size as usize {
        warn!(
            expected = location.section_size,
            got = end - start,
            "fixup section extends past end of file"
        );
    }
    Ok(map[start..end].to_vec())
}

/// Runs the whole pipeline over a header tree, the raw fixup-section
/// bytes and a disassembler backend.
pub fn run(
    header: &HeaderInput,
    fixup_raw: &[u8],
    dis: &dyn Disassembler,
) -> Result<Disassembly> {
    if header.objects.is_empty() {
        return Err(LxError::MissingSection("object table"));
    }
    let mut objects = header.build_objects()?;
    let modules = header.build_modules();
    let mut globals = header.build_globals();
    info!(
        objects = objects.len(),
        modules = modules.len(),
        globals = globals.len(),
        disassembler = dis.name(),
        "pipeline started"
    );

    let (fixups, import_modules, import_procedures) = match &header.fixup_section {
        Some(location) => {
            let decoded = decode_fixups(fixup_raw, location, &header.page_layout())?;
            (
                build_table(&decoded.records),
                decoded.import_modules,
                decoded.import_procedures,
            )
        }
        None => {
            debug!("no fixup section in header tree");
            (FixupTable::default(), Vec::new(), Vec::new())
        }
    };

    add_fixup_globals(&fixups, &objects, &mut globals);

    // Code objects first: map, plain disassembly, then line analysis.
    for object in objects.iter_mut().filter(|o| o.kind == ObjectKind::Code) {
        compute_global_spans(object, &modules, &mut globals);
        build_code_map(object, &modules, &globals);
        synthesize_object(object, dis);
    }
    let branch_tables = analyze_branches(&objects, &fixups, &mut globals);
    analyze_access_sizes(&objects, &fixups, &mut globals);

    // Structure for every object; one counter set keeps synthesized
    // names consecutive across objects.
    let mut counters = NameCounters::default();
    for object in objects.iter_mut() {
        build_structure(object, &modules, &globals);
        finalize_structure(object, &mut globals, &mut counters);
    }

    // Data objects only now: their decode modes come from the structure.
    for object in objects.iter_mut().filter(|o| o.kind == ObjectKind::Data) {
        build_data_map(object, &modules, &fixups);
        synthesize_object(object, dis);
    }

    for object in objects.iter_mut() {
        format_object(object, &globals, &fixups);
        let (lines, map) = dedup_lines_with_map(&object.formatted);
        object.module_lines = object
            .module_lines
            .iter()
            .map(|(num, range)| (*num, remap_range(range, &map)))
            .collect();
        object.formatted = lines;
    }

    info!(
        fixups = fixups.len(),
        globals = globals.len(),
        branch_tables = branch_tables.len(),
        "pipeline finished"
    );
    Ok(Disassembly {
        objects,
        modules,
        globals,
        fixups,
        import_modules,
        import_procedures,
        branch_tables,
    })
}

/// Convenience entry: load the header tree and executable from disk,
/// run the pipeline and write all outputs below `dir`.
pub fn run_files(
    header_path: &Path,
    exe_path: &Path,
    dis: &dyn Disassembler,
    dir: &Path,
    prefix: &str,
) -> Result<Disassembly> {
    let header = HeaderInput::load(header_path)?;
    let fixup_raw = match &header.fixup_section {
        Some(location) => read_fixup_section(exe_path, location)?,
        None => Vec::new(),
    };
    let result = run(&header, &fixup_raw, dis)?;
    for object in &result.objects {
        write_object_outputs(dir, prefix, object)?;
    }
    write_module_outputs(dir, prefix, &result.objects, &result.modules)?;
    Ok(result)
}
