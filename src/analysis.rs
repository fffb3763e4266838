use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::Result;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info, warn};

use crate::config::AnalysisOptions;
use crate::dwarf::{CompilationUnit, UnitWalker};
use crate::line::{LineProgramParser, LineTable};
use crate::macinfo::{resolve_macros, MacroInfoParser};
use crate::model::{Include, IncludeSet, Macro, MacroSet, SourceFiles, ValueCache};
use crate::sections::{DebugSections, DEBUG_INFO};
use crate::tree::{compress, PathTree, TreePath};
use crate::types::SectionOffset;
use crate::verify::{verify, Discrepancy};

/// What the debug information says about how each source file was compiled.
#[derive(Debug, Default)]
pub struct BuildSettings {
    pub compilation_units: Vec<CompilationUnit>,
    pub source_files: SourceFiles,
    /// Command-line macros per compile-unit source file.
    pub macros: IndexMap<String, MacroSet>,
    /// Include directories and forced includes per compile-unit source file.
    pub includes: IndexMap<String, IncludeSet>,
    pub compressed_macros: PathTree<Arc<Macro>>,
    pub compressed_includes: PathTree<Arc<Include>>,
    pub macro_discrepancies: Vec<Discrepancy<Arc<Macro>>>,
    pub include_discrepancies: Vec<Discrepancy<Arc<Include>>>,
    pub failed_units: usize,
}

impl BuildSettings {
    pub fn is_consistent(&self) -> bool {
        self.macro_discrepancies.is_empty() && self.include_discrepancies.is_empty()
    }
}

/// Runs the whole recovery over one binary's debug sections.
///
/// Owns the interning caches, so values are shared across all files of this binary only.
pub struct Analyzer<'s> {
    sections: &'s DebugSections,
    options: AnalysisOptions,
    macro_cache: ValueCache<Macro>,
    include_cache: ValueCache<Include>,
}

impl<'s> Analyzer<'s> {
    pub fn new(sections: &'s DebugSections, options: AnalysisOptions) -> Self {
        Self {
            sections,
            options,
            macro_cache: ValueCache::new(),
            include_cache: ValueCache::new(),
        }
    }

    pub fn run(&mut self) -> Result<BuildSettings> {
        let mut settings = BuildSettings::default();
        if !self.sections.contains(DEBUG_INFO) {
            warn!("no .debug_info section, nothing to analyze");
            return Ok(settings);
        }

        let mut walker = UnitWalker::new(self.sections);
        let units = walker.walk();
        settings.failed_units = walker.failed_units();
        info!(
            units = units.len(),
            failed = settings.failed_units,
            endian = %self.sections.endian(),
            "decoded compile units"
        );

        let mut lines = LineProgramParser::new(self.sections);
        let mut tables: HashMap<SectionOffset, LineTable> = HashMap::new();
        for cu in &units {
            self.collect_unit(cu, &mut lines, &mut tables, &mut settings);
        }

        if self.options.scan_unreferenced_line_tables {
            for table in lines.scan_unreferenced() {
                for file in table.files {
                    settings.source_files.register(file, None);
                }
            }
        }
        info!(
            files = settings.source_files.len(),
            macros = self.macro_cache.len(),
            includes = self.include_cache.len(),
            "collected per-file settings"
        );

        let (compressed, discrepancies) = self.compress_and_check(&settings.macros);
        settings.compressed_macros = compressed;
        settings.macro_discrepancies = discrepancies;
        let (compressed, discrepancies) = self.compress_and_check(&settings.includes);
        settings.compressed_includes = compressed;
        settings.include_discrepancies = discrepancies;

        settings.compilation_units = units;
        Ok(settings)
    }

    fn collect_unit(
        &mut self,
        cu: &CompilationUnit,
        lines: &mut LineProgramParser<'_>,
        tables: &mut HashMap<SectionOffset, LineTable>,
        settings: &mut BuildSettings,
    ) {
        let path = cu.path();
        debug!(%cu, "collecting unit");
        settings.source_files.register(path.clone(), cu.macro_info);

        let mut includes = IncludeSet::new();
        if !cu.comp_dir.is_empty() {
            includes.insert(self.include_cache.intern(Include::directory(cu.comp_dir.as_str())));
        }
        if let Some(table) = unit_line_table(cu, lines, tables) {
            for dir in &table.directories {
                includes.insert(self.include_cache.intern(Include::directory(dir.as_str())));
            }
            for file in &table.files {
                settings.source_files.register(file.as_str(), None);
                if *file != path {
                    includes.insert(self.include_cache.intern(Include::file(file.as_str())));
                }
            }
        }
        settings.includes.entry(path.clone()).or_default().extend(includes);

        let macros = match cu.macro_info {
            Some(offset) => self.unit_macros(offset, cu),
            None => MacroSet::new(),
        };
        settings.macros.entry(path).or_default().extend(macros);
    }

    fn unit_macros(&mut self, offset: SectionOffset, cu: &CompilationUnit) -> MacroSet {
        let parser = MacroInfoParser::new(self.sections.debug_macinfo(), self.sections.endian());
        match parser.parse_from(offset, true) {
            Ok(records) => resolve_macros(&records, &mut self.macro_cache),
            Err(err) => {
                warn!(unit = cu.offset, offset, error = %err, "unreadable macro info");
                MacroSet::new()
            }
        }
    }

    fn compress_and_check<T>(&self, per_file: &IndexMap<String, IndexSet<T>>) -> (PathTree<T>, Vec<Discrepancy<T>>)
    where
        T: Clone + Eq + Hash + std::fmt::Display,
    {
        let mut original: PathTree<T> = PathTree::new();
        for (path, attrs) in per_file {
            original
                .entry(TreePath::parse(path))
                .or_default()
                .extend(attrs.iter().cloned());
        }
        let compressed = compress(original.clone());
        debug!(files = original.len(), nodes = compressed.len(), "compressed attribute tree");

        let discrepancies = if self.options.verify_compression {
            verify(&original, &compressed)
        } else {
            Vec::new()
        };
        (compressed, discrepancies)
    }
}

/// The unit's line table, parsed on first use and shared by units pointing at the same one.
fn unit_line_table<'t>(
    cu: &CompilationUnit,
    lines: &mut LineProgramParser<'_>,
    tables: &'t mut HashMap<SectionOffset, LineTable>,
) -> Option<&'t LineTable> {
    let offset = cu.stmt_list?;
    if !tables.contains_key(&offset) {
        match lines.parse_for_unit(cu) {
            Ok(Some(table)) => {
                debug!(offset, files = table.files.len(), "parsed line table");
                tables.insert(offset, table);
            }
            Ok(None) => return None,
            Err(err) => {
                warn!(unit = cu.offset, offset, error = %err, "unreadable line table");
                return None;
            }
        }
    }
    tables.get(&offset)
}

/// Convenience wrapper: analyze `sections` with `options`.
pub fn analyze(sections: &DebugSections, options: AnalysisOptions) -> Result<BuildSettings> {
    Analyzer::new(sections, options).run()
}
