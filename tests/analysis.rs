mod common;

use anyhow::Result;
use common::{line_table, AbbrevBuilder, Die, InfoBuilder, MacinfoBuilder, StrTable};
use dwscan::dwarf::{
    UnitWalker, DW_AT_COMP_DIR, DW_AT_HIGH_PC, DW_AT_LANGUAGE, DW_AT_LOW_PC, DW_AT_MACRO_INFO, DW_AT_NAME,
    DW_AT_PRODUCER, DW_AT_STMT_LIST, DW_FORM_ADDR, DW_FORM_DATA1, DW_FORM_DATA4, DW_FORM_STRING, DW_FORM_STRP,
    DW_TAG_COMPILE_UNIT,
};
use dwscan::sections::{DEBUG_ABBREV, DEBUG_INFO, DEBUG_LINE, DEBUG_MACINFO, DEBUG_STR};
use dwscan::{AnalysisOptions, Analyzer, DebugSections, Endian, Include, Macro, TreePath};

const DW_TAG_BASE_TYPE: u64 = 0x24;
const DW_AT_BYTE_SIZE: u64 = 0x0b;
const DW_AT_ENCODING: u64 = 0x3e;
const DW_AT_DECL_LINE: u64 = 0x3b;

fn abbrevs() -> AbbrevBuilder {
    AbbrevBuilder::new()
        .entry(
            1,
            DW_TAG_COMPILE_UNIT,
            true,
            &[
                (DW_AT_NAME, DW_FORM_STRING),
                (DW_AT_COMP_DIR, DW_FORM_STRP),
                (DW_AT_PRODUCER, DW_FORM_STRING),
                (DW_AT_LANGUAGE, DW_FORM_DATA1),
                (DW_AT_LOW_PC, DW_FORM_ADDR),
                (DW_AT_HIGH_PC, DW_FORM_ADDR),
                (DW_AT_STMT_LIST, DW_FORM_DATA4),
                (DW_AT_MACRO_INFO, DW_FORM_DATA4),
            ],
        )
        .entry(
            2,
            DW_TAG_BASE_TYPE,
            false,
            &[
                (DW_AT_NAME, DW_FORM_STRING),
                (DW_AT_BYTE_SIZE, DW_FORM_DATA1),
                (DW_AT_ENCODING, DW_FORM_DATA1),
            ],
        )
        .entry(
            3,
            DW_TAG_COMPILE_UNIT,
            false,
            &[(DW_AT_NAME, DW_FORM_STRING), (DW_AT_COMP_DIR, DW_FORM_STRING)],
        )
        .entry(
            4,
            DW_TAG_COMPILE_UNIT,
            false,
            &[(DW_AT_NAME, DW_FORM_STRING), (DW_AT_DECL_LINE, 0x7f)],
        )
        .end_table()
}

fn full_unit(name: &str, comp_dir_strp: u32, stmt_list: u32, macro_info: u32) -> Die {
    Die::new(1)
        .string(name)
        .data4(comp_dir_strp)
        .string("GNU C 4.1.2")
        .data1(0x01)
        .addr4(0x1000)
        .addr4(0x1100)
        .data4(stmt_list)
        .data4(macro_info)
}

/// Two units under `/work/proj/src` sharing a macro and include directories, plus one
/// unrelated unit without line or macro information.
fn project() -> DebugSections {
    let mut strings = StrTable::default();
    let comp_dir = strings.add("/work/proj");

    let mut line = line_table(
        2,
        &["include", "/usr/include"],
        &[("src/a.c", 0), ("config.h", 1), ("stdio.h", 2)],
        &[],
    );
    let second_table = line.len() as u32;
    line.extend(line_table(2, &["include"], &[("src/b.c", 0)], &[]));

    let macinfo_a = MacinfoBuilder::new()
        .define(0, "DEBUG 1")
        .define(0, "LEVEL 1")
        .undef(0, "LEVEL")
        .start_file(0, 1)
        .define(5, "LOCAL")
        .start_file(7, 2)
        .define(1, "HEADER_GUARD")
        .end_file()
        .end_file()
        .end_unit();
    let macinfo_b_offset = macinfo_a.offset();
    let macinfo = MacinfoBuilder {
        bytes: macinfo_a.bytes,
    }
    .define(0, "DEBUG 1")
    .define(0, "B_ONLY")
    .start_file(0, 1)
    .end_file()
    .end_unit();

    let info = InfoBuilder::new()
        .unit(
            2,
            0,
            &[
                full_unit("src/a.c", comp_dir, 0, 0),
                Die::new(2).string("int").data1(4).data1(5),
            ],
        )
        .unit(2, 0, &[full_unit("src/b.c", comp_dir, second_table, macinfo_b_offset)])
        .unit(2, 0, &[Die::new(3).string("/abs/c.c").string("/elsewhere")]);

    DebugSections::new(Endian::Little)
        .with_section(DEBUG_INFO, info.bytes)
        .with_section(DEBUG_ABBREV, abbrevs().bytes)
        .with_section(DEBUG_LINE, line)
        .with_section(DEBUG_STR, strings.bytes)
        .with_section(DEBUG_MACINFO, macinfo.bytes)
}

fn texts<'a, T: 'a + ToString>(items: impl IntoIterator<Item = &'a T>) -> Vec<String> {
    items.into_iter().map(ToString::to_string).collect()
}

#[test]
fn recovers_units_and_their_attributes() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;

    assert_eq!(settings.failed_units, 0);
    assert_eq!(settings.compilation_units.len(), 3);
    let a = &settings.compilation_units[0];
    assert_eq!(a.path(), "/work/proj/src/a.c");
    assert_eq!(a.comp_dir, "/work/proj");
    assert_eq!(a.producer.as_deref(), Some("GNU C 4.1.2"));
    assert_eq!(a.language, Some(1));
    assert_eq!((a.low_pc, a.high_pc), (Some(0x1000), Some(0x1100)));
    assert_eq!(a.stmt_list, Some(0));
    assert_eq!(settings.compilation_units[2].stmt_list, None);
    Ok(())
}

#[test]
fn registers_source_files_first_come_first_served() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;

    let files: Vec<&str> = settings.source_files.iter().map(|(path, _)| path).collect();
    assert_eq!(
        files,
        vec![
            "/work/proj/src/a.c",
            "/work/proj/include/config.h",
            "/usr/include/stdio.h",
            "/work/proj/src/b.c",
            "/abs/c.c",
        ]
    );
    assert_eq!(settings.source_files.macro_info("/work/proj/src/a.c"), Some(0));
    assert!(settings.source_files.macro_info("/work/proj/src/b.c").is_some());
    assert_eq!(settings.source_files.macro_info("/usr/include/stdio.h"), None);
    Ok(())
}

#[test]
fn collects_command_line_macros_per_file() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;

    assert_eq!(settings.macros.len(), 3);
    assert_eq!(
        texts(&settings.macros["/work/proj/src/a.c"]),
        vec!["-DDEBUG=1", "-ULEVEL", "-DLOCAL"]
    );
    assert_eq!(texts(&settings.macros["/work/proj/src/b.c"]), vec!["-DDEBUG=1", "-DB_ONLY"]);
    assert!(settings.macros["/abs/c.c"].is_empty());
    assert!(!settings.macros["/work/proj/src/a.c"].contains(&Macro::defined("HEADER_GUARD")));
    Ok(())
}

#[test]
fn include_sets_start_with_the_compile_directory() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;

    assert_eq!(
        texts(&settings.includes["/work/proj/src/a.c"]),
        vec![
            "-I/work/proj",
            "-I/work/proj/include",
            "-I/usr/include",
            "-include /work/proj/include/config.h",
            "-include /usr/include/stdio.h",
        ]
    );
    assert_eq!(
        texts(&settings.includes["/work/proj/src/b.c"]),
        vec!["-I/work/proj", "-I/work/proj/include"]
    );
    assert_eq!(texts(&settings.includes["/abs/c.c"]), vec!["-I/elsewhere"]);
    Ok(())
}

#[test]
fn shared_settings_move_to_the_common_directory() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;
    assert!(settings.is_consistent());

    let src = TreePath::parse("/work/proj/src");
    assert_eq!(texts(&settings.compressed_macros[&src]), vec!["-DDEBUG=1"]);
    assert_eq!(
        texts(&settings.compressed_macros[&TreePath::parse("/work/proj/src/b.c")]),
        vec!["-DB_ONLY"]
    );
    assert_eq!(
        texts(&settings.compressed_includes[&src]),
        vec!["-I/work/proj", "-I/work/proj/include"]
    );
    assert!(!settings.compressed_includes[&TreePath::parse("/work/proj/src/a.c")]
        .contains(&Include::directory("/work/proj")));
    assert_eq!(
        texts(&settings.compressed_includes[&TreePath::parse("/abs/c.c")]),
        vec!["-I/elsewhere"]
    );
    Ok(())
}

#[test]
fn equal_values_are_shared_across_files() -> Result<()> {
    let sections = project();
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;

    let debug_a = settings.macros["/work/proj/src/a.c"]
        .get(&Macro::defined("DEBUG 1"))
        .cloned();
    let debug_b = settings.macros["/work/proj/src/b.c"]
        .get(&Macro::defined("DEBUG 1"))
        .cloned();
    match (debug_a, debug_b) {
        (Some(a), Some(b)) => assert!(std::sync::Arc::ptr_eq(&a, &b)),
        other => panic!("DEBUG missing: {other:?}"),
    }
    Ok(())
}

#[test]
fn a_broken_unit_does_not_stop_the_walk() -> Result<()> {
    let mut strings = StrTable::default();
    let comp_dir = strings.add("/w");
    let info = InfoBuilder::new()
        .unit(2, 0, &[Die::new(3).string("first.c").string("/w")])
        .unit(2, 0, &[Die::new(4).string("broken.c").data1(9)])
        .unit(5, 0, &[Die::new(3).string("future.c").string("/w")])
        .unit(2, 0, &[full_unit("last.c", comp_dir, 0, 0)]);
    let sections = DebugSections::new(Endian::Little)
        .with_section(DEBUG_INFO, info.bytes)
        .with_section(DEBUG_ABBREV, abbrevs().bytes)
        .with_section(DEBUG_STR, strings.bytes);

    let mut walker = UnitWalker::new(&sections);
    let units = walker.walk();
    let names: Vec<&str> = units.iter().map(|cu| cu.name.as_str()).collect();
    assert_eq!(names, vec!["first.c", "last.c"]);
    assert_eq!(walker.failed_units(), 2);
    assert_eq!(walker.abbrev_cache().parse_count(), 1);

    // Missing .debug_line and .debug_macinfo only cost the affected unit its data.
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;
    assert_eq!(settings.failed_units, 2);
    assert_eq!(settings.macros.len(), 2);
    assert!(settings.macros["/w/last.c"].is_empty());
    Ok(())
}

#[test]
fn out_of_range_string_offsets_read_as_empty() -> Result<()> {
    let info = InfoBuilder::new().unit(2, 0, &[full_unit("lonely.c", 0xffff, 0, 0)]);
    let sections = DebugSections::new(Endian::Little)
        .with_section(DEBUG_INFO, info.bytes)
        .with_section(DEBUG_ABBREV, abbrevs().bytes)
        .with_section(DEBUG_STR, b"short\0".to_vec());

    let units = UnitWalker::new(&sections).walk();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].comp_dir, "");
    assert_eq!(units[0].path(), "lonely.c");
    Ok(())
}

#[test]
fn big_endian_units_decode() -> Result<()> {
    // Same unit as `first.c` above, with a big-endian header.
    let mut die = Die::new(3).string("be.c").string("/be").bytes;
    die.push(0);
    let mut unit = Vec::new();
    unit.extend(((die.len() + 7) as u32).to_be_bytes());
    unit.extend(2u16.to_be_bytes());
    unit.extend(0u32.to_be_bytes());
    unit.push(4);
    unit.extend(die);

    let sections = DebugSections::new(Endian::Big)
        .with_section(DEBUG_INFO, unit)
        .with_section(DEBUG_ABBREV, abbrevs().bytes);
    let units = UnitWalker::new(&sections).walk();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].path(), "/be/be.c");
    Ok(())
}

#[test]
fn no_debug_info_yields_empty_settings() -> Result<()> {
    let sections = DebugSections::new(Endian::Little);
    let settings = Analyzer::new(&sections, AnalysisOptions::default()).run()?;
    assert!(settings.compilation_units.is_empty());
    assert!(settings.source_files.is_empty());
    assert!(settings.compressed_macros.is_empty());
    Ok(())
}
