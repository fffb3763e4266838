use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::{debug, trace};

use crate::cursor::Cursor;
use crate::dwarf::CompilationUnit;
use crate::sections::DebugSections;
use crate::types::{join_path, Endian, SectionOffset};

const DW_LNS_FIXED_ADVANCE_PC: u8 = 0x09;
const DW_LNE_DEFINE_FILE: u8 = 0x03;

/// Bytes needed to judge whether a line table header starts at some offset:
/// length (4), version (2), header length (4), minimum instruction length (1).
const PROBE_SIZE: usize = 11;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub dir_index: u64,
    pub modification_time: u64,
    pub file_length: u64,
}

/// Header fields of one line-number program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineProgramHeader {
    pub offset: usize,
    pub unit_length: u32,
    pub version: u16,
    pub header_length: u32,
    pub minimum_instruction_length: u8,
    pub maximum_operations_per_instruction: u8,
    pub default_is_stmt: bool,
    pub line_base: i8,
    pub line_range: u8,
    pub opcode_base: u8,
    pub standard_opcode_lengths: Vec<u8>,
    pub include_directories: Vec<String>,
    pub file_names: Vec<FileEntry>,
}

impl LineProgramHeader {
    pub fn end(&self) -> usize {
        self.offset + 4 + self.unit_length as usize
    }
}

/// Directories and files declared by one line table, resolved to full paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineTable {
    pub offset: usize,
    pub version: u16,
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

fn read_file_entry(cur: &mut Cursor<'_>) -> Result<FileEntry> {
    let name = cur.read_string()?;
    let dir_index = cur.read_uleb128()?;
    let modification_time = cur.read_uleb128()?;
    let file_length = cur.read_uleb128()?;
    Ok(FileEntry {
        name,
        dir_index,
        modification_time,
        file_length,
    })
}

/// Reads the header at `offset` and leaves `cur` at the start of the line-number program.
fn read_header<'a>(
    data: &'a [u8],
    offset: usize,
    endian: Endian,
) -> Result<(LineProgramHeader, Cursor<'a>)> {
    let mut cur = Cursor::at(data, offset, endian)?;
    let unit_length = cur.read_u32()?;
    if unit_length >= 0xffff_fff0 {
        bail!("64-bit line tables are not supported");
    }
    let end = (offset + 4 + unit_length as usize).min(data.len());
    let mut cur = Cursor::at(&data[..end], offset + 4, endian)?;

    let version = cur.read_u16()?;
    if !(2..=4).contains(&version) {
        bail!("Unsupported line table version {version}");
    }
    let header_length = cur.read_u32()?;
    let program_start = cur.position() + header_length as usize;

    let minimum_instruction_length = cur.read_u8()?;
    let maximum_operations_per_instruction = if version >= 4 { cur.read_u8()? } else { 1 };
    let default_is_stmt = cur.read_u8()? != 0;
    let line_base = cur.read_i8()?;
    let line_range = cur.read_u8()?;
    let opcode_base = cur.read_u8()?;
    let standard_opcode_lengths = cur
        .read_bytes(opcode_base.saturating_sub(1) as usize)?
        .to_vec();

    let mut include_directories = Vec::new();
    loop {
        let dir = cur.read_cstr()?;
        if dir.is_empty() {
            break;
        }
        include_directories.push(String::from_utf8_lossy(dir).into_owned());
    }

    let mut file_names = Vec::new();
    loop {
        if cur.remaining().first() == Some(&0) {
            cur.advance(1)?;
            break;
        }
        file_names.push(read_file_entry(&mut cur)?);
    }

    if program_start > end {
        bail!("Line table header overruns its unit");
    }
    cur.seek(program_start)?;

    let header = LineProgramHeader {
        offset,
        unit_length,
        version,
        header_length,
        minimum_instruction_length,
        maximum_operations_per_instruction,
        default_is_stmt,
        line_base,
        line_range,
        opcode_base,
        standard_opcode_lengths,
        include_directories,
        file_names,
    };
    Ok((header, cur))
}

/// Collects files added by `DW_LNE_define_file` inside the program itself.
fn scan_program_files(header: &LineProgramHeader, cur: &mut Cursor<'_>) -> Result<Vec<FileEntry>> {
    let mut files = Vec::new();
    while !cur.is_finished() {
        let opcode = cur.read_u8()?;
        if opcode == 0 {
            let len = cur.read_uleb128()? as usize;
            if len == 0 {
                continue;
            }
            let before = cur.position();
            let sub_opcode = cur.read_u8()?;
            if sub_opcode == DW_LNE_DEFINE_FILE {
                files.push(read_file_entry(cur)?);
            }
            let consumed = cur.position() - before;
            if consumed < len {
                cur.advance(len - consumed)?;
            }
        } else if opcode < header.opcode_base {
            if opcode == DW_LNS_FIXED_ADVANCE_PC {
                cur.read_u16()?;
                continue;
            }
            let args = header
                .standard_opcode_lengths
                .get(opcode as usize - 1)
                .copied()
                .unwrap_or(0);
            for _ in 0..args {
                cur.read_uleb128()?;
            }
        }
        // Special opcodes carry no operands.
    }
    Ok(files)
}

fn resolve_file(entry: &FileEntry, comp_dir: &str, directories: &[String]) -> String {
    if entry.dir_index == 0 {
        return join_path(comp_dir, &entry.name);
    }
    match directories.get(entry.dir_index as usize - 1) {
        Some(dir) => join_path(dir, &entry.name),
        None => join_path(comp_dir, &entry.name),
    }
}

/// Parses the line table at `offset`, resolving relative directories against `comp_dir`.
pub fn parse_line_table(
    data: &[u8],
    offset: usize,
    comp_dir: &str,
    endian: Endian,
) -> Result<LineTable> {
    let (header, mut program) = read_header(data, offset, endian)?;
    trace!(?header, "line table header");

    let directories: Vec<String> = header
        .include_directories
        .iter()
        .map(|dir| join_path(comp_dir, dir))
        .collect();

    let mut entries = header.file_names.clone();
    match scan_program_files(&header, &mut program) {
        Ok(defined) => entries.extend(defined),
        Err(err) => debug!(offset, error = %err, "stopped scanning line program"),
    }

    let files = entries
        .iter()
        .map(|entry| resolve_file(entry, comp_dir, &directories))
        .collect();

    Ok(LineTable {
        offset,
        version: header.version,
        directories,
        files,
    })
}

/// Whether the bytes at `offset` look like the start of a line table.
///
/// Thresholds follow what toolchains were observed to emit: versions 1-3 and a minimum
/// instruction length of 1-8.
pub fn plausible_header_at(data: &[u8], offset: usize, endian: Endian) -> bool {
    if data.len().saturating_sub(offset) < PROBE_SIZE {
        return false;
    }
    let Ok(mut cur) = Cursor::at(data, offset, endian) else {
        return false;
    };
    let (Ok(length), Ok(version), Ok(_header_length), Ok(min_inst)) = (
        cur.read_u32(),
        cur.read_u16(),
        cur.read_u32(),
        cur.read_u8(),
    ) else {
        return false;
    };
    let fits = (length as usize) >= PROBE_SIZE - 4 && offset + 4 + (length as usize) <= data.len();
    fits && (1..=3).contains(&version) && (1..=8).contains(&min_inst)
}

/// Some toolchains pad each line table to a 4-byte boundary without counting the padding
/// in its length. If no plausible header starts at `offset`, move up to the next multiple
/// of four.
pub fn skip_alignment_padding(data: &[u8], offset: usize, endian: Endian) -> usize {
    if offset >= data.len() || plausible_header_at(data, offset, endian) {
        return offset;
    }
    (offset + 3) & !3
}

/// Parses line tables for compile units and, separately, any tables no unit points at.
pub struct LineProgramParser<'s> {
    sections: &'s DebugSections,
    parsed: HashSet<usize>,
}

impl<'s> LineProgramParser<'s> {
    pub fn new(sections: &'s DebugSections) -> Self {
        Self {
            sections,
            parsed: HashSet::new(),
        }
    }

    pub fn is_parsed(&self, offset: usize) -> bool {
        self.parsed.contains(&offset)
    }

    /// Parses the unit's line table, or returns `None` if it has none or it was seen already.
    pub fn parse_for_unit(&mut self, cu: &CompilationUnit) -> Result<Option<LineTable>> {
        let Some(offset) = cu.stmt_list else {
            return Ok(None);
        };
        let offset = section_index(offset)?;
        if self.parsed.contains(&offset) {
            return Ok(None);
        }
        self.parse_at(offset, &cu.comp_dir).map(Some)
    }

    pub fn parse_at(&mut self, offset: usize, comp_dir: &str) -> Result<LineTable> {
        let data = self.sections.debug_line();
        if offset >= data.len() {
            bail!("Line table offset {offset:#x} outside .debug_line");
        }
        self.parsed.insert(offset);
        parse_line_table(data, offset, comp_dir, self.sections.endian())
    }

    /// Walks `.debug_line` from the start and parses every table not reached through a unit.
    pub fn scan_unreferenced(&mut self) -> Vec<LineTable> {
        let data = self.sections.debug_line();
        let endian = self.sections.endian();
        let mut tables = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            if !self.parsed.contains(&offset) {
                offset = skip_alignment_padding(data, offset, endian);
            }
            let Ok(mut cur) = Cursor::at(data, offset, endian) else {
                break;
            };
            let Ok(length) = cur.read_u32() else {
                break;
            };
            if length == 0 || length >= 0xffff_fff0 {
                debug!(offset, length, "no further line tables");
                break;
            }

            if !self.parsed.contains(&offset) {
                match self.parse_at(offset, "") {
                    Ok(table) => {
                        debug!(offset, files = table.files.len(), "recovered unreferenced line table");
                        tables.push(table);
                    }
                    Err(err) => {
                        debug!(offset, error = %err, "stopping line table scan");
                        break;
                    }
                }
            }
            offset += 4 + length as usize;
        }
        tables
    }
}

fn section_index(offset: SectionOffset) -> Result<usize> {
    match usize::try_from(offset) {
        Ok(offset) => Ok(offset),
        Err(_) => bail!("Section offset {offset:#x} not addressable"),
    }
}
