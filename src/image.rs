//! Extraction of DWARF sections from ELF and PE images.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use tracing::{debug, warn};

use crate::cursor::{string_at, Cursor};
use crate::sections::{DebugSections, KNOWN_SECTIONS};
use crate::types::Endian;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;
const ELFDATA2MSB: u8 = 2;
const SHT_NOBITS: u32 = 8;
const SHF_COMPRESSED: u64 = 0x800;

const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const COFF_HEADER_SIZE: usize = 20;
const COFF_SECTION_SIZE: usize = 40;
const COFF_SYMBOL_SIZE: usize = 18;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Elf32,
    Elf64,
    Pe,
}

/// One section header, reduced to what is needed to slice its bytes out of the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub has_data: bool,
    pub compressed: bool,
}

/// A memory-mapped executable or object file.
pub struct Image {
    pub path: PathBuf,
    pub mmap: Mmap,
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        // SAFETY: the mapping is read-only and the file is not expected to change while mapped.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("Failed to map {}", path.display()))?;
        Ok(Self { path, mmap })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    pub fn debug_sections(&self) -> Result<DebugSections> {
        load_debug_sections(self.bytes()).with_context(|| format!("Failed to read sections of {}", self.path.display()))
    }
}

pub fn detect_format(data: &[u8]) -> Result<ImageFormat> {
    if data.starts_with(ELF_MAGIC) {
        return match data.get(4) {
            Some(&ELFCLASS32) => Ok(ImageFormat::Elf32),
            Some(&ELFCLASS64) => Ok(ImageFormat::Elf64),
            other => bail!("Unsupported ELF class {other:?}"),
        };
    }
    if data.starts_with(b"MZ") {
        return Ok(ImageFormat::Pe);
    }
    bail!("Not an ELF or PE image")
}

/// Copies every known debug section out of an image held in memory.
pub fn load_debug_sections(data: &[u8]) -> Result<DebugSections> {
    let format = detect_format(data)?;
    let (endian, headers) = match format {
        ImageFormat::Elf32 | ImageFormat::Elf64 => elf_sections(data, format)?,
        ImageFormat::Pe => (Endian::Little, pe_sections(data)?),
    };

    let mut sections = DebugSections::new(endian);
    for header in headers {
        if !KNOWN_SECTIONS.contains(&header.name.as_str()) || !header.has_data {
            continue;
        }
        if header.compressed {
            warn!(section = %header.name, "compressed debug section is not supported, skipping");
            continue;
        }
        let Some(bytes) = header
            .offset
            .checked_add(header.size)
            .and_then(|end| data.get(header.offset..end))
        else {
            warn!(section = %header.name, offset = header.offset, size = header.size, "section extends past end of file");
            continue;
        };
        debug!(section = %header.name, size = header.size, "loaded section");
        sections.insert(header.name, bytes.to_vec());
    }
    Ok(sections)
}

fn elf_sections(data: &[u8], format: ImageFormat) -> Result<(Endian, Vec<SectionHeader>)> {
    let endian = match data.get(5) {
        Some(&ELFDATA2MSB) => Endian::Big,
        _ => Endian::Little,
    };
    let is_64 = format == ImageFormat::Elf64;

    let mut cur = Cursor::at(data, if is_64 { 0x28 } else { 0x20 }, endian)?;
    let shoff = if is_64 { cur.read_u64()? } else { u64::from(cur.read_u32()?) };
    cur.seek(if is_64 { 0x3a } else { 0x2e })?;
    let shentsize = cur.read_u16()? as usize;
    let mut shnum = cur.read_u16()? as usize;
    let shstrndx = cur.read_u16()? as usize;

    if shoff == 0 {
        return Ok((endian, Vec::new()));
    }
    let shoff = usize::try_from(shoff).context("Section header offset out of range")?;

    let mut raw = Vec::new();
    let first = read_elf_section(data, shoff, is_64, endian)?;
    if shnum == 0 {
        // More sections than fit in e_shnum; the real count is in the first header.
        shnum = first.size;
    }
    raw.push(first);
    for index in 1..shnum {
        let Some(at) = index.checked_mul(shentsize).and_then(|rel| rel.checked_add(shoff)) else {
            bail!("Section header {index} out of range");
        };
        raw.push(read_elf_section(data, at, is_64, endian)?);
    }

    let Some(strtab) = raw.get(shstrndx) else {
        bail!("Section name table index {shstrndx} out of range");
    };
    let names = data
        .get(strtab.offset..strtab.offset.saturating_add(strtab.size))
        .unwrap_or(&[]);

    let headers = raw
        .iter()
        .map(|section| SectionHeader {
            name: string_at(names, section.name_offset),
            offset: section.offset,
            size: section.size,
            has_data: section.kind != SHT_NOBITS,
            compressed: section.flags & SHF_COMPRESSED != 0,
        })
        .collect();
    Ok((endian, headers))
}

struct ElfSection {
    name_offset: u64,
    kind: u32,
    flags: u64,
    offset: usize,
    size: usize,
}

fn read_elf_section(data: &[u8], at: usize, is_64: bool, endian: Endian) -> Result<ElfSection> {
    let mut cur = Cursor::at(data, at, endian)?;
    let name_offset = u64::from(cur.read_u32()?);
    let kind = cur.read_u32()?;
    let (flags, offset, size) = if is_64 {
        let flags = cur.read_u64()?;
        let _addr = cur.read_u64()?;
        (flags, cur.read_u64()?, cur.read_u64()?)
    } else {
        let flags = u64::from(cur.read_u32()?);
        let _addr = cur.read_u32()?;
        (flags, u64::from(cur.read_u32()?), u64::from(cur.read_u32()?))
    };
    Ok(ElfSection {
        name_offset,
        kind,
        flags,
        offset: usize::try_from(offset).context("Section offset out of range")?,
        size: usize::try_from(size).context("Section size out of range")?,
    })
}

fn pe_sections(data: &[u8]) -> Result<Vec<SectionHeader>> {
    let mut cur = Cursor::at(data, 0x3c, Endian::Little)?;
    let pe_offset = cur.read_u32()? as usize;
    cur.seek(pe_offset)?;
    if cur.read_bytes(4)? != PE_SIGNATURE {
        bail!("Missing PE signature at {pe_offset:#x}");
    }

    let coff = cur.position();
    let _machine = cur.read_u16()?;
    let section_count = cur.read_u16()? as usize;
    let _timestamp = cur.read_u32()?;
    let symbol_table = cur.read_u32()? as usize;
    let symbol_count = cur.read_u32()? as usize;
    let optional_header_size = cur.read_u16()? as usize;

    // Long section names live in the COFF string table, right after the symbol table.
    let string_table = symbol_count
        .checked_mul(COFF_SYMBOL_SIZE)
        .and_then(|len| len.checked_add(symbol_table))
        .filter(|_| symbol_table != 0)
        .and_then(|start| data.get(start..))
        .unwrap_or(&[]);

    let table_start = coff + COFF_HEADER_SIZE + optional_header_size;
    let mut headers = Vec::with_capacity(section_count);
    for index in 0..section_count {
        let mut cur = Cursor::at(data, table_start + index * COFF_SECTION_SIZE, Endian::Little)?;
        let raw_name = cur.read_bytes(8)?;
        let _virtual_size = cur.read_u32()?;
        let _virtual_address = cur.read_u32()?;
        let size = cur.read_u32()? as usize;
        let offset = cur.read_u32()? as usize;

        let short = raw_name.split(|&b| b == 0).next().unwrap_or(&[]);
        let short = String::from_utf8_lossy(short).into_owned();
        let name = match short.strip_prefix('/').map(str::parse::<u64>) {
            Some(Ok(index)) => string_at(string_table, index),
            _ => short,
        };
        headers.push(SectionHeader {
            name,
            offset,
            size,
            has_data: offset != 0,
            compressed: false,
        });
    }
    Ok(headers)
}
