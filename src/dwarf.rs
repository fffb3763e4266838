use std::fmt;

use anyhow::{bail, Result};
use tracing::{debug, trace, warn};

use crate::abbrev::{Abbrev, AbbrevCache};
use crate::cursor::{string_at, Cursor};
use crate::sections::DebugSections;
use crate::types::{join_path, SectionOffset};

pub type DwarfTag = u64;
pub type DwarfAttr = u64;
pub type DwarfForm = u64;

pub const DW_TAG_COMPILE_UNIT: DwarfTag = 0x11;

// DW_AT_* constants (subset)
pub const DW_AT_NAME: DwarfAttr = 0x03;
pub const DW_AT_STMT_LIST: DwarfAttr = 0x10;
pub const DW_AT_LOW_PC: DwarfAttr = 0x11;
pub const DW_AT_HIGH_PC: DwarfAttr = 0x12;
pub const DW_AT_LANGUAGE: DwarfAttr = 0x13;
pub const DW_AT_COMP_DIR: DwarfAttr = 0x1b;
pub const DW_AT_PRODUCER: DwarfAttr = 0x25;
pub const DW_AT_MACRO_INFO: DwarfAttr = 0x43;

pub const DW_FORM_ADDR: DwarfForm = 0x01;
pub const DW_FORM_BLOCK2: DwarfForm = 0x03;
pub const DW_FORM_BLOCK4: DwarfForm = 0x04;
pub const DW_FORM_DATA2: DwarfForm = 0x05;
pub const DW_FORM_DATA4: DwarfForm = 0x06;
pub const DW_FORM_DATA8: DwarfForm = 0x07;
pub const DW_FORM_STRING: DwarfForm = 0x08;
pub const DW_FORM_BLOCK: DwarfForm = 0x09;
pub const DW_FORM_BLOCK1: DwarfForm = 0x0a;
pub const DW_FORM_DATA1: DwarfForm = 0x0b;
pub const DW_FORM_FLAG: DwarfForm = 0x0c;
pub const DW_FORM_SDATA: DwarfForm = 0x0d;
pub const DW_FORM_STRP: DwarfForm = 0x0e;
pub const DW_FORM_UDATA: DwarfForm = 0x0f;
pub const DW_FORM_REF_ADDR: DwarfForm = 0x10;
pub const DW_FORM_REF1: DwarfForm = 0x11;
pub const DW_FORM_REF2: DwarfForm = 0x12;
pub const DW_FORM_REF4: DwarfForm = 0x13;
pub const DW_FORM_REF8: DwarfForm = 0x14;
pub const DW_FORM_REF_UDATA: DwarfForm = 0x15;
pub const DW_FORM_INDIRECT: DwarfForm = 0x16;
pub const DW_FORM_SEC_OFFSET: DwarfForm = 0x17;
pub const DW_FORM_EXPRLOC: DwarfForm = 0x18;
pub const DW_FORM_FLAG_PRESENT: DwarfForm = 0x19;
pub const DW_FORM_REF_SIG8: DwarfForm = 0x20;

/// Size of a 32-bit DWARF 2-4 unit header, length field included.
pub const UNIT_HEADER_SIZE: usize = 11;

/// Per-unit parameters that change how forms are sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormContext {
    pub version: u16,
    pub address_size: u8,
}

impl FormContext {
    fn ref_addr_size(&self) -> u8 {
        // DWARF 2 sized DW_FORM_ref_addr like an address; later versions use the offset size.
        if self.version <= 2 {
            self.address_size
        } else {
            4
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue<'a> {
    Address(u64),
    Block(&'a [u8]),
    Data(u64),
    SData(i64),
    String(String),
    Reference(u64),
    Flag(bool),
    SecOffset(u64),
}

impl AttrValue<'_> {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            AttrValue::Address(v)
            | AttrValue::Data(v)
            | AttrValue::Reference(v)
            | AttrValue::SecOffset(v) => Some(v),
            AttrValue::SData(v) => u64::try_from(v).ok(),
            AttrValue::Flag(v) => Some(v as u64),
            AttrValue::Block(_) | AttrValue::String(_) => None,
        }
    }

    pub fn as_section_offset(&self) -> Option<SectionOffset> {
        match *self {
            AttrValue::Data(v) | AttrValue::SecOffset(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl<'a> Cursor<'a> {
    pub fn skip_form(&mut self, form: DwarfForm, ctx: FormContext) -> Result<()> {
        match form {
            DW_FORM_FLAG_PRESENT => {}
            DW_FORM_DATA1 | DW_FORM_REF1 | DW_FORM_FLAG => {
                self.advance(1)?;
            }
            DW_FORM_DATA2 | DW_FORM_REF2 => {
                self.advance(2)?;
            }
            DW_FORM_DATA4 | DW_FORM_REF4 | DW_FORM_SEC_OFFSET | DW_FORM_STRP => {
                self.advance(4)?;
            }
            DW_FORM_DATA8 | DW_FORM_REF8 | DW_FORM_REF_SIG8 => {
                self.advance(8)?;
            }
            DW_FORM_ADDR => {
                self.advance(ctx.address_size as usize)?;
            }
            DW_FORM_REF_ADDR => {
                self.advance(ctx.ref_addr_size() as usize)?;
            }
            DW_FORM_SDATA => {
                let _ = self.read_sleb128()?;
            }
            DW_FORM_UDATA | DW_FORM_REF_UDATA => {
                let _ = self.read_uleb128()?;
            }
            DW_FORM_BLOCK1 => {
                let size = self.read_u8()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK2 => {
                let size = self.read_u16()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK4 => {
                let size = self.read_u32()? as usize;
                self.advance(size)?;
            }
            DW_FORM_BLOCK | DW_FORM_EXPRLOC => {
                let size = self.read_uleb128()? as usize;
                self.advance(size)?;
            }
            DW_FORM_STRING => {
                let _ = self.read_cstr()?;
            }
            DW_FORM_INDIRECT => {
                let actual = self.read_uleb128()?;
                self.skip_form(actual, ctx)?;
            }
            _ => bail!("Unsupported DWARF form: {form:#x}"),
        }
        Ok(())
    }

    /// Decodes one attribute value; `strp` is resolved against `debug_str`.
    pub fn read_form(
        &mut self,
        form: DwarfForm,
        ctx: FormContext,
        debug_str: &[u8],
    ) -> Result<AttrValue<'a>> {
        Ok(match form {
            DW_FORM_ADDR => AttrValue::Address(self.read_uint(ctx.address_size)?),
            DW_FORM_DATA1 => AttrValue::Data(self.read_u8()? as u64),
            DW_FORM_DATA2 => AttrValue::Data(self.read_u16()? as u64),
            DW_FORM_DATA4 => AttrValue::Data(self.read_u32()? as u64),
            DW_FORM_DATA8 => AttrValue::Data(self.read_u64()?),
            DW_FORM_SDATA => AttrValue::SData(self.read_sleb128()?),
            DW_FORM_UDATA => AttrValue::Data(self.read_uleb128()?),
            DW_FORM_STRING => AttrValue::String(self.read_string()?),
            DW_FORM_STRP => {
                let offset = self.read_u32()? as u64;
                AttrValue::String(string_at(debug_str, offset))
            }
            DW_FORM_REF1 => AttrValue::Reference(self.read_u8()? as u64),
            DW_FORM_REF2 => AttrValue::Reference(self.read_u16()? as u64),
            DW_FORM_REF4 => AttrValue::Reference(self.read_u32()? as u64),
            DW_FORM_REF8 | DW_FORM_REF_SIG8 => AttrValue::Reference(self.read_u64()?),
            DW_FORM_REF_UDATA => AttrValue::Reference(self.read_uleb128()?),
            DW_FORM_REF_ADDR => AttrValue::Reference(self.read_uint(ctx.ref_addr_size())?),
            DW_FORM_FLAG => AttrValue::Flag(self.read_u8()? != 0),
            DW_FORM_FLAG_PRESENT => AttrValue::Flag(true),
            DW_FORM_SEC_OFFSET => AttrValue::SecOffset(self.read_u32()? as u64),
            DW_FORM_BLOCK1 => {
                let size = self.read_u8()? as usize;
                AttrValue::Block(self.read_bytes(size)?)
            }
            DW_FORM_BLOCK2 => {
                let size = self.read_u16()? as usize;
                AttrValue::Block(self.read_bytes(size)?)
            }
            DW_FORM_BLOCK4 => {
                let size = self.read_u32()? as usize;
                AttrValue::Block(self.read_bytes(size)?)
            }
            DW_FORM_BLOCK | DW_FORM_EXPRLOC => {
                let size = self.read_uleb128()? as usize;
                AttrValue::Block(self.read_bytes(size)?)
            }
            DW_FORM_INDIRECT => {
                let actual = self.read_uleb128()?;
                self.read_form(actual, ctx, debug_str)?
            }
            _ => bail!("Unsupported DWARF form: {form:#x}"),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitHeader {
    pub offset: usize,
    pub unit_length: u32,
    pub version: u16,
    pub abbrev_offset: SectionOffset,
    pub address_size: u8,
}

impl UnitHeader {
    /// Offset one past the last byte of this unit.
    pub fn end(&self) -> usize {
        self.offset + 4 + self.unit_length as usize
    }

    fn form_context(&self) -> FormContext {
        FormContext {
            version: self.version,
            address_size: self.address_size,
        }
    }
}

/// One translation unit, taken from its `DW_TAG_compile_unit` entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompilationUnit {
    /// Offset of the owning unit header in `.debug_info`.
    pub offset: usize,
    pub version: u16,
    pub name: String,
    pub comp_dir: String,
    pub low_pc: Option<u64>,
    pub high_pc: Option<u64>,
    pub language: Option<u64>,
    pub stmt_list: Option<SectionOffset>,
    pub macro_info: Option<SectionOffset>,
    pub producer: Option<String>,
}

impl CompilationUnit {
    /// Primary source path, with a relative name resolved against the compile directory.
    pub fn path(&self) -> String {
        join_path(&self.comp_dir, &self.name)
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (unit {:#x}, DWARF {})", self.path(), self.offset, self.version)?;
        if let Some(producer) = &self.producer {
            write!(f, " [{producer}]")?;
        }
        Ok(())
    }
}

/// Walks every unit of `.debug_info`, collecting compile units.
///
/// A unit that fails to decode is logged and skipped; the walk resumes at the next header.
pub struct UnitWalker<'s> {
    sections: &'s DebugSections,
    abbrevs: AbbrevCache,
    failed_units: usize,
}

impl<'s> UnitWalker<'s> {
    pub fn new(sections: &'s DebugSections) -> Self {
        Self {
            sections,
            abbrevs: AbbrevCache::new(),
            failed_units: 0,
        }
    }

    pub fn abbrev_cache(&self) -> &AbbrevCache {
        &self.abbrevs
    }

    pub fn failed_units(&self) -> usize {
        self.failed_units
    }

    pub fn walk(&mut self) -> Vec<CompilationUnit> {
        let sections = self.sections;
        let info = sections.debug_info();
        let endian = sections.endian();
        let mut units = Vec::new();
        let mut offset = 0usize;

        while offset < info.len() {
            if info.len() - offset < UNIT_HEADER_SIZE {
                debug!(offset, "ignoring trailing bytes in .debug_info");
                break;
            }
            let mut cur = match Cursor::at(info, offset, endian) {
                Ok(cur) => cur,
                Err(_) => break,
            };
            let unit_length = match cur.read_u32() {
                Ok(len) => len,
                Err(_) => break,
            };
            if unit_length >= 0xffff_fff0 {
                warn!(offset, unit_length, "64-bit or reserved unit length, stopping");
                break;
            }

            let next = offset + 4 + unit_length as usize;
            if let Err(err) = self.parse_unit(offset, &mut units) {
                self.failed_units += 1;
                warn!(offset, error = %err, "abandoning compilation unit");
            }
            offset = next;
        }

        debug!(
            units = units.len(),
            failed = self.failed_units,
            abbrev_tables = self.abbrevs.len(),
            "walked .debug_info"
        );
        units
    }

    fn parse_unit(&mut self, offset: usize, units: &mut Vec<CompilationUnit>) -> Result<()> {
        let sections = self.sections;
        let info = sections.debug_info();
        let header = read_unit_header(info, offset, sections)?;
        if !(2..=4).contains(&header.version) {
            bail!("Unsupported DWARF version {}", header.version);
        }
        let end = header.end().min(info.len());
        if end < header.end() {
            warn!(offset, "unit extends past end of .debug_info, truncating");
        }
        trace!(?header, "unit header");

        let table = self
            .abbrevs
            .get_or_parse(sections.debug_abbrev(), header.abbrev_offset)?;
        let ctx = header.form_context();
        let mut cur = Cursor::at(&info[..end], offset + UNIT_HEADER_SIZE, sections.endian())?;

        while !cur.is_finished() {
            let die_offset = cur.position();
            let code = cur.read_uleb128()?;
            if code == 0 {
                // Null entry closing a sibling chain.
                continue;
            }
            let Some(abbrev) = table.get(&code) else {
                debug!(die_offset, code, "unknown abbreviation code, ending unit");
                break;
            };

            if abbrev.tag == DW_TAG_COMPILE_UNIT {
                let cu = self.read_compile_unit(&mut cur, abbrev, &header)?;
                debug!(unit = %cu, "compile unit");
                units.push(cu);
            } else {
                for spec in &abbrev.attr_specs {
                    cur.skip_form(spec.form, ctx)?;
                }
            }
        }
        Ok(())
    }

    fn read_compile_unit(
        &self,
        cur: &mut Cursor<'_>,
        abbrev: &Abbrev,
        header: &UnitHeader,
    ) -> Result<CompilationUnit> {
        let ctx = header.form_context();
        let debug_str = self.sections.debug_str();
        let mut cu = CompilationUnit {
            offset: header.offset,
            version: header.version,
            ..CompilationUnit::default()
        };
        let mut high_pc_is_offset = false;

        for spec in &abbrev.attr_specs {
            let value = cur.read_form(spec.form, ctx, debug_str)?;
            match spec.attr {
                DW_AT_NAME => cu.name = value.into_string().unwrap_or_default(),
                DW_AT_COMP_DIR => cu.comp_dir = value.into_string().unwrap_or_default(),
                DW_AT_PRODUCER => cu.producer = value.into_string(),
                DW_AT_LOW_PC => cu.low_pc = value.as_u64(),
                DW_AT_HIGH_PC => {
                    high_pc_is_offset = !matches!(value, AttrValue::Address(_));
                    cu.high_pc = value.as_u64();
                }
                DW_AT_LANGUAGE => cu.language = value.as_u64(),
                DW_AT_STMT_LIST => cu.stmt_list = value.as_section_offset(),
                DW_AT_MACRO_INFO => cu.macro_info = value.as_section_offset(),
                _ => {}
            }
        }

        // DWARF 4 may encode high_pc as a length from low_pc.
        if high_pc_is_offset {
            if let (Some(low), Some(len)) = (cu.low_pc, cu.high_pc) {
                cu.high_pc = Some(low.wrapping_add(len));
            }
        }
        Ok(cu)
    }
}

pub fn read_unit_header(
    info: &[u8],
    offset: usize,
    sections: &DebugSections,
) -> Result<UnitHeader> {
    let mut cur = Cursor::at(info, offset, sections.endian())?;
    let unit_length = cur.read_u32()?;
    let version = cur.read_u16()?;
    let abbrev_offset = cur.read_u32()? as SectionOffset;
    let address_size = cur.read_u8()?;
    if !matches!(address_size, 1 | 2 | 4 | 8) {
        bail!("Unsupported address size {address_size}");
    }
    Ok(UnitHeader {
        offset,
        unit_length,
        version,
        abbrev_offset,
        address_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Endian;

    const V2_ADDR8: FormContext = FormContext {
        version: 2,
        address_size: 8,
    };
    const V3_ADDR8: FormContext = FormContext {
        version: 3,
        address_size: 8,
    };

    fn skipped(data: &[u8], form: DwarfForm, ctx: FormContext) -> usize {
        let mut cur = Cursor::new(data, Endian::Little);
        cur.skip_form(form, ctx).unwrap();
        cur.position()
    }

    #[test]
    fn ref_addr_size_depends_on_version() {
        let data = [0u8; 16];
        assert_eq!(skipped(&data, DW_FORM_REF_ADDR, V2_ADDR8), 8);
        assert_eq!(skipped(&data, DW_FORM_REF_ADDR, V3_ADDR8), 4);
    }

    #[test]
    fn variable_length_forms_are_skipped_whole() {
        assert_eq!(skipped(&[3, 0xaa, 0xbb, 0xcc, 0xff], DW_FORM_BLOCK1, V2_ADDR8), 4);
        assert_eq!(skipped(&[0x80, 0x01, 0xff], DW_FORM_UDATA, V2_ADDR8), 2);
        assert_eq!(skipped(b"abc\0rest", DW_FORM_STRING, V2_ADDR8), 4);
        // indirect -> data2
        assert_eq!(skipped(&[0x05, 1, 2, 9], DW_FORM_INDIRECT, V2_ADDR8), 3);
        assert_eq!(skipped(&[], DW_FORM_FLAG_PRESENT, V3_ADDR8), 0);
    }

    #[test]
    fn unknown_forms_cannot_be_skipped() {
        let mut cur = Cursor::new(&[0u8; 8], Endian::Little);
        assert!(cur.skip_form(0x7f, V2_ADDR8).is_err());
    }

    #[test]
    fn strp_reads_through_the_string_table() {
        let strings = b"zero\0one\0";
        let data = 5u32.to_le_bytes();
        let mut cur = Cursor::new(&data, Endian::Little);
        let value = cur.read_form(DW_FORM_STRP, V2_ADDR8, strings).unwrap();
        assert_eq!(value.into_string().as_deref(), Some("one"));
    }
}
