use anyhow::{bail, Result};
use tracing::trace;

use crate::cursor::Cursor;
use crate::model::{Macro, MacroKind, MacroSet, ValueCache};
use crate::types::{Endian, SectionOffset};

pub const DW_MACINFO_END_COMPILE_UNIT: u8 = 0x00;
pub const DW_MACINFO_DEFINE: u8 = 0x01;
pub const DW_MACINFO_UNDEF: u8 = 0x02;
pub const DW_MACINFO_START_FILE: u8 = 0x03;
pub const DW_MACINFO_END_FILE: u8 = 0x04;
pub const DW_MACINFO_VENDOR_EXT: u8 = 0xff;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MacroRecord {
    Define { line: u64, text: String },
    Undef { line: u64, text: String },
    StartFile { line: u64, file: u64 },
    EndFile,
    VendorExt { constant: u64, text: String },
    EndCompileUnit,
}

impl MacroRecord {
    /// A `START_FILE` at line 0 opens the unit's own primary file; any other line means an
    /// `#include` was entered.
    fn enters_include(&self) -> bool {
        matches!(self, MacroRecord::StartFile { line, .. } if *line != 0)
    }
}

/// Reads `.debug_macinfo` record streams.
pub struct MacroInfoParser<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> MacroInfoParser<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    /// Records of the stream at `offset`, up to and including `END_COMPILE_UNIT`.
    ///
    /// With `stop_at_first_include` only the window visible before the first `#include`
    /// is returned: the walk stops at an `END_FILE` or at a `START_FILE` with a non-zero line,
    /// neither of which is included.
    pub fn parse_from(&self, offset: SectionOffset, stop_at_first_include: bool) -> Result<Vec<MacroRecord>> {
        let Ok(start) = usize::try_from(offset) else {
            bail!("Macro info offset {offset:#x} not addressable");
        };
        if start >= self.data.len() {
            bail!("Macro info offset {offset:#x} outside .debug_macinfo");
        }
        let mut cur = Cursor::at(self.data, start, self.endian)?;
        let mut records = Vec::new();

        while !cur.is_finished() {
            let record = read_record(&mut cur)?;
            if stop_at_first_include
                && (record == MacroRecord::EndFile || record.enters_include())
            {
                break;
            }
            trace!(?record, "macinfo record");
            let done = record == MacroRecord::EndCompileUnit;
            records.push(record);
            if done {
                break;
            }
        }
        Ok(records)
    }
}

fn read_record(cur: &mut Cursor<'_>) -> Result<MacroRecord> {
    let at = cur.position();
    let kind = cur.read_u8()?;
    Ok(match kind {
        DW_MACINFO_END_COMPILE_UNIT => MacroRecord::EndCompileUnit,
        DW_MACINFO_DEFINE => MacroRecord::Define {
            line: cur.read_uleb128()?,
            text: cur.read_string()?,
        },
        DW_MACINFO_UNDEF => MacroRecord::Undef {
            line: cur.read_uleb128()?,
            text: cur.read_string()?,
        },
        DW_MACINFO_START_FILE => MacroRecord::StartFile {
            line: cur.read_uleb128()?,
            file: cur.read_uleb128()?,
        },
        DW_MACINFO_END_FILE => MacroRecord::EndFile,
        DW_MACINFO_VENDOR_EXT => MacroRecord::VendorExt {
            constant: cur.read_uleb128()?,
            text: cur.read_string()?,
        },
        _ => bail!("Unknown macinfo record type {kind:#x} at {at:#x}"),
    })
}

/// Collapses macro records into the set a compiler invocation ends up with.
///
/// A later define or undefine of a name replaces whatever was recorded for it before.
/// Vendor extensions are passed through unchanged.
pub fn resolve_macros(records: &[MacroRecord], cache: &mut ValueCache<Macro>) -> MacroSet {
    let mut set = MacroSet::new();
    for record in records {
        let declared = match record {
            MacroRecord::Define { text, .. } => Macro::new(MacroKind::Defined, text.as_str()),
            MacroRecord::Undef { text, .. } => Macro::new(MacroKind::Undefined, text.as_str()),
            MacroRecord::VendorExt { text, .. } => {
                set.insert(cache.intern(Macro::new(MacroKind::Vendor, text.as_str())));
                continue;
            }
            _ => continue,
        };
        let name = declared.name().to_string();
        set.retain(|existing| existing.kind == MacroKind::Vendor || existing.name() != name);
        set.insert(cache.intern(declared));
    }
    set
}
