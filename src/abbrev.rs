use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Result};
use tracing::trace;

use crate::cursor::Cursor;
use crate::dwarf::{DwarfAttr, DwarfForm, DwarfTag};
use crate::types::{Endian, SectionOffset};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttrSpec {
    pub attr: DwarfAttr,
    pub form: DwarfForm,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Abbrev {
    pub code: u64,
    pub tag: DwarfTag,
    pub has_children: bool,
    pub attr_specs: Vec<AttrSpec>,
}

pub type AbbrevTable = HashMap<u64, Abbrev>;

/// Parses the abbreviation table starting at `offset` in `.debug_abbrev`.
pub fn parse_abbrev_table(data: &[u8], offset: SectionOffset) -> Result<AbbrevTable> {
    let Ok(start) = usize::try_from(offset) else {
        bail!("Abbrev table offset {offset:#x} not addressable");
    };
    if start >= data.len() {
        bail!("Abbrev table offset {offset:#x} outside .debug_abbrev");
    }
    // Only LEB128 and single bytes appear here, so byte order is irrelevant.
    let mut cur = Cursor::at(data, start, Endian::Little)?;
    let mut table = HashMap::new();

    while !cur.is_finished() {
        let code = cur.read_uleb128()?;
        if code == 0 {
            break;
        }
        let tag = cur.read_uleb128()?;
        let has_children = cur.read_u8()? != 0;
        let mut attr_specs = Vec::new();
        loop {
            let attr = cur.read_uleb128()?;
            let form = cur.read_uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }
            attr_specs.push(AttrSpec { attr, form });
        }
        table.insert(
            code,
            Abbrev {
                code,
                tag,
                has_children,
                attr_specs,
            },
        );
    }
    trace!(offset, entries = table.len(), "parsed abbreviation table");
    Ok(table)
}

/// Memoises abbreviation tables by their `.debug_abbrev` offset; units very often share one.
#[derive(Debug, Default)]
pub struct AbbrevCache {
    tables: HashMap<SectionOffset, Rc<AbbrevTable>>,
    parses: usize,
}

impl AbbrevCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_parse(&mut self, data: &[u8], offset: SectionOffset) -> Result<Rc<AbbrevTable>> {
        if let Some(table) = self.tables.get(&offset) {
            return Ok(Rc::clone(table));
        }
        let table = Rc::new(parse_abbrev_table(data, offset)?);
        self.parses += 1;
        self.tables.insert(offset, Rc::clone(&table));
        Ok(table)
    }

    /// Number of tables actually decoded (cache misses).
    pub fn parse_count(&self) -> usize {
        self.parses
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
