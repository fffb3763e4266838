use std::collections::HashMap;

use crate::types::Endian;

pub const DEBUG_INFO: &str = ".debug_info";
pub const DEBUG_ABBREV: &str = ".debug_abbrev";
pub const DEBUG_ARANGES: &str = ".debug_aranges";
pub const DEBUG_LINE: &str = ".debug_line";
pub const DEBUG_FRAME: &str = ".debug_frame";
pub const EH_FRAME: &str = ".eh_frame";
pub const DEBUG_LOC: &str = ".debug_loc";
pub const DEBUG_PUBNAMES: &str = ".debug_pubnames";
pub const DEBUG_STR: &str = ".debug_str";
pub const DEBUG_FUNCNAMES: &str = ".debug_funcnames";
pub const DEBUG_TYPENAMES: &str = ".debug_typenames";
pub const DEBUG_VARNAMES: &str = ".debug_varnames";
pub const DEBUG_WEAKNAMES: &str = ".debug_weaknames";
pub const DEBUG_MACINFO: &str = ".debug_macinfo";

/// Every section name an image loader may hand over.
pub const KNOWN_SECTIONS: &[&str] = &[
    DEBUG_INFO,
    DEBUG_ABBREV,
    DEBUG_ARANGES,
    DEBUG_LINE,
    DEBUG_FRAME,
    EH_FRAME,
    DEBUG_LOC,
    DEBUG_PUBNAMES,
    DEBUG_STR,
    DEBUG_FUNCNAMES,
    DEBUG_TYPENAMES,
    DEBUG_VARNAMES,
    DEBUG_WEAKNAMES,
    DEBUG_MACINFO,
];

/// Named debug section contents of one binary plus its byte order.
///
/// Missing sections read as empty, which the parsers treat as "nothing to do".
#[derive(Clone, Debug, Default)]
pub struct DebugSections {
    endian: Endian,
    sections: HashMap<String, Vec<u8>>,
}

impl DebugSections {
    pub fn new(endian: Endian) -> Self {
        Self {
            endian,
            sections: HashMap::new(),
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.sections.insert(name.into(), data);
    }

    pub fn with_section(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn get(&self, name: &str) -> &[u8] {
        self.sections.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn debug_info(&self) -> &[u8] {
        self.get(DEBUG_INFO)
    }

    pub fn debug_abbrev(&self) -> &[u8] {
        self.get(DEBUG_ABBREV)
    }

    pub fn debug_line(&self) -> &[u8] {
        self.get(DEBUG_LINE)
    }

    pub fn debug_str(&self) -> &[u8] {
        self.get(DEBUG_STR)
    }

    pub fn debug_macinfo(&self) -> &[u8] {
        self.get(DEBUG_MACINFO)
    }
}
