//! Byte-level builders for synthetic DWARF sections.
#![allow(dead_code)]

use dwscan::dwarf::{DwarfAttr, DwarfForm, DwarfTag};
use dwscan::macinfo::{
    DW_MACINFO_DEFINE, DW_MACINFO_END_COMPILE_UNIT, DW_MACINFO_END_FILE, DW_MACINFO_START_FILE,
    DW_MACINFO_UNDEF, DW_MACINFO_VENDOR_EXT,
};

pub fn uleb(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

pub fn cstr(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

/// `.debug_abbrev` contents. Each table is closed with [`AbbrevBuilder::end_table`].
#[derive(Default)]
pub struct AbbrevBuilder {
    pub bytes: Vec<u8>,
}

impl AbbrevBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next table will start at.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn entry(mut self, code: u64, tag: DwarfTag, children: bool, specs: &[(DwarfAttr, DwarfForm)]) -> Self {
        self.bytes.extend(uleb(code));
        self.bytes.extend(uleb(tag));
        self.bytes.push(children as u8);
        for &(attr, form) in specs {
            self.bytes.extend(uleb(attr));
            self.bytes.extend(uleb(form));
        }
        self.bytes.extend([0, 0]);
        self
    }

    pub fn end_table(mut self) -> Self {
        self.bytes.push(0);
        self
    }
}

/// Raw attribute bytes of one DIE, in abbreviation order.
#[derive(Default)]
pub struct Die {
    pub bytes: Vec<u8>,
}

impl Die {
    pub fn new(code: u64) -> Self {
        Self { bytes: uleb(code) }
    }

    pub fn string(mut self, s: &str) -> Self {
        self.bytes.extend(cstr(s));
        self
    }

    pub fn data1(mut self, v: u8) -> Self {
        self.bytes.push(v);
        self
    }

    pub fn data2(mut self, v: u16) -> Self {
        self.bytes.extend(v.to_le_bytes());
        self
    }

    pub fn data4(mut self, v: u32) -> Self {
        self.bytes.extend(v.to_le_bytes());
        self
    }

    pub fn addr4(self, v: u32) -> Self {
        self.data4(v)
    }

    pub fn udata(mut self, v: u64) -> Self {
        self.bytes.extend(uleb(v));
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }
}

/// `.debug_info` contents, one unit per call to [`InfoBuilder::unit`].
#[derive(Default)]
pub struct InfoBuilder {
    pub bytes: Vec<u8>,
}

impl InfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit with 4-byte addresses holding `dies`, followed by a null entry.
    pub fn unit(mut self, version: u16, abbrev_offset: u32, dies: &[Die]) -> Self {
        let mut body = Vec::new();
        body.extend(version.to_le_bytes());
        body.extend(abbrev_offset.to_le_bytes());
        body.push(4);
        for die in dies {
            body.extend_from_slice(&die.bytes);
        }
        body.push(0);
        self.bytes.extend((body.len() as u32).to_le_bytes());
        self.bytes.extend(body);
        self
    }

    pub fn offset(&self) -> usize {
        self.bytes.len()
    }
}

/// `.debug_str` contents.
#[derive(Default)]
pub struct StrTable {
    pub bytes: Vec<u8>,
}

impl StrTable {
    pub fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend(cstr(s));
        offset
    }
}

/// One line-number program with an empty body apart from `extra_program` and an end of sequence.
pub fn line_table(version: u16, dirs: &[&str], files: &[(&str, u64)], extra_program: &[u8]) -> Vec<u8> {
    let mut header = vec![1u8];
    if version >= 4 {
        header.push(1);
    }
    // default_is_stmt, line_base, line_range, opcode_base
    header.extend([1, (-5i8) as u8, 14, 13]);
    header.extend([0, 1, 1, 1, 1, 0, 0, 0, 1, 0, 0, 1]);
    for dir in dirs {
        header.extend(cstr(dir));
    }
    header.push(0);
    for (name, dir) in files {
        header.extend(cstr(name));
        header.extend(uleb(*dir));
        header.extend([0, 0]);
    }
    header.push(0);

    let mut body = Vec::new();
    body.extend(version.to_le_bytes());
    body.extend((header.len() as u32).to_le_bytes());
    body.extend(header);
    body.extend_from_slice(extra_program);
    // DW_LNE_end_sequence
    body.extend([0, 1, 1]);

    let mut out = (body.len() as u32).to_le_bytes().to_vec();
    out.extend(body);
    out
}

/// `.debug_macinfo` record stream.
#[derive(Default)]
pub struct MacinfoBuilder {
    pub bytes: Vec<u8>,
}

impl MacinfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn define(mut self, line: u64, text: &str) -> Self {
        self.bytes.push(DW_MACINFO_DEFINE);
        self.bytes.extend(uleb(line));
        self.bytes.extend(cstr(text));
        self
    }

    pub fn undef(mut self, line: u64, text: &str) -> Self {
        self.bytes.push(DW_MACINFO_UNDEF);
        self.bytes.extend(uleb(line));
        self.bytes.extend(cstr(text));
        self
    }

    pub fn start_file(mut self, line: u64, file: u64) -> Self {
        self.bytes.push(DW_MACINFO_START_FILE);
        self.bytes.extend(uleb(line));
        self.bytes.extend(uleb(file));
        self
    }

    pub fn end_file(mut self) -> Self {
        self.bytes.push(DW_MACINFO_END_FILE);
        self
    }

    pub fn vendor(mut self, constant: u64, text: &str) -> Self {
        self.bytes.push(DW_MACINFO_VENDOR_EXT);
        self.bytes.extend(uleb(constant));
        self.bytes.extend(cstr(text));
        self
    }

    pub fn end_unit(mut self) -> Self {
        self.bytes.push(DW_MACINFO_END_COMPILE_UNIT);
        self
    }
}

/// Small deterministic generator so randomized tests are reproducible.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
