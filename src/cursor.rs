use anyhow::{bail, Result};

use crate::types::Endian;

/// Bounds-checked reader over one section (or a slice of one).
///
/// Every read advances the position and fails once the data is exhausted, leaving the
/// decision of how much to abandon to the caller.
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    /// Cursor positioned at `offset`; fails if the offset lies outside the data.
    pub fn at(data: &'a [u8], offset: usize, endian: Endian) -> Result<Self> {
        if offset > data.len() {
            bail!(
                "Offset {offset:#x} outside of data (len {:#x})",
                data.len()
            );
        }
        Ok(Self {
            data,
            pos: offset,
            endian,
        })
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            bail!("Seek to {pos:#x} past end of data");
        }
        self.pos = pos;
        Ok(())
    }

    pub fn advance(&mut self, amount: usize) -> Result<()> {
        if amount > self.remaining_len() {
            bail!("Cursor advanced past end of data");
        }
        self.pos += amount;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            bail!("Unexpected end of data at {:#x}", self.pos);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_array::<2>()?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_array::<8>()?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    /// Reads an unsigned value of `size` bytes (1, 2, 4 or 8).
    pub fn read_uint(&mut self, size: u8) -> Result<u64> {
        Ok(match size {
            1 => self.read_u8()? as u64,
            2 => self.read_u16()? as u64,
            4 => self.read_u32()? as u64,
            8 => self.read_u64()?,
            _ => bail!("Unsupported integer size {size}"),
        })
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining_len() {
            bail!(
                "Unexpected end of data while reading {n} bytes at {:#x}",
                self.pos
            );
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..self.pos])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_uleb128(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as u64) << shift;
            }
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    pub fn read_sleb128(&mut self) -> Result<i64> {
        let mut result = 0i64;
        let mut shift = 0u32;
        let mut byte;

        loop {
            byte = self.read_u8()?;
            if shift < 64 {
                result |= ((byte & 0x7f) as i64) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }

        if shift < 64 && (byte & 0x40) != 0 {
            result |= (!0i64) << shift;
        }

        Ok(result)
    }

    /// Reads up to the next NUL (consumed, not returned) or to the end of the data.
    pub fn read_cstr(&mut self) -> Result<&'a [u8]> {
        if self.is_finished() {
            bail!("Unexpected end of data while reading string at {:#x}", self.pos);
        }
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != 0 {
            self.pos += 1;
        }
        let end = self.pos;
        if self.pos < self.data.len() {
            self.pos += 1; // skip null terminator
        }
        Ok(&self.data[start..end])
    }

    /// Like [`Cursor::read_cstr`] but decoded lossily, since producers are not always UTF-8 clean.
    pub fn read_string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_cstr()?).into_owned())
    }
}

/// NUL-terminated string at `offset` in a string table, or empty if the offset is out of range.
pub fn string_at(table: &[u8], offset: u64) -> String {
    let Ok(offset) = usize::try_from(offset) else {
        return String::new();
    };
    if offset >= table.len() {
        return String::new();
    }
    let bytes = &table[offset..];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb(mut value: u64) -> Vec<u8> {
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

    fn sleb(mut value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    #[test]
    fn leb128_round_trips_boundary_values() {
        let unsigned = [0, 1, 63, 64, 127, 128, 255, 16_383, 16_384, u32::MAX as u64, u64::MAX];
        for value in unsigned {
            let bytes = uleb(value);
            let mut cur = Cursor::new(&bytes, Endian::Little);
            assert_eq!(cur.read_uleb128().unwrap(), value);
            assert!(cur.is_finished());
        }

        let signed = [0, 1, -1, 63, -64, 64, -65, 8191, -8192, i32::MIN as i64, i64::MAX, i64::MIN];
        for value in signed {
            let bytes = sleb(value);
            let mut cur = Cursor::new(&bytes, Endian::Little);
            assert_eq!(cur.read_sleb128().unwrap(), value, "value {value}");
            assert!(cur.is_finished());
        }
    }

    #[test]
    fn decodes_reference_leb128_encodings() {
        let mut cur = Cursor::new(&[0xe5, 0x8e, 0x26], Endian::Little);
        assert_eq!(cur.read_uleb128().unwrap(), 624_485);
        let mut cur = Cursor::new(&[0xc0, 0xbb, 0x78], Endian::Little);
        assert_eq!(cur.read_sleb128().unwrap(), -123_456);
    }

    #[test]
    fn honours_endianness() {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(Cursor::new(&bytes, Endian::Little).read_u32().unwrap(), 0x7856_3412);
        assert_eq!(Cursor::new(&bytes, Endian::Big).read_u32().unwrap(), 0x1234_5678);
        assert_eq!(Cursor::new(&bytes, Endian::Big).read_u16().unwrap(), 0x1234);
    }

    #[test]
    fn short_reads_fail_without_moving_past_end() {
        let mut cur = Cursor::new(&[1, 2, 3], Endian::Little);
        assert!(cur.read_u32().is_err());
        assert_eq!(cur.read_u16().unwrap(), 0x0201);
        assert!(cur.read_u16().is_err());
        assert_eq!(cur.read_u8().unwrap(), 3);
        assert!(cur.read_u8().is_err());
        assert!(Cursor::new(&[0x80, 0x80], Endian::Little).read_uleb128().is_err());
    }

    #[test]
    fn reads_strings_until_nul_or_end() {
        let mut cur = Cursor::new(b"abc\0de", Endian::Little);
        assert_eq!(cur.read_cstr().unwrap(), b"abc");
        assert_eq!(cur.read_cstr().unwrap(), b"de");
        assert!(cur.read_cstr().is_err());
    }

    #[test]
    fn string_table_lookup_out_of_range_is_empty() {
        let table = b"first\0second\0";
        assert_eq!(string_at(table, 6), "second");
        assert_eq!(string_at(table, 200), "");
    }
}
