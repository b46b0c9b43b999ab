// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Intel HEX codec and segment store
//!
//! Decodes and emits Intel HEX (record types 00, 01, 02 and 04) into a
//! [`HexData`] store of address-keyed segments, and extracts word-aligned
//! byte ranges with blank fill for the programmer.
//!
//! Storage keeps the file byte order: the high byte of each 16-bit word sits
//! at the even offset. The device wants words little-endian on the wire, so
//! every extraction or insertion that faces the device states its swap
//! polarity explicitly.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use crate::error::{Error, HexParseReason, Result};

/// Data records are emitted with at most this many bytes.
const RECORD_CHUNK: usize = 16;

/// Address-keyed store of word-aligned data segments.
///
/// Invariants: segment addresses and lengths are even, and no two segments
/// overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexData {
    segments: BTreeMap<u32, Vec<u8>>,
}

fn parse_err(line: usize, reason: HexParseReason) -> Error {
    Error::HexParse { line, reason }
}

/// Read one line, dropping non-printable bytes and leading blanks.
///
/// Returns `None` at end of file.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }

    let mut line = String::new();
    for &c in raw.iter() {
        if (0x20..=0x7f).contains(&c) && !(line.is_empty() && c == b' ') {
            line.push(c as char);
        }
    }

    Ok(Some(line))
}

fn hex_pair(line: &str, pos: usize) -> Option<u8> {
    u8::from_str_radix(line.get(pos..pos + 2)?, 16).ok()
}

impl HexData {
    pub fn new() -> HexData {
        HexData::default()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Decode an Intel HEX stream.
    ///
    /// Stops at the EOF record; a stream that ends without one is an error,
    /// as is a data record overlapping an already decoded one.
    pub fn load_hex<R: BufRead>(&mut self, reader: &mut R) -> Result<()> {
        self.segments.clear();

        let mut ext_address: u32 = 0;
        let mut lno = 0;

        loop {
            let line = match read_line(reader)? {
                Some(line) => line,
                None => {
                    return Err(parse_err(lno, HexParseReason::MissingEof))
                }
            };
            lno += 1;

            if line.len() < 11 || !line.starts_with(':') {
                return Err(parse_err(lno, HexParseReason::BadPrefix));
            }

            let reclen = hex_pair(&line, 1)
                .ok_or_else(|| parse_err(lno, HexParseReason::BadPrefix))?
                as usize;
            if line.len() != 2 * (reclen + 5) + 1 {
                return Err(parse_err(lno, HexParseReason::BadLength));
            }

            // decode the whole record, then check that it sums to zero
            let mut record = Vec::with_capacity(reclen + 5);
            for i in 0..reclen + 5 {
                let byte = hex_pair(&line, 1 + 2 * i)
                    .ok_or_else(|| parse_err(lno, HexParseReason::BadPrefix))?;
                record.push(byte);
            }
            let sum = record
                .iter()
                .fold(0u8, |acc, &b| acc.wrapping_add(b));
            if sum != 0 {
                return Err(parse_err(lno, HexParseReason::BadChecksum));
            }

            let rec_addr = ((record[1] as u32) << 8) | record[2] as u32;
            let rec_type = record[3];
            let data = &record[4..4 + reclen];

            match rec_type {
                0 => {
                    let addr = ext_address | rec_addr;
                    if reclen % 2 != 0 || addr % 2 != 0 {
                        return Err(parse_err(lno, HexParseReason::OddRecord));
                    }
                    self.check_overlap(addr, reclen)?;
                    self.segments.insert(addr, data.to_vec());
                }
                1 => {
                    if reclen != 0 {
                        return Err(parse_err(lno, HexParseReason::BadLength));
                    }
                    break;
                }
                2 => {
                    // extended segment address, overlays bits 4..19;
                    // the value travels in the data bytes, not the header
                    if reclen != 2 {
                        return Err(parse_err(lno, HexParseReason::BadLength));
                    }
                    ext_address =
                        (((data[0] as u32) << 8) | data[1] as u32) << 4;
                }
                4 => {
                    // extended linear address, overlays bits 16..31
                    if reclen != 2 {
                        return Err(parse_err(lno, HexParseReason::BadLength));
                    }
                    ext_address =
                        (((data[0] as u32) << 8) | data[1] as u32) << 16;
                }
                t => {
                    return Err(parse_err(
                        lno,
                        HexParseReason::UnsupportedRecordType(t),
                    ));
                }
            }
        }

        for (addr, bytes) in &self.segments {
            log::trace!("segment {:06X} ({} bytes)", addr, bytes.len());
        }

        Ok(())
    }

    /// Encode the store as Intel HEX.
    ///
    /// Segments are walked in address order and split into 16-byte records;
    /// a type-04 record is emitted whenever the upper 16 address bits change.
    pub fn save_hex<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut ext_addr: u32 = 0;

        for (&start, bytes) in &self.segments {
            let mut addr = start;
            for chunk in bytes.chunks(RECORD_CHUNK) {
                if (addr >> 16) != ext_addr {
                    ext_addr = addr >> 16;
                    emit_record(
                        out,
                        &[2, 0, 0, 4, (ext_addr >> 8) as u8, ext_addr as u8],
                    )?;
                }

                let mut record = Vec::with_capacity(chunk.len() + 4);
                record.push(chunk.len() as u8);
                record.push((addr >> 8) as u8);
                record.push(addr as u8);
                record.push(0);
                record.extend_from_slice(chunk);
                emit_record(out, &record)?;

                addr += chunk.len() as u32;
            }
        }

        writeln!(out, ":00000001FF").map_err(Error::Io)?;
        Ok(())
    }

    /// Insert raw device bytes as one segment at `addr`.
    ///
    /// `swap_bytes` states the polarity: `true` when `data` is little-endian
    /// by word (as read off the wire) and must be stored swapped.
    pub fn load_raw(
        &mut self,
        addr: u32,
        data: &[u8],
        swap_bytes: bool,
    ) -> Result<()> {
        if addr % 2 != 0 || data.len() % 2 != 0 {
            return Err(Error::SizeInvariant(format!(
                "raw range {:#X}+{} is not word aligned",
                addr,
                data.len()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        self.check_overlap(addr, data.len())?;

        let bytes = if swap_bytes {
            let mut swapped = Vec::with_capacity(data.len());
            for pair in data.chunks(2) {
                swapped.push(pair[1]);
                swapped.push(pair[0]);
            }
            swapped
        } else {
            data.to_vec()
        };
        self.segments.insert(addr, bytes);

        Ok(())
    }

    /// Insert bytes where each input byte is the low half of a 16-bit word.
    ///
    /// Used for the EEPROM of 12/14-bit cores, which is one byte per word;
    /// the stored image doubles up with zero high bytes.
    pub fn load_raw_le8(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut doubled = Vec::with_capacity(2 * data.len());
        for &b in data {
            doubled.push(b);
            doubled.push(0);
        }
        self.load_raw(addr, &doubled, false)
    }

    /// Extract `word_count` words starting at the word-aligned `lower_bound`.
    ///
    /// Words inside stored segments come out as stored, byte-swapped when
    /// `swap_bytes` is set; gaps are filled with `blank_word` (high byte
    /// first — the fill has no endianness, so swapping does not apply).
    /// The result is always exactly `2 * word_count` bytes.
    pub fn range_of_data(
        &self,
        lower_bound: u32,
        word_count: usize,
        blank_word: u16,
        swap_bytes: bool,
    ) -> Vec<u8> {
        assert!(lower_bound % 2 == 0, "range must be word aligned");

        let upper_bound = lower_bound + 2 * word_count as u32;
        let blank = blank_word.to_be_bytes();

        let mut data = Vec::with_capacity(2 * word_count);
        let mut addr = lower_bound;

        for (&start, bytes) in self.segments.range(..upper_bound) {
            let end = start + bytes.len() as u32;
            if end <= addr {
                continue;
            }

            while addr < start {
                data.extend_from_slice(&blank);
                addr += 2;
            }

            let mut shift = (addr - start) as usize;
            while shift < bytes.len() && addr < upper_bound {
                if swap_bytes {
                    data.push(bytes[shift + 1]);
                    data.push(bytes[shift]);
                } else {
                    data.push(bytes[shift]);
                    data.push(bytes[shift + 1]);
                }
                shift += 2;
                addr += 2;
            }

            if addr == upper_bound {
                break;
            }
        }

        while addr < upper_bound {
            data.extend_from_slice(&blank);
            addr += 2;
        }

        data
    }

    /// Hexdump every segment to `out`, address column first.
    pub fn dump_segments<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (&addr, bytes) in &self.segments {
            writeln!(out, "{:06X} :", addr)?;
            hexdump(out, bytes)?;
        }
        Ok(())
    }

    /// [`load_hex`](HexData::load_hex) from a file on disk.
    pub fn load_hex_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut reader = BufReader::new(File::open(path)?);
        self.load_hex(&mut reader)
    }

    /// [`save_hex`](HexData::save_hex) to a file on disk.
    pub fn save_hex_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_hex(&mut writer)
    }

    fn check_overlap(&self, addr: u32, len: usize) -> Result<()> {
        let end = addr + len as u32;
        for (&start, bytes) in self.segments.range(..end) {
            if start + bytes.len() as u32 > addr {
                return Err(Error::RangeOverlap { addr, len });
            }
        }
        Ok(())
    }
}

/// Write one record: `:`, the bytes in hex, the two's complement checksum.
fn emit_record<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    let mut line = String::with_capacity(2 * bytes.len() + 4);
    line.push(':');
    let mut sum: u8 = 0;
    for &b in bytes {
        line.push_str(&format!("{:02X}", b));
        sum = sum.wrapping_add(b);
    }
    line.push_str(&format!("{:02X}", sum.wrapping_neg()));
    writeln!(out, "{}", line).map_err(Error::Io)?;
    Ok(())
}

/// Hexdump `data` to `out`, 16 bytes per line with an ASCII gutter.
pub fn hexdump<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
    for chunk in data.chunks(16) {
        let mut ascii = String::with_capacity(16);
        for &b in chunk {
            write!(out, "{:02x} ", b)?;
            ascii.push(if b > 32 && b < 127 { b as char } else { '.' });
        }
        for _ in chunk.len()..16 {
            out.write_all(b"   ")?;
        }
        writeln!(out, " {}", ascii)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn load(text: &str) -> Result<HexData> {
        let mut hex = HexData::new();
        hex.load_hex(&mut Cursor::new(text))?;
        Ok(hex)
    }

    fn save(hex: &HexData) -> String {
        let mut out = Vec::new();
        hex.save_hex(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let text =
            ":10000000000102030405060708090A0B0C0D0E0F78\n:00000001FF\n";
        let hex = load(text).unwrap();

        let bytes = hex.range_of_data(0, 8, 0xFFFF, false);
        assert_eq!(
            bytes,
            (0u8..16).collect::<Vec<u8>>(),
            "one 16 byte segment at 0x0000"
        );

        assert_eq!(save(&hex), text);
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":0200000400F00A\n:020000000000FE\n:00000001FF\n";
        let hex = load(text).unwrap();

        assert_eq!(hex.range_of_data(0xF00000, 1, 0x1111, false), [0, 0]);
        // nothing below the extension window
        assert_eq!(hex.range_of_data(0, 1, 0x3FFF, false), [0x3F, 0xFF]);

        // re-encoding brings the type-04 record back
        let saved = save(&hex);
        assert!(saved.contains(":0200000400F00A"));
        let again = load(&saved).unwrap();
        assert_eq!(again, hex);
    }

    #[test]
    fn test_blank_fill_around_segment() {
        let mut hex = HexData::new();
        hex.load_raw(0x10, &[0xAA, 0xBB], false).unwrap();

        let data = hex.range_of_data(0x00, 16, 0x3FFF, false);
        assert_eq!(data.len(), 32);
        for word in data[..0x10].chunks(2) {
            assert_eq!(word, [0x3F, 0xFF]);
        }
        assert_eq!(&data[0x10..0x12], [0xAA, 0xBB]);
        for word in data[0x12..].chunks(2) {
            assert_eq!(word, [0x3F, 0xFF]);
        }
    }

    #[test]
    fn test_range_starts_inside_segment() {
        let mut hex = HexData::new();
        hex.load_raw(0x00, &[1, 2, 3, 4, 5, 6, 7, 8], false).unwrap();

        assert_eq!(hex.range_of_data(0x04, 2, 0xFFFF, false), [5, 6, 7, 8]);
    }

    #[test]
    fn test_range_length_law() {
        let mut hex = HexData::new();
        hex.load_raw(0x20, &[9, 9], false).unwrap();
        for n in 0..64 {
            assert_eq!(hex.range_of_data(0, n, 0, false).len(), 2 * n);
        }
    }

    #[test]
    fn test_swap_involution() {
        let raw = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let mut hex = HexData::new();
        hex.load_raw(0x100, &raw, false).unwrap();

        let swapped = hex.range_of_data(0x100, 3, 0xFFFF, true);
        assert_eq!(swapped, [0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A]);

        // swapping on insert and again on extract restores the input
        let mut hex = HexData::new();
        hex.load_raw(0x100, &raw, true).unwrap();
        assert_eq!(hex.range_of_data(0x100, 3, 0xFFFF, true), raw);
    }

    #[test]
    fn test_load_raw_le8() {
        let mut hex = HexData::new();
        hex.load_raw_le8(0x4200, &[0xDE, 0xAD, 0xBE]).unwrap();

        let data = hex.range_of_data(0x4200, 3, 0xFFFF, false);
        assert_eq!(data, [0xDE, 0x00, 0xAD, 0x00, 0xBE, 0x00]);
    }

    #[test]
    fn test_overlap_refused() {
        let mut hex = HexData::new();
        hex.load_raw(0x10, &[0; 8], false).unwrap();

        // identical, contained, straddling: all refused
        for &(addr, len) in &[(0x10, 8), (0x12, 2), (0x0C, 8), (0x16, 4)] {
            assert!(matches!(
                hex.load_raw(addr, &vec![0u8; len], false),
                Err(Error::RangeOverlap { .. })
            ));
        }

        // touching is fine
        hex.load_raw(0x18, &[1, 2], false).unwrap();
        hex.load_raw(0x0E, &[3, 4], false).unwrap();
    }

    #[test]
    fn test_load_hex_overlap_refused() {
        let text = ":02000000AABB99\n:02000000CCDD55\n:00000001FF\n";
        assert!(matches!(load(text), Err(Error::RangeOverlap { .. })));
    }

    #[test]
    fn test_unaligned_raw_refused() {
        let mut hex = HexData::new();
        assert!(matches!(
            hex.load_raw(0x11, &[0, 0], false),
            Err(Error::SizeInvariant(_))
        ));
        assert!(matches!(
            hex.load_raw(0x10, &[0], false),
            Err(Error::SizeInvariant(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        // bad checksum
        assert!(matches!(
            load(":10000000000102030405060708090A0B0C0D0E0F00\n:00000001FF\n"),
            Err(Error::HexParse { line: 1, reason: HexParseReason::BadChecksum })
        ));
        // record length disagrees with the line length
        assert!(matches!(
            load(":0A0000000102F3\n:00000001FF\n"),
            Err(Error::HexParse { line: 1, reason: HexParseReason::BadLength })
        ));
        // type 3 (start segment address) is not supported
        assert!(matches!(
            load(":0400000300003800C1\n:00000001FF\n"),
            Err(Error::HexParse {
                line: 1,
                reason: HexParseReason::UnsupportedRecordType(3)
            })
        ));
        // no prefix
        assert!(matches!(
            load("10000000000102030405060708090A0B0C0D0E0F78\n"),
            Err(Error::HexParse { line: 1, reason: HexParseReason::BadPrefix })
        ));
        // truncated stream
        assert!(matches!(
            load(":020000000A0BE9\n"),
            Err(Error::HexParse { reason: HexParseReason::MissingEof, .. })
        ));
        // odd data length
        assert!(matches!(
            load(":010000000AF5\n:00000001FF\n"),
            Err(Error::HexParse { line: 1, reason: HexParseReason::OddRecord })
        ));
    }

    #[test]
    fn test_extended_segment_address() {
        // type 02: value 0x1000 shifts to 0x10000
        let text = ":020000021000EC\n:020000001234B8\n:00000001FF\n";
        let hex = load(text).unwrap();
        assert_eq!(hex.range_of_data(0x10000, 1, 0, false), [0x12, 0x34]);
    }

    #[test]
    fn test_save_reload_semantics() {
        let mut hex = HexData::new();
        let block: Vec<u8> = (0..40).collect();
        hex.load_raw(0x7F0, &block, false).unwrap();
        hex.load_raw(0xF00000, &[0xCA, 0xFE], false).unwrap();

        let again = load(&save(&hex)).unwrap();
        assert_eq!(
            again.range_of_data(0x7F0, 20, 0xFFFF, false),
            hex.range_of_data(0x7F0, 20, 0xFFFF, false)
        );
        assert_eq!(
            again.range_of_data(0xF00000, 1, 0xFFFF, false),
            [0xCA, 0xFE]
        );
        // emission is stable
        assert_eq!(save(&again), save(&hex));
    }

    #[test]
    fn test_hexdump_gutter() {
        let mut out = Vec::new();
        hexdump(&mut out, b"PIC16F84\x00\xff").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("50 49 43 31 36 46 38 34 00 ff "));
        assert!(text.trim_end().ends_with("PIC16F84.."));
    }
}
