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

//! # Chip catalog
//!
//! Parser for the `picpro.dat` chip database. The file is plain text, one
//! `KEY=VALUE` pair per line, values optionally `"`-quoted. A chip record
//! starts at a `CHIPNAME=` line and ends at the first blank line. Lines
//! starting with `LIST` belong to the GUI fuse editor of the legacy tooling
//! and are skipped here.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use crate::error::{Error, Result};

/// One chip record from the catalog, as parsed.
///
/// String-valued fields (`core_type`, `power_sequence`, `socket_image`) are
/// symbolic names; [`crate::properties::Properties::from_chip`] resolves them
/// into the numeric parameters the programmer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipInfo {
    pub chip_name: String,
    pub chip_id: String,
    pub socket_image: String,
    pub erase_mode: u8,
    pub power_sequence: String,
    pub program_delay: u8,
    pub program_tries: u8,
    pub over_program: u8,
    pub core_type: String,
    /// ROM size in words.
    pub rom_size: u32,
    /// EEPROM size in bytes.
    pub eeprom_size: u32,
    /// Blank (erased) value of each fuse word.
    pub fuse_blank: Vec<u16>,
    pub include: bool,
    pub flash_chip: bool,
    pub cp_warn: bool,
    pub cal_word: bool,
    pub band_gap: bool,
    pub icsp_only: bool,
}

/// Read one catalog line.
///
/// Bytes outside the printable ASCII range are dropped (so CRLF files parse
/// the same as LF files) and leading blanks are collapsed. Returns `None` at
/// end of file.
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
    while line.ends_with(' ') {
        line.pop();
    }

    Ok(Some(line))
}

/// Strip one pair of outer quotes, if present.
fn unwrap_quotes(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Leading decimal digits of `s`, `atoi`-style.
fn dec_digits(s: &str) -> u32 {
    let mut val: u32 = 0;
    for c in s.chars() {
        match c.to_digit(10) {
            Some(d) => val = val.wrapping_mul(10).wrapping_add(d),
            None => break,
        }
    }
    val
}

/// Leading hexadecimal digits of `s` (no `0x` prefix).
fn hex_digits(s: &str) -> u32 {
    let mut val: u32 = 0;
    for c in s.chars() {
        match c.to_digit(16) {
            Some(d) => val = (val << 4) | d,
            None => break,
        }
    }
    val
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("Y")
}

/// Split a catalog line into `(KEY, VALUE)` at the first `=`.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let eq = line.find('=')?;
    Some((&line[..eq], &line[eq + 1..]))
}

/// Stream every `CHIPNAME` in the catalog to `out`.
///
/// `filter` is matched case-insensitively as a substring; an empty filter
/// lists everything.
pub fn dump_list<R: BufRead, W: Write>(
    reader: &mut R,
    filter: &str,
    out: &mut W,
) -> Result<()> {
    let filter = filter.to_ascii_uppercase();

    while let Some(line) = read_line(reader)? {
        if let Some((key, value)) = key_value(&line) {
            if key.eq_ignore_ascii_case("CHIPNAME") {
                let name = unwrap_quotes(value).to_ascii_uppercase();
                if filter.is_empty() || name.contains(&filter) {
                    writeln!(out, "{}", name).map_err(Error::Io)?;
                }
            }
        }
    }

    Ok(())
}

/// Find `chip_name` in the catalog and parse its record.
///
/// The scan is first-match-wins and stops at the blank line closing the
/// matched record. Unknown keys inside the record are ignored.
pub fn lookup<R: BufRead>(reader: &mut R, chip_name: &str) -> Result<ChipInfo> {
    let wanted = chip_name.to_ascii_uppercase();

    let mut info = ChipInfo {
        chip_name: wanted.clone(),
        ..ChipInfo::default()
    };
    let mut found = false;

    while let Some(line) = read_line(reader)? {
        if line.is_empty() {
            if found {
                break;
            }
            continue;
        }
        if line.starts_with("LIST") {
            continue;
        }

        let (key, value) = match key_value(&line) {
            Some(kv) => kv,
            None => {
                if found {
                    log::warn!("catalog line without '=': {}", line);
                }
                continue;
            }
        };
        let value = unwrap_quotes(value);

        if !found {
            if key.eq_ignore_ascii_case("CHIPNAME")
                && value.eq_ignore_ascii_case(&wanted)
            {
                found = true;
            }
            continue;
        }

        log::debug!("chipinfo {}={}", key.to_ascii_uppercase(), value);

        if key.eq_ignore_ascii_case("CHIPID") {
            info.chip_id = value.to_string();
        } else if key.eq_ignore_ascii_case("SOCKETIMAGE") {
            info.socket_image = value.to_ascii_uppercase();
        } else if key.eq_ignore_ascii_case("ERASEMODE") {
            info.erase_mode = dec_digits(value) as u8;
        } else if key.eq_ignore_ascii_case("POWERSEQUENCE") {
            info.power_sequence = value.to_ascii_uppercase();
        } else if key.eq_ignore_ascii_case("PROGRAMDELAY") {
            info.program_delay = dec_digits(value) as u8;
        } else if key.eq_ignore_ascii_case("PROGRAMTRIES") {
            info.program_tries = dec_digits(value) as u8;
        } else if key.eq_ignore_ascii_case("OVERPROGRAM") {
            info.over_program = dec_digits(value) as u8;
        } else if key.eq_ignore_ascii_case("CORETYPE") {
            info.core_type = value.to_ascii_uppercase();
        } else if key.eq_ignore_ascii_case("ROMSIZE") {
            info.rom_size = hex_digits(value);
        } else if key.eq_ignore_ascii_case("EEPROMSIZE") {
            info.eeprom_size = hex_digits(value);
        } else if key.eq_ignore_ascii_case("FUSEBLANK") {
            info.fuse_blank = value
                .split_whitespace()
                .map(|w| hex_digits(w) as u16)
                .collect();
        } else if key.eq_ignore_ascii_case("INCLUDE") {
            info.include = parse_flag(value);
        } else if key.eq_ignore_ascii_case("FLASHCHIP") {
            info.flash_chip = parse_flag(value);
        } else if key.eq_ignore_ascii_case("CPWARN") {
            info.cp_warn = parse_flag(value);
        } else if key.eq_ignore_ascii_case("CALWORD") {
            info.cal_word = parse_flag(value);
        } else if key.eq_ignore_ascii_case("BANDGAP") {
            info.band_gap = parse_flag(value);
        } else if key.eq_ignore_ascii_case("ICSPONLY") {
            info.icsp_only = parse_flag(value);
        }
    }

    if !found {
        return Err(Error::ChipNotFound(wanted));
    }

    Ok(info)
}

/// [`dump_list`] over a catalog file on disk.
pub fn list_file<P: AsRef<Path>, W: Write>(
    path: P,
    filter: &str,
    out: &mut W,
) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    dump_list(&mut reader, filter, out)
}

/// [`lookup`] over a catalog file on disk.
pub fn load_file<P: AsRef<Path>>(path: P, chip_name: &str) -> Result<ChipInfo> {
    let mut reader = BufReader::new(File::open(path)?);
    lookup(&mut reader, chip_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const CATALOG: &str = "\
CHIPname=16F84\n\
INCLUDE=Y\n\
SocketImage=18PIN\n\
EraseMode=1\n\
FlashChip=Y\n\
PowerSequence=Vcc\n\
ProgramDelay=20\n\
ProgramTries=1\n\
OverProgram=11\n\
CoreType=bit14_a\n\
ROMsize=3FF\n\
EEPROMsize=40\n\
FUSEblank=\"3FFF\"\n\
CPwarn=N\n\
CALword=N\n\
BandGap=N\n\
ICSPonly=N\n\
ChipID=0560\n\
LIST1 FUSE1 \"WDT\" \"Enabled\"=3FFF \"Disabled\"=3FFB\n\
\n\
CHIPname=16F88\n\
CoreType=bit14_b\n\
FUSEblank=3FFF 3FFF\n\
\n";

    #[test]
    fn test_lookup_fills_record() {
        let mut cur = Cursor::new(CATALOG);
        let info = lookup(&mut cur, "16f84").unwrap();

        assert_eq!(info.chip_name, "16F84");
        assert_eq!(info.chip_id, "0560");
        assert_eq!(info.socket_image, "18PIN");
        assert_eq!(info.erase_mode, 1);
        assert_eq!(info.power_sequence, "VCC");
        assert_eq!(info.program_delay, 20);
        assert_eq!(info.program_tries, 1);
        assert_eq!(info.over_program, 11);
        assert_eq!(info.core_type, "BIT14_A");
        assert_eq!(info.rom_size, 0x3FF);
        assert_eq!(info.eeprom_size, 0x40);
        assert_eq!(info.fuse_blank, vec![0x3FFF]);
        assert!(info.include);
        assert!(info.flash_chip);
        assert!(!info.cp_warn);
        assert!(!info.cal_word);
        assert!(!info.band_gap);
        assert!(!info.icsp_only);
    }

    #[test]
    fn test_lookup_stops_at_blank_line() {
        // The second record must not leak into the first.
        let mut cur = Cursor::new(CATALOG);
        let info = lookup(&mut cur, "16F84").unwrap();
        assert_eq!(info.core_type, "BIT14_A");

        let mut cur = Cursor::new(CATALOG);
        let info = lookup(&mut cur, "16F88").unwrap();
        assert_eq!(info.core_type, "BIT14_B");
        assert_eq!(info.fuse_blank, vec![0x3FFF, 0x3FFF]);
    }

    #[test]
    fn test_lookup_unknown_chip() {
        let mut cur = Cursor::new(CATALOG);
        match lookup(&mut cur, "12C508") {
            Err(Error::ChipNotFound(name)) => assert_eq!(name, "12C508"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_lookup_crlf_catalog() {
        let crlf = CATALOG.replace('\n', "\r\n");
        let mut cur = Cursor::new(crlf);
        let info = lookup(&mut cur, "16F88").unwrap();
        assert_eq!(info.core_type, "BIT14_B");
    }

    #[test]
    fn test_dump_list_filtered() {
        let mut out = Vec::new();
        let mut cur = Cursor::new(CATALOG);
        dump_list(&mut cur, "", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "16F84\n16F88\n");

        let mut out = Vec::new();
        let mut cur = Cursor::new(CATALOG);
        dump_list(&mut cur, "f88", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "16F88\n");
    }

    #[test]
    fn test_unwrap_quotes() {
        assert_eq!(unwrap_quotes("\"16F84\""), "16F84");
        assert_eq!(unwrap_quotes("16F84"), "16F84");
        assert_eq!(unwrap_quotes("\""), "\"");
    }
}
