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

//! # Operation sequences
//!
//! High-level chip operations composed from the [`Programmer`] primitives:
//! shaping device images out of a [`HexData`] store, programming with
//! read-back verification, dumping, erasing and blank checking.

use serial::SerialPort;

use crate::{
    error::{Error, Result},
    hex::HexData,
    properties::Properties,
    ConfigReadout, Programmer, Progress,
};

/// Which memory regions an operation touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Regions {
    pub rom: bool,
    pub eeprom: bool,
    pub config: bool,
}

impl Regions {
    pub fn all() -> Regions {
        Regions {
            rom: true,
            eeprom: true,
            config: true,
        }
    }
}

/// Device-ready images for one programming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipImages {
    /// ROM bytes as they travel on the wire (words byte-swapped).
    pub rom: Vec<u8>,
    /// EEPROM bytes in device order.
    pub eeprom: Vec<u8>,
    /// ID bytes, as given on the command line.
    pub id: Vec<u8>,
    /// Fuse words: the chip's blank values with the first overlaid from
    /// the HEX config window.
    pub fuses: Vec<u16>,
}

/// Raw images read back from a chip.
#[derive(Debug, Clone, Default)]
pub struct DumpData {
    pub rom: Option<Vec<u8>>,
    pub eeprom: Option<Vec<u8>>,
    pub config: Option<ConfigReadout>,
}

/// Blank-check outcome per requested region.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankReport {
    pub rom: Option<bool>,
    pub eeprom: Option<bool>,
}

/// Shape the HEX store into the images one programming pass needs.
///
/// ROM leaves the store byte-swapped (the wire wants words little-endian);
/// EEPROM depends on the core: 12/14-bit parts keep one byte per word, so
/// only the even offsets of the window survive, while 16-bit parts are
/// byte-addressable.
pub fn build_images(
    props: &Properties,
    hex: &HexData,
    id: &[u8],
) -> Result<ChipImages> {
    let rom = hex.range_of_data(
        props.rom_base,
        props.rom_size as usize,
        props.rom_blank,
        true,
    );

    let eeprom = match props.core_bits {
        12 | 14 => {
            let window = hex.range_of_data(
                props.eeprom_base,
                props.eeprom_size as usize,
                0xFFFF,
                false,
            );
            window.iter().step_by(2).copied().collect()
        }
        16 => hex.range_of_data(
            props.eeprom_base,
            (props.eeprom_size / 2) as usize,
            0xFFFF,
            false,
        ),
        bits => {
            return Err(Error::UnsupportedCoreType(format!("{} bit core", bits)))
        }
    };

    let mut fuses = props.fuse_blank.clone();
    if !fuses.is_empty() {
        let window =
            hex.range_of_data(props.config_base, fuses.len(), props.rom_blank, true);
        fuses[0] = u16::from_be_bytes([window[0], window[1]]);
    }

    Ok(ChipImages {
        rom,
        eeprom,
        id: id.to_vec(),
        fuses,
    })
}

/// The ROM image of an erased chip.
pub fn blank_rom_image(props: &Properties) -> Vec<u8> {
    HexData::new().range_of_data(
        props.rom_base,
        props.rom_size as usize,
        props.rom_blank,
        true,
    )
}

/// Fold a dump back into a HEX store at the chip's base addresses.
pub fn dump_to_hex(props: &Properties, dump: &DumpData) -> Result<HexData> {
    let mut hex = HexData::new();

    if let Some(rom) = &dump.rom {
        // ROM words come off the wire little-endian, store swapped
        hex.load_raw(props.rom_base, rom, true)?;
    }

    if let Some(eeprom) = &dump.eeprom {
        match props.core_bits {
            12 | 14 => hex.load_raw_le8(props.eeprom_base, eeprom)?,
            16 => hex.load_raw(props.eeprom_base, eeprom, false)?,
            bits => {
                return Err(Error::UnsupportedCoreType(format!(
                    "{} bit core",
                    bits
                )))
            }
        }
    }

    if let Some(config) = &dump.config {
        let mut bytes = Vec::with_capacity(2 * config.fuses.len());
        for fuse in &config.fuses {
            bytes.extend_from_slice(&fuse.to_be_bytes());
        }
        hex.load_raw(props.config_base, &bytes, true)?;
    }

    Ok(hex)
}

/// Init the variables, walk the user through chip insertion, raise VPP.
fn prepare_session<P>(prog: &mut Programmer<P>, icsp_mode: bool) -> Result<()>
where
    P: SerialPort,
{
    prog.init_programming_variables(icsp_mode)?;

    let hint = prog.properties().socket_hint.clone();
    if icsp_mode || hint.is_empty() {
        log::info!("accessing chip connected to the ICSP port");
    } else {
        log::info!("insert the chip into the socket with pin 1 at {}", hint);
        prog.wait_chip_inserted()?;
        // let the contacts settle before powering the socket
        #[cfg(not(test))]
        std::thread::sleep(std::time::Duration::from_secs(1));
    }

    prog.set_programming_voltages(true)
}

/// Program the selected regions and verify them by reading back.
///
/// A region that fails to program or verify is reported and the sequence
/// moves on, so one bad region does not hide the state of the others; the
/// first failed region is returned as [`Error::VerificationMismatch`] at
/// the end. The fuse commit and config read-back of 16-bit cores only run
/// on an otherwise clean pass.
pub fn program_chip<P>(
    prog: &mut Programmer<P>,
    hex: &HexData,
    id: &[u8],
    icsp_mode: bool,
    regions: Regions,
    progress: &mut dyn Progress,
) -> Result<()>
where
    P: SerialPort,
{
    let props = prog.properties().clone();
    let images = build_images(&props, hex, id)?;

    prepare_session(prog, icsp_mode)?;

    let result = program_regions(prog, &props, &images, regions, progress);
    match result {
        Ok(()) => prog.set_programming_voltages(false),
        Err(e) => {
            let _ = prog.set_programming_voltages(false);
            Err(e)
        }
    }
}

fn program_regions<P>(
    prog: &mut Programmer<P>,
    props: &Properties,
    images: &ChipImages,
    regions: Regions,
    progress: &mut dyn Progress,
) -> Result<()>
where
    P: SerialPort,
{
    if props.flag_flash_chip && regions.rom && regions.eeprom && regions.config
    {
        log::info!("erasing chip");
        if let Err(e) = prog.erase_chip() {
            log::error!("erasure failed: {}", e);
        }
        prog.cycle_programming_voltages()?;
    }

    if regions.rom {
        log::info!("programming ROM");
        if let Err(e) = prog.program_rom(&images.rom, progress) {
            log::error!("ROM programming failed: {}", e);
        }
    }

    if regions.eeprom && props.eeprom_size > 0 {
        log::info!("programming EEPROM");
        if let Err(e) = prog.program_eeprom(&images.eeprom, progress) {
            log::error!("EEPROM programming failed: {}", e);
        }
    }

    if regions.config {
        log::info!("programming ID and fuses");
        if let Err(e) = prog.program_config(&images.id, &images.fuses) {
            log::error!("programming ID and fuses failed: {}", e);
        }
    }

    let mut mismatch: Option<&'static str> = None;

    if regions.rom {
        log::info!("verifying ROM");
        match prog.read_rom(progress) {
            Ok(data) if data == images.rom => log::info!("ROM verified"),
            Ok(_) => mismatch = mismatch.or(Some("ROM")),
            Err(e) => {
                log::error!("ROM read back failed: {}", e);
                mismatch = mismatch.or(Some("ROM"));
            }
        }
    }

    if regions.eeprom && props.eeprom_size > 0 {
        log::info!("verifying EEPROM");
        match prog.read_eeprom(progress) {
            Ok(data) if data == images.eeprom => log::info!("EEPROM verified"),
            Ok(_) => mismatch = mismatch.or(Some("EEPROM")),
            Err(e) => {
                log::error!("EEPROM read back failed: {}", e);
                mismatch = mismatch.or(Some("EEPROM"));
            }
        }
    }

    if mismatch.is_none() && regions.config {
        if props.core_bits == 16 {
            log::info!("committing fuse data");
            prog.commit_18f_fuses()?;
        }

        let readout = prog.read_config()?;
        if readout.fuses == images.fuses {
            log::info!("CONFIG verified");
        } else {
            mismatch = Some("CONFIG");
        }
    }

    match mismatch {
        Some(region) => Err(Error::VerificationMismatch(region)),
        None => Ok(()),
    }
}

/// Read the selected regions off the chip.
pub fn read_chip<P>(
    prog: &mut Programmer<P>,
    icsp_mode: bool,
    regions: Regions,
    progress: &mut dyn Progress,
) -> Result<DumpData>
where
    P: SerialPort,
{
    prepare_session(prog, icsp_mode)?;

    let result: Result<DumpData> = (|| {
        let mut dump = DumpData::default();
        if regions.rom {
            log::info!("reading ROM");
            dump.rom = Some(prog.read_rom(progress)?);
        }
        if regions.eeprom {
            log::info!("reading EEPROM");
            dump.eeprom = Some(prog.read_eeprom(progress)?);
        }
        if regions.config {
            log::info!("reading CONFIG");
            dump.config = Some(prog.read_config()?);
        }
        Ok(dump)
    })();

    match result {
        Ok(dump) => {
            prog.set_programming_voltages(false)?;
            Ok(dump)
        }
        Err(e) => {
            let _ = prog.set_programming_voltages(false);
            Err(e)
        }
    }
}

/// Erase the whole chip.
pub fn erase_chip<P>(prog: &mut Programmer<P>, icsp_mode: bool) -> Result<()>
where
    P: SerialPort,
{
    prepare_session(prog, icsp_mode)?;

    log::info!("erasing chip");
    let result = prog.erase_chip();
    match result {
        Ok(()) => prog.set_programming_voltages(false),
        Err(e) => {
            let _ = prog.set_programming_voltages(false);
            Err(e)
        }
    }
}

/// Compare the chip against the HEX store without writing anything.
pub fn verify_chip<P>(
    prog: &mut Programmer<P>,
    hex: &HexData,
    icsp_mode: bool,
    regions: Regions,
    progress: &mut dyn Progress,
) -> Result<()>
where
    P: SerialPort,
{
    let props = prog.properties().clone();
    let images = build_images(&props, hex, &[])?;

    prepare_session(prog, icsp_mode)?;

    let result: Result<()> = (|| {
        let mut mismatch: Option<&'static str> = None;

        if regions.rom {
            log::info!("verifying ROM");
            if prog.read_rom(progress)? == images.rom {
                log::info!("ROM verified");
            } else {
                mismatch = mismatch.or(Some("ROM"));
            }
        }

        if regions.eeprom && props.eeprom_size > 0 {
            log::info!("verifying EEPROM");
            if prog.read_eeprom(progress)? == images.eeprom {
                log::info!("EEPROM verified");
            } else {
                mismatch = mismatch.or(Some("EEPROM"));
            }
        }

        match mismatch {
            Some(region) => Err(Error::VerificationMismatch(region)),
            None => Ok(()),
        }
    })();

    match result {
        Ok(()) => prog.set_programming_voltages(false),
        Err(e) => {
            let _ = prog.set_programming_voltages(false);
            Err(e)
        }
    }
}

/// Check whether the selected regions are erased.
///
/// Ops 15/16 misreport on observed hardware, so this reads the memory back
/// and compares it with the synthetic blank image instead; the direct
/// firmware checks stay available on [`Programmer`] as diagnostics.
pub fn blank_check<P>(
    prog: &mut Programmer<P>,
    icsp_mode: bool,
    regions: Regions,
    progress: &mut dyn Progress,
) -> Result<BlankReport>
where
    P: SerialPort,
{
    let props = prog.properties().clone();

    prepare_session(prog, icsp_mode)?;

    let result: Result<BlankReport> = (|| {
        let mut report = BlankReport::default();

        if regions.rom {
            log::info!(
                "checking that the ROM ({} B) is blank",
                2 * props.rom_size
            );
            let data = prog.read_rom(progress)?;
            report.rom = Some(data == blank_rom_image(&props));
        }

        if regions.eeprom && props.eeprom_size > 0 {
            log::info!(
                "checking that the EEPROM ({} B) is blank",
                props.eeprom_size
            );
            let data = prog.read_eeprom(progress)?;
            report.eeprom = Some(data.iter().all(|&b| b == 0xFF));
        }

        Ok(report)
    })();

    match result {
        Ok(report) => {
            prog.set_programming_voltages(false)?;
            Ok(report)
        }
        Err(e) => {
            let _ = prog.set_programming_voltages(false);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{props_14bit, scripted};
    use crate::NullProgress;

    #[test]
    fn test_build_images_blank_store() {
        let props = props_14bit();
        let images = build_images(&props, &HexData::new(), &[]).unwrap();

        assert_eq!(images.rom.len(), 2 * props.rom_size as usize);
        for word in images.rom.chunks(2) {
            assert_eq!(word, [0x3F, 0xFF]);
        }
        assert_eq!(images.eeprom, vec![0xFF; props.eeprom_size as usize]);
        // no config data in the store: the blank fuse survives
        assert_eq!(images.fuses, vec![0x3FFF]);
    }

    #[test]
    fn test_build_images_eeprom_even_offsets() {
        let props = props_14bit();
        let mut hex = HexData::new();
        hex.load_raw_le8(props.eeprom_base, &[0xAB, 0xCD]).unwrap();

        let images = build_images(&props, &hex, &[]).unwrap();
        assert_eq!(images.eeprom.len(), props.eeprom_size as usize);
        assert_eq!(&images.eeprom[..2], &[0xAB, 0xCD]);
        assert!(images.eeprom[2..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_build_images_eeprom_16bit() {
        let mut props = props_14bit();
        props.core_bits = 16;
        props.eeprom_base = 0xF00000;
        let mut hex = HexData::new();
        hex.load_raw(0xF00000, &[0x11, 0x22], false).unwrap();

        let images = build_images(&props, &hex, &[]).unwrap();
        assert_eq!(images.eeprom.len(), props.eeprom_size as usize);
        assert_eq!(&images.eeprom[..2], &[0x11, 0x22]);
    }

    #[test]
    fn test_build_images_fuse_overlay() {
        let props = props_14bit();
        let mut hex = HexData::new();
        hex.load_raw(props.config_base, &[0x12, 0x34], false).unwrap();

        let images = build_images(&props, &hex, &[0xDE]).unwrap();
        assert_eq!(images.fuses, vec![0x3412]);
        assert_eq!(images.id, vec![0xDE]);
    }

    #[test]
    fn test_dump_round_trips_through_program_images() {
        let props = props_14bit();

        // as read off a chip
        let rom: Vec<u8> = (0..2 * props.rom_size as usize)
            .map(|i| (i % 251) as u8)
            .collect();
        let eeprom: Vec<u8> = (0..props.eeprom_size as usize)
            .map(|i| (i % 13) as u8)
            .collect();
        let dump = DumpData {
            rom: Some(rom.clone()),
            eeprom: Some(eeprom.clone()),
            config: Some(ConfigReadout {
                fuses: vec![0x2AAA],
                ..ConfigReadout::default()
            }),
        };

        let hex = dump_to_hex(&props, &dump).unwrap();
        let images = build_images(&props, &hex, &[]).unwrap();

        assert_eq!(images.rom, rom);
        assert_eq!(images.eeprom, eeprom);
        assert_eq!(images.fuses, vec![0x2AAA]);
    }

    #[test]
    fn test_program_chip_rom_only() {
        let mut props = props_14bit();
        props.rom_size = 16; // one 32 byte chunk
        props.socket_hint = String::new();

        let rom_image = blank_rom_image(&props);

        let mut replies = Vec::new();
        replies.extend_from_slice(b"QPIQ"); // init variables
        replies.extend_from_slice(b"QPVQ"); // voltages on
        replies.extend_from_slice(b"QPYYPQ"); // program ROM, one chunk
        replies.extend_from_slice(b"QP"); // read back
        replies.extend_from_slice(&rom_image);
        replies.push(b'Q');
        replies.extend_from_slice(b"QPvQ"); // voltages off

        let mut prog = scripted(&replies, props);

        program_chip(
            &mut prog,
            &HexData::new(),
            &[],
            false,
            Regions {
                rom: true,
                eeprom: false,
                config: false,
            },
            &mut NullProgress,
        )
        .unwrap();
        assert!(!prog.vpp_enabled());
    }

    #[test]
    fn test_verify_chip_reports_mismatch() {
        let mut props = props_14bit();
        props.rom_size = 16;
        props.socket_hint = String::new();

        let mut bad_image = blank_rom_image(&props);
        bad_image[0] ^= 0xFF;

        let mut replies = Vec::new();
        replies.extend_from_slice(b"QPIQ");
        replies.extend_from_slice(b"QPVQ");
        replies.extend_from_slice(b"QP");
        replies.extend_from_slice(&bad_image);
        replies.push(b'Q');
        replies.extend_from_slice(b"QPvQ");

        let mut prog = scripted(&replies, props);

        let result = verify_chip(
            &mut prog,
            &HexData::new(),
            false,
            Regions {
                rom: true,
                eeprom: false,
                config: false,
            },
            &mut NullProgress,
        );
        assert!(matches!(result, Err(Error::VerificationMismatch("ROM"))));
    }

    #[test]
    fn test_blank_check_compares_reads() {
        let mut props = props_14bit();
        props.rom_size = 16;
        props.socket_hint = String::new();

        let mut replies = Vec::new();
        replies.extend_from_slice(b"QPIQ");
        replies.extend_from_slice(b"QPVQ");
        replies.extend_from_slice(b"QP");
        replies.extend_from_slice(&blank_rom_image(&props));
        replies.push(b'Q');
        replies.extend_from_slice(b"QP");
        let mut eeprom = vec![0xFF; props.eeprom_size as usize];
        eeprom[3] = 0; // one programmed byte
        replies.extend_from_slice(&eeprom);
        replies.push(b'Q');
        replies.extend_from_slice(b"QPvQ");

        let mut prog = scripted(&replies, props);

        let report = blank_check(
            &mut prog,
            false,
            Regions {
                rom: true,
                eeprom: true,
                config: false,
            },
            &mut NullProgress,
        )
        .unwrap();
        assert_eq!(report.rom, Some(true));
        assert_eq!(report.eeprom, Some(false));
    }
}
