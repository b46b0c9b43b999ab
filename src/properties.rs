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

//! # Parameter resolver
//!
//! Maps the symbolic names of a [`ChipInfo`] record onto the numeric
//! parameters the programmer firmware consumes: core type code and memory
//! layout, power sequence code, socket orientation hint and the derived
//! blank-word value.

use crate::chipinfo::ChipInfo;
use crate::error::{Error, Result};

struct CoreType {
    name: &'static str,
    /// Core type code sent in the init-variables command.
    code: u8,
    /// Instruction width in bits.
    bits: u8,
    rom_base: u32,
    eeprom_base: u32,
    config_base: u32,
}

#[rustfmt::skip]
static CORE_TYPES: &[CoreType] = &[
    CoreType { name: "BIT16_C", code: 0,  bits: 16, rom_base: 0x000000, eeprom_base: 0xF00000, config_base: 0x300000 },
    CoreType { name: "BIT16_A", code: 1,  bits: 16, rom_base: 0x000000, eeprom_base: 0xF00000, config_base: 0x300000 },
    CoreType { name: "BIT16_B", code: 2,  bits: 16, rom_base: 0x000000, eeprom_base: 0xF00000, config_base: 0x300000 },
    CoreType { name: "BIT14_G", code: 3,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT12_A", code: 4,  bits: 12, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT14_A", code: 5,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT14_B", code: 6,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT14_C", code: 7,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT12_B", code: 8,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT14_E", code: 9,  bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT14_F", code: 10, bits: 14, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x00400E },
    CoreType { name: "BIT12_C", code: 11, bits: 12, rom_base: 0x000000, eeprom_base: 0x004200, config_base: 0x001FFE },
];

struct PowerSequence {
    name: &'static str,
    code: u8,
    /// Whether the firmware must insert a delay between VCC and VPP.
    delay: bool,
}

#[rustfmt::skip]
static POWER_SEQUENCES: &[PowerSequence] = &[
    PowerSequence { name: "VCC",         code: 0, delay: false },
    PowerSequence { name: "VCCVPP1",     code: 1, delay: false },
    PowerSequence { name: "VCCVPP2",     code: 2, delay: false },
    PowerSequence { name: "VPP1VCC",     code: 3, delay: false },
    PowerSequence { name: "VPP2VCC",     code: 4, delay: false },
    PowerSequence { name: "VCCFASTVPP1", code: 1, delay: true  },
    PowerSequence { name: "VCCFASTVPP2", code: 2, delay: true  },
];

/// Socket image name → where pin 1 goes on the ZIF socket.
#[rustfmt::skip]
static SOCKET_HINTS: &[(&str, &str)] = &[
    ("0PIN",   ""),
    ("8PIN",   "socket pin 13"),
    ("14PIN",  "socket pin 13"),
    ("18PIN",  "socket pin 2"),
    ("28NPIN", "socket pin 1"),
    ("40PIN",  "socket pin 1"),
];

/// Resolved numeric parameters for one chip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// Pin 1 placement instruction; empty for ICSP-only parts.
    pub socket_hint: String,
    pub rom_base: u32,
    /// ROM size in words.
    pub rom_size: u32,
    /// Value of an erased ROM word.
    pub rom_blank: u16,
    pub eeprom_base: u32,
    /// EEPROM size in bytes.
    pub eeprom_size: u32,
    pub core_type: u8,
    pub core_bits: u8,
    pub program_delay: u8,
    pub power_sequence: u8,
    pub erase_mode: u8,
    pub program_tries: u8,
    /// Over-program count, sent as the panel sizing byte.
    pub panel_sizing: u8,
    pub config_base: u32,
    pub fuse_blank: Vec<u16>,
    pub flag_calibration_value_in_rom: bool,
    pub flag_band_gap_fuse: bool,
    pub flag_18f_single_panel_access_mode: bool,
    pub flag_vcc_vpp_delay: bool,
    pub flag_flash_chip: bool,
}

impl Properties {
    /// Resolve a catalog record into programmer parameters.
    pub fn from_chip(info: &ChipInfo) -> Result<Properties> {
        let mut props = Properties::default();

        if !info.icsp_only {
            let socket = SOCKET_HINTS
                .iter()
                .find(|(name, _)| *name == info.socket_image)
                .ok_or_else(|| {
                    Error::UnknownSocket(info.socket_image.clone())
                })?;
            props.socket_hint = socket.1.to_string();
        }

        let core = CORE_TYPES
            .iter()
            .find(|c| c.name == info.core_type)
            .ok_or_else(|| {
                Error::UnsupportedCoreType(info.core_type.clone())
            })?;
        props.core_type = core.code;
        props.core_bits = core.bits;
        // single panel access applies to the BIT16_A core only
        props.flag_18f_single_panel_access_mode = core.code == 1;
        props.rom_base = core.rom_base;
        props.eeprom_base = core.eeprom_base;
        props.config_base = core.config_base;

        let sequence = POWER_SEQUENCES
            .iter()
            .find(|s| s.name == info.power_sequence)
            .ok_or_else(|| {
                Error::UnsupportedPowerSequence(info.power_sequence.clone())
            })?;
        props.power_sequence = sequence.code;
        props.flag_vcc_vpp_delay = sequence.delay;

        props.rom_size = info.rom_size;
        props.rom_blank = (!(0xFFFFu32 << core.bits) & 0xFFFF) as u16;
        props.eeprom_size = info.eeprom_size;
        props.program_delay = info.program_delay;
        props.program_tries = info.program_tries;
        props.erase_mode = info.erase_mode;
        props.panel_sizing = info.over_program;
        props.fuse_blank = info.fuse_blank.clone();
        props.flag_flash_chip = info.flash_chip;
        props.flag_calibration_value_in_rom = info.cal_word;
        props.flag_band_gap_fuse = info.band_gap;

        Ok(props)
    }
}
