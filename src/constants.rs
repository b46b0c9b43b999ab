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

pub const CMD_ENTER: u8                 = 0x01;

pub const CMD_INIT_VARS: u8             = 3;
pub const CMD_VOLTAGES_ON: u8           = 4;
pub const CMD_VOLTAGES_OFF: u8          = 5;
pub const CMD_CYCLE_VOLTAGES: u8        = 6;
pub const CMD_PROGRAM_ROM: u8           = 7;
pub const CMD_PROGRAM_EEPROM: u8        = 8;
pub const CMD_PROGRAM_CONFIG: u8        = 9;
pub const CMD_PROGRAM_CALIBRATION: u8   = 10;
pub const CMD_READ_ROM: u8              = 11;
pub const CMD_READ_EEPROM: u8           = 12;
pub const CMD_READ_CONFIG: u8           = 13;
pub const CMD_ERASE_CHIP: u8            = 14;
pub const CMD_ROM_BLANK_CHECK: u8       = 15;
pub const CMD_EEPROM_BLANK_CHECK: u8    = 16;
pub const CMD_COMMIT_18F_FUSE: u8       = 17;
pub const CMD_WAIT_CHIP_IN: u8          = 18;
pub const CMD_WAIT_CHIP_OUT: u8         = 19;
// 20 is unassigned in the P18A firmware jump table.
pub const CMD_GET_PROTOCOL: u8          = 21;

/// Handshake byte sent by the programmer after a hardware reset.
pub const ACK_BOOT: u8                  = b'B';
/// The firmware is back at the top of its command loop.
pub const ACK_IDLE: u8                  = b'Q';
/// Jump table entered.
pub const ACK_COMMAND: u8               = b'P';
/// Generic command success.
pub const ACK_OK: u8                    = b'Y';
/// Generic command refusal.
pub const ACK_NO: u8                    = b'N';
/// Still working (blank check keep-alive).
pub const ACK_BUSY: u8                  = b'B';
/// Programming variables accepted.
pub const ACK_INIT: u8                  = b'I';
/// Voltages on.
pub const ACK_VPP_ON: u8                = b'V';
/// Voltages off.
pub const ACK_VPP_OFF: u8               = b'v';
/// Config readout follows.
pub const ACK_CONFIG: u8                = b'C';
/// Waiting on the user (socket wait commands).
pub const ACK_ATTENTION: u8             = b'A';
/// Calibration write failed (op 10).
pub const ACK_CAL_FAIL: u8              = b'C';
/// Fuse write failed (op 10).
pub const ACK_FUSE_FAIL: u8             = b'F';

/// The protocol name op 21 must answer with.
pub const PROTOCOL_NAME: &[u8; 4]       = b"P18A";

/// ROM data travels in chunks of this many bytes (op 7).
pub const ROM_CHUNK: usize              = 32;
/// EEPROM data travels in chunks of this many bytes (op 8).
pub const EEPROM_CHUNK: usize           = 2;
/// Size of the op 13 config readout payload.
pub const CONFIG_READOUT_LEN: usize     = 26;
