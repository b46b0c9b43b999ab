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

//! # K-series PIC programmer driver library
//!
//! This is a library to drive the serial interface of the K128, K149-A,
//! K149-B and K150 PIC programmers, which speak the "P18A" framing protocol
//! over a 19200 baud 8-N-1 link.
//!
//! The [`Programmer`] engine is generic over any [`serial::SerialPort`], so
//! it can run against the real hardware or an in-memory port scripted for
//! tests. High-level operation sequences (program, verify, dump, blank
//! check) live in [`util`]; per-chip parameters come from the
//! [`chipinfo`] catalog resolved through [`properties`].

use std::{
    io,
    time::{Duration, Instant},
};

use serial::SerialPort;

#[rustfmt::skip]
pub mod constants;
pub mod chipinfo;
pub mod error;
pub mod hex;
pub mod properties;
pub mod util;

pub use self::error::{Error, Result};

use self::constants::*;
use self::properties::Properties;

/// Read timeout of the underlying port; reads loop over it.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A response is abandoned after this long without a single byte arriving.
const IDLE_DEADLINE: Duration = Duration::from_secs(5);

/// Socket-wait commands block on the user; give them a lot more rope.
const USER_DEADLINE: Duration = Duration::from_secs(300);

/// Stray bytes tolerated while hunting for the idle acknowledgement.
const START_DRAIN_LIMIT: usize = 64;

/// Programmer model, from the version byte of the boot handshake.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Model {
    K128,
    K149A,
    K149B,
    K150,
}

impl Model {
    /// Map the handshake version byte to a model.
    pub fn from_code(code: u8) -> Option<Model> {
        match code {
            0 => Some(Model::K128),
            1 => Some(Model::K149A),
            2 => Some(Model::K149B),
            3 => Some(Model::K150),
            _ => None,
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Model::K128 => "K128",
            Model::K149A => "K149-A",
            Model::K149B => "K149-B",
            Model::K150 => "K150",
        };
        write!(fmt, "{}", name)
    }
}

/// Chunk-boundary progress reports from bulk transfers.
///
/// The engine calls this on every chunk it moves; presentation (spinner,
/// bar, nothing) is the caller's business.
pub trait Progress {
    fn progress(&mut self, current: usize, total: usize);
}

/// Discards all progress reports.
pub struct NullProgress;

impl Progress for NullProgress {
    fn progress(&mut self, _current: usize, _total: usize) {}
}

/// Fuse, ID and calibration data as read back by op 13.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReadout {
    pub chip_id: u16,
    pub id_bytes: [u8; 8],
    /// One word per entry of the chip's `fuse_blank`.
    pub fuses: Vec<u16>,
    pub calibration: u16,
}

/// Default serial port settings for the K-series programmers.
///
/// The link is fixed at 19200 baud, 8 data bits, no parity, one stop bit and
/// no flow control.
pub fn port_settings() -> serial::PortSettings {
    serial::PortSettings {
        baud_rate: serial::BaudRate::Baud19200,
        char_size: serial::CharSize::Bits8,
        parity: serial::Parity::ParityNone,
        stop_bits: serial::StopBits::Stop1,
        flow_control: serial::FlowControl::FlowNone,
    }
}

/// A connected K-series programmer.
///
/// One value owns the port for the whole session. Every command is
/// bracketed: enter the firmware jump table, exchange exactly one
/// command payload, return to the idle loop.
pub struct Programmer<P> {
    port: P,
    version: u8,
    protocol: String,
    props: Properties,
    vpp: bool,
}

impl<P> Programmer<P>
where
    P: SerialPort,
{
    /// Reset the programmer and establish a session.
    ///
    /// Pulses DTR/RTS (the boards wire them to the controller reset),
    /// expects the `'B'` + version handshake, then queries the protocol
    /// name, which must be `"P18A"`.
    pub fn connect(port: P) -> Result<Self> {
        let mut prog = Programmer {
            port,
            version: 0,
            protocol: String::new(),
            props: Properties::default(),
            vpp: false,
        };

        prog.port.set_timeout(READ_TIMEOUT)?;
        prog.reset()?;

        let hello = prog.read_exact("connect", 2)?;
        if hello[0] != ACK_BOOT {
            return Err(Error::UnexpectedAck {
                cmd: "connect",
                byte: hello[0],
            });
        }
        prog.version = hello[1];

        prog.command_start()?;
        prog.send(&[CMD_GET_PROTOCOL])?;
        let name = prog.read_exact("protocol query", 4)?;
        prog.command_end()?;

        if name != PROTOCOL_NAME[..] {
            return Err(Error::UnsupportedProtocol(
                String::from_utf8_lossy(&name).into_owned(),
            ));
        }
        prog.protocol = String::from_utf8_lossy(&name).into_owned();

        match prog.model() {
            Some(model) => log::info!(
                "programmer {} speaks protocol {}",
                model,
                prog.protocol
            ),
            None => log::warn!(
                "unknown programmer version {}, protocol {}",
                prog.version,
                prog.protocol
            ),
        }

        Ok(prog)
    }

    /// Version byte from the boot handshake.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Model matching the version byte, if known.
    pub fn model(&self) -> Option<Model> {
        Model::from_code(self.version)
    }

    /// Protocol name reported by op 21.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Resolve and store the parameters for the chip to operate on.
    pub fn configure(&mut self, info: &chipinfo::ChipInfo) -> Result<()> {
        self.props = Properties::from_chip(info)?;
        log::info!("loaded setup for chip {}", info.chip_name);
        Ok(())
    }

    /// Parameters of the configured chip.
    pub fn properties(&self) -> &Properties {
        &self.props
    }

    /// Whether the programming voltages are currently on.
    pub fn vpp_enabled(&self) -> bool {
        self.vpp
    }

    /// Give up the port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn reset(&mut self) -> Result<()> {
        self.port.set_dtr(true)?;
        self.port.set_rts(true)?;
        #[cfg(not(test))]
        std::thread::sleep(Duration::from_millis(10));
        self.port.set_dtr(false)?;
        self.port.set_rts(false)?;
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        log::trace!("send {:02X?}", bytes);
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    /// Collect exactly `wanted` bytes, looping over the port timeout.
    fn read_exact(&mut self, cmd: &'static str, wanted: usize) -> Result<Vec<u8>> {
        self.read_exact_paced(cmd, wanted, IDLE_DEADLINE, &mut NullProgress)
    }

    fn read_exact_paced(
        &mut self,
        cmd: &'static str,
        wanted: usize,
        idle_deadline: Duration,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; wanted];
        let mut got = 0;
        let mut last_byte = Instant::now();

        while got < wanted {
            match self.port.read(&mut buf[got..]) {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected EOF",
                    )));
                }
                Ok(n) => {
                    got += n;
                    last_byte = Instant::now();
                    progress.progress(got, wanted);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    if last_byte.elapsed() >= idle_deadline {
                        return Err(Error::ShortResponse { cmd, wanted, got });
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        log::trace!("recv {:02X?}", &buf);
        Ok(buf)
    }

    fn read_byte(&mut self, cmd: &'static str) -> Result<u8> {
        Ok(self.read_exact(cmd, 1)?[0])
    }

    fn expect_ack(&mut self, cmd: &'static str, ack: u8) -> Result<()> {
        let byte = self.read_byte(cmd)?;
        if byte != ack {
            return Err(Error::UnexpectedAck { cmd, byte });
        }
        Ok(())
    }

    /// Enter the firmware jump table.
    ///
    /// Kicks the firmware back to its idle loop, drains whatever it is
    /// still saying until the idle acknowledgement shows up, then enters
    /// command mode.
    fn command_start(&mut self) -> Result<()> {
        self.send(&[CMD_ENTER])?;
        let mut drained = 0;
        loop {
            let byte = self.read_byte("command start")?;
            if byte == ACK_IDLE {
                break;
            }
            drained += 1;
            if drained > START_DRAIN_LIMIT {
                return Err(Error::UnexpectedAck {
                    cmd: "command start",
                    byte,
                });
            }
        }

        self.send(&[ACK_COMMAND])?;
        self.expect_ack("command start", ACK_COMMAND)
    }

    /// Leave the jump table; the firmware confirms it is idle again.
    fn command_end(&mut self) -> Result<()> {
        self.send(&[CMD_ENTER])?;
        self.expect_ack("command end", ACK_IDLE)
    }

    /// Op 3: push the per-chip programming variables to the firmware.
    ///
    /// In ICSP mode the VPP2 sequences degrade to their VPP1 twins, since
    /// the second supply is not routed to the ICSP connector.
    pub fn init_programming_variables(&mut self, icsp_mode: bool) -> Result<()> {
        let power_sequence = if icsp_mode {
            match self.props.power_sequence {
                2 => 1,
                4 => 3,
                other => other,
            }
        } else {
            self.props.power_sequence
        };

        let mut flags = 0u8;
        if self.props.flag_calibration_value_in_rom {
            flags |= 1;
        }
        if self.props.flag_band_gap_fuse {
            flags |= 2;
        }
        if self.props.flag_18f_single_panel_access_mode {
            flags |= 4;
        }
        if self.props.flag_vcc_vpp_delay {
            flags |= 8;
        }

        let rom_size = self.props.rom_size as u16;
        let eeprom_size = self.props.eeprom_size as u16;

        self.command_start()?;
        self.send(&[
            CMD_INIT_VARS,
            (rom_size >> 8) as u8,
            rom_size as u8,
            (eeprom_size >> 8) as u8,
            eeprom_size as u8,
            self.props.core_type,
            flags,
            self.props.program_delay,
            power_sequence,
            self.props.erase_mode,
            self.props.program_tries,
            self.props.panel_sizing,
        ])?;
        self.expect_ack("init variables", ACK_INIT)?;
        self.command_end()
    }

    /// Ops 4/5: programming voltages on or off.
    pub fn set_programming_voltages(&mut self, on: bool) -> Result<()> {
        let (cmd, ack) = if on {
            (CMD_VOLTAGES_ON, ACK_VPP_ON)
        } else {
            (CMD_VOLTAGES_OFF, ACK_VPP_OFF)
        };

        self.command_start()?;
        self.send(&[cmd])?;
        self.expect_ack("set voltages", ack)?;
        self.command_end()?;

        self.vpp = on;
        Ok(())
    }

    /// Op 6: cycle the programming voltages off and back on.
    pub fn cycle_programming_voltages(&mut self) -> Result<()> {
        self.command_start()?;
        self.send(&[CMD_CYCLE_VOLTAGES])?;
        match self.expect_ack("cycle voltages", ACK_VPP_ON) {
            Ok(()) => {
                self.command_end()?;
                self.vpp = true;
                Ok(())
            }
            Err(e) => {
                let _ = self.command_end();
                self.vpp = false;
                Err(e)
            }
        }
    }

    /// Op 7: program the ROM.
    ///
    /// `data` is little-endian by word and must be a whole number of
    /// 32-byte chunks, at most `rom_size` words.
    pub fn program_rom(
        &mut self,
        data: &[u8],
        progress: &mut dyn Progress,
    ) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        let word_count = data.len() / 2;
        if word_count > self.props.rom_size as usize
            || data.len() % ROM_CHUNK != 0
        {
            return Err(Error::SizeInvariant(format!(
                "bad ROM buffer of {} words",
                word_count
            )));
        }

        self.command_start()?;
        self.send(&[
            CMD_PROGRAM_ROM,
            (word_count >> 8) as u8,
            word_count as u8,
        ])?;
        self.expect_ack("program ROM", ACK_OK)?;

        for (i, chunk) in data.chunks(ROM_CHUNK).enumerate() {
            self.send(chunk)?;
            self.expect_ack("program ROM", ACK_OK)?;
            progress.progress((i + 1) * ROM_CHUNK, data.len());
        }

        self.expect_ack("program ROM", ACK_COMMAND)?;
        self.command_end()
    }

    /// Op 8: program the EEPROM.
    ///
    /// `data` must be even-sized and at most `eeprom_size` bytes.
    pub fn program_eeprom(
        &mut self,
        data: &[u8],
        progress: &mut dyn Progress,
    ) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        if data.len() > self.props.eeprom_size as usize || data.len() % 2 != 0 {
            return Err(Error::SizeInvariant(format!(
                "bad EEPROM buffer of {} bytes",
                data.len()
            )));
        }

        self.command_start()?;
        self.send(&[
            CMD_PROGRAM_EEPROM,
            (data.len() >> 8) as u8,
            data.len() as u8,
        ])?;
        self.expect_ack("program EEPROM", ACK_OK)?;

        for (i, chunk) in data.chunks(EEPROM_CHUNK).enumerate() {
            self.send(chunk)?;
            self.expect_ack("program EEPROM", ACK_OK)?;
            progress.progress((i + 1) * EEPROM_CHUNK, data.len());
        }

        // zero trailer closes the transfer
        self.send(&[0, 0])?;
        self.expect_ack("program EEPROM", ACK_COMMAND)?;
        self.command_end()
    }

    /// Op 9: program the ID bytes and fuses.
    ///
    /// 16-bit cores carry 8 ID bytes and exactly 7 fuse words; 12/14-bit
    /// cores carry 4 ID bytes and one fuse word (two on parts like the
    /// 16F88, where only the first travels here).
    pub fn program_config(&mut self, id: &[u8], fuses: &[u16]) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        let mut msg = vec![CMD_PROGRAM_CONFIG, b'0', b'0'];
        match self.props.core_bits {
            16 => {
                if fuses.len() != 7 {
                    return Err(Error::SizeInvariant(format!(
                        "16 bit cores take 7 fuses, not {}",
                        fuses.len()
                    )));
                }
                let mut id_bytes = id.to_vec();
                id_bytes.resize(8, 0);
                msg.extend_from_slice(&id_bytes);
                for fuse in fuses {
                    msg.push(*fuse as u8);
                    msg.push((*fuse >> 8) as u8);
                }
            }
            _ => {
                if fuses.is_empty() || fuses.len() > 2 {
                    return Err(Error::SizeInvariant(format!(
                        "{} bit cores take one or two fuses, not {}",
                        self.props.core_bits,
                        fuses.len()
                    )));
                }
                let mut id_bytes = id.to_vec();
                id_bytes.resize(4, 0);
                msg.extend_from_slice(&id_bytes);
                msg.extend_from_slice(b"FFFF");
                msg.push(fuses[0] as u8);
                msg.push((fuses[0] >> 8) as u8);
                msg.extend_from_slice(&[0xFF; 12]);
            }
        }

        self.command_start()?;
        self.send(&msg)?;
        self.expect_ack("program config", ACK_OK)?;
        self.command_end()
    }

    /// Op 17: commit the fuses on 16-bit cores. No-op elsewhere.
    pub fn commit_18f_fuses(&mut self) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        if self.props.core_bits != 16 {
            return Ok(());
        }

        self.command_start()?;
        self.send(&[CMD_COMMIT_18F_FUSE])?;
        self.expect_ack("commit fuses", ACK_OK)?;
        self.command_end()
    }

    /// Op 10: program the calibration word and backup fuse.
    pub fn program_calibration(&mut self, cal: u16, fuse: u16) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        self.command_start()?;
        self.send(&[
            CMD_PROGRAM_CALIBRATION,
            (cal >> 8) as u8,
            cal as u8,
            (fuse >> 8) as u8,
            fuse as u8,
        ])?;
        let byte = self.read_byte("program calibration")?;
        self.command_end()?;

        match byte {
            ACK_OK => Ok(()),
            ACK_CAL_FAIL => Err(Error::CalibrationFailed),
            ACK_FUSE_FAIL => Err(Error::FuseFailed),
            byte => Err(Error::UnexpectedAck {
                cmd: "program calibration",
                byte,
            }),
        }
    }

    /// Op 14: erase the chip.
    pub fn erase_chip(&mut self) -> Result<()> {
        assert!(self.vpp, "programming voltages are off");

        self.command_start()?;
        self.send(&[CMD_ERASE_CHIP])?;
        self.expect_ack("erase chip", ACK_OK)?;
        self.command_end()
    }

    /// Op 15: firmware-side ROM blank check.
    ///
    /// The firmware streams `'B'` keep-alives while scanning. Known to
    /// misreport on some boards; [`util::blank_check`] reads the memory
    /// back instead and keeps this as a diagnostic.
    pub fn rom_is_blank(&mut self) -> Result<bool> {
        self.command_start()?;
        self.send(&[
            CMD_ROM_BLANK_CHECK,
            (self.props.rom_blank >> 8) as u8,
        ])?;

        let byte = loop {
            let byte = self.read_byte("ROM blank check")?;
            if byte != ACK_BUSY {
                break byte;
            }
            log::debug!("ROM blank check in progress");
        };
        self.command_end()?;

        match byte {
            ACK_OK => Ok(true),
            ACK_NO => Ok(false),
            byte => Err(Error::UnexpectedAck {
                cmd: "ROM blank check",
                byte,
            }),
        }
    }

    /// Op 16: firmware-side EEPROM blank check. Same caveat as
    /// [`rom_is_blank`](Programmer::rom_is_blank).
    pub fn eeprom_is_blank(&mut self) -> Result<bool> {
        self.command_start()?;
        self.send(&[CMD_EEPROM_BLANK_CHECK])?;
        let byte = self.read_byte("EEPROM blank check")?;
        self.command_end()?;

        match byte {
            ACK_OK => Ok(true),
            ACK_NO => Ok(false),
            byte => Err(Error::UnexpectedAck {
                cmd: "EEPROM blank check",
                byte,
            }),
        }
    }

    /// Op 11: read the whole ROM, 2 bytes per word, little-endian.
    pub fn read_rom(&mut self, progress: &mut dyn Progress) -> Result<Vec<u8>> {
        assert!(self.vpp, "programming voltages are off");

        let wanted = 2 * self.props.rom_size as usize;

        self.command_start()?;
        self.send(&[CMD_READ_ROM])?;
        let data =
            self.read_exact_paced("read ROM", wanted, IDLE_DEADLINE, progress)?;
        self.command_end()?;

        Ok(data)
    }

    /// Op 12: read the whole EEPROM.
    pub fn read_eeprom(
        &mut self,
        progress: &mut dyn Progress,
    ) -> Result<Vec<u8>> {
        assert!(self.vpp, "programming voltages are off");

        let wanted = self.props.eeprom_size as usize;

        self.command_start()?;
        self.send(&[CMD_READ_EEPROM])?;
        let data = self.read_exact_paced(
            "read EEPROM",
            wanted,
            IDLE_DEADLINE,
            progress,
        )?;
        self.command_end()?;

        Ok(data)
    }

    /// Op 13: read chip ID, ID bytes, fuses and calibration word.
    ///
    /// A refused readout turns the voltages off before reporting, so a
    /// failing chip is not left powered in the socket.
    pub fn read_config(&mut self) -> Result<ConfigReadout> {
        assert!(self.vpp, "programming voltages are off");

        self.command_start()?;
        self.send(&[CMD_READ_CONFIG])?;

        let byte = self.read_byte("read config")?;
        if byte != ACK_CONFIG {
            let _ = self.command_end();
            let _ = self.set_programming_voltages(false);
            return Err(Error::UnexpectedAck {
                cmd: "read config",
                byte,
            });
        }

        let raw = self.read_exact("read config", CONFIG_READOUT_LEN)?;
        self.command_end()?;

        let mut readout = ConfigReadout {
            chip_id: u16::from_le_bytes([raw[0], raw[1]]),
            ..ConfigReadout::default()
        };
        readout.id_bytes.copy_from_slice(&raw[2..10]);
        let fuse_count = self.props.fuse_blank.len().min(7);
        for i in 0..fuse_count {
            readout
                .fuses
                .push(u16::from_le_bytes([raw[10 + 2 * i], raw[11 + 2 * i]]));
        }
        readout.calibration = u16::from_le_bytes([raw[24], raw[25]]);

        Ok(readout)
    }

    /// Op 18: block until the user has put a chip in the socket.
    ///
    /// Chips without a socket hint (ICSP-only) skip the wait.
    pub fn wait_chip_inserted(&mut self) -> Result<()> {
        if self.props.socket_hint.is_empty() {
            return Ok(());
        }

        self.command_start()?;
        self.send(&[CMD_WAIT_CHIP_IN])?;
        self.expect_ack("wait chip inserted", ACK_ATTENTION)?;
        let byte = self.read_exact_paced(
            "wait chip inserted",
            1,
            USER_DEADLINE,
            &mut NullProgress,
        )?[0];
        self.command_end()?;

        if byte != ACK_OK {
            return Err(Error::UnexpectedAck {
                cmd: "wait chip inserted",
                byte,
            });
        }
        Ok(())
    }

    /// Op 19: block until the socket is empty again.
    pub fn wait_chip_removed(&mut self) -> Result<()> {
        if self.props.socket_hint.is_empty() {
            return Ok(());
        }

        self.command_start()?;
        self.send(&[CMD_WAIT_CHIP_OUT])?;
        self.expect_ack("wait chip removed", ACK_ATTENTION)?;
        let byte = self.read_exact_paced(
            "wait chip removed",
            1,
            USER_DEADLINE,
            &mut NullProgress,
        )?[0];
        self.command_end()?;

        if byte != ACK_OK {
            return Err(Error::UnexpectedAck {
                cmd: "wait chip removed",
                byte,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::chipinfo::ChipInfo;

    /// Scripted serial port: hands out `replies` and records writes.
    pub struct MockPort {
        replies: Vec<u8>,
        cursor: usize,
        pub written: Vec<u8>,
    }

    impl MockPort {
        pub fn new(replies: &[u8]) -> MockPort {
            MockPort {
                replies: replies.to_vec(),
                cursor: 0,
                written: Vec::new(),
            }
        }
    }

    impl io::Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor >= self.replies.len() {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "script exhausted",
                ));
            }
            let n = buf.len().min(self.replies.len() - self.cursor);
            buf[..n].copy_from_slice(&self.replies[self.cursor..self.cursor + n]);
            self.cursor += n;
            Ok(n)
        }
    }

    impl io::Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for MockPort {
        fn timeout(&self) -> Duration {
            READ_TIMEOUT
        }
        fn set_timeout(&mut self, _timeout: Duration) -> serial::Result<()> {
            Ok(())
        }
        fn configure(
            &mut self,
            _settings: &serial::PortSettings,
        ) -> serial::Result<()> {
            Ok(())
        }
        fn reconfigure(
            &mut self,
            _setup: &dyn Fn(
                &mut dyn serial::SerialPortSettings,
            ) -> serial::Result<()>,
        ) -> serial::Result<()> {
            Ok(())
        }
        fn set_rts(&mut self, _level: bool) -> serial::Result<()> {
            Ok(())
        }
        fn set_dtr(&mut self, _level: bool) -> serial::Result<()> {
            Ok(())
        }
        fn read_cts(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_dsr(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_ri(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
        fn read_cd(&mut self) -> serial::Result<bool> {
            unreachable!()
        }
    }

    /// A programmer wired to a scripted port, skipping the handshake.
    pub fn scripted(replies: &[u8], props: Properties) -> Programmer<MockPort> {
        Programmer {
            port: MockPort::new(replies),
            version: 3,
            protocol: "P18A".to_string(),
            props,
            vpp: false,
        }
    }

    pub fn props_14bit() -> Properties {
        let chip = ChipInfo {
            chip_name: "16F84".to_string(),
            socket_image: "18PIN".to_string(),
            core_type: "BIT14_A".to_string(),
            power_sequence: "VCCVPP2".to_string(),
            rom_size: 0x400,
            eeprom_size: 0x40,
            program_delay: 20,
            program_tries: 1,
            over_program: 11,
            erase_mode: 1,
            fuse_blank: vec![0x3FFF],
            flash_chip: true,
            ..ChipInfo::default()
        };
        Properties::from_chip(&chip).unwrap()
    }

    #[test]
    fn test_connect_handshake() {
        let port = MockPort::new(b"B\x03QPP18AQ");
        let prog = Programmer::connect(port).unwrap();

        assert_eq!(prog.version(), 3);
        assert_eq!(prog.model(), Some(Model::K150));
        assert_eq!(prog.protocol(), "P18A");

        let written = prog.into_port().written;
        assert_eq!(
            written,
            [CMD_ENTER, ACK_COMMAND, CMD_GET_PROTOCOL, CMD_ENTER]
        );
    }

    #[test]
    fn test_connect_tolerates_handshake_noise() {
        // extra 'B's keep arriving while we hunt for the idle ack
        let port = MockPort::new(b"B\x00BBBQPP18AQ");
        let prog = Programmer::connect(port).unwrap();
        assert_eq!(prog.model(), Some(Model::K128));
    }

    #[test]
    fn test_connect_rejects_other_protocols() {
        let port = MockPort::new(b"B\x03QPP16AQ");
        match Programmer::connect(port) {
            Err(Error::UnsupportedProtocol(name)) => assert_eq!(name, "P16A"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_init_variables_icsp_flags() {
        let mut props = props_14bit();
        props.flag_calibration_value_in_rom = true;
        props.flag_18f_single_panel_access_mode = true;
        props.flag_vcc_vpp_delay = true;
        assert_eq!(props.power_sequence, 2);

        let mut prog = scripted(b"QPIQ", props);
        prog.init_programming_variables(true).unwrap();

        let written = &prog.port.written;
        // bracket, payload, bracket
        assert_eq!(written[0], CMD_ENTER);
        assert_eq!(written[1], ACK_COMMAND);
        assert_eq!(
            &written[2..14],
            &[
                CMD_INIT_VARS,
                0x04, 0x00, // rom size 0x400
                0x00, 0x40, // eeprom size 0x40
                5,    // BIT14_A core code
                0x0D, // cal word + single panel + vcc/vpp delay
                20,   // program delay
                0x01, // VPP2 degrades to VPP1 under ICSP
                1,    // erase mode
                1,    // program tries
                11,   // panel sizing
            ]
        );
        assert_eq!(written[14], CMD_ENTER);
    }

    #[test]
    fn test_init_variables_keeps_sequence_without_icsp() {
        let mut prog = scripted(b"QPIQ", props_14bit());
        prog.init_programming_variables(false).unwrap();
        assert_eq!(prog.port.written[10], 2);
    }

    #[test]
    fn test_program_config_14bit_payload() {
        let mut prog = scripted(b"QPYQ", props_14bit());
        prog.vpp = true;
        prog.program_config(&[0x01, 0x02, 0x03, 0x04], &[0x3F7F]).unwrap();

        let mut expected = vec![CMD_PROGRAM_CONFIG, b'0', b'0'];
        expected.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
        expected.extend_from_slice(b"FFFF");
        expected.extend_from_slice(&[0x7F, 0x3F]);
        expected.extend_from_slice(&[0xFF; 12]);

        let written = &prog.port.written;
        assert_eq!(&written[2..written.len() - 1], expected.as_slice());
    }

    #[test]
    fn test_program_config_16bit_payload() {
        let mut props = props_14bit();
        props.core_bits = 16;
        let mut prog = scripted(b"QPYQ", props);
        prog.vpp = true;

        let fuses = [0x0100u16, 0x0302, 0x0504, 0x0706, 0x0908, 0x0B0A, 0x0D0C];
        prog.program_config(&[0xAA], &fuses).unwrap();

        let written = &prog.port.written;
        let payload = &written[2..written.len() - 1];
        assert_eq!(&payload[..3], &[CMD_PROGRAM_CONFIG, b'0', b'0']);
        assert_eq!(&payload[3..11], &[0xAA, 0, 0, 0, 0, 0, 0, 0]);
        // fuse words go out little-endian
        assert_eq!(&payload[11..15], &[0x00, 0x01, 0x02, 0x03]);
        assert_eq!(payload.len(), 3 + 8 + 14);

        // wrong fuse count is refused before anything is sent
        let mut props = props_14bit();
        props.core_bits = 16;
        let mut prog = scripted(b"", props);
        prog.vpp = true;
        assert!(matches!(
            prog.program_config(&[], &[0x0100]),
            Err(Error::SizeInvariant(_))
        ));
    }

    #[test]
    fn test_program_rom_chunking() {
        let mut prog = scripted(b"QPYYYPQ", props_14bit());
        prog.vpp = true;

        let data: Vec<u8> = (0..64).collect();
        prog.program_rom(&data, &mut NullProgress).unwrap();

        let written = &prog.port.written;
        assert_eq!(&written[2..5], &[CMD_PROGRAM_ROM, 0x00, 0x20]);
        assert_eq!(&written[5..37], &data[..32]);
        assert_eq!(&written[37..69], &data[32..]);
    }

    #[test]
    fn test_program_rom_size_invariants() {
        let mut prog = scripted(b"", props_14bit());
        prog.vpp = true;

        // not a multiple of 32 bytes
        assert!(matches!(
            prog.program_rom(&[0u8; 30], &mut NullProgress),
            Err(Error::SizeInvariant(_))
        ));
        // larger than the ROM
        assert!(matches!(
            prog.program_rom(&vec![0u8; 0x400 * 2 + 32], &mut NullProgress),
            Err(Error::SizeInvariant(_))
        ));
    }

    #[test]
    fn test_program_eeprom_trailer() {
        let mut prog = scripted(b"QPYYYPQ", props_14bit());
        prog.vpp = true;

        prog.program_eeprom(&[0xDE, 0xAD, 0xBE, 0xEF], &mut NullProgress)
            .unwrap();

        let written = &prog.port.written;
        assert_eq!(&written[2..5], &[CMD_PROGRAM_EEPROM, 0x00, 0x04]);
        assert_eq!(&written[5..7], &[0xDE, 0xAD]);
        assert_eq!(&written[7..9], &[0xBE, 0xEF]);
        assert_eq!(&written[9..11], &[0x00, 0x00]);
    }

    #[test]
    fn test_rom_blank_check_keepalives() {
        let mut prog = scripted(b"QPBBBYQ", props_14bit());
        assert!(prog.rom_is_blank().unwrap());
        // high byte of the 14-bit blank word rides along
        assert_eq!(&prog.port.written[2..4], &[CMD_ROM_BLANK_CHECK, 0x3F]);

        let mut prog = scripted(b"QPNQ", props_14bit());
        assert!(!prog.eeprom_is_blank().unwrap());
    }

    #[test]
    fn test_read_rom_collects_all_bytes() {
        let mut replies = b"QP".to_vec();
        replies.extend(std::iter::repeat(0xA5).take(0x800));
        replies.push(b'Q');
        let mut prog = scripted(&replies, props_14bit());
        prog.vpp = true;

        let data = prog.read_rom(&mut NullProgress).unwrap();
        assert_eq!(data.len(), 0x800);
        assert!(data.iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_read_config_layout() {
        let mut props = props_14bit();
        props.fuse_blank = vec![0x3FFF, 0x3FFF];

        let mut replies = b"QPC".to_vec();
        let mut payload = vec![0x60, 0x05]; // chip id 0x0560
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]); // ids
        payload.extend_from_slice(&[0x7F, 0x3F, 0xAA, 0x2A]); // two fuses
        payload.extend_from_slice(&[0u8; 10]); // rest of the fuse field
        payload.extend_from_slice(&[0x5A, 0x34]); // calibration
        assert_eq!(payload.len(), CONFIG_READOUT_LEN);
        replies.extend_from_slice(&payload);
        replies.push(b'Q');

        let mut prog = scripted(&replies, props);
        prog.vpp = true;

        let readout = prog.read_config().unwrap();
        assert_eq!(readout.chip_id, 0x0560);
        assert_eq!(readout.id_bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(readout.fuses, vec![0x3F7F, 0x2AAA]);
        assert_eq!(readout.calibration, 0x345A);
    }

    #[test]
    fn test_read_config_refusal_drops_voltages() {
        // 'N' instead of 'C', then the bracket close and the voltages-off
        // exchange the defensive path performs
        let mut prog = scripted(b"QPNQQPvQ", props_14bit());
        prog.vpp = true;

        assert!(matches!(
            prog.read_config(),
            Err(Error::UnexpectedAck { cmd: "read config", byte: b'N' })
        ));
        assert!(!prog.vpp_enabled());
    }

    #[test]
    fn test_program_calibration_failures() {
        let mut prog = scripted(b"QPCQ", props_14bit());
        prog.vpp = true;
        assert!(matches!(
            prog.program_calibration(0x3450, 0x3FFF),
            Err(Error::CalibrationFailed)
        ));

        let mut prog = scripted(b"QPFQ", props_14bit());
        prog.vpp = true;
        assert!(matches!(
            prog.program_calibration(0x3450, 0x3FFF),
            Err(Error::FuseFailed)
        ));

        let mut prog = scripted(b"QPYQ", props_14bit());
        prog.vpp = true;
        prog.program_calibration(0x3450, 0x3FFF).unwrap();
        assert_eq!(
            &prog.port.written[2..7],
            &[CMD_PROGRAM_CALIBRATION, 0x34, 0x50, 0x3F, 0xFF]
        );
    }

    #[test]
    fn test_voltages_bookkeeping() {
        let mut prog = scripted(b"QPVQQPvQ", props_14bit());
        prog.set_programming_voltages(true).unwrap();
        assert!(prog.vpp_enabled());
        prog.set_programming_voltages(false).unwrap();
        assert!(!prog.vpp_enabled());
    }

    #[test]
    fn test_socket_wait_skipped_without_hint() {
        let mut props = props_14bit();
        props.socket_hint = String::new();
        let mut prog = scripted(b"", props);
        prog.wait_chip_inserted().unwrap();
        prog.wait_chip_removed().unwrap();
        assert!(prog.port.written.is_empty());
    }

    #[test]
    fn test_socket_wait() {
        let mut prog = scripted(b"QPAYQ", props_14bit());
        prog.wait_chip_inserted().unwrap();
        assert_eq!(prog.port.written[2], CMD_WAIT_CHIP_IN);
    }
}
