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

//! Error type shared by the catalog, the HEX codec and the protocol engine.

use std::{
    fmt::{self, Display, Formatter},
    io,
};

/// Everything that can go wrong while driving a programmer.
#[derive(Debug)]
pub enum Error {
    /// The serial link failed; the session is dead.
    Io(io::Error),
    /// The programmer answered a command with an unexpected byte.
    UnexpectedAck { cmd: &'static str, byte: u8 },
    /// The programmer stopped talking before the full response arrived.
    ShortResponse { cmd: &'static str, wanted: usize, got: usize },
    /// The firmware speaks something other than P18A.
    UnsupportedProtocol(String),
    /// Core type name not present in the core table.
    UnsupportedCoreType(String),
    /// Power sequence name not present in the sequence table.
    UnsupportedPowerSequence(String),
    /// Socket image name not present in the socket table.
    UnknownSocket(String),
    /// The chip name is missing from the catalog file.
    ChipNotFound(String),
    /// A HEX record failed to parse; `line` is 1-based.
    HexParse { line: usize, reason: HexParseReason },
    /// A loaded range intersects an already stored segment.
    RangeOverlap { addr: u32, len: usize },
    /// A buffer breaks a size rule (ROM multiple of 32, even EEPROM, ...).
    SizeInvariant(String),
    /// Read-back comparison failed for the named region.
    VerificationMismatch(&'static str),
    /// Op 10 reported the calibration word could not be written.
    CalibrationFailed,
    /// Op 10 reported the backup fuse could not be written.
    FuseFailed,
}

/// Why a HEX record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexParseReason {
    /// Line does not start with `:` or is too short to hold a record.
    BadPrefix,
    /// ASCII length disagrees with the record length field.
    BadLength,
    /// Record checksum does not cancel the byte sum.
    BadChecksum,
    /// Record type other than 00/01/02/04.
    UnsupportedRecordType(u8),
    /// Data record with an odd byte count cannot hold whole words.
    OddRecord,
    /// The file ended without an EOF record.
    MissingEof,
}

impl Display for Error {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "I/O error: {}", e),
            Error::UnexpectedAck { cmd, byte } => {
                write!(fmt, "no acknowledgement for {} (got {:#04X})", cmd, byte)
            }
            Error::ShortResponse { cmd, wanted, got } => write!(
                fmt,
                "short response for {}: wanted {} bytes, got {}",
                cmd, wanted, got
            ),
            Error::UnsupportedProtocol(p) => {
                write!(fmt, "unsupported protocol ({})", p)
            }
            Error::UnsupportedCoreType(c) => {
                write!(fmt, "unsupported core type ({})", c)
            }
            Error::UnsupportedPowerSequence(p) => {
                write!(fmt, "unsupported power sequence ({})", p)
            }
            Error::UnknownSocket(s) => {
                write!(fmt, "unknown socket image ({})", s)
            }
            Error::ChipNotFound(c) => {
                write!(fmt, "chip type '{}' is unknown", c)
            }
            Error::HexParse { line, reason } => {
                write!(fmt, "HEX record at line {}: {}", line, reason)
            }
            Error::RangeOverlap { addr, len } => write!(
                fmt,
                "range {:#X}..{:#X} overlaps an existing segment",
                addr,
                addr + *len as u32
            ),
            Error::SizeInvariant(m) => write!(fmt, "invalid size: {}", m),
            Error::VerificationMismatch(region) => {
                write!(fmt, "{} verification failed", region)
            }
            Error::CalibrationFailed => write!(fmt, "calibration failed"),
            Error::FuseFailed => write!(fmt, "fuse failed"),
        }
    }
}

impl Display for HexParseReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HexParseReason::BadPrefix => write!(fmt, "invalid format"),
            HexParseReason::BadLength => write!(fmt, "record size is invalid"),
            HexParseReason::BadChecksum => write!(fmt, "bad checksum"),
            HexParseReason::UnsupportedRecordType(t) => {
                write!(fmt, "record type {} is not supported", t)
            }
            HexParseReason::OddRecord => {
                write!(fmt, "odd data length")
            }
            HexParseReason::MissingEof => write!(fmt, "missing EOF record"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serial::Error> for Error {
    fn from(e: serial::Error) -> Self {
        Error::Io(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
