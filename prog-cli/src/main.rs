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

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};

mod convert;
mod device;
mod list;
mod progress;

#[cfg(unix)]
const DEFAULT_PORT: &str = "/dev/ttyUSB0";
#[cfg(windows)]
const DEFAULT_PORT: &str = "COM1";

/// Catalog file looked up next to the executable when `-d` is absent.
const DEFAULT_DATFILE: &str = "picpro.dat";

fn main() -> Result<()> {
    let args = cli().get_matches();

    let filter = if args.is_present("debug") { "trace" } else { "info" };
    // the `pretty-env-logger` cargo feature picks the prettified logger,
    // otherwise plain env_logger; K150_PROG_LOG overrides either way
    #[cfg(feature = "pretty-env-logger")]
    {
        let mut builder = pretty_env_logger::formatted_builder();
        builder.parse_filters(
            &std::env::var("K150_PROG_LOG")
                .unwrap_or_else(|_| filter.to_string()),
        );
        builder.init();
    }
    #[cfg(not(feature = "pretty-env-logger"))]
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("K150_PROG_LOG", filter),
    )
    .init();

    let global = GlobalArgs::from_matches(&args)?;

    match args.subcommand() {
        ("ping", Some(_)) => device::ping(&global),
        ("list", Some(m)) => list::list(&global, m),
        ("dryrun", Some(m)) => device::dry_run(&global, m),
        ("dump", Some(m)) => device::dump(&global, m),
        ("erase", Some(_)) => device::erase(&global),
        ("program", Some(m)) => device::program(&global, m),
        ("verify", Some(m)) => device::verify(&global, m),
        ("isblank", Some(m)) => device::is_blank(&global, m),
        ("convert", Some(m)) => convert::convert(&global, m),
        _ => {
            println!("Error: Sub-command required");
            println!("{}", args.usage());
            Ok(())
        }
    }
}

pub(crate) struct GlobalArgs {
    pub port: String,
    pub chip: Option<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub datfile: PathBuf,
    pub icsp: bool,
    pub swab: bool,
    pub id: Vec<u8>,
    pub range: Option<(u32, u32)>,
    pub blank: u16,
}

impl GlobalArgs {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<GlobalArgs> {
        Ok(GlobalArgs {
            port: matches.value_of("port").unwrap().to_string(),
            chip: matches.value_of("chip").map(str::to_string),
            input: matches.value_of("input").map(PathBuf::from),
            output: matches.value_of("output").map(PathBuf::from),
            datfile: matches
                .value_of("datfile")
                .map(PathBuf::from)
                .unwrap_or_else(default_datfile),
            icsp: matches.is_present("icsp"),
            swab: matches.is_present("swab"),
            id: matches
                .value_of("id")
                .map(parse_id)
                .transpose()?
                .unwrap_or_default(),
            range: matches.value_of("range").map(parse_range).transpose()?,
            blank: matches
                .value_of("blank")
                .map(parse_blank)
                .transpose()?
                .unwrap_or(0),
        })
    }

    /// Chip name; most device operations cannot run without one.
    pub fn chip_name(&self) -> Result<&str> {
        match &self.chip {
            Some(name) => Ok(name),
            None => bail!("no chip type given, use -t <chipname>"),
        }
    }
}

fn default_datfile() -> PathBuf {
    let mut path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    path.push(DEFAULT_DATFILE);
    path
}

/// `--id=HH…`: an even number of hex digits, at most 8 bytes.
fn parse_id(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 || text.len() > 16 {
        bail!("invalid length for ID ({})", text.len());
    }
    let mut id = Vec::with_capacity(text.len() / 2);
    for i in (0..text.len()).step_by(2) {
        let byte = u8::from_str_radix(&text[i..i + 2], 16)
            .with_context(|| format!("invalid format for ID ({})", text))?;
        id.push(byte);
    }
    Ok(id)
}

/// `--range=BEG-END`: inclusive hexadecimal bounds.
fn parse_range(text: &str) -> Result<(u32, u32)> {
    let (beg, end) = match text.find('-') {
        Some(dash) => (&text[..dash], &text[dash + 1..]),
        None => bail!("invalid format for range ({})", text),
    };
    let beg = u32::from_str_radix(beg, 16)
        .with_context(|| format!("invalid range ({})", text))?;
    let end = u32::from_str_radix(end, 16)
        .with_context(|| format!("invalid range ({})", text))?;
    if end <= beg {
        bail!("invalid range ({})", text);
    }
    Ok((beg, end))
}

/// `--blank=WORD`: hexadecimal fill word.
fn parse_blank(text: &str) -> Result<u16> {
    u16::from_str_radix(text, 16)
        .with_context(|| format!("invalid format for word blank ({})", text))
}

fn cli() -> App<'static, 'static> {
    App::new("K150 PIC Programmer")
        .usage("k150-prog [OPTIONS] [SUBCOMMAND]")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Programmer for the K128/K149/K150 serial PIC programmers (P18A protocol)")
        .arg(
            opt("port", "Serial port of the programmer")
                .short("p")
                .default_value(DEFAULT_PORT)
        )
        .arg(
            opt("chip", "Chip name to look up in the catalog, e.g. 16F84")
                .short("t")
        )
        .arg(
            opt("input", "Input HEX file (raw binary for convert raw2hex)")
                .short("i")
        )
        .arg(
            opt("output", "Output HEX file (raw binary for convert hex2raw)")
                .short("o")
        )
        .arg(
            opt("datfile", "Chip catalog file; defaults to picpro.dat next to the executable")
                .short("d")
        )
        .arg(flag("icsp", "Program through the ICSP connector instead of the socket"))
        .arg(flag("swab", "Swap the bytes of every word on convert"))
        .arg(flag("debug", "Trace the wire traffic"))
        .arg(
            opt("id", "ID bytes to program, as an even number of hex digits")
                .value_name("HH...")
        )
        .arg(
            opt("range", "Address window for convert, inclusive hex bounds")
                .value_name("BEG-END")
        )
        .arg(
            opt("blank", "Fill word for convert hex2raw, hex")
                .value_name("WORD")
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("Reset the programmer and check the protocol handshake")
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("List catalog chips matching a name fragment")
                .arg(
                    Arg::with_name("FILTER")
                        .required(true)
                        .help("Substring to match, or `all`")
                )
        )
        .subcommand(
            SubCommand::with_name("dryrun")
                .about("Show the data a program run would write, without a device")
                .arg(target_arg(&["all", "rom", "eeprom", "config"]))
        )
        .subcommand(
            SubCommand::with_name("dump")
                .about("Read chip memory, or show the segments of a HEX file")
                .arg(target_arg(&["hex", "all", "rom", "eeprom", "config"]))
        )
        .subcommand(
            SubCommand::with_name("erase")
                .about("Erase the chip")
        )
        .subcommand(
            SubCommand::with_name("program")
                .about("Program the chip from a HEX file and verify it")
                .arg(target_arg(&["all", "rom", "eeprom", "config"]))
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Compare chip memory against a HEX file")
                .arg(target_arg(&["all", "rom", "eeprom"]))
        )
        .subcommand(
            SubCommand::with_name("isblank")
                .about("Check that a memory region is erased")
                .arg(target_arg(&["rom", "eeprom"]))
        )
        .subcommand(
            SubCommand::with_name("convert")
                .about("Convert between raw binary and HEX inside --range")
                .arg(
                    Arg::with_name("MODE")
                        .required(true)
                        .possible_values(&["raw2hex", "hex2raw"])
                )
        )
}

fn opt(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).takes_value(true).help(help)
}

fn flag(name: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name).long(name).help(help)
}

fn target_arg(values: &'static [&'static str]) -> Arg<'static, 'static> {
    Arg::with_name("TARGET")
        .required(true)
        .possible_values(values)
        .help("Memory region to operate on")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("0102abCD").unwrap(), [0x01, 0x02, 0xAB, 0xCD]);
        assert!(parse_id("012").is_err());
        assert!(parse_id("0102030405060708AA").is_err());
        assert!(parse_id("zz").is_err());
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("0-3ff").unwrap(), (0, 0x3FF));
        assert_eq!(parse_range("4200-42FF").unwrap(), (0x4200, 0x42FF));
        assert!(parse_range("4200").is_err());
        assert!(parse_range("10-10").is_err());
        assert!(parse_range("10-8").is_err());
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(parse_blank("3FFF").unwrap(), 0x3FFF);
        assert!(parse_blank("10000").is_err());
    }
}
