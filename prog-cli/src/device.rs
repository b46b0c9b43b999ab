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

//! Subcommands that talk to a programmer (and the device-less dry run).

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use serial::SerialPort;

use k150::{
    chipinfo,
    hex::{hexdump, HexData},
    properties::Properties,
    util::{self, Regions},
    ConfigReadout, Programmer,
};

use crate::progress::Spinner;
use crate::GlobalArgs;

fn regions_for(target: &str) -> Regions {
    match target {
        "all" => Regions::all(),
        "rom" => Regions {
            rom: true,
            ..Regions::default()
        },
        "eeprom" => Regions {
            eeprom: true,
            ..Regions::default()
        },
        "config" => Regions {
            config: true,
            ..Regions::default()
        },
        _ => Regions::default(),
    }
}

/// Open the serial port and establish a programmer session.
fn open_programmer(args: &GlobalArgs) -> Result<Programmer<serial::SystemPort>> {
    log::info!("initializing programmer on port '{}'", args.port);

    let mut port = serial::open(&args.port)
        .with_context(|| format!("couldn't open serial port `{}`", args.port))?;
    port.configure(&k150::port_settings())
        .context("couldn't configure the serial port")?;
    port.set_timeout(k150::READ_TIMEOUT)?;

    Programmer::connect(port)
        .context("failed to establish a session with the programmer")
}

/// Load the chip record named by `-t` from the catalog.
fn load_chip(args: &GlobalArgs) -> Result<chipinfo::ChipInfo> {
    let name = args.chip_name()?;
    let info = chipinfo::load_file(&args.datfile, name).with_context(|| {
        format!("catalog lookup in `{}`", args.datfile.display())
    })?;
    log::info!(
        "chip type {} found in catalog with ID {}",
        info.chip_name,
        info.chip_id
    );
    Ok(info)
}

fn load_input_hex(args: &GlobalArgs) -> Result<HexData> {
    let path = match &args.input {
        Some(path) => path,
        None => bail!("no input file given, use -i <in.hex>"),
    };
    let mut hex = HexData::new();
    hex.load_hex_file(path)
        .with_context(|| format!("couldn't load HEX file `{}`", path.display()))?;
    Ok(hex)
}

fn print_config(props: &Properties, config: &ConfigReadout) {
    println!("Chip ID: {:04X}", config.chip_id);
    print!("IDs    :");
    for byte in &config.id_bytes {
        print!(" {:02X}", byte);
    }
    println!();
    if props.flag_calibration_value_in_rom {
        println!("Cal    : {:04X}", config.calibration);
    }
    print!("Fuses  :");
    for fuse in &config.fuses {
        print!(" {:04X}", fuse);
    }
    println!();
}

pub fn ping(args: &GlobalArgs) -> Result<()> {
    open_programmer(args)?;
    Ok(())
}

pub fn dry_run(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let regions = regions_for(matches.value_of("TARGET").unwrap());
    let hex = load_input_hex(args)?;
    let info = load_chip(args)?;
    let props = Properties::from_chip(&info)?;
    let images = util::build_images(&props, &hex, &args.id)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if args.icsp || props.socket_hint.is_empty() {
        writeln!(out, "\nAccessing chip connected to the ICSP port.")?;
    } else {
        writeln!(
            out,
            "\nInsert chip into socket with pin 1 at {}.",
            props.socket_hint
        )?;
    }

    if regions.rom {
        writeln!(
            out,
            "\nProgramming ROM ({:06X} : {}KB)",
            props.rom_base,
            props.rom_size >> 9
        )?;
        hexdump(&mut out, &images.rom)?;
    }
    if regions.eeprom && props.eeprom_size > 0 {
        writeln!(
            out,
            "\nProgramming EEPROM ({:06X} : {}B)",
            props.eeprom_base, props.eeprom_size
        )?;
        hexdump(&mut out, &images.eeprom)?;
    }
    if regions.config {
        writeln!(out, "\nProgramming ID")?;
        hexdump(&mut out, &images.id)?;
        writeln!(
            out,
            "\nProgramming fuses ({:06X} : {}B)",
            props.config_base,
            2 * images.fuses.len()
        )?;
        for fuse in &images.fuses {
            write!(out, "{:04X} ", fuse)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

pub fn dump(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let target = matches.value_of("TARGET").unwrap();

    if target == "hex" {
        // no device involved, just show the file's segments
        let hex = load_input_hex(args)?;
        let stdout = io::stdout();
        hex.dump_segments(&mut stdout.lock())?;
        return Ok(());
    }

    let regions = regions_for(target);
    let info = load_chip(args)?;
    let mut prog = open_programmer(args)?;
    prog.configure(&info)?;

    let mut spinner = Spinner::new();
    let data = util::read_chip(&mut prog, args.icsp, regions, &mut spinner)?;
    spinner.clear();

    let props = prog.properties();

    if let Some(path) = &args.output {
        let hex = util::dump_to_hex(props, &data)?;
        hex.save_hex_file(path)
            .with_context(|| format!("couldn't write `{}`", path.display()))?;
        log::info!("dump written to `{}`", path.display());
    } else {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Some(rom) = &data.rom {
            hexdump(&mut out, rom)?;
        }
        if let Some(eeprom) = &data.eeprom {
            hexdump(&mut out, eeprom)?;
        }
    }

    if let Some(config) = &data.config {
        print_config(props, config);
    }

    Ok(())
}

pub fn erase(args: &GlobalArgs) -> Result<()> {
    let info = load_chip(args)?;
    let mut prog = open_programmer(args)?;
    prog.configure(&info)?;

    match util::erase_chip(&mut prog, args.icsp) {
        Ok(()) => {
            log::info!("erasure succeeded");
            Ok(())
        }
        Err(e) => Err(e).context("erasure failed"),
    }
}

pub fn program(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let regions = regions_for(matches.value_of("TARGET").unwrap());
    let hex = load_input_hex(args)?;
    let info = load_chip(args)?;

    if info.cp_warn {
        log::warn!("this part goes dark once code protection is enabled");
    }

    let mut prog = open_programmer(args)?;
    prog.configure(&info)?;

    let mut spinner = Spinner::new();
    let result = util::program_chip(
        &mut prog,
        &hex,
        &args.id,
        args.icsp,
        regions,
        &mut spinner,
    );
    spinner.clear();
    result.context("programming failed")
}

pub fn verify(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let regions = regions_for(matches.value_of("TARGET").unwrap());
    let hex = load_input_hex(args)?;
    let info = load_chip(args)?;
    let mut prog = open_programmer(args)?;
    prog.configure(&info)?;

    let mut spinner = Spinner::new();
    let result =
        util::verify_chip(&mut prog, &hex, args.icsp, regions, &mut spinner);
    spinner.clear();
    result.context("verification failed")
}

pub fn is_blank(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let regions = regions_for(matches.value_of("TARGET").unwrap());
    let info = load_chip(args)?;
    let mut prog = open_programmer(args)?;
    prog.configure(&info)?;

    let mut spinner = Spinner::new();
    let report =
        util::blank_check(&mut prog, args.icsp, regions, &mut spinner)?;
    spinner.clear();

    for blank in [report.rom, report.eeprom].iter().flatten() {
        println!("{}", if *blank { "TRUE" } else { "FALSE" });
    }

    Ok(())
}
