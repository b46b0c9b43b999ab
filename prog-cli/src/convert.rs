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

//! File conversion between raw binary and Intel HEX, bounded by `--range`.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;

use k150::hex::HexData;

use crate::GlobalArgs;

struct ConvertOpts {
    input: PathBuf,
    output: PathBuf,
    range: (u32, u32),
}

impl ConvertOpts {
    fn from_args(args: &GlobalArgs) -> Result<ConvertOpts> {
        let input = match &args.input {
            Some(path) => path.clone(),
            None => bail!("no input file given, use -i <file>"),
        };
        let output = match &args.output {
            Some(path) => path.clone(),
            None => bail!("no output file given, use -o <file>"),
        };
        let range = match args.range {
            Some(range) => range,
            None => bail!("no address window given, use --range=BEG-END"),
        };
        Ok(ConvertOpts {
            input,
            output,
            range,
        })
    }

    /// Bounds are inclusive: 0000-0FFF counts 0x1000 bytes.
    fn byte_count(&self) -> usize {
        (self.range.1 - self.range.0 + 1) as usize
    }
}

pub fn convert(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let opts = ConvertOpts::from_args(args)?;

    match matches.value_of("MODE").unwrap() {
        "hex2raw" => hex2raw(args, &opts),
        "raw2hex" => raw2hex(args, &opts),
        mode => bail!("invalid argument ({})", mode),
    }
}

fn hex2raw(args: &GlobalArgs, opts: &ConvertOpts) -> Result<()> {
    if opts.range.0 % 2 != 0 {
        bail!("the range must start on a word boundary");
    }

    let mut hex = HexData::new();
    hex.load_hex_file(&opts.input).with_context(|| {
        format!("couldn't load HEX file `{}`", opts.input.display())
    })?;

    log::info!(
        "converting HEX segment from address {:X} to raw data",
        opts.range.0
    );

    let data = hex.range_of_data(
        opts.range.0,
        opts.byte_count() / 2,
        args.blank,
        args.swab,
    );
    fs::write(&opts.output, &data).with_context(|| {
        format!("failed to write out file `{}`", opts.output.display())
    })?;

    log::info!("operation succeeded");
    Ok(())
}

fn raw2hex(args: &GlobalArgs, opts: &ConvertOpts) -> Result<()> {
    let mut data = fs::read(&opts.input).with_context(|| {
        format!("failed to read input file `{}`", opts.input.display())
    })?;

    log::info!("converting raw data to HEX at address {:X}", opts.range.0);

    // only the window's worth of input is kept
    let window = 2 * (opts.byte_count() / 2);
    data.truncate(window);
    if data.len() % 2 != 0 {
        bail!("the byte count must be even ({})", data.len());
    }

    let mut hex = HexData::new();
    hex.load_raw(opts.range.0, &data, args.swab)?;
    hex.save_hex_file(&opts.output).with_context(|| {
        format!("failed to write out file `{}`", opts.output.display())
    })?;

    log::info!("operation succeeded");
    Ok(())
}
