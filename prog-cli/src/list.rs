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

use std::io;

use anyhow::{Context, Result};
use clap::ArgMatches;

use k150::chipinfo;

use crate::GlobalArgs;

pub fn list(args: &GlobalArgs, matches: &ArgMatches<'_>) -> Result<()> {
    let filter = match matches.value_of("FILTER").unwrap() {
        "all" => "",
        fragment => fragment,
    };

    let stdout = io::stdout();
    chipinfo::list_file(&args.datfile, filter, &mut stdout.lock())
        .with_context(|| {
            format!("couldn't list catalog `{}`", args.datfile.display())
        })
}
