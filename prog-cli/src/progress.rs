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

use std::io::{self, Write};

use k150::Progress;

const FRAMES: [char; 4] = ['|', '/', '-', '\\'];

/// One-line stderr spinner fed by the engine's chunk reports.
pub struct Spinner {
    ticks: usize,
}

impl Spinner {
    pub fn new() -> Spinner {
        Spinner { ticks: 0 }
    }

    /// Wipe the spinner line.
    pub fn clear(&mut self) {
        eprint!("       \r");
        let _ = io::stderr().flush();
        self.ticks = 0;
    }
}

impl Progress for Spinner {
    fn progress(&mut self, current: usize, total: usize) {
        if total != 0 && self.ticks % 10 == 0 {
            eprint!(
                "{}  {:3}%\r",
                FRAMES[(self.ticks / 10) % FRAMES.len()],
                100 * current / total
            );
            let _ = io::stderr().flush();
        }
        self.ticks += 1;
    }
}
