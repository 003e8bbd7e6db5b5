/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    lib.rs

    MartyAT headless front-end main library component.

*/
//! Runs a BIOS image on the MartyAT core without a display, for testing, benchmarking and
//! producing snapshots.

#![forbid(unsafe_code)]

pub mod config;
pub mod io;
mod run;

pub use run::{load_bios, run_headless};

/// Default configuration file, read from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "martyat.toml";

pub fn run() -> Result<(), anyhow::Error> {
    let config = config::get_config(DEFAULT_CONFIG_FILE)?;
    log::debug!("Running headless with {:?}", config);
    run_headless(&config)
}
