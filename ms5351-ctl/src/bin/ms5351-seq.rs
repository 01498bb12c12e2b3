// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{Context, Result};
use clap::Parser;
use ms5351_msgs::{Command, DISABLE_SEQUENCE};
use std::io::{self, Write};

/// Print the bytes sent to the MS5351 console by `ms5351-ctl`, one payload
/// per line. Useful for comparing against a capture of the serial line.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// print the raw bytes instead of hex
    #[clap(long)]
    raw: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut out = io::stdout().lock();
    for (i, command) in DISABLE_SEQUENCE.iter().enumerate() {
        let mut buf = [0u8; Command::MAX_ENCODED_SIZE];
        let size = command
            .encode(&mut buf)
            .with_context(|| format!("encode {:?}", command))?;

        if args.raw {
            out.write_all(&buf[..size])?;
        } else {
            let bytes = hex::encode(&buf[..size]);
            writeln!(out, "{}: {:?} {}", i, command, bytes)?;
        }
    }

    out.flush().context("flush stdout")
}
