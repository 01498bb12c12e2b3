// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::{warn, LevelFilter};
use ms5351_ctl::{DevicePath, SerialConnector, Settle, DEFAULT_PREFIX};

const BANNER: &str = "Disable MS5351";
const SUCCESS: &str =
    "Operation successful, switch to the next board to start testing";
const FAILURE: &str = "Failed to disable MS5351";

/// Disable all clock outputs of the MS5351 on the board attached to the
/// given serial port.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// serial port identifier, appended to the device prefix (e.g. `3` for
    /// `COM3`)
    #[clap(long)]
    com: Option<String>,

    /// prefix used to build the serial device name
    #[clap(long, env = "MS5351_PORT_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// verbosity
    #[clap(long, env = "MS5351_VERBOSE")]
    verbose: bool,
}

fn run(args: &Args) -> std::result::Result<(), ms5351_ctl::Error> {
    let path = DevicePath::new(&args.prefix, args.com.as_deref())?;

    ms5351_ctl::disable(&SerialConnector::default(), &path, &Settle::default())
}

/// The line shown to the operator. Every error gets the same message, the
/// cause only goes to the log.
fn report(
    result: &std::result::Result<(), ms5351_ctl::Error>,
) -> &'static str {
    match result {
        Ok(()) => SUCCESS,
        Err(_) => FAILURE,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = Builder::from_default_env();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    builder.filter(None, level).init();

    println!("{}", BANNER);

    // A failed board must not stop the bench: report it and exit cleanly.
    let result = run(&args);
    let status = report(&result);
    if let Err(e) = result {
        warn!("{:#}", anyhow::Error::from(e));
    }
    println!("{}", status);

    Ok(())
}
