// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "std")]
use thiserror::Error;

/// Ctrl-X
pub const CANCEL: u8 = 0x18;
/// Ctrl-C
pub const INTERRUPT: u8 = 0x03;
pub const NEWLINE: u8 = b'\n';

const PLL_CLK: &[u8] = b"pll_clk ";

#[cfg_attr(feature = "std", derive(Error))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    #[cfg_attr(
        feature = "std",
        error("Buffer provided is too small for the encoded command")
    )]
    BufFull,
    #[cfg_attr(feature = "std", error("invalid pll_clk flag: {0:#04x}"))]
    BadFlag(u8),
}

/// The clock outputs of the MS5351.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    Clk0,
    Clk1,
    Clk2,
}

impl Output {
    /// ASCII digit naming the output on the console.
    pub fn digit(&self) -> u8 {
        match self {
            Output::Clk0 => b'0',
            Output::Clk1 => b'1',
            Output::Clk2 => b'2',
        }
    }
}

/// A single write to the clock generator console. Each command is sent as
/// one payload; the firmware never replies in a way we consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Abandon any partially typed line.
    Cancel,
    /// Break out of whatever the console is running.
    Interrupt,
    /// Empty line to get back to a fresh prompt.
    Newline,
    /// `pll_clk O<n>`
    OutputOff(Output),
    /// `pll_clk -<flag>`
    PllFlag(u8),
}

/// The sequence that leaves the MS5351 with all outputs disabled.
pub const DISABLE_SEQUENCE: [Command; 7] = [
    Command::Cancel,
    Command::Interrupt,
    Command::Newline,
    Command::OutputOff(Output::Clk0),
    Command::OutputOff(Output::Clk1),
    Command::OutputOff(Output::Clk2),
    Command::PllFlag(b's'),
];

impl Command {
    // "pll_clk O0\n"
    pub const MAX_ENCODED_SIZE: usize = PLL_CLK.len() + 3;

    /// Number of bytes `encode` will produce for this command.
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Cancel | Command::Interrupt | Command::Newline => 1,
            Command::OutputOff(_) | Command::PllFlag(_) => PLL_CLK.len() + 3,
        }
    }

    /// Write the bytes for this command to the front of `dst`, returning the
    /// number of bytes written.
    pub fn encode(&self, dst: &mut [u8]) -> Result<usize, Error> {
        let size = self.encoded_len();
        if dst.len() < size {
            return Err(Error::BufFull);
        }

        match self {
            Command::Cancel => dst[0] = CANCEL,
            Command::Interrupt => dst[0] = INTERRUPT,
            Command::Newline => dst[0] = NEWLINE,
            Command::OutputOff(output) => {
                Self::encode_pll_clk(dst, [b'O', output.digit()])
            }
            Command::PllFlag(flag) => {
                if !flag.is_ascii_alphanumeric() {
                    return Err(Error::BadFlag(*flag));
                }
                Self::encode_pll_clk(dst, [b'-', *flag])
            }
        }

        Ok(size)
    }

    fn encode_pll_clk(dst: &mut [u8], arg: [u8; 2]) {
        let end = PLL_CLK.len();
        dst[..end].copy_from_slice(PLL_CLK);
        dst[end..end + 2].copy_from_slice(&arg);
        dst[end + 2] = NEWLINE;
    }
}
