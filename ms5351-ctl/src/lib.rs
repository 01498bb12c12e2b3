// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use log::{debug, info, warn};
use ms5351_msgs::{Command, DISABLE_SEQUENCE};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::{
    fmt,
    io::{self, Write},
    thread,
    time::Duration,
};
use thiserror::Error;

/// The MS5351 test firmware console only runs at this rate.
pub const BAUD_RATE: u32 = 115_200;

/// Blocking write timeout applied to the serial device.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after opening the port and again after the last command.
pub const SETTLE: Duration = Duration::from_millis(500);

pub const DEFAULT_PREFIX: &str =
    if cfg!(windows) { "COM" } else { "/dev/ttyUSB" };

/// Errors encountered while sending the disable sequence. The CLI collapses
/// all of these into a single failure message, the variants exist so the log
/// can say what actually went wrong.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no serial port identifier provided")]
    NoPort,
    #[error("failed to open serial device \"{path}\"")]
    Connect {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("failed to write {command:?} to serial device")]
    Write {
        command: Command,
        #[source]
        source: io::Error,
    },
    #[error("timed out writing {command:?} to serial device")]
    Timeout { command: Command },
    #[error("failed to flush serial device")]
    Flush(#[source] io::Error),
    #[error("failed to encode command")]
    Encode(#[from] ms5351_msgs::Error),
}

/// OS name of the serial device: a platform prefix (`COM`, `/dev/ttyUSB`)
/// followed by the identifier the operator typed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn new(prefix: &str, suffix: Option<&str>) -> Result<Self, Error> {
        let suffix = suffix
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Error::NoPort)?;

        Ok(Self(format!("{prefix}{suffix}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed pauses around the write sequence. The device needs time after
/// the port opens before it accepts input, and time to act on the last
/// command before the port is closed again.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Settle {
    pub open: Duration,
    pub drain: Duration,
}

impl Settle {
    pub fn total(&self) -> Duration {
        self.open + self.drain
    }
}

impl Default for Settle {
    fn default() -> Self {
        Settle {
            open: SETTLE,
            drain: SETTLE,
        }
    }
}

/// The `Connect` trait is implemented by types that can open a byte sink to
/// the clock generator given the name of the device.
pub trait Connect {
    type Port: Write;

    fn connect(&self, path: &str) -> Result<Self::Port, Error>;
}

/// Opens real serial devices through `serialport`.
#[derive(Clone, Debug)]
pub struct SerialConnector {
    baud: u32,
    timeout: Duration,
}

impl SerialConnector {
    pub fn new(baud: u32, timeout: Duration) -> Self {
        SerialConnector { baud, timeout }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        SerialConnector::new(BAUD_RATE, WRITE_TIMEOUT)
    }
}

impl Connect for SerialConnector {
    type Port = Box<dyn SerialPort>;

    fn connect(&self, path: &str) -> Result<Self::Port, Error> {
        info!("device: {}, baud: {}", path, self.baud);
        serialport::new(path, self.baud)
            .timeout(self.timeout)
            .data_bits(DataBits::Eight)
            .flow_control(FlowControl::None)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .open()
            .map_err(|source| Error::Connect {
                path: path.to_string(),
                source,
            })
    }
}

/// An open port. The underlying device is released when this is dropped,
/// so a `Connection` only ever exists for a port that actually opened.
pub struct Connection<P: Write> {
    path: DevicePath,
    port: P,
}

impl<P: Write> Connection<P> {
    pub fn open<C>(connector: &C, path: &DevicePath) -> Result<Self, Error>
    where
        C: Connect<Port = P> + ?Sized,
    {
        let port = connector.connect(path.as_str())?;
        debug!("opened {}", path);

        Ok(Connection {
            path: path.clone(),
            port,
        })
    }

    /// Write one command as a single payload.
    pub fn send(&mut self, command: &Command) -> Result<(), Error> {
        let mut buf = [0u8; Command::MAX_ENCODED_SIZE];
        let size = command.encode(&mut buf)?;

        debug!("sending {:?}: {}", command, hex::encode(&buf[..size]));
        self.port.write_all(&buf[..size]).map_err(|e| {
            warn!("write to {} failed: \"{}\"", self.path, e);
            if e.kind() == io::ErrorKind::TimedOut {
                Error::Timeout { command: *command }
            } else {
                Error::Write {
                    command: *command,
                    source: e,
                }
            }
        })
    }

    /// Write each command in order with no delay between them, then flush.
    pub fn send_all(&mut self, commands: &[Command]) -> Result<(), Error> {
        for command in commands {
            self.send(command)?;
        }

        self.port.flush().map_err(Error::Flush)
    }
}

impl<P: Write> Drop for Connection<P> {
    fn drop(&mut self) {
        debug!("closing {}", self.path);
    }
}

/// Open `path`, wait for the device to settle, send the disable sequence and
/// wait for the device to act on it. The port is closed before this returns
/// on every path where it was opened.
pub fn disable<C>(
    connector: &C,
    path: &DevicePath,
    settle: &Settle,
) -> Result<(), Error>
where
    C: Connect + ?Sized,
{
    let mut conn = Connection::open(connector, path)?;

    thread::sleep(settle.open);
    conn.send_all(&DISABLE_SEQUENCE)?;
    thread::sleep(settle.drain);

    info!("disable sequence sent to {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
        time::Instant,
    };

    /// Stands in for the serial device: every `write` call is kept as one
    /// payload and dropping the port is recorded as the close.
    struct Recorder {
        payloads: Rc<RefCell<Vec<Vec<u8>>>>,
        closed: Rc<Cell<bool>>,
        fail_at: Option<(usize, io::ErrorKind)>,
        fail_flush: bool,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut payloads = self.payloads.borrow_mut();
            if let Some((idx, kind)) = self.fail_at {
                if payloads.len() == idx {
                    return Err(io::Error::new(kind, "injected"));
                }
            }
            payloads.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.fail_flush {
                let kind = io::ErrorKind::Other;
                return Err(io::Error::new(kind, "injected"));
            }
            Ok(())
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            self.closed.set(true);
        }
    }

    #[derive(Default)]
    struct Bench {
        payloads: Rc<RefCell<Vec<Vec<u8>>>>,
        closed: Rc<Cell<bool>>,
        opened: RefCell<Vec<String>>,
        missing: bool,
        fail_at: Option<(usize, io::ErrorKind)>,
        fail_flush: bool,
    }

    impl Connect for Bench {
        type Port = Recorder;

        fn connect(&self, path: &str) -> Result<Recorder, Error> {
            if self.missing {
                return Err(Error::Connect {
                    path: path.to_string(),
                    source: serialport::Error::new(
                        serialport::ErrorKind::NoDevice,
                        "no such device",
                    ),
                });
            }
            self.opened.borrow_mut().push(path.to_string());
            Ok(Recorder {
                payloads: self.payloads.clone(),
                closed: self.closed.clone(),
                fail_at: self.fail_at,
                fail_flush: self.fail_flush,
            })
        }
    }

    const NO_SETTLE: Settle = Settle {
        open: Duration::ZERO,
        drain: Duration::ZERO,
    };

    fn com3() -> DevicePath {
        DevicePath::new("COM", Some("3")).expect("device path")
    }

    #[test]
    fn device_path_joins_prefix() {
        assert_eq!(com3().as_str(), "COM3");
        let path = DevicePath::new("/dev/ttyUSB", Some(" 0 ")).unwrap();
        assert_eq!(path.to_string(), "/dev/ttyUSB0");
    }

    #[test]
    fn device_path_requires_suffix() {
        assert!(matches!(DevicePath::new("COM", None), Err(Error::NoPort)));
        assert!(matches!(
            DevicePath::new("COM", Some("")),
            Err(Error::NoPort)
        ));
        assert!(matches!(
            DevicePath::new("COM", Some("  ")),
            Err(Error::NoPort)
        ));
    }

    #[test]
    fn disable_writes_sequence_in_order() {
        let bench = Bench::default();

        disable(&bench, &com3(), &NO_SETTLE).expect("disable");

        assert_eq!(*bench.opened.borrow(), vec!["COM3".to_string()]);
        let expected: Vec<Vec<u8>> = vec![
            vec![0x18],
            vec![0x03],
            vec![0x0A],
            b"pll_clk O0\n".to_vec(),
            b"pll_clk O1\n".to_vec(),
            b"pll_clk O2\n".to_vec(),
            b"pll_clk -s\n".to_vec(),
        ];
        assert_eq!(*bench.payloads.borrow(), expected);
        assert!(bench.closed.get());
    }

    #[test]
    fn missing_device_fails_without_close() {
        let bench = Bench {
            missing: true,
            ..Default::default()
        };

        let err = disable(&bench, &com3(), &NO_SETTLE).unwrap_err();

        assert!(
            matches!(err, Error::Connect { ref path, .. } if path == "COM3")
        );
        assert!(bench.payloads.borrow().is_empty());
        assert!(!bench.closed.get());
    }

    #[test]
    fn write_failure_closes_port() {
        let bench = Bench {
            fail_at: Some((4, io::ErrorKind::BrokenPipe)),
            ..Default::default()
        };

        let err = disable(&bench, &com3(), &NO_SETTLE).unwrap_err();

        assert!(matches!(
            err,
            Error::Write {
                command: Command::OutputOff(ms5351_msgs::Output::Clk1),
                ..
            }
        ));
        assert_eq!(bench.payloads.borrow().len(), 4);
        assert!(bench.closed.get());
    }

    #[test]
    fn write_timeout_closes_port() {
        let bench = Bench {
            fail_at: Some((0, io::ErrorKind::TimedOut)),
            ..Default::default()
        };

        let err = disable(&bench, &com3(), &NO_SETTLE).unwrap_err();

        assert!(matches!(
            err,
            Error::Timeout {
                command: Command::Cancel
            }
        ));
        assert!(bench.closed.get());
    }

    #[test]
    fn disable_waits_for_settle() {
        let bench = Bench::default();
        let settle = Settle {
            open: Duration::from_millis(30),
            drain: Duration::from_millis(30),
        };

        let start = Instant::now();
        disable(&bench, &com3(), &settle).expect("disable");

        assert!(start.elapsed() >= settle.total());
    }

    #[test]
    fn flush_failure_closes_port() {
        let bench = Bench {
            fail_flush: true,
            ..Default::default()
        };

        let err = disable(&bench, &com3(), &NO_SETTLE).unwrap_err();

        assert!(matches!(err, Error::Flush(_)));
        assert_eq!(bench.payloads.borrow().len(), DISABLE_SEQUENCE.len());
        assert!(bench.closed.get());
    }

    #[test]
    fn serial_connector_runs_at_console_rate() {
        assert_eq!(BAUD_RATE, 115_200);

        let connector = SerialConnector::default();
        assert_eq!(connector.baud, BAUD_RATE);
        assert_eq!(connector.timeout, WRITE_TIMEOUT);
    }

    #[test]
    fn default_settle_is_one_second() {
        assert_eq!(Settle::default().total(), Duration::from_millis(1000));
    }
}
