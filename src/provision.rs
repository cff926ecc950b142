// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Radar provisioning over the command UART.
//!
//! A configuration script holds one CLI command per line.  Blank lines and
//! lines starting with `%` are comments.  Each command is written newline
//! terminated and whatever the radar answers is read back and logged.

use log::{debug, info};
use std::{fmt, fs, io, path::Path, thread, time::Duration};

/// Default baud rate of the radar command port.
pub const CONFIG_BAUD: u32 = 115200;

/// Command port errors.
#[derive(Debug)]
pub enum Error {
    /// Reading the script or talking to the port failed.
    Io(io::Error),
    /// The serial port could not be opened or queried.
    #[cfg(feature = "serial")]
    Serial(serialport::Error),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Error {
        Error::Serial(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            #[cfg(feature = "serial")]
            Error::Serial(err) => write!(f, "serial error: {}", err),
        }
    }
}

/// Delays used while talking to the command port.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Wait after opening the port and after the last command.
    pub settle: Duration,
    /// Wait after writing each command.
    pub command_delay: Duration,
    /// Additional wait before collecting the response.
    pub response_wait: Duration,
    /// Wait between response chunks.
    pub chunk_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle: Duration::from_millis(500),
            command_delay: Duration::from_millis(100),
            response_wait: Duration::from_millis(50),
            chunk_delay: Duration::from_millis(10),
        }
    }
}

impl Timing {
    /// No delays at all, for ports which answer synchronously.
    pub fn immediate() -> Timing {
        Timing {
            settle: Duration::ZERO,
            command_delay: Duration::ZERO,
            response_wait: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }
}

/// A command port which can report the bytes waiting to be read.
pub trait CommandPort: io::Write {
    /// Returns the response bytes received so far, empty when none are
    /// waiting.
    fn read_available(&mut self) -> Result<Vec<u8>, Error>;
}

#[cfg(feature = "serial")]
impl CommandPort for Box<dyn serialport::SerialPort> {
    fn read_available(&mut self) -> Result<Vec<u8>, Error> {
        let waiting = self.bytes_to_read()? as usize;
        let mut buf = vec![0; waiting];
        if waiting > 0 {
            let n = io::Read::read(self, &mut buf)?;
            buf.truncate(n);
        }
        Ok(buf)
    }
}

/// A command and the radar's answer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// The command line as sent, without line ending.
    pub command: String,
    /// Everything the radar sent back before the next command.
    pub response: String,
}

/// Extracts the commands of a configuration script.
pub fn parse_script(script: &str) -> Vec<String> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('%'))
        .map(String::from)
        .collect()
}

/// Writes each command to the port and collects the responses.
pub fn send_commands<P: CommandPort>(
    port: &mut P,
    commands: &[String],
    timing: &Timing,
) -> Result<Vec<Exchange>, Error> {
    let mut exchanges = Vec::with_capacity(commands.len());

    for command in commands {
        info!("SEND: {}", command);
        port.write_all(format!("{}\n", command).as_bytes())?;
        port.flush()?;
        thread::sleep(timing.command_delay);
        thread::sleep(timing.response_wait);

        let mut response = Vec::new();
        loop {
            let chunk = port.read_available()?;
            if chunk.is_empty() {
                break;
            }
            response.extend_from_slice(&chunk);
            thread::sleep(timing.chunk_delay);
        }

        let response = String::from_utf8_lossy(&response).trim().to_string();
        if !response.is_empty() {
            info!("RESP: {}", response);
        }

        exchanges.push(Exchange {
            command: command.clone(),
            response,
        });
    }

    Ok(exchanges)
}

/// Opens the command port and sends the configuration script to the radar.
#[cfg(feature = "serial")]
pub fn send_config(
    port: &str,
    baud_rate: u32,
    script: &Path,
    timing: &Timing,
) -> Result<Vec<Exchange>, Error> {
    debug!("opening config port {} at {} baud", port, baud_rate);
    let mut port = serialport::new(port, baud_rate)
        .timeout(Duration::from_secs(1))
        .open()?;
    thread::sleep(timing.settle);

    let exchanges = send_script(&mut port, script, timing)?;

    info!("configuration sent, waiting before reading data");
    thread::sleep(timing.settle);
    Ok(exchanges)
}

/// Reads a configuration script and sends it over an already open port.
pub fn send_script<P: CommandPort>(
    port: &mut P,
    script: &Path,
    timing: &Timing,
) -> Result<Vec<Exchange>, Error> {
    debug!("reading config from {}", script.display());
    let commands = parse_script(&fs::read_to_string(script)?);
    send_commands(port, &commands, timing)
}
