// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{fmt, fs, io, path::PathBuf, time::Duration};

use clap::Parser;
use radargrid::{grid::GridConfig, provision::CONFIG_BAUD, uart::WorkerConfig};
use tracing::level_filters::LevelFilter;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Json(serde_json::Error),
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Json(err) => write!(f, "invalid grid file: {}", err),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// radar UART data port
    #[arg(long, env, default_value = "/dev/ttyACM1")]
    pub data_port: String,

    /// data port baud rate
    #[arg(long, env, default_value = "921600")]
    pub data_baud: u32,

    /// radar UART command port, required to send a configuration script
    #[arg(long, env)]
    pub config_port: Option<String>,

    /// command port baud rate
    #[arg(long, env, default_value_t = CONFIG_BAUD)]
    pub config_baud: u32,

    /// radar configuration script sent over the command port at startup
    #[arg(long, env)]
    pub config_file: Option<PathBuf>,

    /// grid left edge in meters
    #[arg(long, env, default_value = "-12", allow_negative_numbers = true)]
    pub x_min: f64,

    /// grid right edge in meters
    #[arg(long, env, default_value = "12", allow_negative_numbers = true)]
    pub x_max: f64,

    /// grid near edge in meters
    #[arg(long, env, default_value = "0", allow_negative_numbers = true)]
    pub y_min: f64,

    /// grid far edge in meters
    #[arg(long, env, default_value = "120", allow_negative_numbers = true)]
    pub y_max: f64,

    /// grid cell width in meters
    #[arg(long, env, default_value = "1")]
    pub dx: f64,

    /// grid cell depth in meters
    #[arg(long, env, default_value = "5")]
    pub dy: f64,

    /// JSON grid request with x_min, x_max, y_min, y_max, dx and dy, replaces
    /// the individual grid arguments
    #[arg(long, env)]
    pub grid_file: Option<PathBuf>,

    /// read further JSON grid requests from stdin, one per line, each
    /// replacing the active grid
    #[arg(long, env)]
    pub grid_stdin: bool,

    /// idle backoff of the UART worker in milliseconds
    #[arg(long, env, default_value = "10")]
    pub poll_ms: u64,

    /// time given to the UART worker to exit on shutdown, in milliseconds
    #[arg(long, env, default_value = "2000")]
    pub stop_grace_ms: u64,

    /// largest frame length accepted from the radar
    #[arg(long, env, default_value = "65536")]
    pub max_frame_len: usize,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Enable Tracy profiler broadcast
    #[arg(long, env)]
    pub tracy: bool,
}

impl Args {
    /// Returns the grid request, read from the grid file when one is given.
    pub fn grid_config(&self) -> Result<GridConfig, Error> {
        match &self.grid_file {
            Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
            None => Ok(GridConfig {
                x_min: self.x_min,
                x_max: self.x_max,
                y_min: self.y_min,
                y_max: self.y_max,
                dx: self.dx,
                dy: self.dy,
            }),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl From<&Args> for WorkerConfig {
    fn from(args: &Args) -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(args.poll_ms),
            max_frame_len: args.max_frame_len,
            tracy: args.tracy,
        }
    }
}
