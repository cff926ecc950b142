// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use log::error;
use radargrid::provision::{parse_script, send_commands, Timing, CONFIG_BAUD};
use std::{fs, path::PathBuf, process::ExitCode, thread, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Radar command port to use
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    device: String,

    /// Command port baud rate
    #[arg(short, long, default_value_t = CONFIG_BAUD)]
    baud: u32,

    /// Only print the commands the script would send.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Delay after each command in milliseconds
    #[arg(long, default_value = "100")]
    command_delay: u64,

    /// Configuration script to send
    #[arg()]
    script: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let script = match fs::read_to_string(&args.script) {
        Ok(script) => script,
        Err(err) => {
            error!("unable to read {}: {}", args.script.display(), err);
            return ExitCode::FAILURE;
        }
    };
    let commands = parse_script(&script);

    if args.dry_run {
        for command in commands {
            println!("{}", command);
        }
        return ExitCode::SUCCESS;
    }

    let timing = Timing {
        command_delay: Duration::from_millis(args.command_delay),
        ..Default::default()
    };

    let mut port = match serialport::new(&args.device, args.baud)
        .timeout(Duration::from_secs(1))
        .open()
    {
        Ok(port) => port,
        Err(err) => {
            error!("unable to open {}: {}", args.device, err);
            return ExitCode::FAILURE;
        }
    };
    thread::sleep(timing.settle);

    match send_commands(&mut port, &commands, &timing) {
        Ok(exchanges) => {
            for exchange in exchanges {
                println!("{} => {}", exchange.command, exchange.response);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("configuration failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
