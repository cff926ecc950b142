// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use kanal::{AsyncReceiver, Sender};
use radargrid::{
    grid::{GridConfig, RescaledPoint, SharedGrid},
    pipeline::{configure_grid, Event},
    provision::{self, Timing},
    uart::{SerialSource, Worker, WorkerConfig},
};
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    args.tracy.then(tracy_client::Client::start);

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(args.rust_log)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    match (&args.config_port, &args.config_file) {
        (Some(port), Some(script)) => {
            let port = port.clone();
            let script = script.clone();
            let baud = args.config_baud;
            let exchanges = tokio::task::spawn_blocking(move || {
                provision::send_config(&port, baud, &script, &Timing::default())
            })
            .await?;
            match exchanges {
                Ok(exchanges) => info!("sent {} configuration commands", exchanges.len()),
                Err(err) => error!("error sending config: {}", err),
            }
        }
        (None, Some(_)) => warn!("--config-file given without --config-port, skipping"),
        _ => (),
    }

    let grid = SharedGrid::new();
    let (tx, rx) = kanal::unbounded();

    if let Err(err) = configure_grid(&grid, &args.grid_config()?, &tx) {
        error!("grid rejected: {}", err);
    }

    let source = SerialSource::open(&args.data_port, args.data_baud)?;
    let mut worker = Worker::spawn(source, grid.clone(), tx.clone(), WorkerConfig::from(&args))?;
    info!("reading radar data from {}", args.data_port);

    if args.grid_stdin {
        tokio::spawn(grid_requests(grid, tx));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
        _ = consume(rx.to_async()) => (),
    }

    if !worker.stop(args.stop_grace()) {
        warn!("exiting with the uart worker still running");
    }

    Ok(())
}

/// Reads JSON grid requests from stdin, one per line, replacing the active
/// grid while the worker runs.
async fn grid_requests(grid: SharedGrid, tx: Sender<Event>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => (),
            Ok(Some(line)) => match serde_json::from_str::<GridConfig>(&line) {
                Ok(config) => {
                    if let Err(err) = configure_grid(&grid, &config, &tx) {
                        error!("grid rejected: {}", err);
                    }
                }
                Err(err) => error!("invalid grid request: {}", err),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("stdin read error: {}", err);
                break;
            }
        }
    }
}

/// Prints each batch of points as one JSON line on stdout until the worker
/// stops.
async fn consume(rx: AsyncReceiver<Event>) {
    while let Ok(event) = rx.recv().await {
        match event {
            Event::Grid(geometry, cells) => info!(
                "grid ready: {} x {} cells ({} values)",
                geometry.nx,
                geometry.ny,
                cells.len()
            ),
            Event::Points(points) => print_points(&points),
            Event::Stopped(None) => break,
            Event::Stopped(Some(err)) => {
                error!("radar data stopped: {}", err);
                break;
            }
        }
    }
}

fn print_points(points: &[RescaledPoint]) {
    match serde_json::to_string(points) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", line) {
                warn!("stdout write error: {:?}", e);
            }
        }
        Err(e) => error!("points serialization error: {:?}", e),
    }
}
