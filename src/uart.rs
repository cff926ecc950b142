// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    frame::{FrameReader, MAX_FRAME_LEN},
    grid::SharedGrid,
    pipeline::{process_frame, Event},
};
use kanal::Sender;
use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};
use tracy_client::{frame_mark, plot};

/// Size of the scratch buffer handed to the byte source on each poll.
const READ_BUF_LEN: usize = 4096;

/// Transport failures which end the worker.
#[derive(Debug)]
pub enum Error {
    /// Read error on the data port.
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

/// Supplier of raw bytes from the radar data port.
pub trait ByteSource: Send {
    /// Copies the bytes which have arrived into `buf` and returns how many
    /// were copied, possibly zero.  An error means the source is unusable.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

/// The radar UART data port.
#[cfg(feature = "serial")]
pub struct SerialSource {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialSource {
    /// Opens the data port at the given baud rate.
    pub fn open(path: &str, baud_rate: u32) -> Result<SerialSource, Error> {
        debug!("opening data port {} at {} baud", path, baud_rate);
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_secs(2))
            .open()?;
        Ok(SerialSource { port })
    }
}

#[cfg(feature = "serial")]
impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        use std::io::Read;

        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(0);
        }

        let len = waiting.min(buf.len());
        match self.port.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

/// Settings of the UART worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Idle backoff when no bytes and no frames were available.
    pub poll_interval: Duration,
    /// Largest frame length accepted by the synchronizer.
    pub max_frame_len: usize,
    /// Emit Tracy frame marks and plots, requires a running Tracy client.
    pub tracy: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            max_frame_len: MAX_FRAME_LEN,
            tracy: false,
        }
    }
}

/// Background thread reading the data port and decoding frames.
///
/// The worker owns the byte source for its whole life and drops it before
/// sending the final [`Event::Stopped`] notification.
pub struct Worker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts the worker thread.  Frames are mapped with whatever geometry
    /// `grid` holds when they are decoded.
    pub fn spawn<S>(
        source: S,
        grid: SharedGrid,
        tx: Sender<Event>,
        config: WorkerConfig,
    ) -> Result<Worker, Error>
    where
        S: ByteSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("uart".to_string())
            .spawn(move || read_loop(source, grid, tx, config, flag))?;

        Ok(Worker {
            running,
            handle: Some(handle),
        })
    }

    /// Returns true while the worker thread has not exited.
    pub fn is_running(&self) -> bool {
        match &self.handle {
            Some(handle) => !handle.is_finished(),
            None => false,
        }
    }

    /// Requests the worker to stop and waits up to `grace` for it to exit.
    /// Returns false if the worker was still running when the grace period
    /// ran out, in which case it is left to finish on its own.
    pub fn stop(&mut self, grace: Duration) -> bool {
        self.running.store(false, Ordering::Release);

        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return true,
        };

        let deadline = Instant::now() + grace;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if !handle.is_finished() {
            warn!("uart worker still running after {:?}", grace);
            return false;
        }

        if handle.join().is_err() {
            error!("uart worker panicked");
        }
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

fn read_loop<S: ByteSource>(
    mut source: S,
    grid: SharedGrid,
    tx: Sender<Event>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
) {
    let mut reader = FrameReader::new(config.max_frame_len);
    let mut buf = vec![0u8; READ_BUF_LEN];
    info!("uart worker started");

    let result = loop {
        if !running.load(Ordering::Acquire) {
            break Ok(());
        }

        let received = match source.read_available(&mut buf) {
            Ok(received) => received,
            Err(err) => break Err(err),
        };
        reader.push(&buf[..received]);

        let mut decoded = 0;
        while let Some(frame) = reader.next_frame() {
            let geometry = grid.snapshot();
            let summary = process_frame(&frame, geometry.as_deref(), &tx);
            decoded += 1;

            if config.tracy {
                plot!("points", summary.points as f64);
                frame_mark();
            }
        }

        if received == 0 && decoded == 0 {
            thread::sleep(config.poll_interval);
        }
    };

    drop(source);

    let stats = reader.stats();
    info!(
        "uart worker exiting: frames={} resyncs={} discarded={}",
        stats.frames, stats.resyncs, stats.discarded
    );

    let error = match result {
        Ok(()) => None,
        Err(err) => {
            error!("uart transport failure: {}", err);
            Some(err)
        }
    };

    if let Err(e) = tx.send(Event::Stopped(error)) {
        debug!("event receiver closed: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::tests::build_frame, grid::GridConfig, pipeline::configure_grid,
        tlv::tests::build_track,
    };
    use std::collections::VecDeque;

    struct ChunkSource {
        chunks: VecDeque<Vec<u8>>,
        fail: bool,
    }

    impl ChunkSource {
        fn new(chunks: Vec<Vec<u8>>, fail: bool) -> ChunkSource {
            ChunkSource {
                chunks: chunks.into(),
                fail,
            }
        }
    }

    impl ByteSource for ChunkSource {
        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None if self.fail => Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "device unplugged",
                ))),
                None => Ok(0),
            }
        }
    }

    /// Bytes written by the test as it goes, closing the channel unplugs it.
    struct LiveSource {
        rx: kanal::Receiver<Vec<u8>>,
    }

    impl ByteSource for LiveSource {
        fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            match self.rx.try_recv() {
                Ok(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Ok(None) => Ok(0),
                Err(_) => Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "device unplugged",
                ))),
            }
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_failure() {
        let first = build_frame(1, &[(1010, build_track(10, 0.0, 10.0, 0.9))]);
        let second = build_frame(2, &[(1010, build_track(20, 1.0, 20.0, 0.9))]);
        let third = build_frame(3, &[(1010, build_track(30, 2.0, 30.0, 0.9))]);

        // First frame split across reads, the other two in a single burst.
        let chunks = vec![
            vec![0xFF; 13],
            first[..50].to_vec(),
            first[50..].to_vec(),
            [second, third].concat(),
        ];

        let grid = SharedGrid::new();
        grid.configure(&GridConfig::default()).unwrap();
        let (tx, rx) = kanal::unbounded();

        let mut worker =
            Worker::spawn(ChunkSource::new(chunks, true), grid, tx, config()).unwrap();

        let mut ids = Vec::new();
        let mut stopped = None;
        while let Ok(event) = rx.recv() {
            match event {
                Event::Points(points) => ids.push(points[0].target_id),
                Event::Stopped(err) => stopped = Some(err),
                Event::Grid(..) => panic!("unexpected grid event"),
            }
        }

        assert_eq!(ids, vec![10, 20, 30]);
        match stopped {
            Some(Some(Error::Io(err))) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected stop {:?}", other),
        }
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(!worker.is_running());
    }

    #[test]
    fn test_cooperative_stop() {
        let (tx, rx) = kanal::unbounded();
        let mut worker = Worker::spawn(
            ChunkSource::new(vec![], false),
            SharedGrid::new(),
            tx,
            config(),
        )
        .unwrap();

        assert!(worker.is_running());
        assert!(worker.stop(Duration::from_secs(2)));
        assert!(!worker.is_running());

        match rx.recv() {
            Ok(Event::Stopped(None)) => (),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_grid_replaced_while_running() {
        let (bytes, rx_bytes) = kanal::unbounded();
        let (tx, rx) = kanal::unbounded();
        let grid = SharedGrid::new();

        let mut worker = Worker::spawn(
            LiveSource { rx: rx_bytes },
            grid.clone(),
            tx.clone(),
            config(),
        )
        .unwrap();

        let wide = GridConfig::default();
        configure_grid(&grid, &wide, &tx).unwrap();
        assert!(matches!(rx.recv(), Ok(Event::Grid(..))));

        let frame = build_frame(1, &[(1010, build_track(5, 3.0, 50.0, 0.9))]);
        bytes.send(frame.clone()).unwrap();
        match rx.recv() {
            Ok(Event::Points(points)) => assert!((points[0].grid_x - 14.375).abs() < 1e-6),
            other => panic!("unexpected event {:?}", other),
        }

        let narrow = GridConfig {
            x_min: 0.0,
            x_max: 4.0,
            ..GridConfig::default()
        };
        configure_grid(&grid, &narrow, &tx).unwrap();
        match rx.recv() {
            Ok(Event::Grid(geometry, cells)) => {
                assert_eq!(geometry.nx, 4);
                assert_eq!(cells.shape(), &[24, 4]);
            }
            other => panic!("unexpected event {:?}", other),
        }

        bytes.send(frame).unwrap();
        match rx.recv() {
            Ok(Event::Points(points)) => assert!((points[0].grid_x - 2.25).abs() < 1e-6),
            other => panic!("unexpected event {:?}", other),
        }

        drop(bytes);
        assert!(matches!(rx.recv(), Ok(Event::Stopped(Some(_)))));
        assert!(worker.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_unconfigured_grid() {
        let frame = build_frame(1, &[(1010, build_track(10, 0.0, 10.0, 0.9))]);
        let (tx, rx) = kanal::unbounded();
        let _worker = Worker::spawn(
            ChunkSource::new(vec![frame], true),
            SharedGrid::new(),
            tx,
            config(),
        )
        .unwrap();

        // No points are produced before a grid is configured.
        match rx.recv() {
            Ok(Event::Stopped(Some(_))) => (),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
