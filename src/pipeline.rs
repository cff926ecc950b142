// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    frame::{DecodeError, Frame},
    grid::{self, map_tracks, GridConfig, GridGeometry, RescaledPoint, SharedGrid},
    tlv, uart,
};
use kanal::Sender;
use ndarray::Array2;
use tracing::{debug, instrument, warn};

/// Notifications delivered to the consumer, in the order they were produced.
#[derive(Debug)]
pub enum Event {
    /// A grid was accepted, carrying its geometry and the zeroed cells.
    Grid(GridGeometry, Array2<f32>),
    /// Targets of one frame which survived the confidence filter.
    Points(Vec<RescaledPoint>),
    /// The worker exited, with the transport failure which caused it if any.
    Stopped(Option<uart::Error>),
}

/// Outcome of processing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSummary {
    /// Frame number from the header.
    pub frame_number: u32,
    /// TLV records walked before the end of the frame or the first error.
    pub tlvs: u32,
    /// Tracks decoded from all track list records.
    pub tracks: usize,
    /// Points sent to the consumer.
    pub points: usize,
    /// The TLV error which ended processing, if any.
    pub error: Option<String>,
}

/// Activates a grid request and notifies the consumer with the new grid.
///
/// Exactly one [`Event::Grid`] is sent for an accepted request.  A rejected
/// request sends nothing and leaves the active geometry in place.  Frames
/// decoded after this returns are mapped with the new geometry.
pub fn configure_grid(
    grid: &SharedGrid,
    config: &GridConfig,
    tx: &Sender<Event>,
) -> Result<GridGeometry, grid::Error> {
    let (geometry, cells) = grid.configure(config)?;
    if let Err(e) = tx.send(Event::Grid(geometry, cells)) {
        debug!("grid receiver closed: {:?}", e);
    }
    Ok(geometry)
}

/// Decodes one frame, maps its tracks onto the grid and forwards the points.
///
/// TLV errors are logged and end processing of this frame only.  At most one
/// batch of points is sent per frame, and none when no target is confident.
#[instrument(skip_all, fields(frame = frame.header.frame_number))]
pub fn process_frame(
    frame: &Frame,
    geometry: Option<&GridGeometry>,
    tx: &Sender<Event>,
) -> FrameSummary {
    let mut summary = FrameSummary {
        frame_number: frame.header.frame_number,
        ..Default::default()
    };

    let mut points = Vec::new();
    let result = tlv::read_frame(frame, |tracks| {
        summary.tracks += tracks.len();
        points.extend(map_tracks(geometry, &tracks));
    });

    match result {
        Ok(tlvs) => summary.tlvs = tlvs,
        Err(err) => {
            if let DecodeError::MalformedTlv { index, .. } = err {
                summary.tlvs = index;
            }
            warn!("frame {}: {}", frame.header.frame_number, err);
            summary.error = Some(err.to_string());
        }
    }

    // Points decoded ahead of a malformed TLV are still delivered.
    if !points.is_empty() {
        summary.points = points.len();
        if let Err(e) = tx.send(Event::Points(points)) {
            debug!("points receiver closed: {:?}", e);
        }
    }

    debug!(
        "frame {} tlvs={} tracks={} points={}",
        summary.frame_number, summary.tlvs, summary.tracks, summary.points
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::tests::build_frame, grid::GridConfig, tlv::tests::build_track};

    #[test]
    fn test_configure_grid_event() {
        let grid = SharedGrid::new();
        let (tx, rx) = kanal::unbounded();

        let config = GridConfig {
            x_min: 0.0,
            x_max: 10.0,
            y_min: 0.0,
            y_max: 3.0,
            dx: 2.5,
            dy: 1.0,
        };
        let geometry = configure_grid(&grid, &config, &tx).unwrap();
        assert_eq!((geometry.nx, geometry.ny), (4, 3));

        match rx.try_recv().unwrap() {
            Some(Event::Grid(active, cells)) => {
                assert_eq!(active, geometry);
                assert_eq!(cells.shape(), &[3, 4]);
                assert!(cells.iter().all(|cell| *cell == 0.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.is_empty());

        let bad = GridConfig { dy: 0.0, ..config };
        assert_eq!(
            configure_grid(&grid, &bad, &tx),
            Err(grid::Error::InvalidCellSize("dy", 0.0))
        );
        assert!(rx.is_empty());
        assert_eq!(*grid.snapshot().unwrap(), geometry);
    }

    #[test]
    fn test_end_to_end() {
        let geometry = GridConfig::default().validate().unwrap();
        let frame = Frame::from_bytes(build_frame(
            100,
            &[(1010, build_track(7, 3.0, 50.0, 0.9))],
        ))
        .unwrap();
        let (tx, rx) = kanal::unbounded();

        let summary = process_frame(&frame, Some(&geometry), &tx);
        assert_eq!(
            summary,
            FrameSummary {
                frame_number: 100,
                tlvs: 1,
                tracks: 1,
                points: 1,
                error: None,
            }
        );

        match rx.try_recv().unwrap() {
            Some(Event::Points(points)) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].target_id, 7);
                assert!((points[0].grid_x - 14.375).abs() < 1e-6);
                assert!((points[0].grid_y - 9.5833).abs() < 1e-3);
                assert_eq!((points[0].real_x, points[0].real_y), (3.0, 50.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_no_points_no_event() {
        let geometry = GridConfig::default().validate().unwrap();
        let frame = Frame::from_bytes(build_frame(
            1,
            &[(1010, build_track(1, 0.0, 10.0, 0.1))],
        ))
        .unwrap();
        let (tx, rx) = kanal::unbounded();

        let summary = process_frame(&frame, Some(&geometry), &tx);
        assert_eq!(summary.tracks, 1);
        assert_eq!(summary.points, 0);

        let summary = process_frame(&frame, None, &tx);
        assert_eq!(summary.points, 0);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_one_batch_per_frame() {
        let geometry = GridConfig::default().validate().unwrap();
        let frame = Frame::from_bytes(build_frame(
            2,
            &[
                (1010, build_track(1, 0.0, 10.0, 0.9)),
                (1011, vec![1, 1]),
                (
                    1010,
                    [build_track(2, 1.0, 10.0, 0.9), build_track(3, 2.0, 10.0, 0.9)].concat(),
                ),
            ],
        ))
        .unwrap();
        let (tx, rx) = kanal::unbounded();

        let summary = process_frame(&frame, Some(&geometry), &tx);
        assert_eq!((summary.tlvs, summary.tracks, summary.points), (3, 3, 3));

        let mut ids = Vec::new();
        while let Ok(Some(Event::Points(points))) = rx.try_recv() {
            ids.push(points.iter().map(|p| p.target_id).collect::<Vec<_>>());
        }
        assert_eq!(ids, vec![vec![1, 2, 3]]);
    }
}
