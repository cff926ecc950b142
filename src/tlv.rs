// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::frame::{DecodeError, Frame};
use std::fmt;
use tracing::{instrument, trace, warn};

/// TLV record types sent by the people tracking firmware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TlvType {
    /// List of tracked targets, decoded.
    TrackList,
    /// Point to target association, skipped.
    TargetIndex,
    /// Height estimate per target, skipped.
    TrackHeight,
    /// Compressed point cloud, skipped.
    CompressedPointCloud,
    /// Presence detection flag, skipped.
    PresenceIndication,
    /// Any other type value, skipped.
    Unknown(u32),
}

#[allow(missing_docs)]
impl TlvType {
    pub const TRACK_LIST: u32 = 1010;
    pub const TARGET_INDEX: u32 = 1011;
    pub const TRACK_HEIGHT: u32 = 1012;
    pub const COMPRESSED_POINT_CLOUD: u32 = 1020;
    pub const PRESENCE_INDICATION: u32 = 1021;
}

impl From<u32> for TlvType {
    fn from(value: u32) -> Self {
        match value {
            TlvType::TRACK_LIST => TlvType::TrackList,
            TlvType::TARGET_INDEX => TlvType::TargetIndex,
            TlvType::TRACK_HEIGHT => TlvType::TrackHeight,
            TlvType::COMPRESSED_POINT_CLOUD => TlvType::CompressedPointCloud,
            TlvType::PRESENCE_INDICATION => TlvType::PresenceIndication,
            other => TlvType::Unknown(other),
        }
    }
}

impl fmt::Display for TlvType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TlvType::TrackList => write!(f, "track list"),
            TlvType::TargetIndex => write!(f, "target index"),
            TlvType::TrackHeight => write!(f, "track height"),
            TlvType::CompressedPointCloud => write!(f, "compressed point cloud"),
            TlvType::PresenceIndication => write!(f, "presence indication"),
            TlvType::Unknown(value) => write!(f, "unknown ({})", value),
        }
    }
}

/// Type and length preceding every TLV payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlvHeader {
    /// Raw type value, see [`TlvType`].
    pub tlv_type: u32,
    /// Payload length, excluding this header.
    pub length: u32,
}

impl TlvHeader {
    /// Length of the TLV header in bytes/octets.
    pub const LEN: usize = 8;
}

/// A slice containing a TLV header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TlvHeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> TlvHeaderSlice<'a> {
    /// Wraps a slice holding at least a complete TLV header.
    pub fn from_slice(slice: &'a [u8]) -> Option<TlvHeaderSlice<'a>> {
        if slice.len() < TlvHeader::LEN {
            return None;
        }

        Some(TlvHeaderSlice { slice })
    }

    /// Decodes both header fields.
    pub fn to_header(&self) -> TlvHeader {
        TlvHeader {
            tlv_type: self.tlv_type(),
            length: self.length(),
        }
    }

    /// Returns the raw type value.
    #[inline]
    pub fn tlv_type(&self) -> u32 {
        u32::from_le_bytes([self.slice[0], self.slice[1], self.slice[2], self.slice[3]])
    }

    /// Returns the payload length.
    #[inline]
    pub fn length(&self) -> u32 {
        u32::from_le_bytes([self.slice[4], self.slice[5], self.slice[6], self.slice[7]])
    }
}

/// One TLV record borrowed from a frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tlv<'a> {
    /// Record type.
    pub tlv_type: TlvType,
    /// Record payload, without the TLV header.
    pub payload: &'a [u8],
}

/// Walks the declared number of TLV records of a frame payload.  The first
/// malformed record is yielded as an error and ends the iteration.
pub struct TlvIter<'a> {
    payload: &'a [u8],
    offset: usize,
    index: u32,
    count: u32,
}

impl<'a> TlvIter<'a> {
    /// Iterates `count` records from the start of `payload`.
    pub fn new(payload: &'a [u8], count: u32) -> TlvIter<'a> {
        TlvIter {
            payload,
            offset: 0,
            index: 0,
            count,
        }
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = Result<Tlv<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }

        let index = self.index;
        let remaining = self.payload.len() - self.offset;

        let header = match TlvHeaderSlice::from_slice(&self.payload[self.offset..]) {
            Some(header) => header,
            None => {
                self.index = self.count;
                return Some(Err(DecodeError::MalformedTlv {
                    index,
                    length: TlvHeader::LEN as u32,
                    remaining,
                }));
            }
        };

        let length = header.length();
        let begin = self.offset + TlvHeader::LEN;
        if length as usize > self.payload.len() - begin {
            self.index = self.count;
            return Some(Err(DecodeError::MalformedTlv {
                index,
                length,
                remaining,
            }));
        }

        let end = begin + length as usize;
        self.offset = end;
        self.index += 1;

        Some(Ok(Tlv {
            tlv_type: TlvType::from(header.tlv_type()),
            payload: &self.payload[begin..end],
        }))
    }
}

/// A tracked target as reported in the track list TLV.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct Track {
    /// Target identifier, stable across frames.
    pub id: u32,
    /// Position in meters.
    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32,
    /// Velocity in meters per second.
    pub vel_x: f32,
    pub vel_y: f32,
    pub vel_z: f32,
    /// Acceleration in meters per second squared.
    pub acc_x: f32,
    pub acc_y: f32,
    pub acc_z: f32,
    pub gating_gain: f32,
    /// Tracker confidence, nominally between 0 and 1.
    pub confidence: f32,
}

impl Track {
    /// Length of one track record in bytes/octets: one u32 and 27 f32.
    pub const LEN: usize = 112;
}

/// A slice containing one track record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrackSlice<'a> {
    slice: &'a [u8],
}

impl<'a> TrackSlice<'a> {
    /// Wraps a slice holding at least one complete record.
    pub fn from_slice(slice: &'a [u8]) -> Option<TrackSlice<'a>> {
        if slice.len() < Track::LEN {
            return None;
        }

        Some(TrackSlice { slice })
    }

    /// Decodes the consumed fields, the error covariance and the remaining
    /// fields are skipped.
    pub fn to_track(&self) -> Track {
        Track {
            id: u32::from_le_bytes([self.slice[0], self.slice[1], self.slice[2], self.slice[3]]),
            pos_x: self.field(1),
            pos_y: self.field(2),
            pos_z: self.field(3),
            vel_x: self.field(4),
            vel_y: self.field(5),
            vel_z: self.field(6),
            acc_x: self.field(7),
            acc_y: self.field(8),
            acc_z: self.field(9),
            gating_gain: self.field(26),
            confidence: self.field(27),
        }
    }

    #[inline]
    fn field(&self, index: usize) -> f32 {
        let offset = index * 4;
        f32::from_le_bytes([
            self.slice[offset],
            self.slice[offset + 1],
            self.slice[offset + 2],
            self.slice[offset + 3],
        ])
    }
}

/// Result of decoding a track list payload.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackList {
    /// Decoded records in payload order.
    pub tracks: Vec<Track>,
    /// Number of records announced by the declared length.
    pub expected: usize,
    /// Declared payload length.
    pub length: usize,
}

impl TrackList {
    /// Reports truncated or oddly sized payloads.  Neither prevents the
    /// decoded tracks from being used.
    pub fn check(&self) -> Result<(), DecodeError> {
        if self.tracks.len() < self.expected {
            return Err(DecodeError::TruncatedTrackPayload(
                self.tracks.len(),
                self.expected,
            ));
        }

        if self.length % Track::LEN != 0 {
            return Err(DecodeError::MalformedTrackPayload(self.length));
        }

        Ok(())
    }
}

/// Decodes `length / Track::LEN` records from the payload.  A trailing
/// partial record is ignored and decoding stops at the first record that the
/// payload cannot hold.
pub fn read_tracks(payload: &[u8], length: usize) -> TrackList {
    let expected = length / Track::LEN;
    let tracks = payload
        .chunks(Track::LEN)
        .take(expected)
        .map_while(TrackSlice::from_slice)
        .map(|track| track.to_track())
        .collect();

    TrackList {
        tracks,
        expected,
        length,
    }
}

/// Walks the TLV records of a frame in order and hands every decoded track
/// list to `on_tracks`.  Returns the number of TLV records processed; a
/// malformed record aborts the rest of the frame.
#[instrument(skip_all, level = "trace", fields(frame = frame.header.frame_number))]
pub fn read_frame<F>(frame: &Frame, mut on_tracks: F) -> Result<u32, DecodeError>
where
    F: FnMut(Vec<Track>),
{
    let mut processed = 0;

    for tlv in TlvIter::new(frame.payload(), frame.header.num_tlvs) {
        let tlv = tlv?;
        processed += 1;

        match tlv.tlv_type {
            TlvType::TrackList => {
                let list = read_tracks(tlv.payload, tlv.payload.len());
                if let Err(err) = list.check() {
                    warn!("frame {}: {}", frame.header.frame_number, err);
                }
                if !list.tracks.is_empty() {
                    on_tracks(list.tracks);
                }
            }
            other => trace!("skipping {} tlv of {} bytes", other, tlv.payload.len()),
        }
    }

    Ok(processed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::tests::{build_frame, build_header};

    pub(crate) fn build_track(id: u32, x: f32, y: f32, confidence: f32) -> Vec<u8> {
        let mut fields = [0f32; 27];
        fields[0] = x;
        fields[1] = y;
        fields[2] = 1.5;
        fields[3] = -0.25;
        fields[4] = 2.0;
        fields[25] = 3.0;
        fields[26] = confidence;

        let mut record = id.to_le_bytes().to_vec();
        for field in fields {
            record.extend_from_slice(&field.to_le_bytes());
        }
        record
    }

    fn frame(data: Vec<u8>) -> Frame {
        Frame::from_bytes(data).unwrap()
    }

    #[test]
    fn test_tlv_type() {
        assert_eq!(TlvType::from(1010), TlvType::TrackList);
        assert_eq!(TlvType::from(1021), TlvType::PresenceIndication);
        assert_eq!(TlvType::from(7), TlvType::Unknown(7));
    }

    #[test]
    fn test_parse_track() {
        let record = build_track(7, 3.0, 50.0, 0.9);
        assert_eq!(record.len(), Track::LEN);

        let track = TrackSlice::from_slice(&record).unwrap().to_track();
        assert_eq!(
            track,
            Track {
                id: 7,
                pos_x: 3.0,
                pos_y: 50.0,
                pos_z: 1.5,
                vel_x: -0.25,
                vel_y: 2.0,
                vel_z: 0.0,
                acc_x: 0.0,
                acc_y: 0.0,
                acc_z: 0.0,
                gating_gain: 3.0,
                confidence: 0.9,
            }
        );
    }

    #[test]
    fn test_read_tracks() {
        let payload = [build_track(1, 1.0, 2.0, 0.7), build_track(2, -1.0, 4.0, 0.2)].concat();
        let list = read_tracks(&payload, payload.len());

        assert_eq!(list.expected, 2);
        assert_eq!(list.tracks.len(), 2);
        assert_eq!(list.tracks[0].id, 1);
        assert_eq!(list.tracks[1].id, 2);
        assert!(list.check().is_ok());
    }

    #[test]
    fn test_odd_track_length() {
        let mut payload = build_track(3, 0.0, 0.0, 1.0);
        payload.extend_from_slice(&[0; 20]);
        let list = read_tracks(&payload, payload.len());

        assert_eq!(list.tracks.len(), 1);
        match list.check() {
            Err(DecodeError::MalformedTrackPayload(132)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_truncated_tracks() {
        let payload = [build_track(1, 1.0, 2.0, 0.7), build_track(2, 1.0, 2.0, 0.7)].concat();
        let list = read_tracks(&payload[..150], 224);

        assert_eq!(list.tracks.len(), 1);
        match list.check() {
            Err(DecodeError::TruncatedTrackPayload(1, 2)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tlvs_skipped() {
        let data = build_frame(
            1,
            &[
                (1020, vec![0xEE; 40]),
                (4242, vec![0x01; 3]),
                (1010, build_track(5, 0.5, 9.0, 0.8)),
                (1021, vec![1, 0, 0, 0]),
            ],
        );

        let mut batches = Vec::new();
        let processed = read_frame(&frame(data), |tracks| batches.push(tracks)).unwrap();

        assert_eq!(processed, 4);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].id, 5);
    }

    #[test]
    fn test_tlv_overrun() {
        // Track list followed by a record claiming more bytes than the frame has.
        let track = build_track(5, 0.5, 9.0, 0.8);
        let mut body = Vec::new();
        body.extend_from_slice(&1010u32.to_le_bytes());
        body.extend_from_slice(&(track.len() as u32).to_le_bytes());
        body.extend_from_slice(&track);
        body.extend_from_slice(&1010u32.to_le_bytes());
        body.extend_from_slice(&500u32.to_le_bytes());
        body.extend_from_slice(&[0; 16]);

        let mut data = build_header(40 + body.len() as u32, 2, 3);
        data.extend_from_slice(&body);

        let mut batches = Vec::new();
        let result = read_frame(&frame(data), |tracks| batches.push(tracks));

        match result {
            Err(DecodeError::MalformedTlv {
                index: 1,
                length: 500,
                remaining: 24,
            }) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_missing_tlv_header() {
        let data = build_frame(3, &[(1011, vec![0; 4])]);
        let mut data = data;
        // Announce one more record than the frame holds.
        data[32..36].copy_from_slice(&2u32.to_le_bytes());

        match read_frame(&frame(data), |_| ()) {
            Err(DecodeError::MalformedTlv {
                index: 1,
                length: 8,
                remaining: 0,
            }) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_empty_track_list() {
        let data = build_frame(4, &[(1010, vec![])]);
        let mut calls = 0;
        assert_eq!(read_frame(&frame(data), |_| calls += 1).unwrap(), 1);
        assert_eq!(calls, 0);
    }
}
