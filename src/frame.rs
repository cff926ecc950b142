// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::fmt;
use tracing::{debug, trace};

/// Byte pattern which starts every frame on the UART data port.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// Little-endian numeric value of [`MAGIC_WORD`].
pub const MAGIC: u64 = 0x0708050603040102;

/// Amount of unsynchronized data kept while no magic word is in view.
pub const SYNC_WINDOW: usize = 1024;

/// Default upper bound on the declared frame length.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Frame and TLV decoding errors.
#[derive(Debug)]
pub enum DecodeError {
    /// Fewer bytes than a frame header were available.
    MalformedHeader(usize),
    /// The header does not start with the magic word.
    InvalidMagic(u64),
    /// The declared frame length is shorter than the header or too large.
    InvalidPacketLength(u32),
    /// TLV record `index` declares `length` bytes but only `remaining` bytes
    /// of the frame are left.
    MalformedTlv {
        /// Position of the record within the frame.
        index: u32,
        /// Declared payload length, or the header length when the header
        /// itself is cut short.
        length: u32,
        /// Bytes left in the frame from the start of the record.
        remaining: usize,
    },
    /// Track payload length is not a multiple of the record size.
    MalformedTrackPayload(usize),
    /// Fewer track records were decoded than the length announced, as
    /// `(decoded, expected)`.
    TruncatedTrackPayload(usize, usize),
}

impl std::error::Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            DecodeError::MalformedHeader(len) => {
                write!(f, "malformed frame header: {} bytes", len)
            }
            DecodeError::InvalidMagic(magic) => write!(f, "invalid magic: 0x{:016X}", magic),
            DecodeError::InvalidPacketLength(len) => {
                write!(f, "invalid packet length: {}", len)
            }
            DecodeError::MalformedTlv {
                index,
                length,
                remaining,
            } => write!(
                f,
                "malformed tlv {}: length {} with {} bytes remaining",
                index, length, remaining
            ),
            DecodeError::MalformedTrackPayload(len) => {
                write!(f, "track payload length {} is not a whole record count", len)
            }
            DecodeError::TruncatedTrackPayload(decoded, expected) => {
                write!(f, "truncated track payload [{}/{}]", decoded, expected)
            }
        }
    }
}

/// Fixed 40 byte frame header sent ahead of the TLV records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Always [`MAGIC`].
    pub magic: u64,
    /// Firmware SDK version.
    pub version: u32,
    /// Length of the whole frame including this header.
    pub total_packet_len: u32,
    /// Device platform identifier.
    pub platform: u32,
    /// Sequence number assigned by the radar.
    pub frame_number: u32,
    /// CPU cycle counter when the frame was produced.
    pub time_cpu_cycles: u32,
    /// Number of detected points.
    pub num_detected_obj: u32,
    /// Number of TLV records following the header.
    pub num_tlvs: u32,
    /// Sub-frame index for multi sub-frame configurations.
    pub sub_frame_number: u32,
}

impl FrameHeader {
    /// Length of the frame header in bytes/octets.
    pub const LEN: usize = 40;
}

/// A slice containing a frame header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameHeaderSlice<'a> {
    slice: &'a [u8],
}

impl<'a> FrameHeaderSlice<'a> {
    /// Wraps a slice holding at least a complete header.
    pub fn from_slice(slice: &'a [u8]) -> Result<FrameHeaderSlice<'a>, DecodeError> {
        if slice.len() < FrameHeader::LEN {
            return Err(DecodeError::MalformedHeader(slice.len()));
        }

        Ok(FrameHeaderSlice { slice })
    }

    /// Decodes every header field.
    pub fn to_header(&self) -> FrameHeader {
        FrameHeader {
            magic: self.magic(),
            version: self.word(8),
            total_packet_len: self.total_packet_len(),
            platform: self.word(16),
            frame_number: self.frame_number(),
            time_cpu_cycles: self.word(24),
            num_detected_obj: self.word(28),
            num_tlvs: self.num_tlvs(),
            sub_frame_number: self.word(36),
        }
    }

    /// Returns the leading magic word as a number.
    #[inline]
    pub fn magic(&self) -> u64 {
        u64::from_le_bytes([
            self.slice[0],
            self.slice[1],
            self.slice[2],
            self.slice[3],
            self.slice[4],
            self.slice[5],
            self.slice[6],
            self.slice[7],
        ])
    }

    /// Returns the declared length of the complete frame.
    #[inline]
    pub fn total_packet_len(&self) -> u32 {
        self.word(12)
    }

    /// Returns the radar frame sequence number.
    #[inline]
    pub fn frame_number(&self) -> u32 {
        self.word(20)
    }

    /// Returns the number of TLV records following the header.
    #[inline]
    pub fn num_tlvs(&self) -> u32 {
        self.word(32)
    }

    /// Returns the slice following the header.
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.slice[FrameHeader::LEN..]
    }

    #[inline]
    fn word(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.slice[offset],
            self.slice[offset + 1],
            self.slice[offset + 2],
            self.slice[offset + 3],
        ])
    }
}

/// One complete frame recovered from the byte stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The decoded header.
    pub header: FrameHeader,
    /// The raw frame bytes, header included.
    pub data: Vec<u8>,
}

impl Frame {
    /// Decodes the header of a raw frame.  The slice must hold at least the
    /// header but may be shorter than the declared packet length.
    pub fn from_bytes(data: Vec<u8>) -> Result<Frame, DecodeError> {
        let header = FrameHeaderSlice::from_slice(&data)?.to_header();
        Ok(Frame { header, data })
    }

    /// Returns the bytes following the header, bounded by the declared
    /// packet length.
    pub fn payload(&self) -> &[u8] {
        let end = (self.header.total_packet_len as usize).min(self.data.len());
        &self.data[FrameHeader::LEN.min(end)..end]
    }
}

/// Counters kept by the [`FrameReader`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SyncStats {
    /// Complete frames extracted.
    pub frames: u64,
    /// Magic words rejected by header validation.
    pub resyncs: u64,
    /// Bytes dropped while searching for the magic word.
    pub discarded: u64,
}

/// Recovers frames from the unframed UART byte stream.
///
/// Bytes are accumulated with [`FrameReader::push`] and complete frames are
/// taken out with [`FrameReader::next_frame`], which should be called until
/// it returns `None` since one read can carry several frames.
pub struct FrameReader {
    buffer: Vec<u8>,
    max_frame_len: usize,
    stats: SyncStats,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameReader {
    /// Creates a reader rejecting frames which declare more than
    /// `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> FrameReader {
        FrameReader {
            buffer: Vec::with_capacity(4 * SYNC_WINDOW),
            max_frame_len: max_frame_len.max(FrameHeader::LEN),
            stats: SyncStats::default(),
        }
    }

    /// Appends bytes read from the port.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting in the accumulation buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the synchronization counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Takes the next complete frame out of the buffer.  Returns `None` when
    /// more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let start = match find_magic(&self.buffer) {
                Some(start) => start,
                None => {
                    // Keep a recent window in case the magic word is split
                    // across reads.
                    if self.buffer.len() > SYNC_WINDOW {
                        let excess = self.buffer.len() - SYNC_WINDOW;
                        self.discard(excess);
                    }
                    return None;
                }
            };

            if start > 0 {
                trace!("dropping {} bytes ahead of magic word", start);
                self.discard(start);
            }

            let header = match FrameHeaderSlice::from_slice(&self.buffer) {
                Ok(header) => header,
                Err(_) => return None,
            };

            if let Err(err) = self.validate(&header) {
                debug!("resync: {}", err);
                self.stats.resyncs += 1;
                self.discard(1);
                continue;
            }

            let len = header.total_packet_len() as usize;
            if self.buffer.len() < len {
                return None;
            }

            let rest = self.buffer.split_off(len);
            let data = std::mem::replace(&mut self.buffer, rest);
            self.stats.frames += 1;

            return match Frame::from_bytes(data) {
                Ok(frame) => Some(frame),
                Err(_) => None,
            };
        }
    }

    fn validate(&self, header: &FrameHeaderSlice) -> Result<(), DecodeError> {
        if header.magic() != MAGIC {
            return Err(DecodeError::InvalidMagic(header.magic()));
        }

        let len = header.total_packet_len();
        if (len as usize) < FrameHeader::LEN || len as usize > self.max_frame_len {
            return Err(DecodeError::InvalidPacketLength(len));
        }

        Ok(())
    }

    fn discard(&mut self, count: usize) {
        self.buffer.drain(..count);
        self.stats.discarded += count as u64;
    }
}

fn find_magic(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(MAGIC_WORD.len())
        .position(|window| window == MAGIC_WORD)
}
