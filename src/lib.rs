// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! RadarGrid Library
//!
//! This library decodes the UART output of mmWave people tracking radars and
//! projects the tracked targets onto a configurable 2-D grid.
//!
//! # Features
//!
//! - **Frame Synchronization** - Recover frames from the unframed byte stream
//!   using the magic word
//! - **TLV Decoding** - Walk the TLV records of each frame and decode track
//!   lists
//! - **Grid Mapping** - Filter tracks by confidence and rescale them to grid
//!   cell coordinates
//! - **UART Worker** - Background reader delivering grid and point
//!   notifications over a channel
//! - **Provisioning** - Send configuration scripts over the command port

#![warn(missing_docs)]

/// Magic word search, frame header and stream synchronization
pub mod frame;

/// TLV records and track list decoding
pub mod tlv;

/// Grid configuration and coordinate mapping
pub mod grid;

/// Per-frame decoding and notifications
pub mod pipeline;

/// UART data port reader thread
pub mod uart;

/// Command port configuration scripts
pub mod provision;
