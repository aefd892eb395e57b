//! VP8 RTP payload format (RFC 7741) packetizer and depacketizer.
//!
//! This is a Sans I/O building block for real-time video pipelines: it does
//! no socket work, spawns no threads and reads no clock. An encoder hands
//! the [`Packer`] one frame's partitions and gets back RTP payloads ready
//! for header wrapping; a receiver hands the [`Unpacker`] arriving payloads
//! (unordered, with losses, duplicates and 16-bit sequence wraparound) and
//! gets back complete, correctly ordered frames for the decoder.
//!
//! # Depacketizing
//!
//! ```
//! use vp8rtp::{RtpPacket, Unpacker};
//!
//! let mut unpacker = Unpacker::new();
//!
//! // One single-packet frame: descriptor byte (S=1, PID=0) + frame data.
//! unpacker.push(RtpPacket {
//!     payload: vec![0x10, 0xde, 0xad],
//!     seq: 7000,
//!     timestamp: 90_000,
//!     marker: true,
//! });
//!
//! assert_eq!(unpacker.pop_frame(), Some(vec![0xde, 0xad]));
//! ```
//!
//! # Packetizing
//!
//! ```
//! use std::collections::VecDeque;
//! use vp8rtp::{FrameMeta, Packer};
//!
//! let mut packer = Packer::new(2, 1200).with_picture_id();
//! let mut out = VecDeque::new();
//!
//! let partitions = vec![vec![0u8; 2000], vec![0u8; 300]];
//! packer.process(&partitions, &FrameMeta::default(), &mut out).unwrap();
//!
//! assert!(out.iter().all(|p| p.payload.len() <= 1200));
//! assert!(out.back().unwrap().last_packet_of_frame);
//! ```
//!
//! Frame loss is a normal network condition, not an error: the unpacker
//! absorbs corruption and gaps into per-frame discard decisions, and the
//! only caller-visible signal is whether a frame came out.

#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

mod descriptor;
pub use descriptor::{PayloadDescriptor, PictureId, TemporalLayer, DESCRIPTOR_MIN_LEN};

mod error;
pub use error::PacketError;

mod seq;
pub use seq::ExtendedSeq;

mod unpack;
pub use unpack::{ErrorCode, RtpPacket, Unpacker};
pub use unpack::{MAX_FRAME_AGE, MAX_FRAME_SPAN, MAX_PARTITIONS, MAX_SEQ_GAP};

mod pack;
pub use pack::{FrameMeta, PacketOut, Packer};

/// Capability descriptor for a packing/unpacking stage, for embedders that
/// register pipeline filters by name and arity. See [`Packer::INFO`] and
/// [`Unpacker::INFO`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterInfo {
    /// Stable name of the stage.
    pub name: &'static str,
    /// Number of input queues the stage consumes.
    pub inputs: usize,
    /// Number of output queues the stage fills.
    pub outputs: usize,
}
