// Copyright 2025 LiveKit, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire format of a data track packet (all fields big-endian):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | V=0 | M |X|   |   reserved    |         track handle          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           sequence            |         frame number          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      timestamp (90 kHz)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   extension words - 1 (if X)  | extensions (TLV, padded) ...  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          payload ...                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::Bytes;
use core::fmt;

mod decode;
mod encode;
mod extension;
mod handle;
mod time;

pub use decode::DecodeError;
pub use encode::EncodeError;
pub use extension::*;
pub use handle::*;
pub use time::*;

/// A single data track packet.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub struct PacketHeader {
    pub marker: FrameMarker,
    pub track_handle: Handle,
    pub sequence: u16,
    pub frame_number: u16,
    pub timestamp: Timestamp<90_000>,
    pub extensions: Extensions,
}

/// Position of a packet within its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub enum FrameMarker {
    /// First packet of a multi-packet frame.
    Start,
    /// Neither the first nor the last packet of a multi-packet frame.
    Inter,
    /// Last packet of a multi-packet frame.
    Final,
    /// The frame fits in this packet alone.
    Single,
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("header", &self.header)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Constants shared by the encoder and decoder.
pub(crate) mod consts {
    pub const VERSION: u8 = 0;
    pub const BASE_HEADER_LEN: usize = 12;

    pub const VERSION_SHIFT: u8 = 5;
    pub const VERSION_MASK: u8 = 0b111;

    pub const MARKER_SHIFT: u8 = 3;
    pub const MARKER_MASK: u8 = 0b11;
    pub const MARKER_INTER: u8 = 0b00;
    pub const MARKER_FINAL: u8 = 0b01;
    pub const MARKER_START: u8 = 0b10;
    pub const MARKER_SINGLE: u8 = 0b11;

    pub const EXT_FLAG_SHIFT: u8 = 2;
    pub const EXT_WORDS_LEN: usize = 2;
    pub const EXT_ENTRY_HEADER_LEN: usize = 4;
    pub const EXT_TAG_PADDING: u16 = 0;
    pub const WORD_LEN: usize = 4;
}

impl FrameMarker {
    pub(crate) const fn to_bits(self) -> u8 {
        use consts::*;
        match self {
            Self::Inter => MARKER_INTER,
            Self::Final => MARKER_FINAL,
            Self::Start => MARKER_START,
            Self::Single => MARKER_SINGLE,
        }
    }

    pub(crate) const fn from_bits(bits: u8) -> Self {
        use consts::*;
        match bits & MARKER_MASK {
            MARKER_FINAL => Self::Final,
            MARKER_START => Self::Start,
            MARKER_SINGLE => Self::Single,
            _ => Self::Inter,
        }
    }
}

#[cfg(test)]
impl fake::Dummy<fake::Faker> for Packet {
    fn dummy_with_rng<R: rand::Rng + ?Sized>(config: &fake::Faker, rng: &mut R) -> Self {
        use fake::Fake;
        let payload_len = rng.random_range(0..=1500);
        let payload: Bytes = (0..payload_len).map(|_| rng.random::<u8>()).collect();
        Self { header: config.fake_with_rng(rng), payload }
    }
}
