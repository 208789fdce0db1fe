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
use crate::{
    packet::{Clock, Extensions, FrameMarker, Handle, Packet, PacketHeader, Timestamp},
    utils::{BytesChunkExt, Chunks, Counter},
};
use bytes::Bytes;
use thiserror::Error;

/// Converts application-level frames into packets for transport.
#[derive(Debug)]
pub struct Packetizer {
    handle: Handle,
    mtu: usize,
    sequence: Counter<u16>,
    frame_number: Counter<u16>,
    clock: Clock<90_000>,
}

/// Frame packetized by [`Packetizer`].
#[derive(Debug, Clone, Default)]
pub struct PacketizerFrame {
    pub payload: Bytes,
    pub extensions: Extensions,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketizerError {
    #[error("MTU of {mtu} bytes cannot fit a {header_len} byte header and any payload")]
    MtuTooShort { mtu: usize, header_len: usize },
}

impl Packetizer {
    pub fn new(track_handle: Handle, mtu: usize) -> Self {
        Self {
            handle: track_handle,
            mtu,
            sequence: Counter::default(),
            frame_number: Counter::default(),
            clock: Clock::new(Timestamp::random()),
        }
    }

    /// Packetizes a frame into one or more packets.
    ///
    /// Packets are produced lazily; the returned iterator has already reserved
    /// their sequence numbers, so packetizing the next frame does not wait on it.
    /// Extensions are only carried by the first packet.
    ///
    pub fn packetize(&mut self, frame: PacketizerFrame) -> Result<Packets, PacketizerError> {
        let header = PacketHeader {
            marker: FrameMarker::Single,
            track_handle: self.handle,
            sequence: 0,
            frame_number: 0,
            timestamp: self.clock.now(),
            extensions: frame.extensions,
        };
        let header_len = header.encoded_len();
        let max_payload_len = self.mtu.saturating_sub(header_len);
        if max_payload_len == 0 {
            Err(PacketizerError::MtuTooShort { mtu: self.mtu, header_len })?
        }

        let chunks = frame.payload.into_chunks(max_payload_len);
        let count = chunks.remaining().max(1);
        let first_sequence = self.sequence.get_then_advance(count);
        let frame_number = self.frame_number.get_then_increment();

        Ok(Packets {
            chunks,
            header: PacketHeader { sequence: first_sequence, frame_number, ..header },
            index: 0,
            count,
        })
    }

    fn frame_marker(index: usize, packet_count: usize) -> FrameMarker {
        if packet_count <= 1 {
            return FrameMarker::Single;
        }
        match index {
            0 => FrameMarker::Start,
            _ if index == packet_count - 1 => FrameMarker::Final,
            _ => FrameMarker::Inter,
        }
    }
}

/// Packets of a single frame, returned by [`Packetizer::packetize`].
#[derive(Debug)]
pub struct Packets {
    chunks: Chunks,
    /// Header of the next packet to yield.
    header: PacketHeader,
    index: usize,
    count: usize,
}

impl Iterator for Packets {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        // An empty frame still produces a single packet.
        let payload = self.chunks.next().unwrap_or_default();
        let header = PacketHeader {
            marker: Packetizer::frame_marker(self.index, self.count),
            extensions: std::mem::take(&mut self.header.extensions),
            ..self.header.clone()
        };
        self.header.sequence = self.header.sequence.wrapping_add(1);
        self.index += 1;
        Some(Packet { header, payload })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Packets {}
