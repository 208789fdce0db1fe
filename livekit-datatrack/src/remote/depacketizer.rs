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
use crate::packet::{Extensions, FrameMarker, Packet};
use bytes::{Bytes, BytesMut};
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Reassembles packets into frames.
///
/// Only one frame is assembled at a time. Packets between the start and final
/// packet of a frame may arrive in any order; the final packet completes the frame.
///
#[derive(Debug, Default)]
pub struct Depacketizer {
    partial: Option<PartialFrame>,
}

/// A frame that has been fully reassembled by [`Depacketizer`].
#[derive(Debug, PartialEq, Eq)]
pub struct DepacketizerFrame {
    pub payload: Bytes,
    /// Extensions carried by the frame's first packet.
    pub extensions: Extensions,
}

impl Depacketizer {
    /// Maximum number of packets to buffer per frame before dropping.
    pub const MAX_BUFFER_PACKETS: usize = 128;

    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet into the depacketizer.
    pub fn push(&mut self, packet: Packet) -> DepacketizerPushResult {
        let header = &packet.header;
        match header.marker {
            FrameMarker::Single => {
                let interrupted = self.abandon(DepacketizerDropReason::Interrupted);
                let extensions = packet.header.extensions;
                let frame = DepacketizerFrame { payload: packet.payload, extensions };
                DepacketizerPushResult { frame: Some(frame), drop_error: interrupted }
            }
            FrameMarker::Start => {
                let interrupted = self.abandon(DepacketizerDropReason::Interrupted);
                self.partial = Some(PartialFrame::start(packet));
                DepacketizerPushResult { frame: None, drop_error: interrupted }
            }
            FrameMarker::Inter | FrameMarker::Final => {
                let Some(partial) = self.partial.as_mut() else {
                    return DepacketizerDropError {
                        frame_number: header.frame_number,
                        reason: DepacketizerDropReason::UnknownFrame,
                    }
                    .into();
                };
                if header.frame_number != partial.frame_number {
                    return self.abandon(DepacketizerDropReason::Interrupted).into();
                }
                if partial.payloads.len() >= Self::MAX_BUFFER_PACKETS {
                    return self.abandon(DepacketizerDropReason::BufferFull).into();
                }
                let is_final = header.marker == FrameMarker::Final;
                let sequence = header.sequence;
                partial.insert(sequence, packet.payload);
                if !is_final {
                    return DepacketizerPushResult::default();
                }
                match self.partial.take() {
                    Some(partial) => partial.assemble(sequence),
                    None => DepacketizerPushResult::default(),
                }
            }
        }
    }

    /// Discards the frame being assembled, if any, reporting why.
    fn abandon(&mut self, reason: DepacketizerDropReason) -> Option<DepacketizerDropError> {
        let partial = self.partial.take()?;
        Some(DepacketizerDropError { frame_number: partial.frame_number, reason })
    }
}

/// Frame being assembled as packets are received.
#[derive(Debug)]
struct PartialFrame {
    frame_number: u16,
    start_sequence: u16,
    /// Extensions from the start packet.
    extensions: Extensions,
    /// Payloads keyed by sequence number.
    payloads: BTreeMap<u16, Bytes>,
}

impl PartialFrame {
    fn start(packet: Packet) -> Self {
        let header = packet.header;
        Self {
            frame_number: header.frame_number,
            start_sequence: header.sequence,
            extensions: header.extensions,
            payloads: BTreeMap::from([(header.sequence, packet.payload)]),
        }
    }

    fn insert(&mut self, sequence: u16, payload: Bytes) {
        if self.payloads.insert(sequence, payload).is_some() {
            log::warn!(
                "Duplicate packet for sequence {} on frame {}, using latest",
                sequence,
                self.frame_number
            );
        }
    }

    /// Concatenates payloads from the start packet through `end_sequence`,
    /// following sequence numbers across wrap-around.
    fn assemble(mut self, end_sequence: u16) -> DepacketizerPushResult {
        let expected = end_sequence.wrapping_sub(self.start_sequence).wrapping_add(1);
        let received = self.payloads.len() as u16;

        let payload_len = self.payloads.values().map(Bytes::len).sum();
        let mut payload = BytesMut::with_capacity(payload_len);
        let mut sequence = self.start_sequence;
        loop {
            let Some(part) = self.payloads.remove(&sequence) else {
                return DepacketizerDropError {
                    frame_number: self.frame_number,
                    reason: DepacketizerDropReason::Incomplete { received, expected },
                }
                .into();
            };
            payload.extend_from_slice(&part);
            if sequence == end_sequence {
                break;
            }
            sequence = sequence.wrapping_add(1);
        }
        DepacketizerFrame { payload: payload.freeze(), extensions: self.extensions }.into()
    }
}

/// Result from a call to [`Depacketizer::push`].
///
/// A single push can both complete a frame and drop the frame that was being
/// assembled before it, so both outcomes are reported side by side.
///
#[derive(Debug, Default)]
pub struct DepacketizerPushResult {
    pub frame: Option<DepacketizerFrame>,
    pub drop_error: Option<DepacketizerDropError>,
}

impl From<DepacketizerFrame> for DepacketizerPushResult {
    fn from(frame: DepacketizerFrame) -> Self {
        Self { frame: Some(frame), drop_error: None }
    }
}

impl From<DepacketizerDropError> for DepacketizerPushResult {
    fn from(drop_error: DepacketizerDropError) -> Self {
        Self { frame: None, drop_error: Some(drop_error) }
    }
}

impl From<Option<DepacketizerDropError>> for DepacketizerPushResult {
    fn from(drop_error: Option<DepacketizerDropError>) -> Self {
        Self { frame: None, drop_error }
    }
}

/// An error indicating a frame was dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Frame {frame_number} dropped: {reason}")]
pub struct DepacketizerDropError {
    frame_number: u16,
    reason: DepacketizerDropReason,
}

impl DepacketizerDropError {
    /// Number of the dropped frame.
    pub fn frame_number(&self) -> u16 {
        self.frame_number
    }

    pub fn reason(&self) -> DepacketizerDropReason {
        self.reason
    }
}

/// Reason why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepacketizerDropReason {
    /// Interrupted by a packet belonging to another frame.
    Interrupted,
    /// Start packet was never received.
    UnknownFrame,
    /// Too many packets buffered for one frame.
    BufferFull,
    /// Final packet received before all others.
    Incomplete {
        /// Number of packets received.
        received: u16,
        /// Number of packets expected.
        expected: u16,
    },
}

impl fmt::Display for DepacketizerDropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted"),
            Self::UnknownFrame => write!(f, "unknown frame"),
            Self::BufferFull => write!(f, "buffer full"),
            Self::Incomplete { received, expected } => {
                write!(f, "incomplete ({}/{})", received, expected)
            }
        }
    }
}
