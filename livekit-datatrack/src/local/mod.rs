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
    api::{DataTrack, DataTrackFrame, DataTrackInfo, InternalError},
    track::DataTrackInner,
};
use events::OutputEvent;
use parking_lot::Mutex;
use pipeline::Pipeline;
use std::{fmt, marker::PhantomData, sync::Arc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub(crate) mod events;
pub(crate) mod manager;
pub(crate) mod packetizer;
pub(crate) mod pipeline;

/// Data track published by the local participant.
pub type LocalDataTrack = DataTrack<Local>;

/// Marker type indicating a [`DataTrack`] belongs to the local participant.
#[derive(Debug)]
pub struct Local;

impl DataTrack<Local> {
    pub(crate) fn new(info: Arc<DataTrackInfo>, inner: LocalTrackInner) -> Self {
        Self { info, inner: Arc::new(inner.into()), _location: PhantomData }
    }

    fn inner(&self) -> &LocalTrackInner {
        match &*self.inner {
            DataTrackInner::Local(track) => track,
            DataTrackInner::Remote(_) => unreachable!(), // Safe (type state)
        }
    }

    /// Publishes a frame onto the track.
    ///
    /// The frame is encrypted (if the track uses E2EE), split into packets and
    /// handed to the transport without waiting. On failure, the frame is
    /// returned inside the error.
    ///
    pub fn publish(&self, frame: impl Into<DataTrackFrame>) -> Result<(), PublishFrameError> {
        let frame = frame.into();
        if !self.is_published() {
            return Err(PublishFrameError::new(frame, PublishFrameErrorReason::TrackUnpublished));
        }
        let inner = self.inner();

        // Held until all packets are queued so frames are not interleaved.
        let mut pipeline = inner.pipeline.lock();
        let packets = match pipeline.process(frame.clone()) {
            Ok(packets) => packets,
            Err(err) => {
                log::warn!("Failed to process frame on {}: {}", self.info.sid, err);
                return Err(PublishFrameError::new(frame, PublishFrameErrorReason::Dropped));
            }
        };
        if inner.event_out_tx.capacity() < packets.len() {
            log::debug!("Transport backlogged, dropping frame on {}", self.info.sid);
            return Err(PublishFrameError::new(frame, PublishFrameErrorReason::Dropped));
        }
        for packet in packets {
            let event = OutputEvent::PacketAvailable(packet.encode());
            if let Err(err) = inner.event_out_tx.try_send(event) {
                log::debug!("Cannot send packet to transport: {}", err);
                return Err(PublishFrameError::new(frame, PublishFrameErrorReason::Dropped));
            }
        }
        Ok(())
    }

    /// Unpublishes the track.
    ///
    /// Takes effect immediately for this and all clones of the track; the SFU
    /// is notified in the background. Dropping the last clone of a published
    /// track has the same effect.
    ///
    pub fn unpublish(&self) {
        self.inner().unpublish();
    }
}

#[derive(Debug)]
pub(crate) struct LocalTrackInner {
    pub pipeline: Mutex<Pipeline>,
    pub state_tx: watch::Sender<LocalTrackState>,
    pub event_out_tx: mpsc::Sender<OutputEvent>,
}

impl LocalTrackInner {
    pub fn is_published(&self) -> bool {
        self.state_tx.borrow().is_published()
    }

    pub async fn wait_for_unpublish(&self) {
        let mut state_rx = self.state_tx.subscribe();
        _ = state_rx.wait_for(|state| !state.is_published()).await;
    }

    fn unpublish(&self) {
        self.state_tx.send_if_modified(|state| {
            if !state.is_published() {
                return false;
            }
            *state = LocalTrackState::Unpublished { initiator: UnpublishInitiator::Client };
            true
        });
    }
}

impl Drop for LocalTrackInner {
    fn drop(&mut self) {
        // Implicit unpublish when the last handle is dropped.
        self.unpublish();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnpublishInitiator {
    Client,
    Sfu,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LocalTrackState {
    Published,
    Unpublished { initiator: UnpublishInitiator },
}

impl LocalTrackState {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Options for publishing a data track.
#[derive(Clone, Debug)]
pub struct DataTrackOptions {
    pub(crate) name: String,
    pub(crate) disable_e2ee: bool,
}

impl DataTrackOptions {
    /// Creates options for a track with the given name.
    ///
    /// The name must be unique among the tracks published by the local participant.
    ///
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into(), disable_e2ee: false }
    }

    /// Publishes without end-to-end encryption even when it is configured
    /// for the room.
    pub fn disable_e2ee(self, disabled: bool) -> Self {
        Self { disable_e2ee: disabled, ..self }
    }
}

/// An error that can occur when publishing a data track.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not permitted to publish data tracks")]
    NotAllowed,
    #[error("Track name already in use by another local data track")]
    DuplicateName,
    #[error("SFU did not answer the publish request in time")]
    Timeout,
    #[error("Publication limit reached")]
    LimitReached,
    #[error("Not connected")]
    Disconnected,
    #[error("Publish request cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// An error that can occur when publishing a frame onto a data track.
#[derive(Debug, Error)]
#[error("Frame not sent: {reason}")]
pub struct PublishFrameError {
    frame: DataTrackFrame,
    reason: PublishFrameErrorReason,
}

impl PublishFrameError {
    pub(crate) fn new(frame: DataTrackFrame, reason: PublishFrameErrorReason) -> Self {
        Self { frame, reason }
    }

    /// Consume the error, returning the frame that couldn't be published.
    pub fn into_frame(self) -> DataTrackFrame {
        self.frame
    }

    /// Returns the reason why the frame could not be published.
    pub fn reason(&self) -> PublishFrameErrorReason {
        self.reason
    }
}

/// Reason why a data track frame could not be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFrameErrorReason {
    /// Track is no longer published.
    TrackUnpublished,
    /// Frame could not be encrypted, packetized or queued for the transport.
    Dropped,
}

impl fmt::Display for PublishFrameErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackUnpublished => write!(f, "track is not published"),
            Self::Dropped => write!(f, "dropped before reaching the transport"),
        }
    }
}
