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
    api::{DataTrackInfo, DataTrackOptions, LocalDataTrack, PublishError},
    packet::Handle,
    utils::Expiry,
};
use bytes::Bytes;
use from_variants::FromVariants;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

// MARK: - Input events

/// An event handled by [`super::manager::Manager`].
#[derive(Debug, FromVariants)]
pub enum InputEvent {
    Publish(PublishEvent),
    PublishResult(PublishResultEvent),
    PublishExpired(PublishExpiredEvent),
    Unpublish(UnpublishEvent),
    UnpublishExpired(UnpublishExpiredEvent),
    SfuUnpublished(SfuUnpublishedEvent),
    /// Shutdown the manager and all associated tracks.
    Shutdown,
}

/// Request to publish a data track.
///
/// Created by [`super::manager::ManagerInput::publish_track`].
///
#[derive(Debug)]
pub struct PublishEvent {
    pub(super) options: DataTrackOptions,
    pub(super) cancel: CancellationToken,
    pub(super) result_tx: oneshot::Sender<Result<LocalDataTrack, PublishError>>,
}

/// SFU response to a [`PublishRequestEvent`].
#[derive(Debug)]
pub struct PublishResultEvent {
    /// Publisher handle of the track.
    pub handle: Handle,
    /// Outcome of the publish request.
    pub result: Result<DataTrackInfo, PublishError>,
}

/// Pending publication timed out or was cancelled by the caller.
#[derive(Debug)]
pub struct PublishExpiredEvent {
    pub(super) handle: Handle,
    pub(super) expiry: Expiry,
}

/// Local participant unpublished a track, either explicitly or by dropping
/// the last reference to it.
#[derive(Debug)]
pub struct UnpublishEvent {
    pub(super) handle: Handle,
}

/// SFU did not acknowledge an [`UnpublishRequestEvent`] in time.
#[derive(Debug)]
pub struct UnpublishExpiredEvent {
    pub(super) handle: Handle,
}

/// SFU reports that a track published by the local participant is no longer
/// published.
///
/// This is both the acknowledgement of an [`UnpublishRequestEvent`] and the
/// notification of an SFU-initiated unpublish.
///
#[derive(Debug)]
pub struct SfuUnpublishedEvent {
    pub handle: Handle,
}

// MARK: - Output events

/// An event produced by [`super::manager::Manager`] requiring external action.
#[derive(Debug, FromVariants)]
pub enum OutputEvent {
    PublishRequest(PublishRequestEvent),
    UnpublishRequest(UnpublishRequestEvent),
    /// Encoded packet is ready to be sent over the transport.
    PacketAvailable(Bytes),
}

/// Ask the SFU to publish a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequestEvent {
    pub handle: Handle,
    pub name: String,
    pub uses_e2ee: bool,
}

/// Ask the SFU to unpublish a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpublishRequestEvent {
    pub handle: Handle,
}
