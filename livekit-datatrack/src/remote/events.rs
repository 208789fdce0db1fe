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
use super::depacketizer::DepacketizerDropError;
use crate::{
    api::{DataTrackInfo, DataTrackSid, DataTrackSubscription, RemoteDataTrack, SubscribeError},
    packet::Handle,
    utils::Expiry,
};
use bytes::Bytes;
use from_variants::FromVariants;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

// MARK: - Input events

/// An event handled by [`super::manager::Manager`].
#[derive(Debug, FromVariants)]
pub enum InputEvent {
    Subscribe(SubscribeEvent),
    SubscribeExpired(SubscribeExpiredEvent),
    PublicationUpdates(PublicationUpdatesEvent),
    SubscriberHandles(SubscriberHandlesEvent),
    ParticipantDisconnected(ParticipantDisconnectedEvent),
    /// Packet has been received over the transport.
    PacketReceived(Bytes),
    /// Shutdown the manager, ending any subscriptions.
    Shutdown,
}

/// Result of a [`SubscribeEvent`].
pub(super) type SubscribeResult = Result<DataTrackSubscription, SubscribeError>;

/// User requested to subscribe to a track.
#[derive(Debug)]
pub struct SubscribeEvent {
    pub(super) sid: DataTrackSid,
    pub(super) cancel: CancellationToken,
    pub(super) result_tx: oneshot::Sender<SubscribeResult>,
}

/// A pending subscribe request timed out or was cancelled by its caller.
#[derive(Debug)]
pub struct SubscribeExpiredEvent {
    pub(super) sid: DataTrackSid,
    pub(super) waiter_id: u64,
    pub(super) expiry: Expiry,
}

/// Full set of data tracks currently published by remote participants.
///
/// Tracks not seen before become available; known tracks missing from the set
/// have been unpublished.
///
#[derive(Debug, Default)]
pub struct PublicationUpdatesEvent {
    /// Mapping between participant identity and data tracks published by that participant.
    pub updates: HashMap<String, Vec<DataTrackInfo>>,
}

/// Subscriber handles assigned or reassigned by the SFU.
#[derive(Debug, Default)]
pub struct SubscriberHandlesEvent {
    /// Mapping between track handles attached to incoming packets and the
    /// track SIDs they belong to.
    pub mapping: HashMap<Handle, DataTrackSid>,
}

/// Remote participant left the room.
#[derive(Debug)]
pub struct ParticipantDisconnectedEvent {
    pub identity: String,
}

// MARK: - Output events

/// An event produced by [`super::manager::Manager`] requiring external action.
#[derive(Debug, FromVariants)]
pub enum OutputEvent {
    SubscriptionUpdated(SubscriptionUpdatedEvent),
    /// Remote track has been published and a track object has been created for
    /// the user to interact with.
    TrackAvailable(RemoteDataTrack),
    TrackUnavailable(TrackUnavailableEvent),
    FrameDropped(FrameDroppedEvent),
}

/// Ask the SFU to start or stop forwarding a track's packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdatedEvent {
    pub sid: DataTrackSid,
    /// Whether to subscribe or unsubscribe.
    pub subscribe: bool,
}

/// Remote track is no longer published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackUnavailableEvent {
    pub sid: DataTrackSid,
    pub publisher_identity: String,
}

/// A frame could not be reassembled.
///
/// Only produced when [`super::manager::ManagerOptions::report_drops`] is set.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDroppedEvent {
    pub sid: DataTrackSid,
    pub error: DepacketizerDropError,
}
