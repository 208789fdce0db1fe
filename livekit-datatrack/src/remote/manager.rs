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
use super::{
    events::*, pipeline::Pipeline, DataTrackSubscription, Release, RemoteDataTrack,
    RemoteTrackInner, RemoteTrackState, SubscriptionReleased,
};
use crate::{
    api::{DataTrackFrame, DataTrackInfo, DataTrackSid, InternalError, SubscribeError},
    e2ee::DecryptionProvider,
    packet::{Handle, Packet},
    utils::{watch_expiry, Counter, Expiry, HandleMap},
};
use anyhow::{anyhow, Context};
use bytes::Bytes;
use futures_core::Stream;
use std::{
    collections::{HashMap, HashSet},
    mem,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Options for creating a [`Manager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Provider to use for decrypting incoming frame payloads.
    ///
    /// If none, subscribing to remote tracks using end-to-end encryption fails.
    ///
    pub decryption: Option<Arc<dyn DecryptionProvider>>,
    /// Emit [`OutputEvent::FrameDropped`] for frames that could not be
    /// reassembled. Drops are only logged otherwise.
    pub report_drops: bool,
}

/// System for managing data track subscriptions.
pub struct Manager {
    decryption: Option<Arc<dyn DecryptionProvider>>,
    report_drops: bool,
    event_in_tx: mpsc::WeakSender<InputEvent>,
    event_in_rx: mpsc::Receiver<InputEvent>,
    event_out_tx: mpsc::Sender<OutputEvent>,
    release_tx: mpsc::UnboundedSender<SubscriptionReleased>,
    release_rx: mpsc::UnboundedReceiver<SubscriptionReleased>,

    /// Mapping between track SID and descriptor.
    descriptors: HashMap<DataTrackSid, Descriptor>,
    /// Bidirectional mapping between track SID and subscriber handle.
    sub_handles: HandleMap,
    /// Identifiers for subscribe requests and the subscriptions they create.
    subscriber_ids: Counter<u64>,
}

#[derive(Debug)]
struct Descriptor {
    info: Arc<DataTrackInfo>,
    publisher_identity: Arc<str>,
    state_tx: watch::Sender<RemoteTrackState>,
    subscription: SubscriptionState,
}

#[derive(Debug)]
enum SubscriptionState {
    /// No subscribers.
    Available,
    /// Waiting for the SFU to assign a subscriber handle.
    Pending { waiters: HashMap<u64, Waiter> },
    /// Packets are being received and fanned out to subscribers.
    Active { pipeline: Pipeline, outputs: HashMap<u64, mpsc::Sender<DataTrackFrame>> },
}

/// Why a track is removed from the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemovalCause {
    /// Missing from a publication update; the SFU already dropped it.
    Unpublished,
    /// Its publisher left the room; active subscriptions are unsubscribed.
    PublisherLeft,
}

impl RemovalCause {
    fn waiter_error(self) -> SubscribeError {
        match self {
            Self::Unpublished => SubscribeError::Unpublished,
            Self::PublisherLeft => SubscribeError::Disconnected,
        }
    }
}

#[derive(Debug)]
struct Waiter {
    result_tx: oneshot::Sender<SubscribeResult>,
    /// Stops the timeout and cancellation watch once dropped.
    _expiry: DropGuard,
}

impl Manager {
    /// Creates a new manager.
    ///
    /// Returns a tuple containing the following:
    ///
    /// - The manager itself to be spawned by the caller (see [`Manager::run`]).
    /// - Channel for sending [`InputEvent`]s to be processed by the manager.
    /// - Stream for receiving [`OutputEvent`]s produced by the manager.
    ///
    pub fn new(options: ManagerOptions) -> (Self, ManagerInput, impl Stream<Item = OutputEvent>) {
        let (event_in_tx, event_in_rx) = mpsc::channel(Self::INPUT_BUFFER_SIZE);
        let (event_out_tx, event_out_rx) = mpsc::channel(Self::OUTPUT_BUFFER_SIZE);
        let (release_tx, release_rx) = mpsc::unbounded_channel();

        let event_in = ManagerInput { event_in_tx: event_in_tx.clone() };
        let manager = Manager {
            decryption: options.decryption,
            report_drops: options.report_drops,
            event_in_tx: event_in_tx.downgrade(),
            event_in_rx,
            event_out_tx,
            release_tx,
            release_rx,
            descriptors: HashMap::default(),
            sub_handles: HandleMap::default(),
            subscriber_ids: Counter::default(),
        };

        let event_out = ReceiverStream::new(event_out_rx);
        (manager, event_in, event_out)
    }

    /// Run the manager task, consuming self.
    ///
    /// The manager will continue running until receiving [`InputEvent::Shutdown`]
    /// or all [`ManagerInput`]s are dropped.
    ///
    pub async fn run(mut self) {
        log::debug!("Task started");
        loop {
            let result = tokio::select! {
                biased;
                Some(released) = self.release_rx.recv() => self.handle_released(released).await,
                event = self.event_in_rx.recv() => match event {
                    None | Some(InputEvent::Shutdown) => break,
                    Some(event) => self.handle_event(event).await,
                },
            };
            if let Err(err) = result {
                log::error!("Failed to handle input event: {}", err);
            }
        }
        self.shutdown();
        log::debug!("Task ended");
    }

    async fn handle_event(&mut self, event: InputEvent) -> Result<(), InternalError> {
        if !matches!(event, InputEvent::PacketReceived(_)) {
            log::debug!("Input event: {:?}", event);
        }
        match event {
            InputEvent::Subscribe(event) => self.handle_subscribe(event).await,
            InputEvent::SubscribeExpired(event) => self.handle_subscribe_expired(event).await,
            InputEvent::PublicationUpdates(event) => self.handle_publication_updates(event).await,
            InputEvent::SubscriberHandles(event) => self.handle_subscriber_handles(event).await,
            InputEvent::ParticipantDisconnected(event) => {
                self.handle_participant_disconnected(event).await
            }
            InputEvent::PacketReceived(bytes) => self.handle_packet_received(bytes).await,
            InputEvent::Shutdown => Ok(()),
        }
    }

    // MARK: - Publications

    async fn handle_publication_updates(
        &mut self,
        event: PublicationUpdatesEvent,
    ) -> Result<(), InternalError> {
        if event.updates.is_empty() {
            return Ok(());
        }
        let mut sids_in_update = HashSet::new();

        for (publisher_identity, tracks) in event.updates {
            let publisher_identity: Arc<str> = publisher_identity.into();
            for info in tracks {
                sids_in_update.insert(info.sid.clone());
                if self.descriptors.contains_key(&info.sid) {
                    continue;
                }
                self.handle_track_published(publisher_identity.clone(), info).await?;
            }
        }

        let unpublished_sids: Vec<_> =
            self.descriptors.keys().filter(|sid| !sids_in_update.contains(*sid)).cloned().collect();
        for sid in unpublished_sids {
            self.remove_track(sid, RemovalCause::Unpublished).await?;
        }
        Ok(())
    }

    async fn handle_track_published(
        &mut self,
        publisher_identity: Arc<str>,
        info: DataTrackInfo,
    ) -> Result<(), InternalError> {
        log::debug!("Track published: sid={}, publisher={}", info.sid, publisher_identity);
        let info = Arc::new(info);
        let (state_tx, state_rx) = watch::channel(RemoteTrackState::Published);
        let descriptor = Descriptor {
            info: info.clone(),
            publisher_identity: publisher_identity.clone(),
            state_tx,
            subscription: SubscriptionState::Available,
        };
        self.descriptors.insert(info.sid.clone(), descriptor);

        let event_in_tx = self.event_in_tx.clone();
        let inner = RemoteTrackInner { publisher_identity, state_rx, event_in_tx };
        self.emit(RemoteDataTrack::new(info, inner).into()).await
    }

    async fn handle_participant_disconnected(
        &mut self,
        event: ParticipantDisconnectedEvent,
    ) -> Result<(), InternalError> {
        let sids: Vec<_> = self
            .descriptors
            .iter()
            .filter(|(_, descriptor)| *descriptor.publisher_identity == event.identity)
            .map(|(sid, _)| sid.clone())
            .collect();
        for sid in sids {
            self.remove_track(sid, RemovalCause::PublisherLeft).await?;
        }
        Ok(())
    }

    /// Removes a track no longer available, ending its subscriptions.
    async fn remove_track(
        &mut self,
        sid: DataTrackSid,
        cause: RemovalCause,
    ) -> Result<(), InternalError> {
        let Some(descriptor) = self.descriptors.remove(&sid) else { return Ok(()) };
        log::debug!("Track removed: sid={}, cause={:?}", sid, cause);
        self.sub_handles.remove(&sid);
        descriptor.state_tx.send_replace(RemoteTrackState::Unpublished);

        // Dropping an active subscription's senders ends its streams.
        let was_active = match descriptor.subscription {
            SubscriptionState::Pending { waiters } => {
                for waiter in waiters.into_values() {
                    _ = waiter.result_tx.send(Err(cause.waiter_error()));
                }
                false
            }
            SubscriptionState::Active { .. } => true,
            SubscriptionState::Available => false,
        };
        if was_active && cause == RemovalCause::PublisherLeft {
            self.emit(SubscriptionUpdatedEvent { sid: sid.clone(), subscribe: false }.into())
                .await?;
        }

        let event = TrackUnavailableEvent {
            sid,
            publisher_identity: descriptor.publisher_identity.to_string(),
        };
        self.emit(event.into()).await
    }

    // MARK: - Subscriptions

    async fn handle_subscribe(&mut self, event: SubscribeEvent) -> Result<(), InternalError> {
        let SubscribeEvent { sid, cancel, result_tx } = event;
        let Some(descriptor) = self.descriptors.get_mut(&sid) else {
            _ = result_tx.send(Err(SubscribeError::Disconnected));
            return Ok(());
        };
        if descriptor.info.uses_e2ee && self.decryption.is_none() {
            let error = anyhow!("Track {} uses E2EE but no decryption provider is set", sid);
            _ = result_tx.send(Err(SubscribeError::Internal(error.into())));
            return Ok(());
        }
        let id = self.subscriber_ids.get_then_increment();

        match &mut descriptor.subscription {
            SubscriptionState::Active { outputs, .. } => {
                let subscription = Self::attach_output(outputs, &sid, id, &self.release_tx);
                _ = result_tx.send(Ok(subscription));
                Ok(())
            }
            SubscriptionState::Pending { waiters } => {
                let waiter = Self::new_waiter(&self.event_in_tx, sid, id, cancel, result_tx);
                waiters.insert(id, waiter);
                Ok(())
            }
            SubscriptionState::Available => {
                let waiter =
                    Self::new_waiter(&self.event_in_tx, sid.clone(), id, cancel, result_tx);
                descriptor.subscription =
                    SubscriptionState::Pending { waiters: HashMap::from([(id, waiter)]) };
                self.emit(SubscriptionUpdatedEvent { sid, subscribe: true }.into()).await
            }
        }
    }

    fn new_waiter(
        event_in_tx: &mpsc::WeakSender<InputEvent>,
        sid: DataTrackSid,
        waiter_id: u64,
        cancel: CancellationToken,
        result_tx: oneshot::Sender<SubscribeResult>,
    ) -> Waiter {
        let expiry = watch_expiry(
            Self::SUBSCRIBE_TIMEOUT,
            cancel,
            event_in_tx.clone(),
            move |expiry| SubscribeExpiredEvent { sid, waiter_id, expiry }.into(),
        );
        Waiter { result_tx, _expiry: expiry }
    }

    fn attach_output(
        outputs: &mut HashMap<u64, mpsc::Sender<DataTrackFrame>>,
        sid: &DataTrackSid,
        id: u64,
        release_tx: &mpsc::UnboundedSender<SubscriptionReleased>,
    ) -> DataTrackSubscription {
        let (frame_tx, frame_rx) = mpsc::channel(Self::FRAME_BUFFER_SIZE);
        outputs.insert(id, frame_tx);
        let release = Release { id, release_tx: release_tx.clone() };
        DataTrackSubscription::new(sid.clone(), frame_rx, release)
    }

    async fn handle_subscribe_expired(
        &mut self,
        event: SubscribeExpiredEvent,
    ) -> Result<(), InternalError> {
        let Some(descriptor) = self.descriptors.get_mut(&event.sid) else { return Ok(()) };
        let SubscriptionState::Pending { waiters } = &mut descriptor.subscription else {
            return Ok(()); // Resolved in the meantime
        };
        let Some(waiter) = waiters.remove(&event.waiter_id) else { return Ok(()) };

        if !waiters.is_empty() {
            // The request stays pending for the remaining callers.
            _ = waiter.result_tx.send(Err(SubscribeError::Cancelled));
            return Ok(());
        }
        descriptor.subscription = SubscriptionState::Available;
        let error = match event.expiry {
            Expiry::Timeout => SubscribeError::Timeout,
            Expiry::Cancelled => SubscribeError::Cancelled,
        };
        log::debug!("Subscription to {} ended: {}", event.sid, error);
        _ = waiter.result_tx.send(Err(error));
        self.emit(SubscriptionUpdatedEvent { sid: event.sid, subscribe: false }.into()).await
    }

    async fn handle_subscriber_handles(
        &mut self,
        event: SubscriberHandlesEvent,
    ) -> Result<(), InternalError> {
        let mut failed_sids = Vec::new();
        for (handle, sid) in event.mapping {
            let Some(descriptor) = self.descriptors.get_mut(&sid) else {
                log::warn!("Handle {} assigned to unknown track {}", handle, sid);
                continue;
            };
            let waiters =
                match mem::replace(&mut descriptor.subscription, SubscriptionState::Available) {
                    SubscriptionState::Pending { waiters } => waiters,
                    SubscriptionState::Available => {
                        log::warn!("Handle {} assigned to {} without subscription", handle, sid);
                        continue;
                    }
                    active => {
                        descriptor.subscription = active;
                        let previous = self.sub_handles.insert(handle, sid.clone());
                        log::debug!("Handle for {} changed from {:?} to {}", sid, previous, handle);
                        continue;
                    }
                };

            let decryption = if descriptor.info.uses_e2ee { self.decryption.clone() } else { None };
            let pipeline = match Pipeline::new(
                &descriptor.info,
                descriptor.publisher_identity.clone(),
                decryption,
            ) {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    log::error!("Cannot receive {}: {}", sid, err);
                    for waiter in waiters.into_values() {
                        let error = anyhow!("Failed to create pipeline for {}", sid);
                        _ = waiter.result_tx.send(Err(SubscribeError::Internal(error.into())));
                    }
                    failed_sids.push(sid);
                    continue;
                }
            };

            let mut outputs = HashMap::with_capacity(waiters.len());
            for (id, waiter) in waiters {
                let subscription = Self::attach_output(&mut outputs, &sid, id, &self.release_tx);
                // A subscription the caller no longer awaits releases itself on drop.
                _ = waiter.result_tx.send(Ok(subscription));
            }
            log::debug!("Subscribed: sid={}, handle={}", sid, handle);
            descriptor.subscription = SubscriptionState::Active { pipeline, outputs };
            self.sub_handles.insert(handle, sid);
        }

        for sid in failed_sids {
            self.emit(SubscriptionUpdatedEvent { sid, subscribe: false }.into()).await?;
        }
        Ok(())
    }

    async fn handle_released(&mut self, event: SubscriptionReleased) -> Result<(), InternalError> {
        let Some(descriptor) = self.descriptors.get_mut(&event.sid) else { return Ok(()) };
        let SubscriptionState::Active { outputs, .. } = &mut descriptor.subscription else {
            return Ok(());
        };
        outputs.remove(&event.id);
        if !outputs.is_empty() {
            return Ok(());
        }
        log::debug!("Last subscription to {} released", event.sid);
        descriptor.subscription = SubscriptionState::Available;
        self.sub_handles.remove(&event.sid);
        self.emit(SubscriptionUpdatedEvent { sid: event.sid, subscribe: false }.into()).await
    }

    // MARK: - Packets

    async fn handle_packet_received(&mut self, bytes: Bytes) -> Result<(), InternalError> {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("Failed to decode packet: {}", err);
                return Ok(());
            }
        };
        let handle = packet.header.track_handle;
        let Some(sid) = self.sub_handles.sid(handle).cloned() else {
            log::debug!("Packet for unknown subscriber handle {}", handle);
            return Ok(());
        };
        let Some(descriptor) = self.descriptors.get_mut(&sid) else {
            return Err(anyhow!("Missing descriptor for {}", sid).into());
        };
        let SubscriptionState::Active { pipeline, outputs } = &mut descriptor.subscription else {
            log::debug!("Packet for {} without active subscription", sid);
            return Ok(());
        };

        let output = pipeline.process(packet);
        if let Some(frame) = output.frame {
            Self::fan_out(&sid, outputs, frame);
        }
        let Some(error) = output.dropped else { return Ok(()) };
        log::debug!("Track {}: {}", sid, error);
        if !self.report_drops {
            return Ok(());
        }
        self.emit(FrameDroppedEvent { sid, error }.into()).await
    }

    /// Delivers a frame to every subscriber; a lagging subscriber misses the frame
    /// without holding up the others.
    fn fan_out(
        sid: &DataTrackSid,
        outputs: &mut HashMap<u64, mpsc::Sender<DataTrackFrame>>,
        frame: DataTrackFrame,
    ) {
        outputs.retain(|id, frame_tx| match frame_tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Subscriber {} to {} is lagging, dropping frame", id, sid);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    async fn emit(&self, event: OutputEvent) -> Result<(), InternalError> {
        Ok(self.event_out_tx.send(event).await.context("Output stream closed")?)
    }

    /// Performs cleanup before the task ends.
    fn shutdown(self) {
        for (_, descriptor) in self.descriptors {
            descriptor.state_tx.send_replace(RemoteTrackState::Unpublished);
            if let SubscriptionState::Pending { waiters } = descriptor.subscription {
                for waiter in waiters.into_values() {
                    _ = waiter.result_tx.send(Err(SubscribeError::Disconnected));
                }
            }
        }
    }

    /// How long to wait for the SFU to assign a subscriber handle before timeout.
    const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Number of [`InputEvent`]s to buffer.
    const INPUT_BUFFER_SIZE: usize = 128;

    /// Number of [`OutputEvent`]s to buffer.
    const OUTPUT_BUFFER_SIZE: usize = 16;

    /// Number of frames buffered per subscription.
    const FRAME_BUFFER_SIZE: usize = 16;
}

/// Channel for sending [`InputEvent`]s to [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerInput {
    event_in_tx: mpsc::Sender<InputEvent>,
}

impl ManagerInput {
    /// Sends an input event to the manager's task to be processed.
    pub fn send(&self, event: InputEvent) -> Result<(), InternalError> {
        Ok(self.event_in_tx.try_send(event).context("Failed to send input event")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        e2ee::test_providers::XorProvider,
        local::packetizer::{Packetizer, PacketizerFrame},
        packet::FrameMarker,
    };
    use fake::{
        faker::{internet::en::SafeEmail, lorem::en::Word},
        Fake, Faker,
    };
    use futures_util::StreamExt;
    use std::pin::Pin;
    use tokio::time;

    type Output = Pin<Box<dyn Stream<Item = OutputEvent> + Send>>;

    struct Harness {
        input: ManagerInput,
        output: Output,
    }

    impl Harness {
        fn new(options: ManagerOptions) -> Self {
            let (manager, input, output) = Manager::new(options);
            tokio::spawn(manager.run());
            Self { input, output: Box::pin(output) }
        }

        async fn next(&mut self) -> OutputEvent {
            time::timeout(Duration::from_secs(1), self.output.next())
                .await
                .expect("Timed out waiting for output event")
                .expect("Output stream ended")
        }

        /// Shuts the manager down, asserting it produces no further output.
        async fn shutdown_and_expect_end(mut self) {
            self.input.send(InputEvent::Shutdown).unwrap();
            let next = time::timeout(Duration::from_secs(1), self.output.next()).await.unwrap();
            assert!(next.is_none(), "Unexpected output: {next:?}");
        }

        async fn next_subscription_update(&mut self) -> SubscriptionUpdatedEvent {
            match self.next().await {
                OutputEvent::SubscriptionUpdated(event) => event,
                other => panic!("Expected subscription update, got {other:?}"),
            }
        }

        /// Publishes tracks from one participant and returns the resulting track objects.
        async fn publish(
            &mut self,
            identity: &str,
            infos: Vec<DataTrackInfo>,
        ) -> Vec<RemoteDataTrack> {
            let count = infos.len();
            let event = PublicationUpdatesEvent {
                updates: HashMap::from([(identity.to_string(), infos)]),
            };
            self.input.send(event.into()).unwrap();
            let mut tracks = Vec::new();
            while tracks.len() < count {
                match self.next().await {
                    OutputEvent::TrackAvailable(track) => tracks.push(track),
                    other => panic!("Expected track, got {other:?}"),
                }
            }
            tracks
        }

        async fn publish_one(&mut self, uses_e2ee: bool) -> RemoteDataTrack {
            let info = DataTrackInfo { uses_e2ee, ..Faker.fake() };
            let identity: String = SafeEmail().fake();
            self.publish(&identity, vec![info]).await.remove(0)
        }

        fn assign_handle(&self, handle: Handle, sid: &DataTrackSid) {
            let event = SubscriberHandlesEvent { mapping: HashMap::from([(handle, sid.clone())]) };
            self.input.send(event.into()).unwrap();
        }

        fn send_frame(&self, packetizer: &mut Packetizer, payload: &[u8]) {
            let frame =
                PacketizerFrame { payload: Bytes::copy_from_slice(payload), ..Default::default() };
            for packet in packetizer.packetize(frame).unwrap() {
                self.input.send(InputEvent::PacketReceived(packet.encode())).unwrap();
            }
        }
    }

    fn spawn_subscribe(
        track: &RemoteDataTrack,
    ) -> tokio::task::JoinHandle<Result<DataTrackSubscription, SubscribeError>> {
        let track = track.clone();
        tokio::spawn(async move { track.subscribe().await })
    }

    /// Subscribes to the track, answering the SFU request with `handle`.
    async fn subscribe(
        harness: &mut Harness,
        track: &RemoteDataTrack,
        handle: Handle,
    ) -> DataTrackSubscription {
        let pending = spawn_subscribe(track);
        let update = harness.next_subscription_update().await;
        assert_eq!(
            update,
            SubscriptionUpdatedEvent { sid: track.info().sid().clone(), subscribe: true }
        );
        harness.assign_handle(handle, track.info().sid());
        pending.await.unwrap().unwrap()
    }

    async fn next_frame(subscription: &mut DataTrackSubscription) -> Option<DataTrackFrame> {
        time::timeout(Duration::from_secs(1), subscription.next()).await.unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_task_shutdown() {
        let (manager, input, _) = Manager::new(ManagerOptions::default());
        let join_handle = tokio::spawn(manager.run());
        input.send(InputEvent::Shutdown).unwrap();
        time::timeout(Duration::from_secs(1), join_handle).await.unwrap().unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_track_available() {
        let mut harness = Harness::new(ManagerOptions::default());
        let identity: String = SafeEmail().fake();
        let name: String = Word().fake();
        let info = DataTrackInfo { name: name.clone(), uses_e2ee: false, ..Faker.fake() };

        let tracks = harness.publish(&identity, vec![info.clone()]).await;
        let track = &tracks[0];
        assert!(track.is_published());
        assert_eq!(track.info(), &info);
        assert_eq!(track.info().name(), name);
        assert_eq!(track.publisher_identity(), identity);

        // Republishing the same set produces nothing new.
        let event = PublicationUpdatesEvent { updates: HashMap::from([(identity, vec![info])]) };
        harness.input.send(event.into()).unwrap();
        harness.shutdown_and_expect_end().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_subscribe_and_receive() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();

        let mut subscription = subscribe(&mut harness, &track, handle).await;
        assert_eq!(subscription.sid(), track.info().sid());

        let mut packetizer = Packetizer::new(handle, 64);
        harness.send_frame(&mut packetizer, &[0xAB; 200]);
        harness.send_frame(&mut packetizer, b"second");

        let frame = next_frame(&mut subscription).await.unwrap();
        assert_eq!(frame.payload(), vec![0xAB; 200]);
        let frame = next_frame(&mut subscription).await.unwrap();
        assert_eq!(frame.payload(), Bytes::from_static(b"second"));
    }

    #[test_log::test(tokio::test)]
    async fn test_fan_out_single_sfu_request() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();

        let first = spawn_subscribe(&track);
        assert!(harness.next_subscription_update().await.subscribe);
        let second = spawn_subscribe(&track);
        // Give the second request time to reach the manager; it must not produce a request.
        time::sleep(Duration::from_millis(20)).await;
        harness.assign_handle(handle, track.info().sid());

        let mut first = first.await.unwrap().unwrap();
        let mut second = second.await.unwrap().unwrap();
        let mut third = track.subscribe().await.unwrap(); // Already active

        let mut packetizer = Packetizer::new(handle, 1_500);
        harness.send_frame(&mut packetizer, b"hello");
        for subscription in [&mut first, &mut second, &mut third] {
            let frame = next_frame(subscription).await.unwrap();
            assert_eq!(frame.payload(), Bytes::from_static(b"hello"));
        }

        // Dropping one consumer leaves the others subscribed.
        drop(first);
        harness.send_frame(&mut packetizer, b"again");
        assert!(next_frame(&mut second).await.is_some());
        assert!(next_frame(&mut third).await.is_some());

        drop(second);
        drop(third);
        let update = harness.next_subscription_update().await;
        assert!(!update.subscribe);

        // Exactly one unsubscribe request.
        harness.shutdown_and_expect_end().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_lagging_subscriber_does_not_block_others() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();

        let mut active = subscribe(&mut harness, &track, handle).await;
        let mut lagging = track.subscribe().await.unwrap();

        let mut packetizer = Packetizer::new(handle, 1_500);
        let frame_count = Manager::FRAME_BUFFER_SIZE + 4;
        for index in 0..frame_count {
            harness.send_frame(&mut packetizer, &[index as u8]);
            let frame = next_frame(&mut active).await.unwrap();
            assert_eq!(frame.payload(), vec![index as u8]);
        }

        let mut received = 0;
        while let Ok(Some(_)) = time::timeout(Duration::from_millis(20), lagging.next()).await {
            received += 1;
        }
        assert_eq!(received, Manager::FRAME_BUFFER_SIZE);
    }

    #[test_log::test(tokio::test)]
    async fn test_subscribe_already_cancelled() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = {
            let track = track.clone();
            tokio::spawn(async move { track.subscribe_with_cancel(cancel).await })
        };
        assert!(harness.next_subscription_update().await.subscribe);
        assert!(!harness.next_subscription_update().await.subscribe);
        assert!(matches!(result.await.unwrap(), Err(SubscribeError::Cancelled)));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_subscribe_timeout() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;

        let result = spawn_subscribe(&track);
        assert!(harness.next_subscription_update().await.subscribe);
        // SFU never assigns a handle.
        let update = harness.next_subscription_update().await;
        assert_eq!(
            update,
            SubscriptionUpdatedEvent { sid: track.info().sid().clone(), subscribe: false }
        );
        assert!(matches!(result.await.unwrap(), Err(SubscribeError::Timeout)));
    }

    #[test_log::test(tokio::test)]
    async fn test_cancel_one_of_many_waiters() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();

        let staying = spawn_subscribe(&track);
        assert!(harness.next_subscription_update().await.subscribe);

        let cancel = CancellationToken::new();
        let leaving = {
            let track = track.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { track.subscribe_with_cancel(cancel).await })
        };
        time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(matches!(leaving.await.unwrap(), Err(SubscribeError::Cancelled)));

        harness.assign_handle(handle, track.info().sid());
        let _subscription = staying.await.unwrap().unwrap();

        // No unsubscribe was requested for the cancelled waiter.
        harness.shutdown_and_expect_end().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_request_cancels() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;

        let pending = spawn_subscribe(&track);
        assert!(harness.next_subscription_update().await.subscribe);
        pending.abort();
        assert!(!harness.next_subscription_update().await.subscribe);
    }

    #[test_log::test(tokio::test)]
    async fn test_track_unpublished() {
        let mut harness = Harness::new(ManagerOptions::default());
        let identity: String = SafeEmail().fake();
        let infos = vec![
            DataTrackInfo { uses_e2ee: false, ..Faker.fake() },
            DataTrackInfo { uses_e2ee: false, ..Faker.fake() },
        ];
        let tracks = harness.publish(&identity, infos.clone()).await;
        let (pending_track, kept_track) = if tracks[0].info() == &infos[0] {
            (&tracks[0], &tracks[1])
        } else {
            (&tracks[1], &tracks[0])
        };

        let pending = spawn_subscribe(pending_track);
        assert!(harness.next_subscription_update().await.subscribe);

        // Only the second track remains published.
        let event = PublicationUpdatesEvent {
            updates: HashMap::from([(identity.clone(), vec![infos[1].clone()])]),
        };
        harness.input.send(event.into()).unwrap();
        match harness.next().await {
            OutputEvent::TrackUnavailable(event) => {
                assert_eq!(&event.sid, infos[0].sid());
                assert_eq!(event.publisher_identity, identity);
            }
            other => panic!("Expected unavailable track, got {other:?}"),
        }
        assert!(matches!(pending.await.unwrap(), Err(SubscribeError::Unpublished)));
        assert!(!pending_track.is_published());
        assert!(kept_track.is_published());
        pending_track.wait_for_unpublish().await;
        assert!(matches!(pending_track.subscribe().await, Err(SubscribeError::Unpublished)));
    }

    #[test_log::test(tokio::test)]
    async fn test_participant_disconnected_ends_streams() {
        let mut harness = Harness::new(ManagerOptions::default());
        let identity: String = SafeEmail().fake();
        let info = DataTrackInfo { uses_e2ee: false, ..Faker.fake() };
        let track = harness.publish(&identity, vec![info]).await.remove(0);
        let mut subscription = subscribe(&mut harness, &track, Faker.fake()).await;

        let event = ParticipantDisconnectedEvent { identity };
        harness.input.send(event.into()).unwrap();
        assert_eq!(
            harness.next_subscription_update().await,
            SubscriptionUpdatedEvent { sid: track.info().sid().clone(), subscribe: false }
        );
        assert!(matches!(harness.next().await, OutputEvent::TrackUnavailable(_)));
        assert!(next_frame(&mut subscription).await.is_none());
        assert!(!track.is_published());

        // Unsubscribed once; releasing the subscription sends nothing further.
        drop(subscription);
        harness.shutdown_and_expect_end().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_participant_disconnected_without_active_subscription() {
        let mut harness = Harness::new(ManagerOptions::default());
        let identity: String = SafeEmail().fake();
        let infos: Vec<DataTrackInfo> =
            (0..2).map(|_| DataTrackInfo { uses_e2ee: false, ..Faker.fake() }).collect();
        let tracks = harness.publish(&identity, infos).await;
        let pending = spawn_subscribe(&tracks[0]);
        assert!(harness.next_subscription_update().await.subscribe);

        let event = ParticipantDisconnectedEvent { identity };
        harness.input.send(event.into()).unwrap();
        for _ in 0..2 {
            let event = harness.next().await;
            assert!(matches!(event, OutputEvent::TrackUnavailable(_)), "Got {event:?}");
        }
        assert!(matches!(pending.await.unwrap(), Err(SubscribeError::Disconnected)));
        assert!(tracks.iter().all(|track| !track.is_published()));
        harness.shutdown_and_expect_end().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_rejects_pending() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;

        let pending = spawn_subscribe(&track);
        assert!(harness.next_subscription_update().await.subscribe);
        harness.input.send(InputEvent::Shutdown).unwrap();
        assert!(matches!(pending.await.unwrap(), Err(SubscribeError::Disconnected)));
        assert!(!track.is_published());
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_track() {
        let harness = Harness::new(ManagerOptions::default());
        let (result_tx, result_rx) = oneshot::channel();
        let event =
            SubscribeEvent { sid: Faker.fake(), cancel: CancellationToken::new(), result_tx };
        harness.input.send(event.into()).unwrap();
        assert!(matches!(result_rx.await.unwrap(), Err(SubscribeError::Disconnected)));
    }

    #[test_log::test(tokio::test)]
    async fn test_e2ee_without_provider() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(true).await;
        assert!(matches!(track.subscribe().await, Err(SubscribeError::Internal(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_e2ee_subscription() {
        let provider = Arc::new(XorProvider { key_index: 0x42, fail: false });
        let options = ManagerOptions { decryption: Some(provider.clone()), ..Default::default() };
        let mut harness = Harness::new(options);
        let track = harness.publish_one(true).await;
        let handle: Handle = Faker.fake();
        let mut subscription = subscribe(&mut harness, &track, handle).await;

        let mut sender = crate::local::pipeline::Pipeline::new(
            &DataTrackInfo { pub_handle: handle, uses_e2ee: true, ..Faker.fake() },
            Some(provider),
            1_500,
        )
        .unwrap();
        for packet in sender.process(DataTrackFrame::new(&b"top secret"[..])).unwrap() {
            harness.input.send(InputEvent::PacketReceived(packet.encode())).unwrap();
        }
        let frame = next_frame(&mut subscription).await.unwrap();
        assert_eq!(frame.payload(), Bytes::from_static(b"top secret"));
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_reassignment() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let old_handle: Handle = 1u16.try_into().unwrap();
        let new_handle: Handle = 2u16.try_into().unwrap();
        let mut subscription = subscribe(&mut harness, &track, old_handle).await;

        harness.assign_handle(new_handle, track.info().sid());
        harness.send_frame(&mut Packetizer::new(old_handle, 1_500), b"stale");
        harness.send_frame(&mut Packetizer::new(new_handle, 1_500), b"fresh");

        let frame = next_frame(&mut subscription).await.unwrap();
        assert_eq!(frame.payload(), Bytes::from_static(b"fresh"));
    }

    #[test_log::test(tokio::test)]
    async fn test_report_drops() {
        let mut harness =
            Harness::new(ManagerOptions { report_drops: true, ..Default::default() });
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();
        let _subscription = subscribe(&mut harness, &track, handle).await;

        let mut packets: Vec<_> = Packetizer::new(handle, 32)
            .packetize(PacketizerFrame { payload: vec![0; 64].into(), ..Default::default() })
            .unwrap()
            .collect();
        assert_eq!(packets[0].header.marker, FrameMarker::Start);
        packets.remove(0);
        for packet in packets {
            harness.input.send(InputEvent::PacketReceived(packet.encode())).unwrap();
        }

        match harness.next().await {
            OutputEvent::FrameDropped(event) => {
                assert_eq!(&event.sid, track.info().sid());
                assert_eq!(event.error.frame_number(), 0);
            }
            other => panic!("Expected dropped frame, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_packet_ignored() {
        let mut harness = Harness::new(ManagerOptions::default());
        let track = harness.publish_one(false).await;
        let handle: Handle = Faker.fake();
        let mut subscription = subscribe(&mut harness, &track, handle).await;

        harness.input.send(InputEvent::PacketReceived(Bytes::from_static(&[0xFF; 3]))).unwrap();
        harness.send_frame(&mut Packetizer::new(handle, 1_500), b"ok");
        let frame = next_frame(&mut subscription).await.unwrap();
        assert_eq!(frame.payload(), Bytes::from_static(b"ok"));
    }
}
