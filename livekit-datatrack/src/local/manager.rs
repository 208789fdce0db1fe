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
    events::*, pipeline::Pipeline, LocalDataTrack, LocalTrackInner, LocalTrackState,
    UnpublishInitiator,
};
use crate::{
    api::{DataTrackInfo, DataTrackOptions, InternalError, PublishError},
    e2ee::EncryptionProvider,
    packet::{Handle, HandleAllocator},
    utils::{watch_expiry, Expiry},
};
use anyhow::{anyhow, Context};
use futures_core::Stream;
use parking_lot::Mutex;
use std::{collections::HashMap, mem, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Options for creating a [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Provider used to encrypt outgoing frame payloads.
    ///
    /// Tracks are published with end-to-end encryption whenever a provider is
    /// set, unless disabled in the track's [`DataTrackOptions`].
    ///
    pub encryption: Option<Arc<dyn EncryptionProvider>>,
    /// Maximum size of an encoded packet in bytes, including its header.
    pub mtu: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self { encryption: None, mtu: Manager::DEFAULT_MTU }
    }
}

/// System for managing data track publications.
pub struct Manager {
    encryption: Option<Arc<dyn EncryptionProvider>>,
    mtu: usize,
    event_in_tx: mpsc::WeakSender<InputEvent>,
    event_in_rx: mpsc::Receiver<InputEvent>,
    event_out_tx: mpsc::Sender<OutputEvent>,
    handle_allocator: HandleAllocator,
    descriptors: HashMap<Handle, Descriptor>,
}

#[derive(Debug)]
enum Descriptor {
    /// Publication is awaiting SFU response.
    Pending(PendingPublication),
    /// Publication is active.
    Active { state_tx: watch::Sender<LocalTrackState> },
    /// Client unpublished the track; awaiting SFU acknowledgement.
    Unpublishing {
        state_tx: watch::Sender<LocalTrackState>,
        /// Stops the acknowledgement timeout once dropped.
        _expiry: DropGuard,
    },
}

#[derive(Debug)]
struct PendingPublication {
    uses_e2ee: bool,
    result_tx: oneshot::Sender<Result<LocalDataTrack, PublishError>>,
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

        let event_in = ManagerInput { event_in_tx: event_in_tx.clone() };
        let manager = Manager {
            encryption: options.encryption,
            mtu: options.mtu,
            event_in_tx: event_in_tx.downgrade(),
            event_in_rx,
            event_out_tx,
            handle_allocator: HandleAllocator::default(),
            descriptors: HashMap::new(),
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
        while let Some(event) = self.event_in_rx.recv().await {
            log::debug!("Input event: {:?}", event);
            let result = match event {
                InputEvent::Publish(event) => self.handle_publish(event).await,
                InputEvent::PublishResult(event) => self.handle_publish_result(event).await,
                InputEvent::PublishExpired(event) => self.handle_publish_expired(event).await,
                InputEvent::Unpublish(event) => self.handle_unpublish(event).await,
                InputEvent::UnpublishExpired(event) => self.handle_unpublish_expired(event),
                InputEvent::SfuUnpublished(event) => self.handle_sfu_unpublished(event),
                InputEvent::Shutdown => break,
            };
            if let Err(err) = result {
                log::error!("Failed to handle input event: {}", err);
            }
        }
        self.shutdown().await;
        log::debug!("Task ended");
    }

    async fn handle_publish(&mut self, event: PublishEvent) -> Result<(), InternalError> {
        let Some(handle) = self.handle_allocator.allocate() else {
            _ = event.result_tx.send(Err(PublishError::LimitReached));
            return Ok(());
        };
        if self.descriptors.contains_key(&handle) {
            let error = anyhow!("Descriptor for {} already exists", handle);
            _ = event.result_tx.send(Err(PublishError::Internal(error.into())));
            return Ok(());
        }

        let uses_e2ee = self.encryption.is_some() && !event.options.disable_e2ee;
        let expiry = watch_expiry(
            Self::PUBLISH_TIMEOUT,
            event.cancel,
            self.event_in_tx.clone(),
            move |expiry| PublishExpiredEvent { handle, expiry }.into(),
        );
        let pending = PendingPublication { uses_e2ee, result_tx: event.result_tx, _expiry: expiry };
        self.descriptors.insert(handle, Descriptor::Pending(pending));

        let request = PublishRequestEvent { handle, name: event.options.name, uses_e2ee };
        self.emit(request.into()).await
    }

    async fn handle_publish_result(
        &mut self,
        event: PublishResultEvent,
    ) -> Result<(), InternalError> {
        let handle = event.handle;
        let Some(PendingPublication { uses_e2ee, result_tx, .. }) = self.take_pending(handle)
        else {
            return Err(anyhow!("No pending publication for {}", handle).into());
        };

        let info = match event.result {
            Ok(info) => info,
            Err(err) => {
                log::debug!("Publication of {} rejected: {}", handle, err);
                _ = result_tx.send(Err(err));
                return Ok(());
            }
        };
        if result_tx.is_closed() {
            log::debug!("Publisher of {} went away, unpublishing", handle);
            return self.emit(UnpublishRequestEvent { handle }.into()).await;
        }
        match self.create_local_track(handle, info, uses_e2ee) {
            Ok(track) => _ = result_tx.send(Ok(track)),
            Err(err) => {
                _ = result_tx.send(Err(err.into()));
                self.emit(UnpublishRequestEvent { handle }.into()).await?;
            }
        }
        Ok(())
    }

    fn create_local_track(
        &mut self,
        handle: Handle,
        info: DataTrackInfo,
        requested_e2ee: bool,
    ) -> Result<LocalDataTrack, InternalError> {
        if info.pub_handle != handle {
            Err(anyhow!("SFU assigned {} to publication {}", info.pub_handle, handle))?
        }
        if info.uses_e2ee != requested_e2ee {
            Err(anyhow!(
                "SFU published {} with uses_e2ee={}, requested {}",
                info.sid,
                info.uses_e2ee,
                requested_e2ee
            ))?
        }
        let encryption = if info.uses_e2ee { self.encryption.clone() } else { None };
        let pipeline = Pipeline::new(&info, encryption, self.mtu)?;

        let (state_tx, state_rx) = watch::channel(LocalTrackState::Published);
        tokio::spawn(Self::watch_client_unpublish(handle, state_rx, self.event_in_tx.clone()));
        self.descriptors.insert(handle, Descriptor::Active { state_tx: state_tx.clone() });

        let inner = LocalTrackInner {
            pipeline: Mutex::new(pipeline),
            state_tx,
            event_out_tx: self.event_out_tx.clone(),
        };
        log::debug!("Track published: sid={}, handle={}", info.sid, handle);
        Ok(LocalDataTrack::new(Arc::new(info), inner))
    }

    /// Notifies the manager once the track is unpublished through its handle.
    async fn watch_client_unpublish(
        handle: Handle,
        mut state_rx: watch::Receiver<LocalTrackState>,
        event_in_tx: mpsc::WeakSender<InputEvent>,
    ) {
        let state = match state_rx.wait_for(|state| !state.is_published()).await {
            Ok(state) => *state,
            Err(_) => return,
        };
        let LocalTrackState::Unpublished { initiator: UnpublishInitiator::Client } = state else {
            return;
        };
        let Some(event_in_tx) = event_in_tx.upgrade() else { return };
        _ = event_in_tx.send(UnpublishEvent { handle }.into()).await;
    }

    async fn handle_publish_expired(
        &mut self,
        event: PublishExpiredEvent,
    ) -> Result<(), InternalError> {
        let Some(PendingPublication { result_tx, .. }) = self.take_pending(event.handle) else {
            return Ok(()); // Resolved in the meantime
        };
        let error = match event.expiry {
            Expiry::Timeout => PublishError::Timeout,
            Expiry::Cancelled => PublishError::Cancelled,
        };
        log::debug!("Publication of {} ended: {}", event.handle, error);
        _ = result_tx.send(Err(error));
        // The SFU may still complete the request.
        self.emit(UnpublishRequestEvent { handle: event.handle }.into()).await
    }

    async fn handle_unpublish(&mut self, event: UnpublishEvent) -> Result<(), InternalError> {
        let handle = event.handle;
        let state_tx = match self.descriptors.remove(&handle) {
            Some(Descriptor::Active { state_tx }) => state_tx,
            Some(other) => {
                self.descriptors.insert(handle, other);
                log::debug!("Track {} is not active", handle);
                return Ok(());
            }
            None => {
                log::debug!("Track {} already unpublished", handle);
                return Ok(());
            }
        };
        let expiry = watch_expiry(
            Self::UNPUBLISH_TIMEOUT,
            CancellationToken::new(),
            self.event_in_tx.clone(),
            move |_| UnpublishExpiredEvent { handle }.into(),
        );
        self.descriptors.insert(handle, Descriptor::Unpublishing { state_tx, _expiry: expiry });
        self.emit(UnpublishRequestEvent { handle }.into()).await
    }

    fn handle_unpublish_expired(
        &mut self,
        event: UnpublishExpiredEvent,
    ) -> Result<(), InternalError> {
        if let Some(Descriptor::Unpublishing { .. }) = self.descriptors.get(&event.handle) {
            log::warn!("SFU did not acknowledge unpublish of {}", event.handle);
            self.descriptors.remove(&event.handle);
        }
        Ok(())
    }

    fn handle_sfu_unpublished(&mut self, event: SfuUnpublishedEvent) -> Result<(), InternalError> {
        let state_tx = match self.descriptors.remove(&event.handle) {
            Some(Descriptor::Active { state_tx } | Descriptor::Unpublishing { state_tx, .. }) => {
                state_tx
            }
            Some(pending) => {
                self.descriptors.insert(event.handle, pending);
                Err(anyhow!("Cannot unpublish pending track {}", event.handle))?
            }
            None => return Ok(()), // Acknowledges a withdrawn publication
        };
        Self::mark_unpublished(&state_tx, UnpublishInitiator::Sfu);
        log::debug!("Track unpublished: handle={}", event.handle);
        Ok(())
    }

    fn take_pending(&mut self, handle: Handle) -> Option<PendingPublication> {
        match self.descriptors.remove(&handle)? {
            Descriptor::Pending(pending) => Some(pending),
            active => {
                self.descriptors.insert(handle, active);
                None
            }
        }
    }

    /// Updates the track state unless it has already been unpublished.
    fn mark_unpublished(state_tx: &watch::Sender<LocalTrackState>, initiator: UnpublishInitiator) {
        state_tx.send_if_modified(|state| {
            if !state.is_published() {
                return false;
            }
            *state = LocalTrackState::Unpublished { initiator };
            true
        });
    }

    async fn emit(&self, event: OutputEvent) -> Result<(), InternalError> {
        Ok(self.event_out_tx.send(event).await.context("Output stream closed")?)
    }

    /// Performs cleanup before the task ends.
    ///
    /// Active tracks are unpublished while the output stream is still open.
    ///
    async fn shutdown(mut self) {
        for (handle, descriptor) in mem::take(&mut self.descriptors) {
            match descriptor {
                Descriptor::Pending(pending) => {
                    _ = pending.result_tx.send(Err(PublishError::Disconnected));
                }
                Descriptor::Active { state_tx } => {
                    if let Err(err) = self.emit(UnpublishRequestEvent { handle }.into()).await {
                        log::error!("Failed to request unpublish: {}", err);
                    }
                    Self::mark_unpublished(&state_tx, UnpublishInitiator::Shutdown);
                }
                Descriptor::Unpublishing { .. } => {}
            }
        }
    }

    /// How long to wait for an SFU response for a track publication before timeout.
    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long to wait for the SFU to acknowledge an unpublish request
    /// before forgetting the track.
    const UNPUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

    const DEFAULT_MTU: usize = 16_000;

    /// Number of [`InputEvent`]s to buffer.
    const INPUT_BUFFER_SIZE: usize = 16;

    /// Number of [`OutputEvent`]s to buffer.
    ///
    /// A frame is dropped if all of its packets cannot be buffered at once.
    ///
    const OUTPUT_BUFFER_SIZE: usize = 256;
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

    /// Publishes a data track with the given options.
    ///
    /// Resolves once the SFU accepts or rejects the publication, failing with
    /// [`PublishError::Timeout`] if it does not respond in time. Dropping the
    /// returned future cancels the request.
    ///
    pub async fn publish_track(
        &self,
        options: DataTrackOptions,
    ) -> Result<LocalDataTrack, PublishError> {
        self.publish_track_with_cancel(options, CancellationToken::new()).await
    }

    /// Like [`Self::publish_track`], additionally failing with
    /// [`PublishError::Cancelled`] once `cancel` is triggered.
    pub async fn publish_track_with_cancel(
        &self,
        options: DataTrackOptions,
        cancel: CancellationToken,
    ) -> Result<LocalDataTrack, PublishError> {
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let (result_tx, result_rx) = oneshot::channel();
        let event = PublishEvent { options, cancel, result_tx };
        self.event_in_tx.send(event.into()).await.map_err(|_| PublishError::Disconnected)?;
        result_rx.await.map_err(|_| PublishError::Disconnected)?
    }
}
