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
    api::{DataTrack, DataTrackFrame, DataTrackInfo, DataTrackSid, InternalError},
    track::DataTrackInner,
};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use events::{InputEvent, SubscribeEvent};
use futures_core::Stream;
use std::{fmt, marker::PhantomData, sync::Arc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

pub(crate) mod depacketizer;
pub(crate) mod events;
pub(crate) mod manager;
pub(crate) mod pipeline;

/// Data track published by a remote participant.
pub type RemoteDataTrack = DataTrack<Remote>;

/// Marker type indicating a [`DataTrack`] belongs to a remote participant.
#[derive(Debug, Clone)]
pub struct Remote;

impl DataTrack<Remote> {
    pub(crate) fn new(info: Arc<DataTrackInfo>, inner: RemoteTrackInner) -> Self {
        Self { info, inner: Arc::new(inner.into()), _location: PhantomData }
    }

    fn inner(&self) -> &RemoteTrackInner {
        match &*self.inner {
            DataTrackInner::Remote(inner) => inner,
            DataTrackInner::Local(_) => unreachable!(), // Safe (type state)
        }
    }

    /// Subscribes to the data track to receive frames.
    ///
    /// The first subscription asks the SFU to forward the track; later ones
    /// share it. Each subscription receives every frame completed after it is
    /// established. Dropping the returned future cancels the request.
    ///
    pub async fn subscribe(&self) -> Result<DataTrackSubscription, SubscribeError> {
        self.subscribe_with_cancel(CancellationToken::new()).await
    }

    /// Like [`Self::subscribe`], additionally failing with
    /// [`SubscribeError::Cancelled`] once `cancel` is triggered.
    pub async fn subscribe_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<DataTrackSubscription, SubscribeError> {
        if !self.is_published() {
            return Err(SubscribeError::Unpublished);
        }
        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let (result_tx, result_rx) = oneshot::channel();
        let event = SubscribeEvent { sid: self.info.sid.clone(), cancel, result_tx };
        {
            let event_in_tx =
                self.inner().event_in_tx.upgrade().ok_or(SubscribeError::Disconnected)?;
            event_in_tx.send(event.into()).await.map_err(|_| SubscribeError::Disconnected)?;
        }
        result_rx.await.map_err(|_| SubscribeError::Disconnected)?
    }

    /// Identity of the participant who published the track.
    pub fn publisher_identity(&self) -> &str {
        &self.inner().publisher_identity
    }
}

#[derive(Debug)]
pub(crate) struct RemoteTrackInner {
    pub publisher_identity: Arc<str>,
    pub state_rx: watch::Receiver<RemoteTrackState>,
    pub event_in_tx: mpsc::WeakSender<InputEvent>,
}

impl RemoteTrackInner {
    pub fn is_published(&self) -> bool {
        self.state_rx.borrow().is_published()
    }

    pub async fn wait_for_unpublish(&self) {
        let mut state_rx = self.state_rx.clone();
        _ = state_rx.wait_for(|state| !state.is_published()).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteTrackState {
    Published,
    Unpublished,
}

impl RemoteTrackState {
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Published)
    }
}

/// Stream of frames received on a subscribed remote track.
///
/// Ends once the track is unpublished, its publisher leaves or the engine shuts
/// down. Dropping the last subscription to a track unsubscribes from it.
///
pub struct DataTrackSubscription {
    sid: DataTrackSid,
    frame_rx: mpsc::Receiver<DataTrackFrame>,
    release: Option<Release>,
}

/// Notifies the manager when a subscription is dropped.
#[derive(Debug)]
pub(crate) struct Release {
    pub id: u64,
    pub release_tx: mpsc::UnboundedSender<SubscriptionReleased>,
}

/// A [`DataTrackSubscription`] was dropped.
#[derive(Debug)]
pub(crate) struct SubscriptionReleased {
    pub sid: DataTrackSid,
    pub id: u64,
}

impl DataTrackSubscription {
    pub(crate) fn new(
        sid: DataTrackSid,
        frame_rx: mpsc::Receiver<DataTrackFrame>,
        release: Release,
    ) -> Self {
        Self { sid, frame_rx, release: Some(release) }
    }

    /// Identifier of the subscribed track.
    pub fn sid(&self) -> &DataTrackSid {
        &self.sid
    }
}

impl Stream for DataTrackSubscription {
    type Item = DataTrackFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().frame_rx.poll_recv(cx)
    }
}

impl Drop for DataTrackSubscription {
    fn drop(&mut self) {
        let Some(Release { id, release_tx }) = self.release.take() else { return };
        _ = release_tx.send(SubscriptionReleased { sid: self.sid.clone(), id });
    }
}

impl fmt::Debug for DataTrackSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTrackSubscription").field("sid", &self.sid).finish_non_exhaustive()
    }
}

/// An error that can occur when subscribing to a data track.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Track is no longer published")]
    Unpublished,
    #[error("SFU did not answer the subscribe request in time")]
    Timeout,
    #[error("Not connected")]
    Disconnected,
    #[error("Subscribe request cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(#[from] InternalError),
}
