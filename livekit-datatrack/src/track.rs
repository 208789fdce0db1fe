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

use crate::{local::LocalTrackInner, packet::Handle, remote::RemoteTrackInner};
use from_variants::FromVariants;
use std::{fmt, marker::PhantomData, ops::Deref, sync::Arc};

/// Track for communicating application-specific data between participants in a room.
///
/// The type parameter is either [`crate::api::Local`] (published by the local
/// participant) or [`crate::api::Remote`] (published by a remote participant).
/// Cloning is cheap; all clones refer to the same track.
///
#[derive(Debug)]
pub struct DataTrack<L> {
    pub(crate) info: Arc<DataTrackInfo>,
    pub(crate) inner: Arc<DataTrackInner>,
    pub(crate) _location: PhantomData<L>,
}

impl<L> Clone for DataTrack<L> {
    fn clone(&self) -> Self {
        Self { info: self.info.clone(), inner: self.inner.clone(), _location: PhantomData }
    }
}

#[derive(Debug, FromVariants)]
pub(crate) enum DataTrackInner {
    Local(LocalTrackInner),
    Remote(RemoteTrackInner),
}

impl<L> DataTrack<L> {
    /// Information about the data track.
    pub fn info(&self) -> &DataTrackInfo {
        &self.info
    }

    /// Whether or not the track is still published.
    pub fn is_published(&self) -> bool {
        match self.inner.as_ref() {
            DataTrackInner::Local(inner) => inner.is_published(),
            DataTrackInner::Remote(inner) => inner.is_published(),
        }
    }

    /// Waits until the track is unpublished.
    ///
    /// Returns immediately if the track is already unpublished.
    ///
    pub async fn wait_for_unpublish(&self) {
        match self.inner.as_ref() {
            DataTrackInner::Local(inner) => inner.wait_for_unpublish().await,
            DataTrackInner::Remote(inner) => inner.wait_for_unpublish().await,
        }
    }
}

/// Information about a published data track.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub struct DataTrackInfo {
    pub(crate) sid: DataTrackSid,
    pub(crate) pub_handle: Handle,
    pub(crate) name: String,
    pub(crate) uses_e2ee: bool,
}

impl DataTrackInfo {
    /// Creates track info, typically from an SFU message.
    pub fn new(
        sid: impl Into<DataTrackSid>,
        pub_handle: Handle,
        name: impl Into<String>,
        uses_e2ee: bool,
    ) -> Self {
        Self { sid: sid.into(), pub_handle, name: name.into(), uses_e2ee }
    }

    /// Unique track identifier assigned by the SFU.
    pub fn sid(&self) -> &DataTrackSid {
        &self.sid
    }

    /// Handle the publisher attaches to the track's packets.
    pub fn pub_handle(&self) -> Handle {
        self.pub_handle
    }

    /// Name of the track assigned by the publisher.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether or not frames sent on the track use end-to-end encryption.
    pub fn uses_e2ee(&self) -> bool {
        self.uses_e2ee
    }
}

/// SFU-assigned identifier uniquely identifying a data track.
///
/// The value is opaque to the client.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct DataTrackSid(String);

impl From<String> for DataTrackSid {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for DataTrackSid {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl From<DataTrackSid> for String {
    fn from(sid: DataTrackSid) -> Self {
        sid.0
    }
}

impl Deref for DataTrackSid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for DataTrackSid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
impl fake::Dummy<fake::Faker> for DataTrackSid {
    fn dummy_with_rng<R: rand::Rng + ?Sized>(_: &fake::Faker, rng: &mut R) -> Self {
        const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
        let suffix: String =
            (0..12).map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char).collect();
        Self(format!("DTR_{suffix}"))
    }
}
