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

use bytes::Bytes;
use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A unit of application data sent on a data track: a payload of any size
/// plus optional metadata.
///
/// # Examples
///
/// ```
/// # use livekit_datatrack::api::DataTrackFrame;
/// let frame = DataTrackFrame::new(vec![0xFA; 256]).with_user_timestamp(1_700_000_000_000);
///
/// assert_eq!(frame.payload().len(), 256);
/// assert_eq!(frame.user_timestamp(), Some(1_700_000_000_000));
/// ```
///
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DataTrackFrame {
    pub(crate) payload: Bytes,
    pub(crate) user_timestamp: Option<u64>,
}

impl DataTrackFrame {
    /// Creates a frame from the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), user_timestamp: None }
    }

    /// Associates a user timestamp with the frame.
    pub fn with_user_timestamp(self, value: u64) -> Self {
        Self { user_timestamp: Some(value), ..self }
    }

    /// Associates the current UNIX time in milliseconds with the frame.
    pub fn with_user_timestamp_now(self) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .inspect_err(|err| log::error!("System time before UNIX epoch: {err}"))
            .ok()
            .and_then(|elapsed| u64::try_from(elapsed.as_millis()).ok());
        Self { user_timestamp: now, ..self }
    }

    /// Returns the frame's payload (reference counted, no copy).
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Returns the user timestamp, if one is associated.
    pub fn user_timestamp(&self) -> Option<u64> {
        self.user_timestamp
    }

    /// Time elapsed since the user timestamp, interpreted as UNIX milliseconds
    /// (as set by [`Self::with_user_timestamp_now`]).
    ///
    /// None if there is no timestamp or it lies in the future.
    ///
    pub fn duration_since_timestamp(&self) -> Option<Duration> {
        let sent_at = UNIX_EPOCH.checked_add(Duration::from_millis(self.user_timestamp?))?;
        SystemTime::now().duration_since(sent_at).ok()
    }
}

impl fmt::Debug for DataTrackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTrackFrame")
            .field("payload_len", &self.payload.len())
            .field("user_timestamp", &self.user_timestamp)
            .finish()
    }
}

impl From<Bytes> for DataTrackFrame {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<Vec<u8>> for DataTrackFrame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&'static [u8]> for DataTrackFrame {
    fn from(payload: &'static [u8]) -> Self {
        Self::new(payload)
    }
}

impl From<Box<[u8]>> for DataTrackFrame {
    fn from(payload: Box<[u8]>) -> Self {
        Self::new(payload)
    }
}
