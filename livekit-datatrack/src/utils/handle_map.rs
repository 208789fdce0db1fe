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

use crate::{packet::Handle, track::DataTrackSid};
use std::collections::HashMap;

/// Bidirectional map between subscriber handles and track SIDs.
///
/// Each handle maps to at most one SID and vice versa.
///
#[derive(Debug, Default)]
pub struct HandleMap {
    by_handle: HashMap<Handle, DataTrackSid>,
    by_sid: HashMap<DataTrackSid, Handle>,
}

impl HandleMap {
    /// Associates `handle` with `sid`, replacing any previous association
    /// of either side.
    ///
    /// Returns the handle previously assigned to `sid`, if any.
    ///
    pub fn insert(&mut self, handle: Handle, sid: DataTrackSid) -> Option<Handle> {
        if let Some(stale_sid) = self.by_handle.remove(&handle) {
            self.by_sid.remove(&stale_sid);
        }
        let previous = self.by_sid.insert(sid.clone(), handle);
        if let Some(previous) = previous {
            self.by_handle.remove(&previous);
        }
        self.by_handle.insert(handle, sid);
        previous
    }

    pub fn sid(&self, handle: Handle) -> Option<&DataTrackSid> {
        self.by_handle.get(&handle)
    }

    /// Removes the entry for `sid`, returning its handle.
    pub fn remove(&mut self, sid: &DataTrackSid) -> Option<Handle> {
        let handle = self.by_sid.remove(sid)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }
}
