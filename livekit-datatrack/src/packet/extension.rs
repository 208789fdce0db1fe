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

use core::fmt;

/// Optional header fields, encoded as tag-length-value entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub struct Extensions {
    pub user_timestamp: Option<UserTimestampExt>,
    pub e2ee: Option<E2eeExt>,
}

impl Extensions {
    /// Whether no extension is present.
    pub fn is_empty(&self) -> bool {
        self.user_timestamp.is_none() && self.e2ee.is_none()
    }
}

/// Application-supplied timestamp associated with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub struct UserTimestampExt(pub u64);

/// Metadata required to decrypt an end-to-end encrypted frame.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(test, derive(fake::Dummy))]
pub struct E2eeExt {
    pub key_index: u8,
    pub iv: [u8; 12],
}

impl fmt::Debug for E2eeExt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key index and IV are not printed.
        f.debug_struct("E2eeExt").finish_non_exhaustive()
    }
}

/// Tag identifying the type of an extension.
pub type ExtensionTag = u16;

impl E2eeExt {
    pub(super) const TAG: ExtensionTag = 1;
    pub(super) const LEN: usize = 13;
}

impl UserTimestampExt {
    pub(super) const TAG: ExtensionTag = 2;
    pub(super) const LEN: usize = 8;
}
