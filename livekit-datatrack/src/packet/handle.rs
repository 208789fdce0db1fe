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

use std::{fmt, num::NonZeroU16};
use thiserror::Error;

/// Compact identifier of a data track carried in every packet.
///
/// Publishers allocate a handle per published track; the SFU assigns
/// subscribers a (possibly different) handle for each subscription.
/// Zero is reserved and never valid.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU16);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("{0:#X} is reserved")]
    Reserved(u16),

    #[error("value too large to be a valid track handle")]
    TooLarge,
}

impl Handle {
    /// Largest valid handle value.
    pub const MAX: Self = Self(NonZeroU16::MAX);

    /// Returns the raw value.
    pub const fn get(self) -> u16 {
        self.0.get()
    }
}

impl TryFrom<u16> for Handle {
    type Error = HandleError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        NonZeroU16::new(value).map(Self).ok_or(HandleError::Reserved(value))
    }
}

impl TryFrom<u32> for Handle {
    type Error = HandleError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        u16::try_from(value).map_err(|_| HandleError::TooLarge)?.try_into()
    }
}

impl From<Handle> for u16 {
    fn from(handle: Handle) -> Self {
        handle.get()
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.get().into()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.get())
    }
}

/// Hands out publisher handles for the lifetime of a session.
///
/// Handles are never recycled: once every value has been handed out,
/// allocation fails.
///
#[derive(Debug, Default)]
pub struct HandleAllocator {
    last: u16,
}

impl HandleAllocator {
    /// Returns the next unused handle, or none if the handle space is exhausted.
    pub fn allocate(&mut self) -> Option<Handle> {
        let next = self.last.checked_add(1)?;
        self.last = next;
        next.try_into().ok()
    }
}

#[cfg(test)]
impl fake::Dummy<fake::Faker> for Handle {
    fn dummy_with_rng<R: rand::Rng + ?Sized>(_: &fake::Faker, rng: &mut R) -> Self {
        let value: u16 = rng.random_range(1..=u16::MAX);
        value.try_into().unwrap()
    }
}
