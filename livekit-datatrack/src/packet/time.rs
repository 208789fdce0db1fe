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

use rand::Rng;
use std::time::{Duration, Instant};

/// Packet timestamp in ticks of a `RATE` Hz clock, wrapping at `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp<const RATE: u32>(u32);

impl<const RATE: u32> Timestamp<RATE> {
    /// A timestamp with a random tick value, used as a clock's base.
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    pub const fn as_ticks(self) -> u32 {
        self.0
    }

    /// Whether `self` comes before `other`, accounting for wrap-around.
    const fn precedes(self, other: Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }
}

/// Produces monotonically non-decreasing timestamps relative to an epoch.
#[derive(Debug)]
pub struct Clock<const RATE: u32> {
    epoch: Instant,
    base: Timestamp<RATE>,
    last: Timestamp<RATE>,
}

impl<const RATE: u32> Clock<RATE> {
    /// Creates a clock whose epoch is now, starting at `base`.
    pub fn new(base: Timestamp<RATE>) -> Self {
        Self::with_epoch(Instant::now(), base)
    }

    pub fn with_epoch(epoch: Instant, base: Timestamp<RATE>) -> Self {
        Self { epoch, base, last: base }
    }

    pub fn now(&mut self) -> Timestamp<RATE> {
        self.at(Instant::now())
    }

    /// Timestamp for `instant`; never earlier than a previously returned one.
    pub fn at(&mut self, instant: Instant) -> Timestamp<RATE> {
        let elapsed = instant.saturating_duration_since(self.epoch);
        let candidate = Timestamp(self.base.0.wrapping_add(Self::ticks(elapsed)));
        if !candidate.precedes(self.last) {
            self.last = candidate;
        }
        self.last
    }

    /// Rounds `duration` to the nearest tick (truncated to 32 bits).
    const fn ticks(duration: Duration) -> u32 {
        const NANOS_PER_SEC: u128 = 1_000_000_000;
        let scaled = duration.as_nanos() * RATE as u128;
        ((scaled + NANOS_PER_SEC / 2) / NANOS_PER_SEC) as u32
    }
}

#[cfg(test)]
impl<const RATE: u32> fake::Dummy<fake::Faker> for Timestamp<RATE> {
    fn dummy_with_rng<R: rand::Rng + ?Sized>(_: &fake::Faker, rng: &mut R) -> Self {
        Self(rng.random())
    }
}
