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

/// Counter which wraps around on overflow.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counter<T>(T);

impl<T: WrappingStep> Counter<T> {
    #[cfg(test)]
    pub fn new(start: T) -> Self {
        Self(start)
    }

    /// Returns the current value, then advances by one.
    pub fn get_then_increment(&mut self) -> T {
        self.get_then_advance(1)
    }

    /// Returns the current value, then advances by `n`, reserving
    /// `n` consecutive values for the caller.
    pub fn get_then_advance(&mut self, n: usize) -> T {
        let current = self.0;
        self.0 = current.wrapping_step(n);
        current
    }
}

/// Integer types which support adding with wrap-around.
pub trait WrappingStep: Copy {
    /// Adds `n` modulo the type's range.
    fn wrapping_step(self, n: usize) -> Self;
}

macro_rules! impl_wrapping_step {
    ($($t:ty),* $(,)?) => {
        $(impl WrappingStep for $t {
            fn wrapping_step(self, n: usize) -> Self {
                // Truncation is modular, matching wrap-around semantics.
                self.wrapping_add(n as $t)
            }
        })*
    };
}

impl_wrapping_step!(u8, u16, u32, u64);
