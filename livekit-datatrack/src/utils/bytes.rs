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

/// Splits [`Bytes`] into zero-copy chunks.
pub trait BytesChunkExt {
    /// Iterates over consecutive chunks of at most `max_len` bytes.
    ///
    /// # Panics
    /// If `max_len` is zero.
    ///
    fn into_chunks(self, max_len: usize) -> Chunks;
}

impl BytesChunkExt for Bytes {
    fn into_chunks(self, max_len: usize) -> Chunks {
        assert!(max_len > 0, "Chunk length must be non-zero");
        Chunks { rest: self, max_len }
    }
}

/// Iterator returned by [`BytesChunkExt::into_chunks`].
///
/// Each chunk shares the source allocation ([`Bytes::split_to`] is O(1)).
///
#[derive(Debug)]
pub struct Chunks {
    rest: Bytes,
    max_len: usize,
}

impl Chunks {
    /// Number of chunks not yet yielded.
    pub fn remaining(&self) -> usize {
        self.rest.len().div_ceil(self.max_len)
    }
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let len = self.max_len.min(self.rest.len());
        Some(self.rest.split_to(len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}
