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

use super::{consts::*, E2eeExt, Extensions, Packet, PacketHeader, UserTimestampExt};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("buffer cannot fit header")]
    TooSmallForHeader,

    #[error("buffer cannot fit payload")]
    TooSmallForPayload,
}

impl Packet {
    /// Length of the encoded packet in bytes.
    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.payload.len()
    }

    /// Encodes the packet into `buf`, returning the number of bytes written.
    ///
    /// Fails without writing anything if `buf` cannot hold the whole packet;
    /// use [`Self::encoded_len`] to size the buffer.
    ///
    pub fn encode_into(&self, buf: &mut impl BufMut) -> Result<usize, EncodeError> {
        let total_len = self.encoded_len();
        if buf.remaining_mut() < self.header.encoded_len() {
            Err(EncodeError::TooSmallForHeader)?
        }
        if buf.remaining_mut() < total_len {
            Err(EncodeError::TooSmallForPayload)?
        }
        self.header.encode_into(buf)?;
        buf.put_slice(&self.payload);
        Ok(total_len)
    }

    /// Encodes the packet into a newly allocated buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf).expect("Buffer sized from encoded length");
        buf.freeze()
    }
}

/// Sizes of the variable-length part of a header.
#[derive(Debug, PartialEq, Eq)]
struct ExtLayout {
    /// Bytes occupied by extension entries.
    content_len: usize,
    /// Entries plus padding, in 32-bit words.
    words: usize,
}

impl ExtLayout {
    fn padding_len(&self) -> usize {
        self.words * WORD_LEN - self.content_len
    }

    fn header_len(&self) -> usize {
        if self.words == 0 {
            return BASE_HEADER_LEN;
        }
        BASE_HEADER_LEN + EXT_WORDS_LEN + self.words * WORD_LEN
    }
}

impl PacketHeader {
    fn ext_layout(&self) -> ExtLayout {
        let content_len = self.extensions.encoded_len();
        ExtLayout { content_len, words: content_len.div_ceil(WORD_LEN) }
    }

    /// Length of the encoded header, including extensions and padding.
    pub fn encoded_len(&self) -> usize {
        self.ext_layout().header_len()
    }

    /// Encodes the header into `buf`, returning the number of bytes written.
    pub fn encode_into(&self, buf: &mut impl BufMut) -> Result<usize, EncodeError> {
        let layout = self.ext_layout();
        let header_len = layout.header_len();
        if buf.remaining_mut() < header_len {
            Err(EncodeError::TooSmallForHeader)?
        }

        let mut initial = VERSION << VERSION_SHIFT | self.marker.to_bits() << MARKER_SHIFT;
        if layout.words > 0 {
            initial |= 1 << EXT_FLAG_SHIFT;
        }
        buf.put_u8(initial);
        buf.put_u8(0); // Reserved
        buf.put_u16(self.track_handle.into());
        buf.put_u16(self.sequence);
        buf.put_u16(self.frame_number);
        buf.put_u32(self.timestamp.as_ticks());

        if layout.words > 0 {
            buf.put_u16((layout.words - 1) as u16);
            self.extensions.encode_into(buf);
            buf.put_bytes(0, layout.padding_len());
        }
        Ok(header_len)
    }
}

impl Extensions {
    /// Length of all extension entries, excluding padding.
    fn encoded_len(&self) -> usize {
        let e2ee_len = self.e2ee.map_or(0, |_| EXT_ENTRY_HEADER_LEN + E2eeExt::LEN);
        let timestamp_len =
            self.user_timestamp.map_or(0, |_| EXT_ENTRY_HEADER_LEN + UserTimestampExt::LEN);
        e2ee_len + timestamp_len
    }

    fn encode_into(&self, buf: &mut impl BufMut) {
        if let Some(e2ee) = self.e2ee {
            put_entry_header(buf, E2eeExt::TAG, E2eeExt::LEN);
            buf.put_u8(e2ee.key_index);
            buf.put_slice(&e2ee.iv);
        }
        if let Some(UserTimestampExt(timestamp)) = self.user_timestamp {
            put_entry_header(buf, UserTimestampExt::TAG, UserTimestampExt::LEN);
            buf.put_u64(timestamp);
        }
    }
}

/// Writes an entry's tag followed by its length minus one.
fn put_entry_header(buf: &mut impl BufMut, tag: u16, len: usize) {
    buf.put_u16(tag);
    buf.put_u16((len - 1) as u16);
}
