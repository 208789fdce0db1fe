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

use super::{
    consts::*, E2eeExt, ExtensionTag, Extensions, FrameMarker, Handle, HandleError, Packet,
    PacketHeader, Timestamp, UserTimestampExt,
};
use bytes::{Buf, Bytes};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("too short to contain a valid header")]
    TooShort,

    #[error("header exceeds total packet length")]
    HeaderOverrun,

    #[error("extension word indicator is missing")]
    MissingExtWords,

    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid track handle: {0}")]
    InvalidHandle(#[from] HandleError),

    #[error("extension with tag {0} is malformed")]
    MalformedExt(ExtensionTag),
}

impl Packet {
    /// Decodes a packet, sharing the payload with `raw` (no copy).
    pub fn decode(raw: Bytes) -> Result<Self, DecodeError> {
        let (header, header_len) = PacketHeader::decode(&raw)?;
        let payload = raw.slice(header_len..);
        Ok(Self { header, payload })
    }
}

impl PacketHeader {
    /// Decodes the header at the start of `raw`.
    ///
    /// Returns the header along with the number of bytes it occupies; anything
    /// after that is payload.
    ///
    pub fn decode(raw: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut buf = raw;
        if buf.remaining() < BASE_HEADER_LEN {
            Err(DecodeError::TooShort)?
        }

        let initial = buf.get_u8();
        let version = initial >> VERSION_SHIFT & VERSION_MASK;
        if version > VERSION {
            Err(DecodeError::UnsupportedVersion(version))?
        }
        let marker = FrameMarker::from_bits(initial >> MARKER_SHIFT);
        let has_extensions = initial >> EXT_FLAG_SHIFT & 1 == 1;
        buf.advance(1); // Reserved

        let track_handle: Handle = buf.get_u16().try_into()?;
        let sequence = buf.get_u16();
        let frame_number = buf.get_u16();
        let timestamp = Timestamp::from_ticks(buf.get_u32());

        let extensions = if has_extensions {
            if buf.remaining() < EXT_WORDS_LEN {
                Err(DecodeError::MissingExtWords)?
            }
            let ext_len = (buf.get_u16() as usize + 1) * WORD_LEN;
            if buf.remaining() < ext_len {
                Err(DecodeError::HeaderOverrun)?
            }
            let (ext_block, rest) = buf.split_at(ext_len);
            buf = rest;
            Extensions::decode(ext_block)?
        } else {
            Extensions::default()
        };

        let header = Self { marker, track_handle, sequence, frame_number, timestamp, extensions };
        Ok((header, raw.len() - buf.remaining()))
    }
}

impl Extensions {
    fn decode(mut block: &[u8]) -> Result<Self, DecodeError> {
        let mut extensions = Self::default();
        // Fewer than an entry header's worth of bytes can only be padding.
        while block.remaining() >= EXT_ENTRY_HEADER_LEN {
            let tag = block.get_u16();
            let len_field = block.get_u16();
            if tag == EXT_TAG_PADDING {
                continue;
            }
            let len = len_field as usize + 1;
            if block.remaining() < len {
                Err(DecodeError::MalformedExt(tag))?
            }
            let (mut value, rest) = block.split_at(len);
            block = rest;

            match tag {
                E2eeExt::TAG => {
                    if value.remaining() < E2eeExt::LEN {
                        Err(DecodeError::MalformedExt(tag))?
                    }
                    let key_index = value.get_u8();
                    let mut iv = [0u8; 12];
                    value.copy_to_slice(&mut iv);
                    extensions.e2ee = Some(E2eeExt { key_index, iv });
                }
                UserTimestampExt::TAG => {
                    if value.remaining() < UserTimestampExt::LEN {
                        Err(DecodeError::MalformedExt(tag))?
                    }
                    extensions.user_timestamp = Some(UserTimestampExt(value.get_u64()));
                }
                _ => log::trace!("Skipping unknown extension {tag} ({len} bytes)"),
            }
        }
        Ok(extensions)
    }
}
