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
use crate::packet::E2eeExt;
use bytes::Bytes;
use core::fmt;
use thiserror::Error;

/// Encrypted payload along with the metadata needed to decrypt it.
///
/// The metadata travels in the E2EE header extension of a frame's first packet.
///
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub payload: Bytes,
    pub iv: [u8; 12],
    pub key_index: u8,
}

impl EncryptedPayload {
    pub(crate) fn from_ext(payload: Bytes, ext: E2eeExt) -> Self {
        Self { payload, iv: ext.iv, key_index: ext.key_index }
    }

    pub(crate) fn ext(&self) -> E2eeExt {
        E2eeExt { key_index: self.key_index, iv: self.iv }
    }
}

impl fmt::Debug for EncryptedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPayload")
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// A payload could not be encrypted.
#[derive(Debug, Error)]
#[error("Encryption failed")]
pub struct EncryptionError;

/// A payload could not be decrypted.
#[derive(Debug, Error)]
#[error("Decryption failed")]
pub struct DecryptionError;

/// Encrypts frame payloads sent by the local participant.
pub trait EncryptionProvider: Send + Sync + fmt::Debug {
    fn encrypt(&self, payload: Bytes) -> Result<EncryptedPayload, EncryptionError>;
}

/// Decrypts frame payloads received from remote participants.
pub trait DecryptionProvider: Send + Sync + fmt::Debug {
    /// Decrypts `payload`, choosing the key by the sender's identity and the
    /// payload's key index.
    fn decrypt(
        &self,
        payload: EncryptedPayload,
        sender_identity: &str,
    ) -> Result<Bytes, DecryptionError>;
}


#[cfg(test)]
mod tests {
    use super::{test_providers::XorProvider, *};

    #[test]
    fn test_ext_roundtrip() {
        let encrypted = EncryptedPayload { payload: Bytes::new(), iv: [7; 12], key_index: 3 };
        let ext = encrypted.ext();
        assert_eq!(ext, E2eeExt { key_index: 3, iv: [7; 12] });
        assert_eq!(EncryptedPayload::from_ext(Bytes::new(), ext), encrypted);
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let encrypted =
            EncryptedPayload { payload: Bytes::from_static(b"abc"), iv: [7; 12], key_index: 3 };
        let debug = format!("{encrypted:?}");
        assert_eq!(debug, "EncryptedPayload { payload_len: 3, .. }");
        assert!(!debug.contains("key_index"));
    }

    #[test]
    fn test_xor_provider_reverses() {
        let provider = XorProvider { key_index: 0x5A, fail: false };
        let encrypted = provider.encrypt(Bytes::from_static(b"hello")).unwrap();
        assert_ne!(encrypted.payload, Bytes::from_static(b"hello"));
        let decrypted = provider.decrypt(encrypted, "alice").unwrap();
        assert_eq!(decrypted, Bytes::from_static(b"hello"));
    }
}
