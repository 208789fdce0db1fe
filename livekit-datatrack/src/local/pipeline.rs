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
use super::packetizer::{Packetizer, PacketizerError, PacketizerFrame, Packets};
use crate::{
    api::{DataTrackFrame, DataTrackInfo, InternalError},
    e2ee::{EncryptionError, EncryptionProvider},
    packet::{Extensions, UserTimestampExt},
};
use anyhow::anyhow;
use std::sync::Arc;
use thiserror::Error;

/// Turns frames published on a single track into packets: encrypts the payload
/// when the track uses E2EE, then packetizes it.
#[derive(Debug)]
pub struct Pipeline {
    packetizer: Packetizer,
    encryption: Option<Arc<dyn EncryptionProvider>>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Packetizer(#[from] PacketizerError),
}

impl Pipeline {
    /// Creates a pipeline for a published track.
    ///
    /// Fails if the track's E2EE setting disagrees with the presence of a provider.
    ///
    pub fn new(
        info: &DataTrackInfo,
        encryption: Option<Arc<dyn EncryptionProvider>>,
        mtu: usize,
    ) -> Result<Self, InternalError> {
        if info.uses_e2ee != encryption.is_some() {
            Err(anyhow!(
                "Track {} uses_e2ee={} but an encryption provider is {}",
                info.sid,
                info.uses_e2ee,
                if encryption.is_some() { "set" } else { "missing" }
            ))?
        }
        Ok(Self { packetizer: Packetizer::new(info.pub_handle, mtu), encryption })
    }

    pub fn process(&mut self, frame: DataTrackFrame) -> Result<Packets, PipelineError> {
        let mut extensions = Extensions {
            user_timestamp: frame.user_timestamp.map(UserTimestampExt),
            e2ee: None,
        };
        let mut payload = frame.payload;
        if let Some(encryption) = &self.encryption {
            let encrypted = encryption.encrypt(payload)?;
            extensions.e2ee = Some(encrypted.ext());
            payload = encrypted.payload;
        }
        Ok(self.packetizer.packetize(PacketizerFrame { payload, extensions })?)
    }
}
