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
use super::depacketizer::{Depacketizer, DepacketizerDropError, DepacketizerFrame};
use crate::{
    api::{DataTrackFrame, DataTrackInfo, InternalError},
    e2ee::{DecryptionProvider, EncryptedPayload},
    packet::Packet,
};
use anyhow::anyhow;
use std::sync::Arc;

/// Turns packets received on a subscribed track back into frames: reassembles
/// them, then decrypts the payload when the track uses E2EE.
#[derive(Debug)]
pub struct Pipeline {
    depacketizer: Depacketizer,
    decryption: Option<Arc<dyn DecryptionProvider>>,
    publisher_identity: Arc<str>,
}

/// Outcome of pushing a packet through a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Frame completed by the packet, if any.
    pub frame: Option<DataTrackFrame>,
    /// Frame dropped during reassembly, if any.
    pub dropped: Option<DepacketizerDropError>,
}

impl Pipeline {
    /// Creates a pipeline for a subscribed track.
    ///
    /// Fails if the track uses E2EE but no provider is available, or the reverse.
    ///
    pub fn new(
        info: &DataTrackInfo,
        publisher_identity: Arc<str>,
        decryption: Option<Arc<dyn DecryptionProvider>>,
    ) -> Result<Self, InternalError> {
        if info.uses_e2ee != decryption.is_some() {
            Err(anyhow!(
                "Track {} uses_e2ee={} but a decryption provider is {}",
                info.sid,
                info.uses_e2ee,
                if decryption.is_some() { "set" } else { "missing" }
            ))?
        }
        Ok(Self { depacketizer: Depacketizer::new(), decryption, publisher_identity })
    }

    pub fn process(&mut self, packet: Packet) -> PipelineOutput {
        let result = self.depacketizer.push(packet);
        let frame = result.frame.and_then(|frame| self.decrypt_if_needed(frame)).map(Into::into);
        PipelineOutput { frame, dropped: result.drop_error }
    }

    /// Decrypts the frame's payload if E2EE is enabled for this track.
    fn decrypt_if_needed(&self, mut frame: DepacketizerFrame) -> Option<DepacketizerFrame> {
        let Some(decryption) = &self.decryption else { return Some(frame) };

        let Some(e2ee) = frame.extensions.e2ee.take() else {
            log::error!("Missing E2EE metadata on frame from {}", self.publisher_identity);
            return None;
        };
        let encrypted = EncryptedPayload::from_ext(frame.payload, e2ee);
        frame.payload = decryption
            .decrypt(encrypted, &self.publisher_identity)
            .inspect_err(|err| log::error!("{} (sender {})", err, self.publisher_identity))
            .ok()?;
        Some(frame)
    }
}

impl From<DepacketizerFrame> for DataTrackFrame {
    fn from(frame: DepacketizerFrame) -> Self {
        let user_timestamp = frame.extensions.user_timestamp.map(|ext| ext.0);
        Self { payload: frame.payload, user_timestamp }
    }
}
