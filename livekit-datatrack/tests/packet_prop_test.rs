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
use livekit_datatrack::backend::{
    packet::{E2eeExt, Extensions, FrameMarker, Handle, Packet, UserTimestampExt},
    local::{Packetizer, PacketizerFrame},
    remote::{Depacketizer, DepacketizerFrame},
};
use proptest::prelude::*;

fn handle_strategy() -> impl Strategy<Value = Handle> {
    (1u16..=u16::MAX).prop_map(|value| Handle::try_from(value).unwrap())
}

fn extensions_strategy() -> impl Strategy<Value = Extensions> {
    let user_timestamp = proptest::option::of(any::<u64>().prop_map(UserTimestampExt));
    let e2ee = proptest::option::of(
        (any::<u8>(), any::<[u8; 12]>()).prop_map(|(key_index, iv)| E2eeExt { key_index, iv }),
    );
    (user_timestamp, e2ee).prop_map(|(user_timestamp, e2ee)| Extensions { user_timestamp, e2ee })
}

fn payload_strategy(max_len: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..max_len).prop_map(Bytes::from)
}

/// Feeds packets through a fresh depacketizer, collecting completed frames.
fn reassemble(packets: impl IntoIterator<Item = Packet>) -> Vec<DepacketizerFrame> {
    let mut depacketizer = Depacketizer::new();
    let mut frames = Vec::new();
    for packet in packets {
        let result = depacketizer.push(packet);
        assert_eq!(result.drop_error, None);
        frames.extend(result.frame);
    }
    frames
}

proptest! {
    #[test]
    fn prop_decode_never_panics(raw in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Packet::decode(Bytes::from(raw));
    }

    #[test]
    fn prop_packetize_roundtrip(
        handle in handle_strategy(),
        mtu in 128usize..1_500,
        payload in payload_strategy(4_096),
        extensions in extensions_strategy(),
    ) {
        let mut packetizer = Packetizer::new(handle, mtu);
        let frame = PacketizerFrame { payload: payload.clone(), extensions: extensions.clone() };
        let packets: Vec<_> = packetizer.packetize(frame).unwrap().collect();

        for packet in &packets {
            prop_assert!(packet.encoded_len() <= mtu);
            prop_assert_eq!(packet.header.track_handle, handle);
        }
        if packets.len() == 1 {
            prop_assert_eq!(packets[0].header.marker, FrameMarker::Single);
        }

        // Through the wire format and back.
        let decoded = packets.iter().map(|packet| Packet::decode(packet.encode()).unwrap());
        let frames = reassemble(decoded);
        prop_assert_eq!(frames, vec![DepacketizerFrame { payload, extensions }]);
    }

    #[test]
    fn prop_intermediate_packets_any_order(
        payload in payload_strategy(2_048),
        rotation in any::<usize>(),
    ) {
        let mut packetizer = Packetizer::new(Handle::MAX, 128);
        let frame = PacketizerFrame { payload: payload.clone(), ..Default::default() };
        let mut packets: Vec<_> = packetizer.packetize(frame).unwrap().collect();

        if packets.len() > 3 {
            let last = packets.len() - 1;
            let middle = &mut packets[1..last];
            let len = middle.len();
            middle.rotate_left(rotation % len);
        }
        let frames = reassemble(packets);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0].payload, &payload);
    }

    #[test]
    fn prop_consecutive_frames(payloads in prop::collection::vec(payload_strategy(512), 1..8)) {
        let mut packetizer = Packetizer::new(Handle::MAX, 100);
        let packets: Vec<_> = payloads
            .iter()
            .flat_map(|payload| {
                let frame = PacketizerFrame { payload: payload.clone(), ..Default::default() };
                packetizer.packetize(frame).unwrap()
            })
            .collect();

        let received: Vec<_> = reassemble(packets).into_iter().map(|frame| frame.payload).collect();
        prop_assert_eq!(received, payloads);
    }
}
