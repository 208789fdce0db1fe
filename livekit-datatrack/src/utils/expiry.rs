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
use std::time::Duration;
use tokio::{sync::mpsc, time};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why a pending request ended before the SFU answered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Timeout,
    Cancelled,
}

/// Races a pending request against `timeout` and the caller's `cancel` token.
///
/// Whichever fires first is reported to the owning manager as `on_expiry(expiry)`.
/// Dropping the returned guard (once the request resolves) ends the watch
/// silently.
///
pub fn watch_expiry<E, F>(
    timeout: Duration,
    cancel: CancellationToken,
    event_tx: mpsc::WeakSender<E>,
    on_expiry: F,
) -> DropGuard
where
    E: Send + 'static,
    F: FnOnce(Expiry) -> E + Send + 'static,
{
    let resolved = CancellationToken::new();
    let guard = resolved.clone().drop_guard();
    tokio::spawn(async move {
        let expiry = tokio::select! {
            biased;
            _ = resolved.cancelled() => return,
            _ = cancel.cancelled() => Expiry::Cancelled,
            _ = time::sleep(timeout) => Expiry::Timeout,
        };
        let Some(event_tx) = event_tx.upgrade() else { return };
        _ = event_tx.send(on_expiry(expiry)).await;
    });
    guard
}
