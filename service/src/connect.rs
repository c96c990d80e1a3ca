//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Handshake side of the connection lifecycle contract

use crate::client::Client;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Bounded-duration handshake for one accepted client
///
/// Runs as its own task so a slow peer cannot stall the reactor. The reactor
/// keeps reading and flushing the client's socket while the handshake runs;
/// the handshake only queues requests and watches the client's state. On
/// success the reactor starts a session for the client, on error it
/// deactivates it.
#[async_trait]
pub trait Connect: Send {
    /// Drive the handshake to completion
    async fn negotiate(self: Box<Self>) -> Result<()>;
}

/// Poll `ready` every `interval` until it holds or `limit` elapses
///
/// Returns whether the condition was met. Fails with `Disconnected` as soon
/// as the client goes away.
pub(crate) async fn wait_for(
    client: &dyn Client,
    limit: Duration,
    interval: Duration,
    mut ready: impl FnMut() -> bool,
) -> Result<bool> {
    let deadline = Instant::now() + limit;
    loop {
        if !client.is_active() {
            return Err(EngineError::Disconnected);
        }
        if ready() {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
