// Copyright 2025 Google LLC
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

//! Listener port allocation
//!
//! A device prefers a configured port, but that port may already be taken by
//! another process. [`run_with_port`] falls back to random ports from a fixed
//! range until a start attempt succeeds or the retry ceiling is reached.

use crate::ServerError;
use rand::Rng;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Range random fallback ports are drawn from
pub const RANDOM_PORT_RANGE: RangeInclusive<u16> = 10001..=19999;

/// Maximum number of start attempts (preferred port included)
pub const MAX_ATTEMPTS: usize = 5;

/// Run `start` against a working port
///
/// If `preferred` is non-zero it is tried first, otherwise every attempt uses
/// a random port from [`RANDOM_PORT_RANGE`]. Returns the port of the
/// successful attempt together with its result.
///
/// Cancellation is checked before each attempt; an attempt in progress is
/// never interrupted.
///
/// # Errors
///
/// Returns `ServerError::Cancelled` if `cancel` fires between attempts, or the
/// error of the last attempt once [`MAX_ATTEMPTS`] attempts have failed.
pub async fn run_with_port<T, F, Fut>(
    preferred: u16,
    mut start: F,
    cancel: &CancellationToken,
) -> Result<(u16, T), ServerError>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let mut port = if preferred != 0 {
        preferred
    } else {
        random_port()
    };

    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(ServerError::Cancelled);
        }

        match start(port).await {
            Ok(value) => return Ok((port, value)),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(port, attempt, "Failed to start on port, retrying: {e}");
                port = random_port();
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pick a random port from [`RANDOM_PORT_RANGE`]
pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(RANDOM_PORT_RANGE)
}

/// Bind a TCP listener on `address:port`
///
/// Returns the listener and the port it is actually bound to, which differs
/// from `port` only when `port` is 0.
pub async fn bind_tcp(
    address: IpAddr,
    port: u16,
) -> Result<(tokio::net::TcpListener, u16), ServerError> {
    let listener = tokio::net::TcpListener::bind(SocketAddr::new(address, port))
        .await
        .map_err(|source| ServerError::Bind { port, source })?;
    let bound = listener.local_addr()?.port();
    debug!(port = bound, "Bound TCP listener");
    Ok((listener, bound))
}
