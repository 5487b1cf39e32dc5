//! A blocking façade over [`super::Client`], for callers that are not
//! themselves running inside a Tokio runtime.

use std::time::Duration;

use futures_util::future::Either;

use crate::{
    error::{ClientError, ClientResult},
    frame::Frame,
};

use super::Client;

/// Runs `task` to completion on `runtime`, optionally bounding it with
/// `timeout`. Mirrors the teacher's own `block_on_with_timeout` helper:
/// a `tokio::time::timeout` race wrapped in `Either` so the no-timeout path
/// costs nothing extra.
fn block_on_with_timeout<T>(
    runtime: &tokio::runtime::Handle,
    timeout: Option<Duration>,
    task: impl std::future::Future<Output = ClientResult<T>>,
) -> ClientResult<T> {
    let task = if let Some(duration) = timeout {
        Either::Left(async move {
            tokio::time::timeout(duration, task)
                .await
                .unwrap_or(Err(ClientError::Timeout))
        })
    } else {
        Either::Right(task)
    };
    runtime.block_on(task)
}

/// A synchronous Client handle. Each call blocks the calling thread until
/// the underlying async transaction completes or the request timeout
/// elapses.
pub struct SyncClient {
    client: Client,
    runtime: tokio::runtime::Handle,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient").finish_non_exhaustive()
    }
}

impl SyncClient {
    #[must_use]
    pub fn new(client: Client, runtime: tokio::runtime::Handle) -> Self {
        Self { client, runtime }
    }

    /// Sends `request` and blocks until a response, a Modbus exception, or
    /// a timeout is observed.
    pub fn send_request(&self, request: Frame, timeout: Duration) -> ClientResult<Frame> {
        let client = self.client.clone();
        block_on_with_timeout(&self.runtime, Some(timeout), async move {
            client.send_request(request).await
        })
    }
}
