//! Async test helpers
//!
//! Bounded waits on connection queues and polling for conditions that are
//! reached by background tasks (snapshot worker, heartbeats).

use std::future::Future;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::transport::ServerMessage;

/// Default timeout for tests
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for waits that are expected to fail
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive timed out"),
            RecvTimeoutError::Closed => write!(f, "queue closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive one item or fail after `duration`
pub async fn recv_timeout<T>(rx: &mut mpsc::Receiver<T>, duration: Duration) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Receive `count` items, each within `per_item`
pub async fn collect_n<T>(
    rx: &mut mpsc::Receiver<T>,
    count: usize,
    per_item: Duration,
) -> Result<Vec<T>, RecvTimeoutError> {
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(recv_timeout(rx, per_item).await?);
    }
    Ok(items)
}

/// Everything already queued, without waiting
pub fn try_drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Next server message of the given wire type, skipping the rest
/// (heartbeats, presence, ...).
pub async fn recv_message_of_type(
    rx: &mut mpsc::Receiver<ServerMessage>,
    type_name: &str,
    duration: Duration,
) -> Result<ServerMessage, RecvTimeoutError> {
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let message = recv_timeout(rx, remaining).await?;
        if message.type_name() == type_name {
            return Ok(message);
        }
    }
}

/// Poll `condition` until it holds or `within` elapses. Returns whether it held.
pub async fn eventually<F, Fut>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + within;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Await `future`, panicking if it takes longer than `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("future did not complete within {:?}", duration),
    }
}
