/*
    client.rs - Reconnecting SSE client

    Connects to `/events`, decodes frames and tracks the newest version seen
    per actor. When the stream drops it retries per `ReconnectPolicy`; after
    every successful reconnect it pages `GET /sync/{actor}` for each tracked
    actor so events published while disconnected are not lost.

    Connect failures are handled by the policy and reported as events, never
    returned to the caller.
*/

use std::collections::BTreeMap;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::message::ServerMessage;
use super::reconnect::ReconnectPolicy;
use crate::error::{SyncError, SyncResult};
use crate::replay::IncrementalSync;

#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Server root, e.g. `http://127.0.0.1:8080`
    pub base_url: String,

    /// Actors to scope the stream to and resync after reconnects. Empty
    /// means all actors; resync then covers every actor seen so far.
    pub actors: Vec<String>,

    pub reconnect: ReconnectPolicy,
    pub page_size: usize,
    pub channel_capacity: usize,
}

impl StreamClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        StreamClientConfig {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            actors: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            page_size: 100,
            channel_capacity: 256,
        }
    }

    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actors = actors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// What the client observed
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected { client_id: String },
    Message(ServerMessage),
    Resynced(IncrementalSync),
    Disconnected { reason: String },
    GaveUp { attempts: u32 },
}

/// One decoded SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut id = None;
    let mut data = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
        id,
    })
}

pub struct StreamClient {
    http: reqwest::Client,
    config: StreamClientConfig,
    known_versions: BTreeMap<String, u64>,
}

impl StreamClient {
    pub fn new(config: StreamClientConfig) -> Self {
        let known_versions = config.actors.iter().map(|a| (a.clone(), 0)).collect();
        StreamClient {
            http: reqwest::Client::new(),
            config,
            known_versions,
        }
    }

    pub fn known_version(&self, actor_id: &str) -> u64 {
        self.known_versions.get(actor_id).copied().unwrap_or(0)
    }

    /// Run the client in the background.
    pub fn spawn(self) -> (StreamClientHandle, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let task = tokio::spawn(self.run(tx));
        (StreamClientHandle { task: Some(task) }, rx)
    }

    async fn run(mut self, events: mpsc::Sender<ClientEvent>) {
        let mut failures = 0u32;
        let mut connected_before = false;

        loop {
            match self.open().await {
                Ok(response) => {
                    failures = 0;
                    let reason = self.consume(response, &events, connected_before).await;
                    connected_before = true;
                    info!(%reason, "event stream disconnected");
                    if events.send(ClientEvent::Disconnected { reason }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(attempt = failures, error = %e, "event stream connect failed");
                }
            }

            match self.config.reconnect.delay_for(failures + 1) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    warn!(attempts = failures, "giving up on event stream");
                    let _ = events.send(ClientEvent::GaveUp { attempts: failures }).await;
                    return;
                }
            }
        }
    }

    async fn open(&self) -> SyncResult<reqwest::Response> {
        let mut request = self
            .http
            .get(format!("{}/events", self.config.base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if !self.config.actors.is_empty() {
            request = request.query(&[("actorId", self.config.actors.join(","))]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::SseConnectFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::SseConnectFailed(format!("server answered {}", response.status())));
        }
        Ok(response)
    }

    async fn consume(
        &mut self,
        response: reqwest::Response,
        events: &mpsc::Sender<ClientEvent>,
        reconnect: bool,
    ) -> String {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return e.to_string(),
            };
            for frame in decoder.push(&chunk) {
                let message = match ServerMessage::from_stream_frame(&frame.event, &frame.data) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(event = %frame.event, error = %e, "undecodable stream frame");
                        continue;
                    }
                };

                let delivered = match message {
                    ServerMessage::Connection(hello) => {
                        let sent = events
                            .send(ClientEvent::Connected { client_id: hello.client_id })
                            .await
                            .is_ok();
                        if sent && reconnect {
                            self.resync(events).await;
                        }
                        sent
                    }
                    message => {
                        self.track(&message);
                        events.send(ClientEvent::Message(message)).await.is_ok()
                    }
                };
                if !delivered {
                    return "event receiver dropped".to_string();
                }
            }
        }
        "stream ended".to_string()
    }

    fn track(&mut self, message: &ServerMessage) {
        if let ServerMessage::Broadcast(envelope) = message {
            let known = self
                .known_versions
                .entry(envelope.event.actor_id.clone())
                .or_insert(0);
            *known = (*known).max(envelope.event.version);
        }
    }

    /// Page every tracked actor forward from its known version. Returns the
    /// number of events fetched.
    pub async fn resync(&mut self, events: &mpsc::Sender<ClientEvent>) -> usize {
        let actors: Vec<String> = self.known_versions.keys().cloned().collect();
        let mut fetched = 0;

        for actor_id in actors {
            loop {
                let known = self.known_version(&actor_id);
                let page = match self.fetch_page(&actor_id, known).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(%actor_id, error = %e, "resync request failed");
                        break;
                    }
                };

                fetched += page.events.len();
                self.known_versions.insert(actor_id.clone(), page.next_version.max(known));
                let more = page.has_more && !page.events.is_empty();
                debug!(%actor_id, events = page.events.len(), has_more = page.has_more, "resync page");
                if events.send(ClientEvent::Resynced(page)).await.is_err() || !more {
                    break;
                }
            }
        }
        fetched
    }

    async fn fetch_page(&self, actor_id: &str, known_version: u64) -> SyncResult<IncrementalSync> {
        let page = self
            .http
            .get(format!("{}/sync/{}", self.config.base_url, actor_id))
            .query(&[
                ("knownVersion", known_version.to_string()),
                ("maxEvents", self.config.page_size.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<IncrementalSync>()
            .await?;
        Ok(page)
    }
}

/// Stops the client on `cancel()` or drop
pub struct StreamClientHandle {
    task: Option<JoinHandle<()>>,
}

impl StreamClientHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for StreamClientHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
