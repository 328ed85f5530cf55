use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::ChannelEvent;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};
use url::Url;

/// Push channel for `messageUpdated` / `messageDeleted`. Delivery is
/// at-most-once and unordered; subscribers must treat every event as an
/// idempotent upsert or remove.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
    async fn emit(&self, event: ChannelEvent) -> Result<()>;

    /// True once the channel can no longer deliver events.
    fn is_closed(&self) -> bool {
        false
    }
}

/// In-process loopback: every emitted event reaches every subscriber,
/// the emitter included.
pub struct LocalNotificationChannel {
    events: broadcast::Sender<ChannelEvent>,
}

impl LocalNotificationChannel {
    pub fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self { events }
    }
}

impl Default for LocalNotificationChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationChannel for LocalNotificationChannel {
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn emit(&self, event: ChannelEvent) -> Result<()> {
        let _ = self.events.send(event);
        Ok(())
    }
}

pub struct WsNotificationChannel {
    events: broadcast::Sender<ChannelEvent>,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl WsNotificationChannel {
    pub async fn connect(server_url: &str, token: &str, buffer: usize) -> Result<Self> {
        let ws_url = websocket_url(server_url, token)?;
        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", redacted(&ws_url)))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (events, _) = broadcast::channel(buffer.max(1));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();

        let reader_events = events.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ChannelEvent>(&text) {
                        Ok(ChannelEvent::Error(err)) => {
                            warn!(code = ?err.code, "channel: authority reported error: {}", err.message);
                        }
                        Ok(event) => {
                            let _ = reader_events.send(event);
                        }
                        Err(err) => {
                            warn!("channel: dropping malformed frame: {err}");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("channel: websocket receive failed: {err}");
                        break;
                    }
                }
            }
            info!("channel: websocket reader stopped");
        });

        let writer_task = tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("channel: failed to encode outbound event: {err}");
                        continue;
                    }
                };
                if let Err(err) = ws_writer.send(Message::Text(text)).await {
                    warn!("channel: websocket send failed: {err}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        info!(url = %redacted(&ws_url), "channel: websocket connected");
        Ok(Self {
            events,
            outbound,
            reader_task,
            writer_task,
        })
    }
}

impl Drop for WsNotificationChannel {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

#[async_trait]
impl NotificationChannel for WsNotificationChannel {
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    async fn emit(&self, event: ChannelEvent) -> Result<()> {
        self.outbound
            .send(event)
            .map_err(|_| anyhow!("notification channel is closed"))
    }

    fn is_closed(&self) -> bool {
        self.reader_task.is_finished() || self.writer_task.is_finished()
    }
}

pub fn websocket_url(server_url: &str, token: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(anyhow!("server_url must be http:// or https://, got {other}://")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {server_url} to {scheme}"))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url)
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
