/// Reconnecting WebSocket client for account and signature subscriptions
///
/// One socket carries every subscription. The reader task routes
/// notifications to per-subscription callbacks by subscription id and
/// resolves subscribe requests through oneshot channels. On disconnect all
/// subscription state is dropped (server-side ids die with the socket) and
/// the connect callback fires again so owners can re-subscribe.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;
type ConnectionHandler = Arc<dyn Fn() + Send + Sync>;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsClient {
    url: String,
    reconnect_delay: Duration,
    ping_interval: Duration,

    writer: Mutex<Option<WsSink>>,
    next_id: AtomicU64,
    /// request id -> subscribe confirmation channel
    pending: DashMap<u64, oneshot::Sender<Result<u64, String>>>,
    /// subscription id -> notification callback
    handlers: DashMap<u64, NotificationHandler>,

    connected: AtomicBool,
    on_connect: RwLock<Option<ConnectionHandler>>,
    on_disconnect: RwLock<Option<ConnectionHandler>>,
}

impl WsClient {
    pub fn new(url: String, reconnect_delay: Duration, ping_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            url,
            reconnect_delay,
            ping_interval,
            writer: Mutex::new(None),
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            handlers: DashMap::new(),
            connected: AtomicBool::new(false),
            on_connect: RwLock::new(None),
            on_disconnect: RwLock::new(None),
        })
    }

    pub fn set_callbacks(
        &self,
        on_connect: impl Fn() + Send + Sync + 'static,
        on_disconnect: impl Fn() + Send + Sync + 'static,
    ) {
        *self.on_connect.write().unwrap() = Some(Arc::new(on_connect));
        *self.on_disconnect.write().unwrap() = Some(Arc::new(on_disconnect));
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Establishes the initial connection (an error here is fatal to the
    /// caller) and spawns the supervisor that keeps the socket alive.
    pub async fn start(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let (stream, _) = connect_async(&self.url)
            .await
            .with_context(|| format!("WebSocket connect: {}", display_url(&self.url)))?;
        info!(url = %display_url(&self.url), "📡 WebSocket connected");

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        self.connected.store(true, Ordering::Relaxed);
        self.fire(&self.on_connect);

        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.supervise(source, shutdown).await;
        });
        Ok(())
    }

    /// Runs the read loop, then reconnects forever until shutdown.
    async fn supervise(self: Arc<Self>, mut source: WsSource, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let stopping = self.read_loop(&mut source, &mut shutdown).await;

            self.connected.store(false, Ordering::Relaxed);
            *self.writer.lock().await = None;
            // Server-side subscription ids are dead with the socket.
            self.handlers.clear();
            self.pending.clear();

            if stopping {
                debug!("WebSocket supervisor stopping");
                return;
            }
            self.fire(&self.on_disconnect);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("WebSocket supervisor stopping");
                        return;
                    }
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }

                match connect_async(&self.url).await {
                    Ok((stream, _)) => {
                        info!("📡 WebSocket reconnected");
                        let (sink, new_source) = stream.split();
                        *self.writer.lock().await = Some(sink);
                        self.connected.store(true, Ordering::Relaxed);
                        self.fire(&self.on_connect);
                        source = new_source;
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "WebSocket reconnect failed");
                    }
                }
            }
        }
    }

    /// Returns true when the exit was a shutdown rather than a disconnect.
    async fn read_loop(&self, source: &mut WsSource, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let mut writer = self.writer.lock().await;
                    if let Some(sink) = writer.as_mut() {
                        let _ = sink.send(Message::Close(None)).await;
                    }
                    return true;
                }
                _ = ping.tick() => {
                    let mut writer = self.writer.lock().await;
                    if let Some(sink) = writer.as_mut() {
                        if let Err(err) = sink.send(Message::Ping(Vec::new())).await {
                            warn!(error = %err, "WebSocket ping failed");
                            return false;
                        }
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            let mut writer = self.writer.lock().await;
                            if let Some(sink) = writer.as_mut() {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("📡 WebSocket disconnected");
                            return false;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "WebSocket read error");
                            return false;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "unparseable WebSocket message");
                return;
            }
        };

        // Subscription notifications carry a method and the sub id.
        if value.get("method").is_some() {
            let Some(params) = value.get("params") else {
                return;
            };
            let sub_id = params
                .get("subscription")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let Some(result) = params.get("result") else {
                return;
            };

            if let Some(handler) = self.handlers.get(&sub_id).map(|h| h.value().clone()) {
                handler(result.clone());
            } else {
                debug!(sub_id, "notification for unknown subscription");
            }
            return;
        }

        // Otherwise it is a response to one of our requests.
        let Some(request_id) = value.get("id").and_then(Value::as_u64) else {
            return;
        };
        let Some((_, tx)) = self.pending.remove(&request_id) else {
            return;
        };

        if let Some(err) = value.get("error") {
            let _ = tx.send(Err(err.to_string()));
        } else {
            let sub_id = value.get("result").and_then(Value::as_u64).unwrap_or(0);
            let _ = tx.send(Ok(sub_id));
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<u64> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        let body = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        });

        let send_result = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink
                    .send(Message::Text(body.to_string()))
                    .await
                    .map_err(anyhow::Error::from),
                None => Err(anyhow!("WebSocket not connected")),
            }
        };
        if let Err(err) = send_result {
            self.pending.remove(&request_id);
            return Err(err);
        }

        let result = tokio::time::timeout(SUBSCRIBE_TIMEOUT, rx)
            .await
            .map_err(|_| {
                self.pending.remove(&request_id);
                anyhow!("{} timed out", method)
            })?
            .map_err(|_| anyhow!("{} dropped", method))?;

        result.map_err(|err| anyhow!("{} rejected: {}", method, err))
    }

    /// Subscribes to account change notifications for `address`.
    pub async fn account_subscribe(
        &self,
        address: &str,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<u64> {
        let sub_id = self
            .request(
                "accountSubscribe",
                json!([address, {"encoding": "jsonParsed", "commitment": "confirmed"}]),
            )
            .await?;
        self.handlers.insert(sub_id, Arc::new(handler));
        debug!(address = %address, sub_id, "account subscription active");
        Ok(sub_id)
    }

    /// Subscribes to the confirmation notification for one signature.
    /// The server tears the subscription down after it fires once.
    pub async fn signature_subscribe(
        &self,
        signature: &str,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<u64> {
        let sub_id = self
            .request(
                "signatureSubscribe",
                json!([signature, {"commitment": "confirmed"}]),
            )
            .await?;
        self.handlers.insert(sub_id, Arc::new(handler));
        debug!(sub_id, "signature subscription active");
        Ok(sub_id)
    }

    /// Drops the local handler and tells the server to stop sending.
    pub async fn unsubscribe(&self, method: &str, sub_id: u64) {
        self.handlers.remove(&sub_id);
        if let Err(err) = self.request(method, json!([sub_id])).await {
            debug!(sub_id, error = %err, "unsubscribe failed");
        }
    }

    /// Local cleanup used when the subscription died server-side.
    pub fn drop_handler(&self, sub_id: u64) {
        self.handlers.remove(&sub_id);
    }

    fn fire(&self, slot: &RwLock<Option<ConnectionHandler>>) {
        let handler = slot.read().unwrap().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// URLs carry API keys as query parameters; keep them out of logs.
fn display_url(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
