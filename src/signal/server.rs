/// HTTP ingress for the chat listener
///
/// Single POST endpoint that turns raw message text into classified
/// signals and hands them to the executor through the signal bus.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

use crate::config::ConfigManager;
use crate::signal::Parser;
use crate::transport::SignalBus;

const RATE_LIMIT_PER_WINDOW: usize = 5;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rolling-window request limiter, one window per source address.
pub struct RateLimiter {
    max_hits: usize,
    window: Duration,
    sources: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_hits: usize, window: Duration) -> Self {
        Self {
            max_hits,
            window,
            sources: DashMap::new(),
        }
    }

    pub fn allow(&self, source: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.sources.entry(source.to_string()).or_default();
        while hits
            .front()
            .map_or(false, |t| now.duration_since(*t) > self.window)
        {
            hits.pop_front();
        }
        if hits.len() >= self.max_hits {
            return false;
        }
        hits.push_back(now);
        true
    }
}

#[derive(Debug, Deserialize)]
pub struct SignalPayload {
    pub text: String,
    pub msg_id: i64,
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Clone)]
struct AppState {
    parser: Arc<Parser>,
    bus: SignalBus,
    cfg: Arc<ConfigManager>,
    limiter: Arc<RateLimiter>,
}

pub struct SignalServer {
    host: String,
    port: u16,
    state: AppState,
}

impl SignalServer {
    pub fn new(cfg: Arc<ConfigManager>, bus: SignalBus) -> Self {
        let server_cfg = cfg.get().server;
        Self {
            host: server_cfg.listen_host,
            port: server_cfg.listen_port,
            state: AppState {
                parser: Arc::new(Parser::new()),
                bus,
                cfg,
                limiter: Arc::new(RateLimiter::new(RATE_LIMIT_PER_WINDOW, RATE_LIMIT_WINDOW)),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/signal", post(handle_signal))
            .with_state(self.state.clone())
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind signal server to {}", addr))?;
        info!(addr = %addr, "starting signal server");

        let app = self
            .router()
            .layer(TimeoutLayer::new(READ_WRITE_TIMEOUT))
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("signal server shutting down");
            })
            .await
            .context("signal server")?;

        Ok(())
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": chrono::Utc::now().timestamp(),
    }))
}

async fn handle_signal(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<SignalPayload>, JsonRejection>,
) -> impl IntoResponse {
    let source = connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.limiter.allow(&source) {
        debug!(source = %source, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate limit exceeded"})),
        );
    }

    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            error!(error = %rejection, "failed to parse signal payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid payload"})),
            );
        }
    };

    let Some(mut signal) = state.parser.parse(&payload.text, payload.msg_id) else {
        debug!(text = %payload.text, "no signal pattern matched");
        return (
            StatusCode::OK,
            Json(json!({"status": "ignored", "reason": "no pattern match"})),
        );
    };

    signal.timestamp = if payload.timestamp != 0 {
        payload.timestamp
    } else {
        chrono::Utc::now().timestamp()
    };

    let trading = state.cfg.trading();
    state.parser.classify(
        &mut signal,
        trading.min_entry_percent,
        trading.take_profit_multiple,
    );

    info!(
        token = %signal.token_name,
        value = signal.value,
        unit = %signal.unit,
        signal_type = signal.signal_type.as_str(),
        mint = %signal.mint,
        "signal received"
    );

    let dropped = !state.bus.publish(signal.clone());
    if dropped {
        warn!(msg_id = signal.msg_id, "executor backlog full");
    }

    (
        StatusCode::OK,
        Json(json!({"status": "received", "signal": signal})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::signal::SignalType;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_server() -> (SignalServer, tokio::sync::mpsc::Receiver<crate::signal::Signal>) {
        let cfg = Arc::new(ConfigManager::from_config(Config::default()));
        let (bus, rx) = SignalBus::new(100);
        (SignalServer::new(cfg, bus), rx)
    }

    fn signal_request(text: &str, msg_id: i64) -> Request<Body> {
        let body = json!({"text": text, "msg_id": msg_id}).to_string();
        Request::builder()
            .method("POST")
            .uri("/signal")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _rx) = test_server();
        let resp = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_signal_accepted_and_published() {
        let (server, mut rx) = test_server();
        let resp = server
            .router()
            .oneshot(signal_request("BONK is up 57%", 42))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.token_name, "BONK");
        assert_eq!(signal.msg_id, 42);
        assert_eq!(signal.signal_type, SignalType::Entry);
    }

    #[tokio::test]
    async fn test_below_threshold_published_as_other() {
        let (server, mut rx) = test_server();
        let resp = server
            .router()
            .oneshot(signal_request("FOO is up 30%", 1))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap().signal_type, SignalType::Other);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_400() {
        let (server, _rx) = test_server();
        let resp = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/signal")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rate_limit_caps_burst_at_five() {
        let (server, _rx) = test_server();
        let router = server.router();

        let mut accepted = 0;
        let mut limited = 0;
        for i in 0..10 {
            let resp = router
                .clone()
                .oneshot(signal_request("BONK is up 57%", i))
                .await
                .unwrap();
            match resp.status() {
                StatusCode::OK => accepted += 1,
                StatusCode::TOO_MANY_REQUESTS => limited += 1,
                other => panic!("unexpected status {}", other),
            }
        }
        assert_eq!(accepted, 5);
        assert_eq!(limited, 5);
    }

    #[tokio::test]
    async fn test_rate_limiter_window_rolls() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        assert!(limiter.allow("src"));
        assert!(limiter.allow("src"));
        assert!(!limiter.allow("src"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.allow("src"));
    }

    #[test]
    fn test_rate_limiter_isolates_sources() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }
}
