//! feed-hub: WS ingest for the two provider sessions
//!
//! Both scraper sessions push raw quotes here; the hub hands them to the single
//! pairing-engine task and fans its push events back out to every client.
//!
//! Run:
//!   FEED_HUB_BIND=0.0.0.0:8080 cargo run --bin feed-hub
//!
//! Client (example):
//!   const ws = new WebSocket('ws://127.0.0.1:8080/feed');
//!   ws.send(JSON.stringify({v:1, type:'quote', source:'A', payload:{...}}))

use anyhow::{anyhow, bail, Context, Result};
use arb_detector::config::EnvConfigSource;
use arb_detector::gate::OpenGate;
use arb_detector::ArbitrageDecider;
use chrono::{DateTime, Utc};
use dotenv::dotenv;
use futures_util::{SinkExt, StreamExt};
use logger::EventLogger;
use market_normalizer::identity::TeamPairResolver;
use market_normalizer::types::{Provider, RawQuote};
use market_normalizer::MarketNormalizer;
use pairing_engine::{
    spawn_engine, EngineCounters, EngineHandle, EngineSettings, PairedMatch, PairingEngine, RejectionRecord,
    MAX_BYPASS,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod feed_db;
use feed_db::{spawn_db_writer, DbConfig, DbHeartbeatRow, DbMsg, DbQueue, DbRejectionRow, HubTradeSink};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedMessageType {
    Quote,
    Admin,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEnvelope {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: FeedMessageType,
    pub source: String,
    pub ts: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCmd {
    Rebroadcast,
    /// `secs == 0` switches bypass off.
    Bypass { secs: u64 },
    PurgeAccount { account: String },
}

#[derive(Clone)]
struct FeedHubState {
    engine: EngineHandle,
    connections: Arc<RwLock<usize>>,
}

fn parse_ts(ts: &Option<String>) -> DateTime<Utc> {
    ts.as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Provider comes from `payload.provider`, else the envelope source. The raw
/// record is `payload.data` when wrapped, else the payload itself.
fn quote_from_envelope(env: FeedEnvelope) -> Result<RawQuote> {
    let provider: Provider = env
        .payload
        .get("provider")
        .and_then(|v| v.as_str())
        .unwrap_or(env.source.as_str())
        .parse()
        .map_err(|e: String| anyhow!(e))?;

    let received_at = parse_ts(&env.ts);
    let wrapped = env.payload.get("data").filter(|d| d.is_object()).cloned();
    let payload = wrapped.unwrap_or(env.payload);
    if !payload.is_object() {
        bail!("quote payload must be a JSON object");
    }
    Ok(RawQuote { provider, received_at, payload })
}

/// `0` turns bypass off; anything above `MAX_BYPASS` is refused.
fn bypass_window(secs: u64) -> Result<Option<Duration>> {
    if secs == 0 {
        return Ok(None);
    }
    let duration = Duration::from_secs(secs);
    if duration > MAX_BYPASS {
        bail!("bypass_out_of_range: max {}s", MAX_BYPASS.as_secs());
    }
    Ok(Some(duration))
}

async fn handle_envelope(env: FeedEnvelope, engine: &EngineHandle) -> Result<String> {
    match env.msg_type {
        FeedMessageType::Quote => {
            let quote = quote_from_envelope(env)?;
            let provider = quote.provider;
            if engine.submit_quote(quote) {
                Ok(format!("quote_queued:{provider}"))
            } else {
                bail!("engine_queue_full")
            }
        }
        FeedMessageType::Admin => {
            let cmd: AdminCmd = serde_json::from_value(env.payload).context("invalid admin payload")?;
            info!("admin from {}: {:?}", env.source, cmd);
            match cmd {
                AdminCmd::Rebroadcast => {
                    engine.rebroadcast().await?;
                    Ok("rebroadcast".to_string())
                }
                AdminCmd::Bypass { secs } => {
                    let duration = bypass_window(secs)?;
                    engine.set_bypass(duration).await?;
                    Ok(format!("bypass:{secs}s"))
                }
                AdminCmd::PurgeAccount { account } => {
                    engine.purge_account(account.clone()).await?;
                    Ok(format!("purge_account:{account}"))
                }
            }
        }
        FeedMessageType::Heartbeat => Ok("heartbeat".to_string()),
    }
}

#[derive(Debug, Clone, Serialize)]
struct HttpStateResponse {
    ts: String,
    connections: usize,
    buckets: usize,
    bypass_active: bool,
    counters: EngineCounters,
    active_pair_count: usize,
    active_pairs: Vec<PairedMatch>,
    trades: Vec<arb_detector::trade::Trade>,
}

async fn build_state_snapshot(state: &FeedHubState) -> Result<HttpStateResponse> {
    let connections = *state.connections.read().await;
    let snap = state.engine.snapshot().await?;
    let active_pair_count = snap.active_pairs.len();
    let mut active_pairs = snap.active_pairs;
    active_pairs.truncate(100);

    Ok(HttpStateResponse {
        ts: snap.ts.to_rfc3339(),
        connections,
        buckets: snap.buckets,
        bypass_active: snap.bypass_active,
        counters: snap.counters,
        active_pair_count,
        active_pairs,
        trades: snap.trades,
    })
}

async fn handle_http_connection(mut stream: TcpStream, state: FeedHubState) -> Result<()> {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await.context("http read")?;
    if n == 0 {
        return Ok(());
    }

    let req = String::from_utf8_lossy(&buf[..n]);
    let first_line = req.lines().next().unwrap_or_default();
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    let (status_line, content_type, body) = match (method, path) {
        ("GET", "/health") => ("HTTP/1.1 200 OK", "text/plain; charset=utf-8", "ok".to_string()),
        ("GET", "/state") => match build_state_snapshot(&state).await {
            Ok(snap) => {
                let json = serde_json::to_string_pretty(&snap).unwrap_or_else(|_| "{}".to_string());
                ("HTTP/1.1 200 OK", "application/json; charset=utf-8", json)
            }
            Err(e) => ("HTTP/1.1 503 Service Unavailable", "text/plain; charset=utf-8", e.to_string()),
        },
        _ => ("HTTP/1.1 404 Not Found", "text/plain; charset=utf-8", "not found".to_string()),
    };

    let resp = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(resp.as_bytes()).await.context("http write")?;
    Ok(())
}

async fn start_http_server(state: FeedHubState, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await.context("http bind")?;
    info!("feed-hub http listening on http://{} (GET /health, /state)", bind);

    loop {
        let (stream, peer) = listener.accept().await.context("http accept")?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_http_connection(stream, state).await {
                debug!("http handler err {}: {}", peer, e);
            }
        });
    }
}

async fn handle_socket(peer: SocketAddr, stream: TcpStream, state: FeedHubState) -> Result<()> {
    let ws_stream = accept_async(stream).await.context("WS handshake failed")?;
    {
        let mut c = state.connections.write().await;
        *c += 1;
    }
    info!("WS client connected: {}", peer);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut push_rx = state.engine.subscribe();

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WS recv err from {}: {}", peer, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(txt) => {
                        let (ok, note) = match serde_json::from_str::<FeedEnvelope>(txt.as_str()) {
                            Ok(env) if env.v != 1 => (false, format!("unsupported version {}", env.v)),
                            Ok(env) => match handle_envelope(env, &state.engine).await {
                                Ok(note) => (true, note),
                                Err(e) => (false, format!("{e:#}")),
                            },
                            Err(e) => (false, format!("parse_error:{e}")),
                        };
                        if !ok {
                            debug!("rejected frame from {}: {}", peer, note);
                        }
                        let ack = serde_json::json!({"ok": ok, "note": note});
                        let _ = ws_sink.send(Message::Text(ack.to_string().into())).await;
                    }
                    Message::Ping(payload) => {
                        let _ = ws_sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            ev = push_rx.recv() => {
                match ev {
                    Ok(ev) => {
                        let json = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
                        if ws_sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WS client {} lagged, {} push events skipped", peer, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("WS client disconnected: {}", peer);
    {
        let mut c = state.connections.write().await;
        *c = c.saturating_sub(1);
    }
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Single instance lock
    let lock_file_path = std::env::temp_dir().join("dual_feed_arb_hub.lock");
    let lock_file = File::create(&lock_file_path)
        .with_context(|| format!("create lock file {}", lock_file_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("Another feed-hub instance is already running! Exiting.");
            return Ok(());
        }
    };

    let bind = env_or("FEED_HUB_BIND", "0.0.0.0:8080");
    let addr: SocketAddr = bind.parse().context("Invalid FEED_HUB_BIND")?;
    let http_bind = env_or("FEED_HTTP_BIND", "127.0.0.1:8081");
    let http_addr: SocketAddr = http_bind.parse().context("Invalid FEED_HTTP_BIND")?;
    let log_dir = env_or("LOG_DIR", "logs");
    let db_path = env_or("FEED_DB_PATH", "data/feed.db");
    let ntfy_topic = std::env::var("NTFY_TOPIC").ok().filter(|t| !t.trim().is_empty());
    let queue_capacity = std::env::var("ENGINE_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10_000);

    info!("feed-hub DB: {}, logs: {}/, ntfy: {}", db_path, log_dir, ntfy_topic.is_some());
    let db_tx = spawn_db_writer(DbConfig { path: db_path });

    let decider = ArbitrageDecider::new(
        Box::new(EnvConfigSource),
        Arc::new(OpenGate),
        Arc::new(HubTradeSink { db_tx: db_tx.clone(), ntfy_topic }),
    )
    .with_logger(EventLogger::new(&log_dir));

    let db_queue = DbQueue::new(db_tx);
    let reject_queue = db_queue.clone();
    let engine = PairingEngine::new(decider)
        .with_logger(EventLogger::new(&log_dir))
        .with_rejection_hook(Box::new(move |r: &RejectionRecord| {
            reject_queue.push(DbMsg::Rejection(DbRejectionRow::from(r)));
        }));

    let normalizer = MarketNormalizer::new(Arc::new(TeamPairResolver::default()));
    let settings = EngineSettings { queue_capacity, ..EngineSettings::default() };
    let (engine_handle, _engine_task) = spawn_engine(normalizer, engine, settings);

    let state = FeedHubState { engine: engine_handle, connections: Arc::new(RwLock::new(0)) };

    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(state, http_addr).await {
                warn!("http server stopped: {e}");
            }
        });
    }

    // Heartbeat row for feed-db-stats
    {
        let state = state.clone();
        let db_queue = db_queue.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let connections = *state.connections.read().await;
                let Ok(snap) = state.engine.snapshot().await else {
                    warn!("engine gone, heartbeat stopped");
                    break;
                };
                let dropped = db_queue.dropped();
                if dropped > 0 {
                    debug!(dropped, "db rows dropped since start");
                }
                db_queue.push(DbMsg::Heartbeat(DbHeartbeatRow {
                    ts: Utc::now(),
                    connections: connections as i64,
                    buckets: snap.buckets as i64,
                    active_pairs: snap.active_pairs.len() as i64,
                    quotes_ingested: snap.counters.quotes_ingested as i64,
                    quotes_rejected: snap.counters.quotes_rejected as i64,
                    trades: snap.counters.trades as i64,
                }));
            }
        });
    }

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!("feed-hub listening on ws://{}/feed", addr);

    // Any path is accepted as the WS endpoint.
    while let Ok((stream, peer)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_socket(peer, stream, state).await {
                debug!("socket handler err {}: {}", peer, e);
            }
        });
    }

    Ok(())
}
