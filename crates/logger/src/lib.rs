/// Dual-feed arb: audit logger
/// JSONL event stream, NTFY alerts

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }

    /// Best-effort variant: audit writes must never stop the pipeline.
    pub fn log_quiet<T: Serialize>(&self, event: &T) {
        if let Err(e) = self.log(event) {
            tracing::warn!("audit log write failed: {e}");
        }
    }

    pub fn log_dir(&self) -> &std::path::Path {
        &self.log_dir
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// First `n` chars of an event id, enough to grep the audit trail.
pub fn event_prefix(event_id: &str, n: usize) -> String {
    event_id.chars().take(n).collect()
}

// ── Event typy ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct QuoteRejectedEvent {
    pub ts:           String,
    pub event:        &'static str,   // "QUOTE_REJECTED"
    pub stage:        &'static str,   // "normalize" | "pairing"
    pub reason:       String,         // EMPTY_IDENTITY, INVALID_LINE, missing_side, ...
    pub provider:     String,
    pub event_prefix: String,
    pub market:       String,
    pub raw_value:    String,
}

#[derive(Serialize, Debug)]
pub struct PairCreatedEvent {
    pub ts:          String,
    pub event:       &'static str,    // "PAIR_CREATED"
    pub pair_id:     String,
    pub event_id:    String,
    pub market:      String,
    pub line_a:      f64,
    pub line_b:      f64,
    pub selection_a: String,
    pub selection_b: String,
    pub odds_a:      f64,
    pub odds_b:      f64,
    pub profit:      String,
}

#[derive(Serialize, Debug)]
pub struct TradeExecutedEvent {
    pub ts:         String,
    pub event:      &'static str,     // "TRADE_EXECUTED"
    pub trade_id:   String,
    pub event_id:   String,
    pub market:     String,
    pub odds_a:     f64,
    pub odds_b:     f64,
    pub profit_pct: f64,
    pub stake:      f64,
    pub bypassed:   bool,
}

#[derive(Serialize, Debug)]
pub struct TradeAbortedEvent {
    pub ts:         String,
    pub event:      &'static str,     // "TRADE_ABORTED"
    pub reason:     String,           // SCORE_LOCK | GATE_BLOCKED | STAKE_TOO_SMALL
    pub detail:     String,
    pub event_id:   String,
    pub market:     String,
    pub profit_pct: f64,
}

#[derive(Serialize, Debug)]
pub struct EngineHeartbeatEvent {
    pub ts:              String,
    pub event:           &'static str, // "ENGINE_HEARTBEAT"
    pub buckets:         usize,
    pub active_pairs:    usize,
    pub quotes_ingested: u64,
    pub quotes_rejected: u64,
    pub pairs_created:   u64,
    pub trades:          u64,
    pub idle_secs:       i64,
}

#[derive(Serialize, Debug)]
pub struct BypassToggledEvent {
    pub ts:    String,
    pub event: &'static str,          // "BYPASS_TOGGLED"
    pub until: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct AccountPurgedEvent {
    pub ts:             String,
    pub event:          &'static str, // "ACCOUNT_PURGED"
    pub account:        String,
    pub quotes_removed: usize,
    pub pairs_removed:  usize,
}

/// Pošli čitelný push alert
pub async fn send_ntfy_alert(topic: &str, msg: &str, title: &str) {
    let client = reqwest::Client::new();
    match client
        .post(format!("https://ntfy.sh/{topic}"))
        .header("Title", title)
        .header("Priority", "high")
        .header("Tags", "money_with_wings")
        .body(msg.to_string())
        .send()
        .await
    {
        Ok(_)  => tracing::info!("NTFY sent: {}", title),
        Err(e) => tracing::warn!("NTFY failed: {}", e),
    }
}
