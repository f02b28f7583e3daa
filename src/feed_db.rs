use anyhow::{Context, Result};
use arb_detector::trade::{Trade, TradeSink};
use chrono::{DateTime, Utc};
use logger::send_ntfy_alert;
use pairing_engine::RejectionRecord;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct DbTradeRow {
    pub ts: DateTime<Utc>,
    pub trade_id: String,
    pub event_id: String,
    pub market: String,
    pub line_a: f64,
    pub line_b: f64,
    pub selection_a: String,
    pub selection_b: String,
    pub odds_a: f64,
    pub odds_b: f64,
    pub profit_pct: f64,
    pub stake: f64,
    pub status: String,
    pub bypassed: bool,
    pub trade_json: String,
}

impl DbTradeRow {
    pub fn from_trade(t: &Trade) -> Self {
        Self {
            ts: t.created_at,
            trade_id: t.id.clone(),
            event_id: t.event_id.clone(),
            market: t.market_type.to_string(),
            line_a: t.leg_a.line,
            line_b: t.leg_b.line,
            selection_a: t.leg_a.selection.to_string(),
            selection_b: t.leg_b.selection.to_string(),
            odds_a: t.odds_a,
            odds_b: t.odds_b,
            profit_pct: t.profit_pct,
            stake: t.stake,
            status: serde_json::to_value(t.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            bypassed: t.bypassed,
            trade_json: serde_json::to_string(t).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbRejectionRow {
    pub ts: DateTime<Utc>,
    pub stage: String,
    pub reason: String,
    pub provider: String,
    pub event_id: String,
    pub market: String,
    pub raw_value: String,
}

impl From<&RejectionRecord> for DbRejectionRow {
    fn from(r: &RejectionRecord) -> Self {
        Self {
            ts: r.ts,
            stage: r.stage.to_string(),
            reason: r.reason.to_string(),
            provider: r.provider.clone(),
            event_id: r.event_id.clone(),
            market: r.market.clone(),
            raw_value: r.raw_value.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbHeartbeatRow {
    pub ts: DateTime<Utc>,
    pub connections: i64,
    pub buckets: i64,
    pub active_pairs: i64,
    pub quotes_ingested: i64,
    pub quotes_rejected: i64,
    pub trades: i64,
}

#[derive(Debug)]
pub enum DbMsg {
    Trade(Box<DbTradeRow>),
    Rejection(DbRejectionRow),
    Heartbeat(DbHeartbeatRow),
}

/// Non-blocking producer side of the writer queue. Rows that do not fit are
/// counted and reported instead of vanishing.
#[derive(Clone)]
pub struct DbQueue {
    tx:      mpsc::Sender<DbMsg>,
    dropped: Arc<AtomicU64>,
}

impl DbQueue {
    pub fn new(tx: mpsc::Sender<DbMsg>) -> Self {
        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn push(&self, msg: DbMsg) -> bool {
        let kind = msg.kind();
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                let why = if matches!(e, TrySendError::Full(_)) { "queue full" } else { "writer stopped" };
                // first drop, then every 100th
                if dropped == 1 || dropped % 100 == 0 {
                    warn!(kind, dropped, "[feed-db] {why}, row dropped");
                }
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DbMsg {
    fn kind(&self) -> &'static str {
        match self {
            DbMsg::Trade(_) => "trade",
            DbMsg::Rejection(_) => "rejection",
            DbMsg::Heartbeat(_) => "heartbeat",
        }
    }
}

pub fn spawn_db_writer(cfg: DbConfig) -> mpsc::Sender<DbMsg> {
    let (tx, mut rx) = mpsc::channel::<DbMsg>(10_000);

    std::thread::spawn(move || {
        let result: Result<()> = (|| {
            let conn = open_db(Path::new(&cfg.path))?;
            while let Some(msg) = rx.blocking_recv() {
                if let Err(e) = apply_msg(&conn, msg) {
                    // DB must never stall the engine
                    warn!("[feed-db] write failed: {e:#}");
                }
            }
            Ok(())
        })();

        if let Err(e) = result {
            error!("[feed-db] fatal: {e:#}");
        }
    });

    tx
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn = Connection::open(path).context("open sqlite db")?;
    conn.pragma_update(None, "journal_mode", "WAL").ok();
    conn.pragma_update(None, "synchronous", "NORMAL").ok();
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            trade_id TEXT NOT NULL UNIQUE,
            event_id TEXT NOT NULL,
            market TEXT NOT NULL,
            line_a REAL NOT NULL,
            line_b REAL NOT NULL,
            selection_a TEXT NOT NULL,
            selection_b TEXT NOT NULL,
            odds_a REAL NOT NULL,
            odds_b REAL NOT NULL,
            profit_pct REAL NOT NULL,
            stake REAL NOT NULL,
            status TEXT NOT NULL,
            bypassed INTEGER NOT NULL,
            trade_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(ts);
        CREATE INDEX IF NOT EXISTS idx_trades_event ON trades(event_id);

        CREATE TABLE IF NOT EXISTS rejections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            stage TEXT NOT NULL,
            reason TEXT NOT NULL,
            provider TEXT NOT NULL,
            event_id TEXT NOT NULL,
            market TEXT NOT NULL,
            raw_value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rej_ts ON rejections(ts);
        CREATE INDEX IF NOT EXISTS idx_rej_reason ON rejections(reason);

        CREATE TABLE IF NOT EXISTS hub_heartbeat (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            connections INTEGER NOT NULL,
            buckets INTEGER NOT NULL,
            active_pairs INTEGER NOT NULL,
            quotes_ingested INTEGER NOT NULL,
            quotes_rejected INTEGER NOT NULL,
            trades INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_hb_ts ON hub_heartbeat(ts);
        "#,
    )
    .context("init schema")?;

    Ok(())
}

pub fn apply_msg(conn: &Connection, msg: DbMsg) -> Result<()> {
    match msg {
        DbMsg::Trade(r) => {
            conn.execute(
                r#"
                INSERT INTO trades(ts, trade_id, event_id, market, line_a, line_b, selection_a, selection_b,
                                   odds_a, odds_b, profit_pct, stake, status, bypassed, trade_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(trade_id) DO NOTHING
                "#,
                params![
                    r.ts.to_rfc3339(),
                    r.trade_id,
                    r.event_id,
                    r.market,
                    r.line_a,
                    r.line_b,
                    r.selection_a,
                    r.selection_b,
                    r.odds_a,
                    r.odds_b,
                    r.profit_pct,
                    r.stake,
                    r.status,
                    if r.bypassed { 1 } else { 0 },
                    r.trade_json,
                ],
            )?;
        }
        DbMsg::Rejection(r) => {
            conn.execute(
                "INSERT INTO rejections(ts, stage, reason, provider, event_id, market, raw_value) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![r.ts.to_rfc3339(), r.stage, r.reason, r.provider, r.event_id, r.market, r.raw_value],
            )?;
        }
        DbMsg::Heartbeat(r) => {
            conn.execute(
                "INSERT INTO hub_heartbeat(ts, connections, buckets, active_pairs, quotes_ingested, quotes_rejected, trades) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    r.ts.to_rfc3339(),
                    r.connections,
                    r.buckets,
                    r.active_pairs,
                    r.quotes_ingested,
                    r.quotes_rejected,
                    r.trades,
                ],
            )?;
        }
    }

    Ok(())
}

/// Trade sink used by the hub: queue the row for SQLite, push an alert.
pub struct HubTradeSink {
    pub db_tx: mpsc::Sender<DbMsg>,
    pub ntfy_topic: Option<String>,
}

impl TradeSink for HubTradeSink {
    fn save_trade(&self, trade: &Trade) -> Result<()> {
        if let Some(topic) = self.ntfy_topic.clone() {
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                let title = format!("ARB {} {}", trade.market_type, trade.profit);
                let msg = format!(
                    "{} | {} {}@{} / {}@{} | stake {}{}",
                    trade.event_id,
                    trade.market_type,
                    trade.leg_a.selection,
                    trade.odds_a,
                    trade.leg_b.selection,
                    trade.odds_b,
                    trade.stake,
                    if trade.bypassed { " (bypass)" } else { "" }
                );
                rt.spawn(async move { send_ntfy_alert(&topic, &msg, &title).await });
            }
        }

        self.db_tx
            .try_send(DbMsg::Trade(Box::new(DbTradeRow::from_trade(trade))))
            .map_err(|e| anyhow::anyhow!("db queue: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejection_row() -> DbRejectionRow {
        DbRejectionRow {
            ts: Utc::now(),
            stage: "pairing".into(),
            reason: "LINE_MISMATCH".into(),
            provider: "B".into(),
            event_id: "E2".into(),
            market: "FT_OU".into(),
            raw_value: "Over@2.5".into(),
        }
    }

    #[test]
    fn full_queue_counts_dropped_rows() {
        let (tx, mut rx) = mpsc::channel(1);
        let queue = DbQueue::new(tx);

        assert!(queue.push(DbMsg::Rejection(rejection_row())));
        assert!(!queue.push(DbMsg::Rejection(rejection_row())));
        assert!(!queue.push(DbMsg::Rejection(rejection_row())));
        assert_eq!(queue.dropped(), 2);

        assert!(rx.try_recv().is_ok());
        assert!(queue.clone().push(DbMsg::Rejection(rejection_row())));
        assert_eq!(queue.dropped(), 2);

        drop(rx);
        assert!(!queue.push(DbMsg::Rejection(rejection_row())));
        assert_eq!(queue.dropped(), 3);
    }

    #[test]
    fn schema_and_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_db(&dir.path().join("nested/feed.db")).unwrap();

        apply_msg(
            &conn,
            DbMsg::Rejection(DbRejectionRow {
                ts: Utc::now(),
                stage: "normalize".into(),
                reason: "INVALID_LINE".into(),
                provider: "A".into(),
                event_id: "E1".into(),
                market: "FT_HDP".into(),
                raw_value: "???".into(),
            }),
        )
        .unwrap();
        apply_msg(
            &conn,
            DbMsg::Heartbeat(DbHeartbeatRow {
                ts: Utc::now(),
                connections: 2,
                buckets: 3,
                active_pairs: 1,
                quotes_ingested: 10,
                quotes_rejected: 1,
                trades: 0,
            }),
        )
        .unwrap();

        let n: i64 = conn.query_row("SELECT COUNT(1) FROM rejections", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 1);
        let reason: String = conn.query_row("SELECT reason FROM rejections", [], |r| r.get(0)).unwrap();
        assert_eq!(reason, "INVALID_LINE");
        let hb: i64 = conn.query_row("SELECT buckets FROM hub_heartbeat", [], |r| r.get(0)).unwrap();
        assert_eq!(hb, 3);

        // reopening an existing file keeps the schema
        drop(conn);
        let conn = open_db(&dir.path().join("nested/feed.db")).unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(1) FROM trades", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 0);
    }
}
