use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

fn main() -> Result<()> {
    let db_path = std::env::var("FEED_DB_PATH").unwrap_or_else(|_| "data/feed.db".to_string());
    let conn = Connection::open(&db_path).with_context(|| format!("open db at {db_path}"))?;

    let tables = ["trades", "rejections", "hub_heartbeat"];

    println!("db_path={db_path}");
    for t in tables {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(1) FROM {t}"), [], |r| r.get(0))
            .with_context(|| format!("count {t}"))?;
        println!("{t}: {count}");
    }

    let last_hb: Option<(String, i64, i64, i64, i64, i64)> = conn
        .query_row(
            "SELECT ts, connections, buckets, active_pairs, quotes_ingested, trades FROM hub_heartbeat ORDER BY ts DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()
        .context("read last heartbeat")?;

    if let Some((ts, connections, buckets, pairs, ingested, trades)) = last_hb {
        println!(
            "last_heartbeat: ts={ts} connections={connections} buckets={buckets} pairs={pairs} ingested={ingested} trades={trades}"
        );
    } else {
        println!("last_heartbeat: <none>");
    }

    let last_trade: Option<(String, String, String, f64, f64, String)> = conn
        .query_row(
            "SELECT ts, trade_id, market, profit_pct, stake, status FROM trades ORDER BY ts DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
        )
        .optional()
        .context("read last trade")?;

    match last_trade {
        Some((ts, id, market, profit, stake, status)) => {
            println!("last_trade: ts={ts} id={id} market={market} profit={profit:.2}% stake={stake} status={status}")
        }
        None => println!("last_trade: <none>"),
    }

    let mut stmt = conn
        .prepare("SELECT stage, reason, COUNT(1) AS n FROM rejections GROUP BY stage, reason ORDER BY n DESC LIMIT 10")
        .context("prepare rejection summary")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, i64>(2)?)))?;
    println!("top_rejections:");
    for row in rows {
        let (stage, reason, n) = row?;
        println!("  {stage}/{reason}: {n}");
    }

    Ok(())
}
