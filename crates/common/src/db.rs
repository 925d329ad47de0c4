use anyhow::Result;
use rusqlite::Connection;

/// Async database wrapper around `tokio_rusqlite::Connection`.
///
/// All SQLite work runs on a dedicated background thread, keeping the Tokio
/// runtime cooperative. Clone is cheap (shared sender to that thread), so the
/// pipeline, the extraction workers and the HTTP layer share one handle.
#[derive(Clone)]
pub struct AsyncDb {
    conn: tokio_rusqlite::Connection,
}

impl AsyncDb {
    /// Open a database at `path`, set PRAGMAs (WAL, foreign keys, busy_timeout)
    /// and run migrations on the background thread.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;

        // Migrations need the write lock. A concurrent writer (a second
        // process, an admin sqlite3 session) must not crash-loop startup, so
        // retry with backoff using a short per-attempt busy_timeout.
        let mut backoff = std::time::Duration::from_secs(1);
        let max_backoff = std::time::Duration::from_secs(30);
        let max_total_wait = std::time::Duration::from_secs(10 * 60);
        let start = std::time::Instant::now();

        loop {
            let res = conn
                .call(|conn| -> std::result::Result<(), rusqlite::Error> {
                    conn.busy_timeout(std::time::Duration::from_secs(1))?;
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
                    run_migrations(conn)?;
                    conn.busy_timeout(std::time::Duration::from_secs(30))?;
                    Ok(())
                })
                .await;

            match res {
                Ok(()) => break,
                Err(tokio_rusqlite::Error::Error(err)) => {
                    if !is_locked(&err) {
                        return Err(
                            anyhow::Error::from(err).context("AsyncDb::open: migration failed")
                        );
                    }

                    if start.elapsed() >= max_total_wait {
                        return Err(anyhow::Error::from(err).context(
                            "AsyncDb::open: migration failed (database stayed locked too long)",
                        ));
                    }

                    tracing::warn!(
                        wait_for = ?backoff,
                        "AsyncDb::open: database is locked; retrying migrations"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(other) => return Err(anyhow::anyhow!("AsyncDb::open: {other}")),
            }
        }

        Ok(Self { conn })
    }

    /// Run a closure on the background SQLite thread and return the result.
    pub async fn call<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn.call(move |conn| function(conn)).await.map_err(
            |e: tokio_rusqlite::Error<anyhow::Error>| match e {
                tokio_rusqlite::Error::ConnectionClosed => {
                    anyhow::anyhow!("database connection closed")
                }
                tokio_rusqlite::Error::Close((_, err)) => {
                    anyhow::anyhow!("database close error: {err}")
                }
                tokio_rusqlite::Error::Error(err) => err,
                other => anyhow::anyhow!("database error: {other}"),
            },
        )
    }

    /// Like [`Self::call`], but records latency and error metrics under `op`.
    ///
    /// Latency covers queueing on the SQLite thread plus execution.
    pub async fn call_named<F, R>(&self, op: &'static str, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let start = std::time::Instant::now();
        let res = self.call(function).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;

        let status = if res.is_ok() { "ok" } else { "err" };
        metrics::histogram!(
            "wallet_health_db_query_latency_ms",
            "op" => op,
            "status" => status
        )
        .record(ms);
        if res.is_err() {
            metrics::counter!("wallet_health_db_query_errors_total", "op" => op).increment(1);
        }

        res
    }
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

pub fn run_migrations(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}

// Timestamps are RFC 3339 UTC strings with a fixed shape, so lexical order is
// chronological order (MIN/MAX and range filters rely on this).
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS wallets (
    address TEXT PRIMARY KEY,          -- lowercase 0x-prefixed
    chain TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    tags_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transfers (
    hash TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    block_number INTEGER,
    timestamp TEXT NOT NULL,
    value REAL NOT NULL DEFAULT 0.0,
    category TEXT,                     -- external, internal, erc20, erc721, erc1155
    contract_address TEXT,
    from_address TEXT,
    to_address TEXT,
    raw_json TEXT NOT NULL,
    ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_transfers_address_ts ON transfers(address, timestamp);

CREATE TABLE IF NOT EXISTS positions (
    address TEXT NOT NULL,
    token TEXT NOT NULL,
    protocol TEXT NOT NULL DEFAULT '', -- '' when the source has no protocol
    balance TEXT NOT NULL,             -- base units, decimal digits
    usd_value REAL,
    observed_at TEXT NOT NULL,
    raw_json TEXT NOT NULL,
    PRIMARY KEY (address, token, protocol)
);

CREATE TABLE IF NOT EXISTS wallet_health_daily (
    address TEXT NOT NULL,
    score_date TEXT NOT NULL,          -- YYYY-MM-DD (UTC)
    activity_score REAL NOT NULL,
    diversification_score REAL NOT NULL,
    risk_score REAL NOT NULL,
    profitability_score REAL NOT NULL,
    stability_score REAL NOT NULL,
    total_score REAL NOT NULL,
    metrics_json TEXT NOT NULL,
    computed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (address, score_date)
);

CREATE TABLE IF NOT EXISTS extraction_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    status TEXT NOT NULL,              -- pending, processing, completed, failed
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extraction_jobs_address ON extraction_jobs(address, id);

-- At most one in-flight job per address.
CREATE UNIQUE INDEX IF NOT EXISTS idx_extraction_jobs_in_flight
    ON extraction_jobs(address) WHERE status IN ('pending', 'processing');
";

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect()
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = table_names(&conn);
        for t in [
            "wallets",
            "transfers",
            "positions",
            "wallet_health_daily",
            "extraction_jobs",
        ] {
            assert!(tables.contains(&t.to_string()), "missing table {t}");
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_in_flight_index_rejects_second_pending_job() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO extraction_jobs (address, status, created_at, updated_at)
                      VALUES ('0xw', ?1, 't', 't')";
        conn.execute(insert, ["completed"]).unwrap();
        conn.execute(insert, ["pending"]).unwrap();
        assert!(conn.execute(insert, ["processing"]).is_err());
    }

    #[tokio::test]
    async fn test_async_db_open_runs_migrations() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let tables: Vec<String> = db.call(|conn| Ok(table_names(conn))).await.unwrap();
        assert!(tables.contains(&"wallet_health_daily".to_string()));
        assert!(tables.contains(&"extraction_jobs".to_string()));
    }

    #[tokio::test]
    async fn test_async_db_is_clone_and_send() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let db2 = db.clone();

        db.call(|conn| {
            conn.execute(
                "INSERT INTO wallets (address, chain, first_seen, last_seen)
                 VALUES ('0xabc', 'eth_mainnet', '2024-01-01T00:00:00Z', '2024-01-02T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let handle = tokio::spawn(async move {
            db2.call(|conn| {
                Ok(conn.query_row(
                    "SELECT chain FROM wallets WHERE address = '0xabc'",
                    [],
                    |row| row.get::<_, String>(0),
                )?)
            })
            .await
        });

        assert_eq!(handle.await.unwrap().unwrap(), "eth_mainnet");
    }

    #[tokio::test]
    async fn test_async_db_call_returns_error_on_bad_sql() {
        let db = AsyncDb::open(":memory:").await.unwrap();
        let result: Result<()> = db
            .call(|conn| {
                conn.execute("INVALID SQL", [])?;
                Ok(())
            })
            .await;

        assert!(result.is_err());
    }
}
