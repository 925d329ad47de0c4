//! Typed reads and idempotent writes for wallets, transfers, positions and
//! daily health records. Every function takes a plain `&Connection` so callers
//! can group several writes in one transaction inside `AsyncDb::call_named`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use num_bigint::BigUint;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::types::{
    MetricMap, Position, ScoreComponents, Transfer, TransferCategory, Wallet, WalletHealthRecord,
};

pub fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

/// Insert or widen a wallet's watermarks: `first_seen` only moves earlier,
/// `last_seen` only moves later.
pub fn upsert_wallet(conn: &Connection, wallet: &Wallet) -> rusqlite::Result<()> {
    let tags_json = serde_json::to_string(&wallet.tags)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "
        INSERT INTO wallets (address, chain, first_seen, last_seen, tags_json, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
        ON CONFLICT(address) DO UPDATE SET
            chain = excluded.chain,
            first_seen = MIN(wallets.first_seen, excluded.first_seen),
            last_seen = MAX(wallets.last_seen, excluded.last_seen),
            tags_json = excluded.tags_json,
            updated_at = datetime('now')
        ",
        rusqlite::params![
            wallet.address,
            wallet.chain,
            ts_to_sql(&wallet.first_seen),
            ts_to_sql(&wallet.last_seen),
            tags_json,
        ],
    )?;
    Ok(())
}

pub fn get_wallet(conn: &Connection, address: &str) -> rusqlite::Result<Option<Wallet>> {
    conn.query_row(
        "SELECT address, chain, first_seen, last_seen, tags_json FROM wallets WHERE address = ?1",
        rusqlite::params![address],
        |row| {
            let tags_json: String = row.get(4)?;
            Ok(Wallet {
                address: row.get(0)?,
                chain: row.get(1)?,
                first_seen: ts_from_row(row, 2)?,
                last_seen: ts_from_row(row, 3)?,
                tags: serde_json::from_str(&tags_json).map_err(|e| conversion_err(4, e))?,
            })
        },
    )
    .optional()
}

/// Insert transfers, ignoring hashes already stored. Returns rows inserted.
pub fn insert_transfers(conn: &Connection, transfers: &[Transfer]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "
        INSERT INTO transfers
            (hash, address, block_number, timestamp, value, category, contract_address,
             from_address, to_address, raw_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(hash) DO NOTHING
        ",
    )?;
    let mut inserted = 0;
    for t in transfers {
        inserted += stmt.execute(rusqlite::params![
            t.hash,
            t.address,
            t.block_number,
            ts_to_sql(&t.timestamp),
            t.value,
            t.category.map(|c| c.as_str()),
            t.contract_address,
            t.from_address,
            t.to_address,
            t.raw_payload.to_string(),
        ])?;
    }
    Ok(inserted)
}

pub fn transfers_for(conn: &Connection, address: &str) -> rusqlite::Result<Vec<Transfer>> {
    let mut stmt = conn.prepare(
        "
        SELECT hash, address, from_address, to_address, block_number, timestamp, value,
               category, contract_address, raw_json
        FROM transfers
        WHERE address = ?1
        ORDER BY timestamp ASC, hash ASC
        ",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address], |row| {
            let category: Option<String> = row.get(7)?;
            let raw_json: String = row.get(9)?;
            Ok(Transfer {
                hash: row.get(0)?,
                address: row.get(1)?,
                from_address: row.get(2)?,
                to_address: row.get(3)?,
                block_number: row.get(4)?,
                timestamp: ts_from_row(row, 5)?,
                value: row.get(6)?,
                category: category.as_deref().and_then(TransferCategory::from_str_loose),
                contract_address: row.get(8)?,
                raw_payload: serde_json::from_str(&raw_json).map_err(|e| conversion_err(9, e))?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Upsert positions keyed by (address, token, protocol). An incoming row only
/// replaces the stored one when it is not older (`observed_at`).
pub fn upsert_positions(conn: &Connection, positions: &[Position]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "
        INSERT INTO positions
            (address, token, protocol, balance, usd_value, observed_at, raw_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(address, token, protocol) DO UPDATE SET
            balance = excluded.balance,
            usd_value = excluded.usd_value,
            observed_at = excluded.observed_at,
            raw_json = excluded.raw_json
        WHERE excluded.observed_at >= positions.observed_at
        ",
    )?;
    let mut written = 0;
    for p in positions {
        written += stmt.execute(rusqlite::params![
            p.address,
            p.token_contract,
            p.protocol.as_deref().unwrap_or(""),
            p.balance.to_string(),
            p.usd_value,
            ts_to_sql(&p.observed_at),
            p.raw_payload.to_string(),
        ])?;
    }
    Ok(written)
}

pub fn positions_for(conn: &Connection, address: &str) -> rusqlite::Result<Vec<Position>> {
    let mut stmt = conn.prepare(
        "
        SELECT address, token, protocol, balance, usd_value, observed_at, raw_json
        FROM positions
        WHERE address = ?1
        ORDER BY token ASC, protocol ASC
        ",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![address], |row| {
            let protocol: String = row.get(2)?;
            let balance: String = row.get(3)?;
            let raw_json: String = row.get(6)?;
            Ok(Position {
                address: row.get(0)?,
                token_contract: row.get(1)?,
                protocol: (!protocol.is_empty()).then_some(protocol),
                balance: BigUint::parse_bytes(balance.as_bytes(), 10).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        Type::Text,
                        format!("invalid balance {balance}").into(),
                    )
                })?,
                usd_value: row.get(4)?,
                observed_at: ts_from_row(row, 5)?,
                raw_payload: serde_json::from_str(&raw_json).map_err(|e| conversion_err(6, e))?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Write the day's record for a wallet, replacing any earlier run that day.
pub fn upsert_health_record(
    conn: &Connection,
    record: &WalletHealthRecord,
) -> rusqlite::Result<()> {
    let metrics_json = serde_json::to_string(&record.metrics)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let c = &record.components;
    conn.execute(
        "
        INSERT INTO wallet_health_daily
            (address, score_date, activity_score, diversification_score, risk_score,
             profitability_score, stability_score, total_score, metrics_json, computed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
        ON CONFLICT(address, score_date) DO UPDATE SET
            activity_score = excluded.activity_score,
            diversification_score = excluded.diversification_score,
            risk_score = excluded.risk_score,
            profitability_score = excluded.profitability_score,
            stability_score = excluded.stability_score,
            total_score = excluded.total_score,
            metrics_json = excluded.metrics_json,
            computed_at = excluded.computed_at
        ",
        rusqlite::params![
            record.address,
            record.date.to_string(),
            c.activity,
            c.diversification,
            c.risk,
            c.profitability,
            c.stability,
            record.total_score,
            metrics_json,
        ],
    )?;
    Ok(())
}

const RECORD_COLUMNS: &str = "address, score_date, activity_score, diversification_score, \
     risk_score, profitability_score, stability_score, total_score, metrics_json";

/// Row → record. Expects the columns in `RECORD_COLUMNS` order.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<WalletHealthRecord> {
    let date: String = row.get(1)?;
    let metrics_json: String = row.get(8)?;
    let metrics: MetricMap =
        serde_json::from_str(&metrics_json).map_err(|e| conversion_err(8, e))?;
    Ok(WalletHealthRecord {
        address: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| conversion_err(1, e))?,
        components: ScoreComponents {
            activity: row.get(2)?,
            diversification: row.get(3)?,
            risk: row.get(4)?,
            profitability: row.get(5)?,
            stability: row.get(6)?,
        },
        total_score: row.get(7)?,
        metrics,
    })
}

pub fn health_record_on(
    conn: &Connection,
    address: &str,
    date: NaiveDate,
) -> rusqlite::Result<Option<WalletHealthRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM wallet_health_daily WHERE address = ?1 AND score_date = ?2"
        ),
        rusqlite::params![address, date.to_string()],
        record_from_row,
    )
    .optional()
}

pub fn latest_health_record(
    conn: &Connection,
    address: &str,
) -> rusqlite::Result<Option<WalletHealthRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RECORD_COLUMNS} FROM wallet_health_daily
             WHERE address = ?1 ORDER BY score_date DESC LIMIT 1"
        ),
        rusqlite::params![address],
        record_from_row,
    )
    .optional()
}

/// Newest first.
pub fn health_history(
    conn: &Connection,
    address: &str,
    limit: u32,
) -> rusqlite::Result<Vec<WalletHealthRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM wallet_health_daily
         WHERE address = ?1 ORDER BY score_date DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![address, limit], record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
