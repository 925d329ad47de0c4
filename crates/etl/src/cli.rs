use anyhow::Result;
use common::db::AsyncDb;
use common::store;
use common::types::WalletHealthRecord;

const DEFAULT_HISTORY_LIMIT: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// One batch over the given addresses, or the configured ones.
    Run { addresses: Vec<String> },
    /// Batch immediately, then on every refresh interval.
    Daemon,
    Wallet { address: String },
    History { address: String, limit: u32 },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Daemon);
    };

    match cmd.as_str() {
        "run" => Ok(Command::Run {
            addresses: args.collect(),
        }),
        "daemon" => Ok(Command::Daemon),
        "wallet" => {
            let address = args
                .next()
                .ok_or_else(|| "usage: etl wallet <address>".to_string())?;
            Ok(Command::Wallet { address })
        }
        "history" => {
            let address = args
                .next()
                .ok_or_else(|| "usage: etl history <address> [limit]".to_string())?;
            let limit = match args.next() {
                Some(n) => n
                    .parse()
                    .map_err(|e| format!("invalid history limit {n:?}: {e}"))?,
                None => DEFAULT_HISTORY_LIMIT,
            };
            Ok(Command::History { address, limit })
        }
        other => Err(format!("unknown command: {other}")),
    }
}

pub fn format_record(r: &WalletHealthRecord) -> String {
    let c = &r.components;
    format!(
        "{date}  total={total:.4}  activity={a:.4}  diversification={d:.4}  risk={k:.4}  \
         profitability={p:.4}  stability={s:.4}",
        date = r.date,
        total = r.total_score,
        a = c.activity,
        d = c.diversification,
        k = c.risk,
        p = c.profitability,
        s = c.stability,
    )
}

pub async fn show_wallet(db: &AsyncDb, address: &str) -> Result<()> {
    let address = address.to_lowercase();
    let lookup = address.clone();
    let (wallet, record) = db
        .call_named("cli.wallet", move |conn| {
            Ok((
                store::get_wallet(conn, &lookup)?,
                store::latest_health_record(conn, &lookup)?,
            ))
        })
        .await?;

    println!("Wallet: {address}");
    if let Some(w) = wallet {
        println!(
            "  chain={}  first_seen={}  last_seen={}",
            w.chain, w.first_seen, w.last_seen
        );
    }
    match record {
        Some(r) => {
            println!("  {}", format_record(&r));
            println!("  metrics: {}", serde_json::to_string(&r.metrics)?);
        }
        None => println!("  no score recorded yet"),
    }
    Ok(())
}

pub async fn show_history(db: &AsyncDb, address: &str, limit: u32) -> Result<()> {
    let address = address.to_lowercase();
    let lookup = address.clone();
    let records = db
        .call_named("cli.history", move |conn| {
            Ok(store::health_history(conn, &lookup, limit)?)
        })
        .await?;

    println!("History for {address} (newest first):");
    if records.is_empty() {
        println!("  no score recorded yet");
    }
    for r in &records {
        println!("  {}", format_record(r));
    }
    Ok(())
}
