mod cache;
mod config;
mod entity;
mod error;
mod fallback;
mod reads;
mod remote;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cache::CacheStore;
use config::Config;
use entity::{
  Account, ClosingBalance, EntityKind, ExpiryItem, LedgerEntry, OutstandingBill, Partition,
  PriceEntry, SalePurchase, StockItem, SyncEntity, Template, User,
};
use reads::Reports;
use remote::RemoteClient;
use sync::{SyncEngine, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "repsync")]
#[command(about = "Offline-first sync engine for the business reports app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/repsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Financial year override, e.g. "2024-2025"
  #[arg(short, long)]
  year: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pull collections from the remote API into the local cache
  Sync {
    /// Single collection to sync (default: all, concurrently)
    kind: Option<String>,

    /// Use the composite endpoint: one API call, sequential persist
    #[arg(long)]
    bundle: bool,
  },
  /// Print cached rows for a collection
  Show { kind: String },
  /// Follow a collection, reprinting rows on every change
  Watch { kind: String },
  /// Print the account balance report (accounts joined with balances)
  Balances {
    /// Keep following the report, reprinting on every change
    #[arg(long)]
    follow: bool,
  },
  /// Print outstanding bills rolled up per account
  Outstanding,
  /// Delete cached rows for a collection
  Clear { kind: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repsync=info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let year = args.year.unwrap_or_else(|| config.year.clone());

  let store = Arc::new(match &config.database {
    Some(path) => CacheStore::open(path)?,
    None => CacheStore::open_default()?,
  });

  match args.command {
    Command::Sync { kind, bundle } => {
      let remote = RemoteClient::new(&config.api)?;
      let engine = SyncEngine::new(Arc::clone(&store), remote, config.on_fetch_failure);
      run_sync(&engine, kind, bundle, config.user_id, &year).await
    }
    Command::Show { kind } => run_show(&store, &kind, config.user_id, &year),
    Command::Watch { kind } => run_watch(&store, &kind, config.user_id, &year).await,
    Command::Balances { follow } => run_balances(&store, follow).await,
    Command::Outstanding => run_outstanding(&store, config.user_id, &year),
    Command::Clear { kind } => run_clear(&store, &kind, config.user_id, &year),
  }
}

async fn run_sync(
  engine: &SyncEngine<RemoteClient>,
  kind: Option<String>,
  bundle: bool,
  user_id: i64,
  year: &str,
) -> Result<()> {
  if let Some(kind) = kind {
    let kind = parse_kind(&kind)?;
    let outcome = engine.sync_kind(kind, user_id, year).await?;
    print_outcome(&outcome);
    return Ok(());
  }

  let report = if bundle {
    engine.sync_from_bundle(user_id, year).await?
  } else {
    engine.sync_all(user_id, year).await
  };

  for outcome in &report.outcomes {
    print_outcome(outcome);
  }
  let report = report.into_result()?;
  println!(
    "synced {} rows across {} collections",
    report.total_rows(),
    report.outcomes.len()
  );
  Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
  if outcome.used_fallback {
    println!(
      "{}: {} rows (bundled fallback: {})",
      outcome.kind,
      outcome.rows,
      outcome.fallback_cause.as_deref().unwrap_or("unknown cause")
    );
  } else {
    println!("{}: {} rows", outcome.kind, outcome.rows);
  }
}

fn run_show(store: &Arc<CacheStore>, kind: &str, user_id: i64, year: &str) -> Result<()> {
  let kind = parse_kind(kind)?;
  let partition = Partition::for_kind(kind, user_id, year);
  let rows = store.read_raw(kind, &partition)?;
  for row in &rows {
    println!("{}", row);
  }
  Ok(())
}

async fn run_watch(store: &Arc<CacheStore>, kind: &str, user_id: i64, year: &str) -> Result<()> {
  let kind = parse_kind(kind)?;
  let partition = Partition::for_kind(kind, user_id, year);
  let reports = Reports::new(Arc::clone(store));

  match kind {
    EntityKind::Users => watch_loop::<User>(&reports, partition).await,
    EntityKind::Accounts => watch_loop::<Account>(&reports, partition).await,
    EntityKind::ClosingBalances => watch_loop::<ClosingBalance>(&reports, partition).await,
    EntityKind::Templates => watch_loop::<Template>(&reports, partition).await,
    EntityKind::Stock => watch_loop::<StockItem>(&reports, partition).await,
    EntityKind::SalePurchase => watch_loop::<SalePurchase>(&reports, partition).await,
    EntityKind::Ledger => watch_loop::<LedgerEntry>(&reports, partition).await,
    EntityKind::Expiry => watch_loop::<ExpiryItem>(&reports, partition).await,
    EntityKind::PriceData => watch_loop::<PriceEntry>(&reports, partition).await,
    EntityKind::Outstanding => watch_loop::<OutstandingBill>(&reports, partition).await,
  }
}

async fn watch_loop<T: SyncEntity>(reports: &Reports, partition: Partition) -> Result<()> {
  let mut live = reports.live::<T>(partition);
  loop {
    let rows = live.next().await?;
    println!("-- {} ({} rows)", T::KIND, rows.len());
    for row in &rows {
      println!("{}", serde_json::to_value(row)?);
    }
  }
}

async fn run_balances(store: &Arc<CacheStore>, follow: bool) -> Result<()> {
  let reports = Reports::new(Arc::clone(store));

  if follow {
    let mut live = reports.live_account_balances();
    loop {
      print_balances(&live.next().await?);
    }
  }

  print_balances(&reports.account_balances()?);
  Ok(())
}

fn print_balances(rows: &[reads::AccountBalanceRow]) {
  for row in rows {
    println!(
      "{:<10} {:<32} {:>12.2} {}",
      row.code, row.name, row.balance, row.drcr
    );
  }
}

fn run_outstanding(store: &Arc<CacheStore>, user_id: i64, year: &str) -> Result<()> {
  let reports = Reports::new(Arc::clone(store));
  for row in reports.outstanding_summary(user_id, year)? {
    println!(
      "{:<10} {:>3} bills {:>12.2} oldest {} days",
      row.account_code, row.bills, row.total, row.oldest_days
    );
  }
  Ok(())
}

fn run_clear(store: &Arc<CacheStore>, kind: &str, user_id: i64, year: &str) -> Result<()> {
  let kind = parse_kind(kind)?;
  let partition = Partition::for_kind(kind, user_id, year);
  let count = store.count(kind, &partition)?;
  store.clear_partition(kind, &partition)?;
  println!("cleared {} rows from {}", count, kind);
  Ok(())
}

fn parse_kind(input: &str) -> Result<EntityKind> {
  input.parse::<EntityKind>().map_err(|e| eyre!(e))
}
