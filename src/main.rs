use anyhow::{Context, Result, bail};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use num_bigint::BigInt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tabula::executor::StatementBuilder;
use tabula::prelude::*;
use tabula::prelude::backend::{MemoryDatabase, SessionConfig};
use tabula::query::StatementLimits;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Order {
    id: i64,
    customer: String,
    amount: BigDecimal,
    status: String,
    created_at: DateTime<Utc>,
}

declare_entity!(Order => "orders" {
    id: ColumnDescriptor::new("order_id", SqlType::Int64).primary_key(),
    customer: ColumnDescriptor::new("customer", SqlType::Text),
    amount: ColumnDescriptor::new("amount", SqlType::decimal(18, 2)),
    status: ColumnDescriptor::new("status", SqlType::Text),
    created_at: ColumnDescriptor::new("created_at", SqlType::Timestamp),
});

#[derive(Parser)]
#[command(name = "tabula")]
#[command(about = "Typed data access demo against the in-memory backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bulk-load orders, update them over an IN list, then delete them.
    RoundTrip {
        #[arg(long, default_value_t = 5000)]
        rows: i64,
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,
        #[arg(long, default_value_t = 1000)]
        max_in_list: usize,
        #[arg(long, default_value_t = 4)]
        max_sessions: usize,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the CREATE TABLE statement of the demo entity.
    Ddl,
}

#[derive(Serialize)]
struct Report {
    copy: BulkCopyResult,
    copy_ms: u128,
    updated: u64,
    update_ms: u128,
    deleted: u64,
    delete_ms: u128,
    remaining: u64,
    pool: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::RoundTrip {
            rows,
            batch_size,
            max_in_list,
            max_sessions,
            json,
        } => {
            let report = round_trip(rows, batch_size, max_in_list, max_sessions).await?;
            print_report(&report, json)
        }
        Command::Ddl => {
            let schema = Arc::new(Order::schema()?);
            let table = tabula::TableRef::new(schema);
            let statement = StatementBuilder::new(&table, StatementLimits::default()).create_table();
            println!("{}", statement.sql);
            Ok(())
        }
    }
}

async fn round_trip(rows: i64, batch_size: usize, max_in_list: usize, max_sessions: usize) -> Result<Report> {
    if rows <= 0 {
        bail!("--rows must be positive");
    }

    let db = MemoryDatabase::new();
    let pool = db
        .session_pool(SessionConfig::default().max_sessions(max_sessions))
        .await
        .context("Failed to build session pool")?;
    let pool = Arc::new(pool);

    let provider = Provider::new(pool.clone())
        .with_limits(StatementLimits::default().max_in_list(max_in_list))?
        .with_bulk_options(BulkCopyOptions::new().batch_size(batch_size))?;
    let orders = provider.default_table::<Order>()?;
    orders.recreate().await?;

    let now = Utc::now();
    let started = Instant::now();
    let copy = orders
        .bulk_copy_iter((0..rows).map(|id| Order {
            id,
            customer: format!("customer-{}", id % 97),
            amount: BigDecimal::new(BigInt::from(id * 125 + 99), 2),
            status: "new".to_string(),
            created_at: now,
        }))
        .await?;
    let copy_ms = started.elapsed().as_millis();
    if copy.failed {
        bail!("Bulk copy failed: {:?}", copy.failure);
    }

    let keys: Vec<i64> = (0..rows).collect();
    let started = Instant::now();
    let updated = orders
        .update_where(&col("id").is_in(keys.clone()), &Assignments::new().set("status", "shipped"))
        .await?;
    let update_ms = started.elapsed().as_millis();

    let started = Instant::now();
    let deleted = orders.delete_where(&col("id").is_in(keys)).await?;
    let delete_ms = started.elapsed().as_millis();

    let remaining = orders.count().await?;
    Ok(Report {
        copy,
        copy_ms,
        updated,
        update_ms,
        deleted,
        delete_ms,
        remaining,
        pool: pool.stats().to_string(),
    })
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "copied   {:>8} rows in {:>3} batches  {:>6} ms",
        report.copy.rows_copied, report.copy.batches_committed, report.copy_ms
    );
    println!("updated  {:>8} rows                 {:>6} ms", report.updated, report.update_ms);
    println!("deleted  {:>8} rows                 {:>6} ms", report.deleted, report.delete_ms);
    println!("remaining {:>7} rows", report.remaining);
    println!("{}", report.pool);
    Ok(())
}
