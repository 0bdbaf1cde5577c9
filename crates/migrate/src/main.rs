//! `stockwise-migrate up | down | status`
//!
//! Applies, drops or inspects the Postgres ledger schema at `DATABASE_URL`.

use std::time::Duration;

use anyhow::{Context, bail};
use sqlx::postgres::PgPoolOptions;

use stockwise_infra::{InventoryConfig, PostgresLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Up,
    Down,
    Status,
}

impl Command {
    fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg.unwrap_or("up") {
            "up" => Ok(Command::Up),
            "down" => Ok(Command::Down),
            "status" => Ok(Command::Status),
            other => bail!("unknown command '{other}' (expected up, down or status)"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockwise_observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(args.first().map(String::as_str))?;

    let config = InventoryConfig::from_env();
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;
    let ledger = PostgresLedger::new(pool, config.lock_timeout);

    match command {
        Command::Up => {
            ledger
                .ensure_schema()
                .await
                .context("failed to apply ledger schema")?;
            tracing::info!("ledger schema applied");
        }
        Command::Down => {
            tracing::warn!("dropping ledger schema; all stock movements will be lost");
            ledger
                .drop_schema()
                .await
                .context("failed to drop ledger schema")?;
            tracing::info!("ledger schema dropped");
        }
        Command::Status => {
            let present = ledger
                .schema_present()
                .await
                .context("failed to inspect ledger schema")?;
            tracing::info!(present, "ledger schema status");
            if !present {
                bail!("ledger schema is not applied; run `stockwise-migrate up`");
            }
        }
    }

    Ok(())
}
