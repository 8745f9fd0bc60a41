//! Simple Ledger CLI
//!
//! ```text
//! simple_ledger [--env dev] init
//! simple_ledger [--env dev] create-account <owner> <currency> [balance]
//! simple_ledger [--env dev] accounts
//! simple_ledger [--env dev] transfer <from_account_id> <to_account_id> <amount>
//! simple_ledger [--env dev] history <account_id>
//! ```
//!
//! Results are printed as JSON on stdout.

use anyhow::{Context, Result, bail};
use serde::Serialize;

use simple_ledger::config::AppConfig;
use simple_ledger::db::Database;
use simple_ledger::ledger::{
    CreateAccountParams, ExecContext, ListEntriesParams, ListParams, ListTransfersParams,
    PgBackend, Querier, Store, TransferTxParams,
};

fn get_env(args: &[String]) -> String {
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Positional arguments with `--env <name>` removed.
fn positional(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip = false;
    for arg in args.iter().skip(1) {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--env" || arg == "-e" {
            skip = true;
            continue;
        }
        out.push(arg.clone());
    }
    out
}

fn parse_i64(value: Option<&String>, name: &str) -> Result<i64> {
    let raw = value.with_context(|| format!("missing <{}>", name))?;
    raw.parse::<i64>()
        .with_context(|| format!("<{}> must be an integer, got '{}'", name, raw))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct History {
    account_id: i64,
    transfers: Vec<simple_ledger::Transfer>,
    entries: Vec<simple_ledger::Entry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let env = get_env(&args);
    let app_config = AppConfig::load(&env)?;
    let _log_guard = simple_ledger::logging::init_logging(&app_config);

    tracing::info!("Starting simple_ledger in {} mode", env);

    let db = Database::connect(&app_config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await?;

    let positional = positional(&args);
    let Some(command) = positional.first() else {
        bail!("usage: simple_ledger [--env <env>] <init|create-account|accounts|transfer|history> ...");
    };

    if command == "init" {
        db.ensure_schema().await?;
        println!("schema ready");
        return Ok(());
    }

    let store = Store::new(PgBackend::new(db.into_pool()));

    match command.as_str() {
        "create-account" => {
            let owner = positional.get(1).context("missing <owner>")?.clone();
            let currency = positional.get(2).context("missing <currency>")?.clone();
            let balance = if positional.len() > 3 {
                parse_i64(positional.get(3), "balance")?
            } else {
                0
            };
            let mut q = store.queries().await?;
            let account = q
                .create_account(CreateAccountParams {
                    owner,
                    balance,
                    currency,
                })
                .await?;
            print_json(&account)?;
        }
        "accounts" => {
            let mut q = store.queries().await?;
            let accounts = q.list_accounts(ListParams::default()).await?;
            print_json(&accounts)?;
        }
        "transfer" => {
            let arg = TransferTxParams::new(
                parse_i64(positional.get(1), "from_account_id")?,
                parse_i64(positional.get(2), "to_account_id")?,
                parse_i64(positional.get(3), "amount")?,
            );
            let ctx = match app_config.transaction.timeout() {
                Some(timeout) => ExecContext::background().with_timeout(timeout),
                None => ExecContext::background(),
            };
            match store.transfer_tx(&ctx, arg).await {
                Ok(result) => print_json(&result)?,
                Err(e) => {
                    tracing::error!(
                        code = e.code(),
                        retryable = e.is_retryable(),
                        "Transfer failed: {}",
                        e
                    );
                    bail!("transfer failed [{}]: {}", e.code(), e);
                }
            }
        }
        "history" => {
            let account_id = parse_i64(positional.get(1), "account_id")?;
            let mut q = store.queries().await?;
            let transfers = q
                .list_transfers(ListTransfersParams {
                    account_id,
                    page: ListParams::default(),
                })
                .await?;
            let entries = q
                .list_entries(ListEntriesParams {
                    account_id,
                    page: ListParams::default(),
                })
                .await?;
            print_json(&History {
                account_id,
                transfers,
                entries,
            })?;
        }
        other => bail!("unknown command '{}'", other),
    }

    Ok(())
}
