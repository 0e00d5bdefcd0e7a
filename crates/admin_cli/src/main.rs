use std::error::Error;

use clap::{Args, Parser, Subcommand};
use engine::{CreditService, PackRuleSet};
use migration::MigratorTrait;
use sea_orm::Database;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "homestage_admin")]
#[command(about = "Admin utilities for the credit ledger (inspect/adjust/sweep)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./homestage.db?mode=rwc"
    )]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a user's cached balance and pack policy.
    Balance(UserArgs),
    /// List a user's most recent ledger entries, newest first.
    Ledger(LedgerArgs),
    /// Apply a signed manual adjustment to a user's balance.
    Adjust(AdjustArgs),
    /// Zero all balances past their expiry date.
    Sweep,
    /// Compare a user's cached balance against their ledger sum.
    Audit(UserArgs),
}

#[derive(Args, Debug)]
struct UserArgs {
    #[arg(long)]
    user: Uuid,
}

#[derive(Args, Debug)]
struct LedgerArgs {
    #[arg(long)]
    user: Uuid,
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

#[derive(Args, Debug)]
struct AdjustArgs {
    #[arg(long)]
    user: Uuid,
    /// Signed credit delta (positive grants, negative removes).
    #[arg(long, allow_hyphen_values = true)]
    amount: i64,
    /// Idempotency key, if the adjustment may be retried.
    #[arg(long)]
    source_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let db = Database::connect(&cli.database_url).await?;
    migration::Migrator::up(&db, None).await?;
    let service = CreditService::builder()
        .database(db)
        .packs(PackRuleSet::default())
        .build();

    match cli.command {
        Command::Balance(args) => {
            let balance = service.balance(&args.user).await?;
            println!("balance: {}", balance.balance);
            println!(
                "expires_at: {}",
                balance
                    .expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "last_pack: {}",
                balance.last_pack.unwrap_or_else(|| "-".to_string())
            );
            println!("auto_extend: {}", balance.auto_extend);
        }
        Command::Ledger(args) => {
            for entry in service.transactions(&args.user, args.limit).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    entry.id,
                    entry.created_at.to_rfc3339(),
                    entry.delta,
                    entry.reason.as_str(),
                    entry.source_id.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Adjust(args) => {
            let entry = service
                .adjust(args.user, args.amount, args.source_id)
                .await?;
            println!("entry {} applied: {} credits", entry.id, entry.delta);
        }
        Command::Sweep => {
            let swept = service.sweep_expired(chrono::Utc::now()).await?;
            println!("{swept} account(s) swept");
        }
        Command::Audit(args) => {
            let balance = service.balance(&args.user).await?;
            let total = service.ledger_total(&args.user).await?;
            if balance.balance == total {
                println!("ok: balance {} matches ledger sum", balance.balance);
            } else {
                println!(
                    "drift: balance {} vs ledger sum {} (expiry sweeps write no ledger entries)",
                    balance.balance, total
                );
            }
        }
    }

    Ok(())
}
