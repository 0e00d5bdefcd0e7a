use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use settings::Database;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "homestage={level},engine={level}",
            level = settings.app.level
        ))
        .init();

    let db = parse_database(&settings.database).await?;

    let mut builder = engine::CreditService::builder()
        .database(db)
        .packs(engine::PackRuleSet::new(settings.packs));
    if let Some(thresholds) = settings.thresholds {
        builder = builder.thresholds(thresholds);
    }
    let service = Arc::new(builder.build());

    let mut tasks = tokio::task::JoinSet::new();

    let interval_hours = settings.sweeper.interval_hours;
    tasks.spawn({
        let service = service.clone();
        async move {
            tracing::info!(interval_hours, "expiry sweeper running");
            let period = std::time::Duration::from_secs(interval_hours * 60 * 60);
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match service.sweep_expired(chrono::Utc::now()).await {
                    Ok(swept) => {
                        if swept > 0 {
                            tracing::info!(accounts = swept, "sweep pass complete");
                        }
                    }
                    Err(err) => tracing::error!("sweep pass failed: {err}"),
                }
            }
        }
    });

    while tasks.join_next().await.is_some() {
        tasks.shutdown().await;
    }

    Ok(())
}

async fn parse_database(
    config: &settings::Database,
) -> Result<sea_orm::DatabaseConnection, Box<dyn std::error::Error + Send + Sync>> {
    let url = match config {
        Database::Memory => String::from("sqlite::memory:"),
        Database::Sqlite(path) => format!("sqlite:{}?mode=rwc", path),
    };

    let database = sea_orm::Database::connect(url).await?;
    Migrator::up(&database, None).await?;
    Ok(database)
}
