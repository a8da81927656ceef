use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use archive_server::config::{ArchiveConfig, CacheBackendKind};
use archive_server::services::ArchiveServices;
use archive_server::warmup::MAX_WARM_UP_MONTHS;

#[derive(Parser, Debug)]
#[command(
    name = "warm_up_cache",
    about = "Prime the aggregate cache of the mailing list archive"
)]
struct Args {
    /// Mailing lists to warm up. All lists when omitted.
    lists: Vec<String>,

    /// Number of preceding calendar months to warm up, at most 1200. Defaults to `WARM_UP_MONTHS` (1).
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_WARM_UP_MONTHS)))]
    months: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let config = ArchiveConfig::from_env();

    if config.cache_backend == CacheBackendKind::Memory {
        writeln!(
            io::stderr(),
            "error: CACHE_BACKEND=memory is local to this process, warming it up has no effect."
        )?;
        std::process::exit(1);
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let months = args.months.unwrap_or(config.warm_up_months);
    let services = ArchiveServices::postgres(pool.clone(), config);
    let report = services.warm_up.warm_up(&args.lists, months).await?;

    pool.close().await;

    println!(
        "Warmed up {} lists ({} threads, {} months each)",
        report.lists.len(),
        report.threads_warmed,
        months
    );
    for list in &report.lists {
        println!("  {list}");
    }
    Ok(())
}
