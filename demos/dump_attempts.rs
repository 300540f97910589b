// Dump the delivery attempt log for one aggregation key as JSON.
//
// Usage: cargo run --example dump_attempts -- KEY [DB_PATH]
//   KEY      e.g. "2025-01-01 10:00" or 2025-01-01T10:00:00
//   DB_PATH  default: ./run/devmon.db

use devmon::metrics_repo::MetricsRepo;
use devmon::models::{aggregation_key, parse_aggregation_key};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let key = args
        .get(1)
        .and_then(|s| parse_aggregation_key(s))
        .map(aggregation_key)
        .ok_or_else(|| anyhow::anyhow!("usage: dump_attempts KEY [DB_PATH]"))?;
    let path = args.get(2).map(String::as_str).unwrap_or("./run/devmon.db");

    let repo = MetricsRepo::connect(path).await?;
    let attempts = repo.get_attempts(&key).await?;
    let aggregate = repo.get_aggregate(&key).await?;
    repo.close().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "aggregate": aggregate,
            "attempts": attempts,
        }))?
    );
    Ok(())
}
