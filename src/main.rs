// Pricetrawl daemon: runs the scrape workers against the persistent queue.
//
// Optional trailing arguments of the form `product_id,url[,priority]` are
// enqueued before the workers start; everything else comes from the
// PRICETRAWL_* environment.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricetrawl::{Engine, PriceHistorySink, config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PRICETRAWL_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info,pricetrawl=debug")),
        )
        .init();

    let config = config::from_env();
    info!(
        concurrency = config.concurrency,
        queue = %config.queue_url,
        "starting pricetrawl"
    );

    let sink = Arc::new(PriceHistorySink::connect(&config.database_url).await?);
    let engine = Engine::new(config, sink).await?;

    for spec in std::env::args().skip(1) {
        match parse_submission(&spec) {
            Some((product_id, url, priority)) => {
                match engine.submit(product_id, url, priority).await {
                    Ok(job) => info!(job, product = product_id, "job submitted"),
                    Err(e) => error!("rejected submission {spec:?}: {e:#}"),
                }
            }
            None => warn!("ignoring malformed submission argument: {spec:?}"),
        }
    }

    engine.start().await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    engine.shutdown().await;
    Ok(())
}

fn parse_submission(spec: &str) -> Option<(&str, &str, i32)> {
    let mut parts = spec.splitn(3, ',');
    let product_id = parts.next()?.trim();
    let url = parts.next()?.trim();
    if product_id.is_empty() || url.is_empty() {
        return None;
    }
    let priority = match parts.next() {
        Some(raw) => raw.trim().parse().ok()?,
        None => 0,
    };
    Some((product_id, url, priority))
}
