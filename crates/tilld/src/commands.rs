//! One-shot subcommands. Each opens the same local state the daemon uses,
//! does its work and exits.

use anyhow::{Context, Result};
use serde::Serialize;
use till_core::config::TillConfig;
use till_sync::SyncWatermark;

use crate::daemon::Components;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("encoding output")?
    );
    Ok(())
}

pub async fn sync(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    components.probe().await;
    let result = components.orchestrator.perform_full_sync().await;
    components.orchestrator.shutdown().await;
    print_json(&result)?;
    if !result.success {
        anyhow::bail!("sync finished with {} error(s)", result.errors.len());
    }
    Ok(())
}

pub async fn queue_list(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    print_json(&components.queue.list_operations().await)
}

pub async fn queue_stats(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    print_json(&components.queue.stats())
}

pub async fn queue_retry(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    let reset = components.queue.retry_failed().await?;
    println!("{reset} failed operation(s) reset");

    if reset > 0 && components.probe().await {
        let report = components.queue.drain().await;
        print_json(&report)?;
    }
    components.queue.shutdown();
    Ok(())
}

pub async fn queue_clear(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    let dropped = components.queue.clear().await?;
    println!("{dropped} operation(s) dropped");
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    online: bool,
    remote_url: String,
    queue: till_sync::QueueStats,
    watermarks: Vec<SyncWatermark>,
}

pub async fn status(config: &TillConfig) -> Result<()> {
    let components = Components::open(config).await?;
    let report = StatusReport {
        online: components.probe().await,
        remote_url: config.storage.remote_url.clone(),
        queue: components.queue.stats(),
        watermarks: components
            .metadata
            .all()
            .await
            .context("reading watermarks")?,
    };
    print_json(&report)
}

pub fn config_show(config: &TillConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("encoding config")?;
    print!("{rendered}");
    Ok(())
}
