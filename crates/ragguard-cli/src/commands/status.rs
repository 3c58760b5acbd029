//! Status command

use crate::app::OutputFormat;
use crate::output::{self, terminal};
use anyhow::Result;
use ragguard_core::pool::HealthReport;
use ragguard_core::resilience::BreakerSnapshot;
use ragguard_core::{AppContext, CacheStats, Config, PoolStats};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Status {
    llm_url: String,
    llm_model: String,
    health: HealthReport,
    pools: Vec<PoolStats>,
    caches: Vec<CacheStats>,
    breakers: Vec<BreakerSnapshot>,
    alert_rules: usize,
}

pub async fn run(config: Config, format: OutputFormat) -> Result<()> {
    let ctx = AppContext::new(config)?;
    let outcome = status(&ctx, format).await;
    ctx.shutdown().await;
    outcome
}

async fn status(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let client = ctx.chat_client().await?;
    let health = client.pool().run_health_check().await;

    let status = Status {
        llm_url: client.config().url.clone(),
        llm_model: client.config().model.clone(),
        health,
        pools: ctx.pools().stats(),
        caches: ctx.caches().stats(),
        breakers: ctx.breaker_snapshots(),
        alert_rules: ctx.monitor().alerts().rules().len(),
    };

    match output::structured(&status, format)? {
        Some(rendered) => println!("{}", rendered),
        None => {
            println!("LLM service:   {} ({})", status.llm_url, status.llm_model);
            println!("Alert rules:   {}", status.alert_rules);
            let health = &status.health;
            println!(
                "Health pass:   {} created, {} removed, {} creation failures",
                health.created,
                health.removed_failed + health.removed_aged + health.removed_idle,
                health.creation_failures
            );
            println!();
            for pool in &status.pools {
                print!("{}", terminal::format_pool(pool));
            }
            for cache in &status.caches {
                print!("{}", terminal::format_cache(cache));
            }
            print!("{}", terminal::format_breakers(&status.breakers));
        }
    }
    Ok(())
}
