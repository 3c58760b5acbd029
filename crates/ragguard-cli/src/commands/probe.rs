//! Probe command

use crate::app::{OutputFormat, ProbeArgs};
use crate::output::{self, terminal};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use ragguard_core::resilience::BreakerSnapshot;
use ragguard_core::{
    AppContext, CacheStats, ChatMessage, Config, Dashboard, LLMClient, PoolStats, RagGuardError,
};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Serialize)]
struct ProbeReport {
    requests: usize,
    answered: usize,
    unavailable: usize,
    busy: usize,
    failed: usize,
    elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    pools: Vec<PoolStats>,
    caches: Vec<CacheStats>,
    breakers: Vec<BreakerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dashboard: Option<Dashboard>,
}

impl ProbeReport {
    fn record(&mut self, outcome: &std::result::Result<String, RagGuardError>) {
        match outcome {
            Ok(answer) => {
                self.answered += 1;
                if self.sample_answer.is_none() {
                    self.sample_answer = Some(answer.clone());
                }
            }
            Err(e) => {
                if e.is_circuit_open() {
                    self.unavailable += 1;
                } else if e.is_pool_exhausted() {
                    self.busy += 1;
                } else {
                    self.failed += 1;
                }
                self.last_error = Some(e.to_string());
            }
        }
    }
}

pub async fn run(args: ProbeArgs, config: Config, format: OutputFormat) -> Result<()> {
    let question = args.question();
    if question.trim().is_empty() {
        return Err(RagGuardError::InvalidInput("question must not be empty".to_string()).into());
    }
    if args.count == 0 {
        return Err(RagGuardError::InvalidInput("count must be at least 1".to_string()).into());
    }

    let ctx = AppContext::new(config)?;
    let outcome = probe(&ctx, &args, &question, format).await;
    ctx.shutdown().await;
    outcome
}

async fn probe(
    ctx: &AppContext,
    args: &ProbeArgs,
    question: &str,
    format: OutputFormat,
) -> Result<()> {
    let client = ctx.chat_client().await?;
    tracing::debug!(
        "Probing {} with {} requests ({} concurrent)",
        client.config().url,
        args.count,
        args.concurrency
    );

    let started = Instant::now();
    let client = &client;
    let outcomes: Vec<_> = stream::iter(0..args.count)
        .map(|i| {
            let prompt = if args.distinct {
                format!("{} (#{})", question, i + 1)
            } else {
                question.to_string()
            };
            async move { client.chat_completion(vec![ChatMessage::user(prompt)]).await }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    let mut report = ProbeReport {
        requests: args.count,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        ..ProbeReport::default()
    };
    let mut last_error = None;
    for outcome in outcomes {
        report.record(&outcome);
        if let Err(e) = outcome {
            last_error = Some(e);
        }
    }
    report.pools = ctx.pools().stats();
    report.caches = ctx.caches().stats();
    report.breakers = ctx.breaker_snapshots();
    if args.dashboard {
        report.dashboard = Some(
            ctx.monitor()
                .get_dashboard(Duration::from_secs(args.window)),
        );
    }

    match output::structured(&report, format)? {
        Some(rendered) => println!("{}", rendered),
        None => print_report(&report),
    }

    match last_error {
        Some(e) if report.answered == 0 => Err(e.into()),
        _ => Ok(()),
    }
}

fn print_report(report: &ProbeReport) {
    println!(
        "Requests:      {} in {:.0} ms",
        report.requests, report.elapsed_ms
    );
    println!("  Answered:    {}", report.answered);
    println!("  Unavailable: {}", report.unavailable);
    println!("  Busy:        {}", report.busy);
    println!("  Failed:      {}", report.failed);
    if let Some(answer) = &report.sample_answer {
        println!();
        println!("Sample answer: {}", answer);
    }
    if let Some(error) = &report.last_error {
        println!("Last error:    {}", error);
    }

    println!();
    for pool in &report.pools {
        print!("{}", terminal::format_pool(pool));
    }
    for cache in &report.caches {
        print!("{}", terminal::format_cache(cache));
    }
    print!("{}", terminal::format_breakers(&report.breakers));

    if let Some(dashboard) = &report.dashboard {
        println!();
        print!("{}", terminal::format_dashboard(dashboard));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_classifies_outcomes() {
        let mut report = ProbeReport::default();
        report.record(&Ok("42".to_string()));
        report.record(&Ok("43".to_string()));
        report.record(&Err(RagGuardError::CircuitOpen {
            name: "llm".to_string(),
            failure_count: 5,
        }));
        report.record(&Err(RagGuardError::PoolExhausted {
            pool: "llm".to_string(),
            waited: Duration::from_secs(1),
        }));
        report.record(&Err(RagGuardError::ExternalError("502".to_string())));

        assert_eq!(report.answered, 2);
        assert_eq!(report.unavailable, 1);
        assert_eq!(report.busy, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.sample_answer.as_deref(), Some("42"));
        assert!(report.last_error.unwrap().contains("502"));
    }
}
