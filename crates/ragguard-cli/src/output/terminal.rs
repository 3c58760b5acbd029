//! Terminal output formatter

use ragguard_core::resilience::BreakerSnapshot;
use ragguard_core::{CacheStats, Dashboard, Labels, PoolStats};
use std::fmt::Write;

pub fn format_pool(stats: &PoolStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pool {}", stats.name);
    let _ = writeln!(
        out,
        "  Resources:     {} total, {} active, {} idle, {} failed (min {}, max {})",
        stats.total, stats.active, stats.idle, stats.failed, stats.min_size, stats.max_size
    );
    let _ = writeln!(out, "  Utilization:   {:.0}%", stats.utilization * 100.0);
    let _ = writeln!(
        out,
        "  Acquisitions:  {} (avg wait {:.1} ms, {} exhausted)",
        stats.acquisitions, stats.avg_wait_ms, stats.exhaustion_count
    );
    let _ = writeln!(
        out,
        "  Lifecycle:     {} created, {} creation failures, {} closed",
        stats.created, stats.creation_failures, stats.closed
    );
    out
}

pub fn format_cache(stats: &CacheStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cache {}", stats.name);
    let _ = writeln!(
        out,
        "  Entries:       {}/{} ({} of {} bytes)",
        stats.size, stats.max_entries, stats.memory_usage_bytes, stats.max_memory_bytes
    );
    let _ = writeln!(
        out,
        "  Requests:      {} ({} hits, {} misses, {:.0}% hit rate)",
        stats.total_requests,
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );
    let _ = writeln!(
        out,
        "  Computes:      {} ({} coalesced, {} in flight, avg {:.1} ms)",
        stats.computes, stats.coalesced, stats.inflight, stats.avg_response_time_ms
    );
    let _ = writeln!(
        out,
        "  Removed:       {} evicted, {} expired, {} rejected",
        stats.evictions, stats.expired, stats.rejected
    );
    out
}

pub fn format_breakers(breakers: &[BreakerSnapshot]) -> String {
    let mut out = String::new();
    for breaker in breakers {
        let _ = write!(
            out,
            "Breaker {}: {} ({}/{} failures",
            breaker.name, breaker.state, breaker.failure_count, breaker.failure_threshold
        );
        if breaker.rejected > 0 {
            let _ = write!(out, ", {} rejected", breaker.rejected);
        }
        let _ = writeln!(out, ")");
    }
    out
}

pub fn format_dashboard(dashboard: &Dashboard) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Metrics over the last {:.0}s ({})",
        dashboard.window_secs,
        dashboard.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if dashboard.metrics.is_empty() {
        let _ = writeln!(out, "  (no data)");
    }
    for metric in &dashboard.metrics {
        let _ = writeln!(
            out,
            "  {:<28} {:<24} n={:<5} mean={:<10.2} p95={:<10.2} max={:.2}",
            metric.name,
            format_labels(&metric.labels),
            metric.count,
            metric.mean,
            metric.p95,
            metric.max
        );
    }

    if !dashboard.active_alerts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Active alerts:");
        for alert in &dashboard.active_alerts {
            let _ = writeln!(out, "  [{:?}] {}", alert.level, alert.message);
        }
    }
    out
}

fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragguard_core::labels;

    #[test]
    fn test_format_labels_is_sorted() {
        let set = labels(&[("target", "llm"), ("outcome", "success")]);
        assert_eq!(format_labels(&set), "outcome=success,target=llm");
        assert_eq!(format_labels(&Labels::new()), "");
    }
}
