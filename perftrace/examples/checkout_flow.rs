//! Simulated checkout requests traced end to end.
//!
//! Run with `RUST_LOG=perftrace=debug cargo run --example checkout_flow` to
//! see the collector and sampler diagnostics; pass a path to also write the
//! merged flamegraph as SVG.

use perftrace::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("inventory service unavailable")]
struct InventoryDown;

async fn load_cart(collector: &Collector, trace_id: TraceId, parent: Option<SpanId>, items: u32) -> Result<(), InventoryDown> {
    // one query per item, the classic N+1
    for item in 0..items {
        collector.in_span_async(trace_id, format!("SELECT * FROM items WHERE id = {item}"), SpanKind::DbQuery, parent, |_| async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok::<_, InventoryDown>(())
        }).await?;
    }
    Ok(())
}

async fn checkout(collector: &Collector, request: u32) {
    let Some(trace) = collector.start_trace("POST /checkout", metadata!{ "request" => request }) else {
        return // not sampled
    };

    let trace_id = trace.id;
    let result = collector.in_span_async(trace_id, "handle checkout", SpanKind::HttpRequest, None, |handler| async move {
        load_cart(collector, trace_id, handler, 3 + request % 12).await?;
        collector.in_span_async(trace_id, "reserve stock", SpanKind::FunctionCall, handler, |_| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if request % 7 == 6 { Err(InventoryDown) } else { Ok(()) }
        }).await
    }).await;

    let status = if result.is_ok() { Status::Success } else { Status::Error };
    collector.complete_trace(trace_id, status);
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = TracingConfig::from_env("PERFTRACE");
    let collector = Arc::new(Collector::new(config));
    collector.subscribe(|event| {
        if let CollectorEvent::PerformanceIssue(issue) = event {
            println!("[{}] {}", issue.kind.as_str(), issue.message);
        }
    });

    let monitor = MemoryMonitor::new(Arc::new(SysinfoProbe::new()));
    monitor.start(Duration::from_secs(1))?;

    let sampler = AdaptiveSampler::new(collector.clone(), AdaptiveSamplingConfig::default()
        .adjustment_interval(Duration::from_millis(200)));
    sampler.attach_memory_readings(monitor.readings());
    sampler.start()?;

    for request in 0..40 {
        checkout(&collector, request).await;
    }

    sampler.stop();
    monitor.stop();

    let stats = collector.get_stats();
    println!("traces: {} (p50 {:.1}ms, p95 {:.1}ms)", stats.traces.count, stats.traces.p50, stats.traces.p95);
    println!("spans:  {} (p50 {:.1}ms, p99 {:.1}ms)", stats.spans.count, stats.spans.p50, stats.spans.p99);
    println!("sampling rate now {:.2}", sampler.current_rate());

    let traces = collector.get_all_traces();
    let graph = filter_by_duration(&generate_from_traces(&traces)?, 1.0)?;
    println!("merged flamegraph: {} nodes, depth {}", graph.node_count(), graph.max_depth);

    if let Some(path) = std::env::args().nth(1) {
        std::fs::write(&path, to_svg(&graph, 1200.0, 400.0))?;
        println!("wrote {path}");
    }

    collector.cleanup(Duration::ZERO);
    Ok(())
}
