//! Prints a summary of the measured operations.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use mixbench::{OpType, Operations};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// Latency and size statistics of one operation type.
#[derive(Default)]
struct OpMetrics {
    timing: DDSketch,
    first_byte: DDSketch,
    bytes: u64,
    failures: usize,
}

impl OpMetrics {
    fn collect(ops: &Operations) -> Self {
        let mut metrics = Self::default();
        for op in ops {
            if op.is_err() {
                metrics.failures += 1;
                continue;
            }
            metrics.timing.add(op.duration().as_secs_f64());
            if let Some(ttfb) = op.time_to_first_byte() {
                metrics.first_byte.add(ttfb.as_secs_f64());
            }
            metrics.bytes += op.size;
        }
        metrics
    }
}

pub fn print_summary(ops: &Operations) {
    let duration = ops.span();

    for op_type in OpType::ALL {
        let typed = ops.filter_type(op_type);
        if typed.is_empty() {
            continue;
        }

        let metrics = OpMetrics::collect(&typed);
        println!();
        print!("{} ({} ops", format!("{op_type}:").bold().green(), typed.len().bold());
        if metrics.failures > 0 {
            print!(", {}", format!("{} FAILURES", metrics.failures).bold().red());
        }
        println!(")");

        if metrics.timing.count() == 0 {
            continue;
        }
        print_ops(&metrics.timing, duration);
        match op_type {
            OpType::Put | OpType::Get => print_throughput(metrics.bytes, duration),
            OpType::Stat | OpType::Delete => println!(),
        }
        print_percentiles("", &metrics.timing, Duration::from_secs_f64);
        if metrics.first_byte.count() > 0 {
            print_percentiles("ttfb ", &metrics.first_byte, Duration::from_secs_f64);
        }
    }

    let endpoints = ops.endpoints();
    println!();
    println!(
        "{} ({} ops, {} errors, {} endpoints, {:.2?})",
        "## TOTALS".bold(),
        ops.len().bold(),
        ops.errors().bold(),
        endpoints.len(),
        duration.bold()
    );
    let total = OpMetrics::collect(ops);
    if total.timing.count() > 0 {
        print_ops(&total.timing, duration);
        print_throughput(ops.total_bytes(), duration);
    }
}

fn quantile(sketch: &DDSketch, q: f64) -> f64 {
    sketch.quantile(q).ok().flatten().unwrap_or_default()
}

fn print_percentiles<T: fmt::Debug>(label: &str, sketch: &DDSketch, map: impl Fn(f64) -> T) {
    let ops = sketch.count();
    let avg = map(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = map(quantile(sketch, 0.5));
    let p90 = map(quantile(sketch, 0.9));
    let p99 = map(quantile(sketch, 0.99));
    println!(
        "  {label}avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

fn print_ops(sketch: &DDSketch, duration: Duration) {
    let ops = sketch.count();
    let ops_ps = ops as f64 / duration.as_secs_f64().max(f64::EPSILON);
    print!("  {:.2} operations/s", ops_ps.bold());
}

fn print_throughput(total: u64, duration: Duration) {
    let throughput = (total as f64 / duration.as_secs_f64().max(f64::EPSILON)) as u64;
    println!(", {:.2}/s", ByteSize::b(throughput).bold());
}
