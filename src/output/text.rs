//! Human-readable text output

use crate::job::{JobOutcome, JobReport};
use crate::stats::engine::StatsSnapshot;
use crate::stats::WorkerStat;
use crate::util::time::{format_bytes, format_duration, format_rate, format_throughput};
use std::fmt::Write;

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// Percentiles shown under the latency summary
const DISPLAY_PERCENTILES: [f64; 3] = [50.0, 90.0, 99.0];

/// Render the Display report for a snapshot
///
/// Elapsed time, total bytes, IOPS, throughput and average latency of the
/// global counters, followed by the latency bar chart scaled to `width` and
/// the activity strip when any job registered a slot.
pub fn render_display(snapshot: &StatsSnapshot, width: usize) -> String {
    let mut out = String::new();
    let g = &snapshot.global;

    let _ = writeln!(out, "Elapsed: {:.3}s", g.elapsed().as_secs_f64());
    let _ = writeln!(out, "Bytes:   {}", format_bytes(g.total_bytes()));
    let _ = writeln!(out, "IOPS:    {}", format_rate(g.iops()));
    let _ = writeln!(out, "Throughput: {}", format_throughput(g.throughput()));
    match g.avg_latency() {
        Some(avg) => {
            let _ = writeln!(out, "Avg latency: {}", format_duration(avg));
            let pcts: Vec<String> = DISPLAY_PERCENTILES
                .iter()
                .map(|&p| format!("p{}={}", p, format_duration(g.histogram.percentile(p))))
                .collect();
            let _ = writeln!(out, "Percentiles: {}", pcts.join(" "));
        }
        None => {
            let _ = writeln!(out, "Avg latency: -");
        }
    }
    if g.total_errors() > 0 {
        let _ = writeln!(out, "Errors:  {}", g.total_errors());
    }

    if !g.histogram.is_empty() {
        out.push('\n');
        out.push_str(&g.histogram.render(width));
    }

    if !snapshot.activity.is_empty() {
        out.push('\n');
        out.push_str(&snapshot.activity);
    }
    out
}

/// One line per direction for a job's counters
pub fn format_job_stat(name: &str, stat: &WorkerStat) -> String {
    let mut out = String::new();
    for (label, op) in [("read", &stat.read), ("write", &stat.write)] {
        if op.ops == 0 && op.errors == 0 {
            continue;
        }
        let lat = match (op.min_latency(), op.avg_latency(), op.max_latency()) {
            (Some(min), Some(avg), Some(max)) => format!(
                "lat min/avg/max {}/{}/{}",
                format_duration(min),
                format_duration(avg),
                format_duration(max)
            ),
            _ => "no completed ops".to_string(),
        };
        let _ = writeln!(
            out,
            "  {:<16} {:<5} {:>12} ops {:>12}  {}",
            name,
            label,
            format_number(op.ops),
            format_bytes(op.bytes),
            lat
        );
        if op.errors > 0 {
            let _ = writeln!(out, "  {:<16} {:<5} {} errors", name, label, op.errors);
        }
    }
    out
}

/// Print one job's final report
pub fn print_job_report(report: &JobReport) {
    let status = match report.outcome {
        JobOutcome::Completed => "completed",
        JobOutcome::Aborted => "aborted",
    };
    println!(
        "  {:<16} {:<9} {} ops ({} read, {} write) in {:.2}s, {} errors",
        report.name,
        status,
        format_number(report.ops()),
        format_bytes(report.read_bytes),
        format_bytes(report.write_bytes),
        report.elapsed().as_secs_f64(),
        report.errors()
    );
}

/// Print the results of one barrier group
pub fn print_group_results(index: usize, reports: &[JobReport], snapshot: &StatsSnapshot, width: usize) {
    println!("{}", RULE);
    println!("                    GROUP {} RESULTS", index + 1);
    println!("{}", RULE);
    println!();

    if reports.is_empty() {
        println!("  No job in this group produced results");
        println!();
        return;
    }

    println!("Jobs:");
    for report in reports {
        print_job_report(report);
    }
    println!();

    println!("Per-job counters:");
    for (name, stat) in &snapshot.jobs {
        print!("{}", format_job_stat(name, stat));
    }
    println!();

    print!("{}", render_display(snapshot, width));
    println!();
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}
