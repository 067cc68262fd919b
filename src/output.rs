//! CLI output formatting for the administrative and worker commands.
//!
//! # Output Format
//!
//! ## Status
//!
//! ```text
//! Spool /var/spool/photo-compose
//!     pending: 3
//!         0b6f…  (first few ids, oldest first)
//!     active: 0
//!     failed: 1
//!         9c2e…
//! ```
//!
//! ## Drain
//!
//! ```text
//! 001 delivered /out/2024/a.jpg (1000x1000, 183204 bytes)
//! 002 failed after 3 attempts
//!     Error: cannot fetch template https://…: HTTP 404
//!
//! Processed 2 jobs: 1 delivered, 1 failed
//! ```
//!
//! Each `format_*` function returns `Vec<String>` for testability and has a
//! `print_*` wrapper that writes to stdout.

use crate::pipeline::Delivery;
use crate::queue::QueueStatus;
use crate::worker::{DrainReport, JobOutcome};
use std::path::Path;
use uuid::Uuid;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn delivery_line(index: usize, delivery: &Delivery) -> String {
    format!(
        "{} delivered {} ({}x{}, {} bytes)",
        format_index(index),
        delivery.destination,
        delivery.width,
        delivery.height,
        delivery.bytes
    )
}

// ============================================================================
// Status
// ============================================================================

pub fn format_status(spool: &Path, status: &QueueStatus) -> Vec<String> {
    let mut lines = vec![format!("Spool {}", spool.display())];
    let states: [(&str, usize, &[Uuid]); 3] = [
        ("pending", status.pending, &status.pending_ids),
        ("active", status.active, &status.active_ids),
        ("failed", status.failed, &status.failed_ids),
    ];
    for (name, count, ids) in states {
        lines.push(format!("{}{}: {}", indent(1), name, count));
        for id in ids {
            lines.push(format!("{}{}", indent(2), id));
        }
        if count > ids.len() {
            lines.push(format!("{}... {} more", indent(2), count - ids.len()));
        }
    }
    lines
}

pub fn print_status(spool: &Path, status: &QueueStatus) {
    for line in format_status(spool, status) {
        println!("{}", line);
    }
}

// ============================================================================
// Worker
// ============================================================================

pub fn format_drain_report(report: &DrainReport) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, outcome) in report.outcomes.iter().enumerate() {
        match outcome {
            JobOutcome::Delivered { delivery, .. } => lines.push(delivery_line(i + 1, delivery)),
            JobOutcome::Failed {
                error, attempts, ..
            } => {
                lines.push(format!(
                    "{} failed after {}",
                    format_index(i + 1),
                    plural(*attempts as usize, "attempt")
                ));
                lines.push(format!("{}Error: {}", indent(1), error));
            }
        }
    }
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "Processed {}: {} delivered, {} failed",
        plural(report.outcomes.len(), "job"),
        report.delivered(),
        report.failed()
    ));
    lines
}

pub fn print_drain_report(report: &DrainReport) {
    for line in format_drain_report(report) {
        println!("{}", line);
    }
}

/// Single-job output for `compose`.
pub fn format_delivery(delivery: &Delivery, attempts: u32) -> Vec<String> {
    let mut lines = vec![delivery_line(1, delivery)];
    if attempts > 1 {
        lines.push(format!("{}after {}", indent(1), plural(attempts as usize, "attempt")));
    }
    lines
}

pub fn print_delivery(delivery: &Delivery, attempts: u32) {
    for line in format_delivery(delivery, attempts) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(dest: &str) -> Delivery {
        Delivery {
            destination: dest.to_string(),
            width: 1000,
            height: 800,
            bytes: 1234,
        }
    }

    // =========================================================================
    // helpers
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "job"), "1 job");
        assert_eq!(plural(0, "job"), "0 jobs");
        assert_eq!(plural(3, "attempt"), "3 attempts");
    }

    // =========================================================================
    // status
    // =========================================================================

    #[test]
    fn status_lists_counts_and_samples() {
        let id = Uuid::nil();
        let status = QueueStatus {
            pending: 7,
            active: 0,
            failed: 1,
            pending_ids: vec![id; 5],
            active_ids: vec![],
            failed_ids: vec![id],
        };
        let lines = format_status(Path::new("/spool"), &status);
        assert_eq!(lines[0], "Spool /spool");
        assert_eq!(lines[1], "    pending: 7");
        assert_eq!(lines[2], format!("        {id}"));
        assert_eq!(lines[7], "        ... 2 more");
        assert_eq!(lines[8], "    active: 0");
        assert_eq!(lines[9], "    failed: 1");
        assert_eq!(lines.len(), 11);
    }

    // =========================================================================
    // drain
    // =========================================================================

    #[test]
    fn drain_report_lines() {
        let report = DrainReport {
            outcomes: vec![
                JobOutcome::Delivered {
                    id: Uuid::nil(),
                    delivery: delivery("/out/a.jpg"),
                    attempts: 1,
                },
                JobOutcome::Failed {
                    id: Uuid::nil(),
                    error: "boom".into(),
                    attempts: 3,
                },
            ],
        };
        let lines = format_drain_report(&report);
        assert_eq!(
            lines,
            vec![
                "001 delivered /out/a.jpg (1000x800, 1234 bytes)",
                "002 failed after 3 attempts",
                "    Error: boom",
                "",
                "Processed 2 jobs: 1 delivered, 1 failed",
            ]
        );
    }

    #[test]
    fn empty_drain_is_one_line() {
        let lines = format_drain_report(&DrainReport::default());
        assert_eq!(lines, vec!["Processed 0 jobs: 0 delivered, 0 failed"]);
    }

    #[test]
    fn delivery_mentions_retries() {
        assert_eq!(format_delivery(&delivery("/x.jpg"), 1).len(), 1);
        let lines = format_delivery(&delivery("/x.jpg"), 2);
        assert_eq!(lines[1], "    after 2 attempts");
    }
}
