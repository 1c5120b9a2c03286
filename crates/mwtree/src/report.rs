//! Run reports and their text rendering.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use mwtree_core::{RebuildReport, TreeStats};
use serde::Serialize;

/// Outcome of one relocation round trip.
#[derive(Debug, Clone, Serialize)]
pub struct RelocationReport {
    /// Size of the encoded chunk set.
    pub bytes: usize,
    /// What the receiving tree rebuilt.
    pub rebuild: RebuildReport,
    /// Receiver matches the sender in counts, histogram and end nodes.
    pub matches: bool,
}

/// Everything the driver reports after a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Spatial dimension.
    pub dimension: usize,
    /// Polynomial order.
    pub order: usize,
    /// Root boxes.
    pub roots: usize,
    /// Deepest populated level.
    pub depth: usize,
    /// Live persistent nodes.
    pub nodes: usize,
    /// End nodes in the final table.
    pub end_nodes: usize,
    /// Squared norm over end nodes.
    pub square_norm: f64,
    /// Generated rounds run.
    pub gen_rounds: usize,
    /// Most generated nodes live at once.
    pub peak_gen_nodes: usize,
    /// Groups released by `--coarsen`.
    pub coarsened_groups: usize,
    /// Worst-case arena footprint under the configured budgets.
    pub estimated_bytes: usize,
    /// Wall time of the run.
    #[serde(serialize_with = "serialize_micros")]
    pub elapsed: Duration,
    /// Set when `--relocate` was given.
    pub relocation: Option<RelocationReport>,
    /// Allocator counters.
    pub stats: TreeStats,
}

#[allow(clippy::cast_possible_truncation)]
fn serialize_micros<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_micros() as u64)
}

/// Render a report for the terminal.
pub fn render_text(report: &RunReport, verbose: bool) -> String {
    let stats = &report.stats;
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "dimension    {} (order {}, {} roots)",
        report.dimension, report.order, report.roots
    );
    let _ = writeln!(out, "depth        {}", report.depth);
    let _ = writeln!(
        out,
        "nodes        {} (end nodes {})",
        format_number(report.nodes as u64),
        format_number(report.end_nodes as u64)
    );
    let _ = writeln!(out, "square norm  {:.6}", report.square_norm);
    let _ = writeln!(
        out,
        "generated    peak {} over {} rounds",
        format_number(report.peak_gen_nodes as u64),
        report.gen_rounds
    );
    if report.coarsened_groups > 0 {
        let _ = writeln!(out, "coarsened    {} groups", report.coarsened_groups);
    }
    let _ = writeln!(
        out,
        "chunks       {} persistent, {} generated (capacity {})",
        stats.chunks, stats.gen_chunks, stats.chunk_capacity
    );
    let _ = writeln!(
        out,
        "memory       {} held, {} budgeted",
        format_bytes(stats.memory_bytes),
        format_bytes(report.estimated_bytes)
    );
    if let Some(relocation) = &report.relocation {
        let _ = writeln!(
            out,
            "relocation   {} encoded, {} nodes rebuilt, {}",
            format_bytes(relocation.bytes),
            format_number(relocation.rebuild.nodes as u64),
            if relocation.matches { "match" } else { "MISMATCH" }
        );
    }
    if verbose {
        for (depth, count) in stats.depth_counts.iter().enumerate() {
            let _ = writeln!(out, "  depth {depth:>3}  {}", format_number(*count as u64));
        }
        for (name, arena) in [("persistent", &stats.persistent), ("generated", &stats.generated)] {
            let _ = writeln!(
                out,
                "  {name:<10}  {} allocated, {} released, {} chunks, {} skipped, {} anomalies",
                arena.groups_allocated,
                arena.groups_released,
                arena.chunks_appended,
                arena.slots_skipped,
                arena.anomalies
            );
        }
        let _ = writeln!(
            out,
            "  lock        {} acquisitions, {} contended",
            stats.lock.acquisitions, stats.lock.contended
        );
    }
    let _ = write!(out, "elapsed      {}", format_duration(report.elapsed));
    out
}

/// Format a duration for display.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 0.001 {
        format!("{:.2}µs", secs * 1_000_000.0)
    } else if secs < 1.0 {
        format!("{:.2}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{secs:.3}s")
    } else {
        let mins = (secs / 60.0).floor() as u64;
        let remaining = secs - (mins as f64 * 60.0);
        format!("{mins}m{remaining:.1}s")
    }
}

/// Format a number with thousand separators.
#[must_use]
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Format a byte count in binary units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Write a rendered report to a file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created or written.
pub fn write_to_file(path: &str, rendered: &str) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "{rendered}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_micro() {
        let s = format_duration(Duration::from_nanos(500));
        assert!(s.contains("µs"));
    }

    #[test]
    fn format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30.0s");
    }

    #[test]
    fn format_number_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 << 20), "3.0 MiB");
    }

    #[test]
    fn write_to_file_appends_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let path = path.to_str().unwrap();
        write_to_file(path, "nodes 21").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "nodes 21\n");
    }
}
