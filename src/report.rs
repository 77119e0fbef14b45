//! Human-readable report rendering for terminal output.
//!
//! Produces a colored summary of the run itself, overall totals, category
//! percentages, the length histogram, and any partitions that ended early.
use colored::*;

use crate::engine::RunSummary;
use crate::stats::pct;

fn visible_len(s: &str) -> usize {
    // Strip ANSI escape sequences (\x1b[ ... m) to compute printable width
    let mut len = 0;
    let mut iter = s.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\u{1b}' {
            if let Some('[') = iter.peek().cloned() {
                let _ = iter.next();
            }
            for c in iter.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            len += 1;
        }
    }
    len
}

fn section_header(title: &str) -> String {
    let len = visible_len(title);
    let mut s = String::new();
    s.push('\n');
    s.push_str(title);
    s.push('\n');
    s.push_str(&"─".repeat(len));
    s.push_str("\n\n");
    s
}

fn push_section(out: &mut String, title: ColoredString, lines: Vec<String>) {
    out.push_str(&section_header(&title.to_string()));
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
}

pub fn render_summary(summary: &RunSummary) -> String {
    let outcome = &summary.outcome;
    let agg = &outcome.aggregate;
    let counters = &outcome.counters;
    let unique = agg.total_unique_pw;

    let mut out = String::new();
    out.push_str(&format!(
        "{}\n",
        "pwstat: Password Composition Results".bold().cyan()
    ));

    // Run
    let mut run_lines = vec![
        format!("Input: {}", summary.input.display()),
        format!("Partitions: {}", summary.ranges.len()),
        format!("Lines read: {}", counters.lines_read),
        format!("Unparseable lines: {}", counters.parse_failures),
        format!(
            "Spilled to oracle: {}",
            if summary.spilled { "yes" } else { "no" }
        ),
    ];
    if summary.spilled {
        run_lines.push(format!("  Oracle claims: {}", counters.oracle_claims));
        run_lines.push(format!("  Oracle duplicates: {}", counters.oracle_duplicates));
        run_lines.push(format!("  Oracle failures: {}", counters.oracle_failures));
    }
    run_lines.push(format!("Cache hits: {}", counters.cache_hits));
    run_lines.push(format!("Collisions reconciled: {}", outcome.collisions));
    run_lines.push(format!("Elapsed: {:.2?}", summary.elapsed));
    push_section(&mut out, "Run".bold().yellow(), run_lines);

    // Totals
    let total = i64::try_from(agg.total_pw).unwrap_or(i64::MAX);
    push_section(
        &mut out,
        "Totals".bold().cyan(),
        vec![
            format!("Total passwords: {}", agg.total_pw),
            format!("Unique passwords: {}", unique),
            format!("Unique percentage: {}", pct(unique, total)),
        ],
    );

    // Character classes
    let class_lines = agg
        .categories
        .labelled()
        .iter()
        .map(|(label, n)| format!("  {}: {} ({})", label, n, pct(*n, unique)))
        .collect();
    push_section(&mut out, "Character Classes".bold().cyan(), class_lines);

    // Lengths
    let length_lines = if agg.lengths.is_empty() {
        vec!["(No passwords)".to_string()]
    } else {
        agg.lengths
            .iter()
            .map(|(len, n)| format!("  {:>3}: {} ({})", len, n, pct(*n, unique)))
            .collect()
    };
    push_section(&mut out, "Password Lengths".bold().magenta(), length_lines);

    // Incomplete partitions
    if !outcome.failures.is_empty() || !outcome.cancelled_partitions.is_empty() {
        let mut lines = Vec::new();
        for f in &outcome.failures {
            lines.push(format!(
                "  partition {} (lines {}..{}): {}",
                f.index,
                f.range.start,
                f.range.end,
                format!("{:#}", f.error).as_str().red()
            ));
        }
        if !outcome.cancelled_partitions.is_empty() {
            let ids: Vec<String> = outcome
                .cancelled_partitions
                .iter()
                .map(ToString::to_string)
                .collect();
            lines.push(format!("  cancelled: {}", ids.join(", ").as_str().dimmed()));
        }
        lines.push("Counts above are partial.".dimmed().to_string());
        push_section(&mut out, "Incomplete Partitions".bold().red(), lines);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Separator;
    use crate::merge::Merger;
    use crate::monitor::SpillSignal;
    use crate::oracle::MemoryOracle;
    use crate::partition::LineRange;
    use crate::stats::StatReport;
    use crate::worker::{CancelToken, CountMode, Worker, WorkerContext};
    use std::path::PathBuf;
    use std::time::Duration;

    fn summary_of(parts: &[&[&str]], fail: Option<usize>) -> RunSummary {
        let oracle = MemoryOracle::new();
        let spill = SpillSignal::new();
        let cancel = CancelToken::new();
        let ctx = WorkerContext {
            separator: Separator::Tab,
            mode: CountMode::Unique,
            spill: &spill,
            oracle: &oracle,
            cancel: &cancel,
            fail_fast: false,
        };
        let mut merger = Merger::new();
        for (i, lines) in parts.iter().enumerate() {
            let mut items: Vec<std::io::Result<String>> =
                lines.iter().map(|l| Ok(l.to_string())).collect();
            if fail == Some(i) {
                items.push(Err(std::io::Error::other("device went away")));
            }
            merger.fold(Worker::new(ctx, i, LineRange::default()).scan(items));
        }
        let outcome = merger.finish();
        RunSummary {
            input: PathBuf::from("creds.txt"),
            ranges: vec![LineRange::default(); parts.len()],
            report: StatReport::from_aggregate(&outcome.aggregate),
            outcome,
            spilled: false,
            cancelled: false,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn summary_lists_totals_and_lengths() {
        let s = render_summary(&summary_of(
            &[&["alice\tPassword1"], &["bob\tPassword1", "carol abc"]],
            None,
        ));
        assert!(s.contains("Total passwords: 2"));
        assert!(s.contains("Unique passwords: 1"));
        assert!(s.contains("Unique percentage: 50.00%"));
        assert!(s.contains("Collisions reconciled: 1"));
        assert!(s.contains("Uppercase: 1 (100.00%)"));
        assert!(s.contains("9: 1 (100.00%)"));
        assert!(!s.contains("Incomplete Partitions"));
    }

    #[test]
    fn summary_flags_partial_partitions() {
        let s = render_summary(&summary_of(&[&["a\tone"], &["b\ttwo"]], Some(1)));
        assert!(s.contains("Incomplete Partitions"));
        assert!(s.contains("partition 1"));
        assert!(s.contains("device went away"));
    }

    #[test]
    fn empty_run_has_placeholder_lengths() {
        let empty: &[&str] = &[];
        let s = render_summary(&summary_of(&[empty], None));
        assert!(s.contains("(No passwords)"));
        assert!(s.contains("Unique percentage: 0.00%"));
    }

    #[test]
    fn header_underline_ignores_ansi() {
        let h = section_header("\u{1b}[1mRun\u{1b}[0m");
        assert!(h.ends_with("───\n\n"));
        assert!(!h.contains("────"));
    }
}
