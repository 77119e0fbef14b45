//! Export helpers for writing results to JSON and CSV files.
//!
//! - `write_stats_json` writes the [`StatReport`] as pretty-printed JSON.
//! - `write_lengths_csv` writes `Length,Count` rows in ascending length order.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;

use crate::stats::{Aggregate, StatReport};

pub fn write_stats_json<P: AsRef<Path>>(report: &StatReport, path: P) -> Result<()> {
    let path = path.as_ref();
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, report)
        .with_context(|| format!("serialize stats to {}", path.display()))?;
    writeln!(w)?;
    w.flush()?;
    Ok(())
}

pub fn write_lengths_csv<P: AsRef<Path>>(aggregate: &Aggregate, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut wtr =
        Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    wtr.write_record(["Length", "Count"])?;
    for (len, count) in &aggregate.lengths {
        wtr.write_record([len.to_string(), count.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use tempfile::tempdir;

    fn aggregate_of(pws: &[&str]) -> Aggregate {
        let mut a = Aggregate::new();
        let mut seen = std::collections::HashSet::new();
        for pw in pws {
            a.record_occurrence();
            if seen.insert(*pw) {
                a.apply(&classify(pw.as_bytes()), 1);
            }
        }
        a
    }

    #[test]
    fn stats_json_snapshot() {
        let agg = aggregate_of(&["Password1", "Password1"]);
        let report = StatReport::from_aggregate(&agg);
        let json = serde_json::to_string_pretty(&report).unwrap();
        insta::assert_snapshot!(json);
    }

    #[test]
    fn writes_json_and_csv() {
        let agg = aggregate_of(&["abc", "Password1", "12ab", "abc"]);
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("stats.json");
        let csv_path = dir.path().join("lengths.csv");
        write_stats_json(&StatReport::from_aggregate(&agg), &json_path).unwrap();
        write_lengths_csv(&agg, &csv_path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(json["totalPasswords"], 4);
        assert_eq!(json["totalUniquePasswords"], 3);
        assert_eq!(json["passwordLengths"]["9"], 1);
        assert!(json.get("format^[0-9]+[a-zA-Z]+$").is_some());

        let csv_content = std::fs::read_to_string(csv_path).unwrap();
        assert_eq!(csv_content, "Length,Count\n3,1\n4,1\n9,1\n");
    }

    #[test]
    fn json_write_fails_for_missing_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope").join("stats.json");
        let err = write_stats_json(&StatReport::from_aggregate(&Aggregate::new()), &path)
            .unwrap_err();
        assert!(format!("{err:#}").contains("create"));
    }
}
