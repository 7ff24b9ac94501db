//! Output formatting and persistence for refreshed predictions.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::prediction::PredictionRecord;
use csv::WriterBuilder;
use std::fs::{self, OpenOptions};

/// One CSV row: a prediction plus the refresh it came from.
#[derive(Debug, Serialize)]
struct PredictionRow<'a> {
    fetched_at: DateTime<Utc>,
    stop: &'a str,
    route: &'a str,
    destination: &'a str,
    arrival_time: DateTime<Utc>,
    minutes_until_arrival: i64,
    seconds_until_arrival: i64,
}

/// Logs predictions using Rust's debug pretty-print format.
pub fn print_pretty(predictions: &[PredictionRecord]) {
    debug!("{:#?}", predictions);
}

/// Logs predictions as pretty-printed JSON.
pub fn print_json(predictions: &[PredictionRecord]) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(predictions)?);
    Ok(())
}

/// Appends one row per prediction to a CSV file.
///
/// Writes the header row when the file is missing or still empty.
pub fn append_predictions(
    path: &str,
    stop: &str,
    fetched_at: DateTime<Utc>,
    predictions: &[PredictionRecord],
) -> Result<()> {
    // An empty refresh creates the file without writing a header.
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    debug!(path, needs_header, rows = predictions.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);

    for p in predictions {
        writer.serialize(PredictionRow {
            fetched_at,
            stop,
            route: &p.route,
            destination: &p.destination,
            arrival_time: p.arrival_time,
            minutes_until_arrival: p.minutes_until_arrival,
            seconds_until_arrival: p.seconds_until_arrival,
        })?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::path::Path;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn sample() -> Vec<PredictionRecord> {
        let arrival = DateTime::from_timestamp(1_459_345_200, 0).unwrap();
        vec![
            PredictionRecord::new("1", "Harvard", arrival, 6, 411),
            PredictionRecord::new("47", "Central Sq.", arrival, 9, 560),
        ]
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&sample());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&sample()).unwrap();
    }

    #[test]
    fn test_append_creates_file() {
        let path = temp_path("arrival_watch_test_create.csv");
        let _ = fs::remove_file(&path);

        append_predictions(&path, "110", Utc::now(), &sample()).unwrap();

        assert!(Path::new(&path).exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("Central Sq."));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_writes_header_once() {
        let path = temp_path("arrival_watch_test_header.csv");
        let _ = fs::remove_file(&path);

        append_predictions(&path, "110", Utc::now(), &sample()).unwrap();
        append_predictions(&path, "110", Utc::now(), &sample()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.starts_with("fetched_at")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 refreshes of 2 rows
        assert_eq!(content.lines().count(), 5);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_header_written_after_empty_refresh() {
        let path = temp_path("arrival_watch_test_empty.csv");
        let _ = fs::remove_file(&path);

        append_predictions(&path, "110", Utc::now(), &[]).unwrap();
        assert!(fs::read_to_string(&path).unwrap().is_empty());

        append_predictions(&path, "110", Utc::now(), &sample()).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("fetched_at"));
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }
}
