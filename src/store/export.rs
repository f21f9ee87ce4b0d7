//! CSV export of stored readings.
//!
//! Each row contains: record id, timestamp, display id, value, event tier,
//! the sent and modified flags, and the image paths.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{format_timestamp, SensorRecord};

const CSV_HEADER: &str =
    "id,timestamp,setting_id,value,event,is_sent,is_modified,raw_image_path,region_image_path";

/// Quotes a field when it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(record: &SensorRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{}",
        record.id,
        format_timestamp(&record.timestamp),
        csv_field(&record.setting_id),
        record.value,
        record.event,
        record.is_sent as u8,
        record.is_modified as u8,
        csv_field(record.raw_image_path.as_deref().unwrap_or("")),
        csv_field(record.region_image_path.as_deref().unwrap_or("")),
    )
}

/// Writes `records` to a new CSV file at `path`, replacing any existing file.
pub fn write_csv(path: &Path, records: &[SensorRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    for record in records {
        writeln!(out, "{}", csv_row(record)).context("Failed to write CSV row")?;
    }
    out.flush().context("Failed to flush CSV file")?;
    Ok(())
}
