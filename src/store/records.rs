use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{conversion_error, format_timestamp, parse_timestamp, Database};
use crate::monitor::event::Tier;
use crate::ocr::Reading;

/// A stored reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorRecord {
    pub id: i64,
    pub timestamp: NaiveDateTime,
    pub setting_id: String,
    pub value: Reading,
    pub event: Tier,
    pub is_sent: bool,
    pub is_modified: bool,
    pub raw_image_path: Option<String>,
    pub region_image_path: Option<String>,
}

/// A reading about to be stored.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub timestamp: NaiveDateTime,
    pub setting_id: String,
    pub value: Reading,
    pub event: Tier,
    pub is_sent: bool,
    pub raw_image_path: Option<String>,
    pub region_image_path: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted(i64),
    /// A replayed burst replaced an earlier reading
    Updated(i64),
    /// A manually corrected row already exists and was left alone
    KeptModified(i64),
}

impl SaveOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) | Self::KeptModified(id) => *id,
        }
    }
}

const RECORD_COLUMNS: &str = "id, timestamp, setting_id, value, event, is_sent, is_modified, \
                              raw_image_path, region_image_path";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SensorRecord> {
    let timestamp: String = row.get(1)?;
    let value: String = row.get(3)?;
    let event: String = row.get(4)?;

    let timestamp = parse_timestamp(&timestamp).map_err(conversion_error)?;
    let event = Tier::parse(&event)
        .with_context(|| format!("unknown event tier '{event}'"))
        .map_err(conversion_error)?;

    Ok(SensorRecord {
        id: row.get(0)?,
        timestamp,
        setting_id: row.get(2)?,
        value: Reading::parse(&value),
        event,
        is_sent: row.get(5)?,
        is_modified: row.get(6)?,
        raw_image_path: row.get(7)?,
        region_image_path: row.get(8)?,
    })
}

impl Database {
    /// Stores a reading, unique per display and timestamp.
    ///
    /// Re-saving the same display and timestamp overwrites the earlier row
    /// unless it was manually corrected.
    pub fn save_record(&self, record: &NewRecord) -> Result<SaveOutcome> {
        self.with_conn(|conn| {
            let tx = conn.transaction().context("failed to open record transaction")?;
            let timestamp = format_timestamp(&record.timestamp);

            let existing: Option<(i64, bool)> = tx
                .query_row(
                    "SELECT id, is_modified FROM sensor_records
                     WHERE setting_id = ?1 AND timestamp = ?2",
                    params![record.setting_id, timestamp],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let outcome = match existing {
                Some((id, true)) => SaveOutcome::KeptModified(id),
                Some((id, false)) => {
                    tx.execute(
                        "UPDATE sensor_records
                         SET value = ?1, event = ?2, is_sent = ?3,
                             raw_image_path = ?4, region_image_path = ?5
                         WHERE id = ?6",
                        params![
                            record.value.to_string(),
                            record.event.as_str(),
                            record.is_sent,
                            record.raw_image_path,
                            record.region_image_path,
                            id,
                        ],
                    )?;
                    SaveOutcome::Updated(id)
                }
                None => {
                    tx.execute(
                        "INSERT INTO sensor_records (
                            timestamp, setting_id, value, event, is_sent, is_modified,
                            raw_image_path, region_image_path
                        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                        params![
                            timestamp,
                            record.setting_id,
                            record.value.to_string(),
                            record.event.as_str(),
                            record.is_sent,
                            record.raw_image_path,
                            record.region_image_path,
                        ],
                    )?;
                    SaveOutcome::Inserted(tx.last_insert_rowid())
                }
            };

            tx.commit().context("failed to commit sensor record")?;
            Ok(outcome)
        })
    }

    pub fn record(&self, id: i64) -> Result<Option<SensorRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM sensor_records WHERE id = ?1");
            Ok(conn.query_row(&sql, params![id], record_from_row).optional()?)
        })
    }

    /// Records of one display with `from <= timestamp <= to`, oldest first.
    pub fn records_in_range(
        &self,
        setting_id: &str,
        from: &NaiveDateTime,
        to: &NaiveDateTime,
    ) -> Result<Vec<SensorRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM sensor_records
                 WHERE setting_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
                 ORDER BY timestamp ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![setting_id, format_timestamp(from), format_timestamp(to)],
                record_from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read sensor records")
        })
    }

    /// Manual override of a stored value; marks the row as modified.
    pub fn correct_value(&self, id: i64, value: Reading) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sensor_records SET value = ?1, is_modified = 1 WHERE id = ?2",
                params![value.to_string(), id],
            )?;
            if changed == 0 {
                bail!("sensor record {id} not found");
            }
            Ok(())
        })
    }

    pub fn oldest_record(&self) -> Result<Option<SensorRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM sensor_records ORDER BY id ASC LIMIT 1");
            Ok(conn.query_row(&sql, [], record_from_row).optional()?)
        })
    }

    pub fn delete_record(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sensor_records WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Number of records referencing a raw burst directory prefix.
    pub fn count_records_with_raw_prefix(&self, prefix: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sensor_records WHERE raw_image_path LIKE ?1 ESCAPE '\\'",
                params![pattern],
                |row| row.get(0),
            )?)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    pub(crate) fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    pub(crate) fn new_record(setting_id: &str, at: NaiveDateTime, value: Reading) -> NewRecord {
        NewRecord {
            timestamp: at,
            setting_id: setting_id.to_string(),
            value,
            event: Tier::Normal,
            is_sent: false,
            raw_image_path: Some(format!("/data/images/PORT_1/{}/0.jpg", at.format("%Y%m%d%H%M%S"))),
            region_image_path: None,
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let mut rec = new_record("boiler", t0(), Reading::Value(12.5));
        rec.event = Tier::Alert;
        rec.is_sent = true;

        let outcome = db.save_record(&rec).unwrap();
        assert!(matches!(outcome, SaveOutcome::Inserted(_)));

        let stored = db.record(outcome.id()).unwrap().unwrap();
        assert_eq!(stored.value, Reading::Value(12.5));
        assert_eq!(stored.event, Tier::Alert);
        assert!(stored.is_sent);
        assert!(!stored.is_modified);
        assert_eq!(stored.timestamp, t0());
    }

    #[test]
    fn test_unreadable_stored_as_nan() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .save_record(&new_record("boiler", t0(), Reading::Unreadable))
            .unwrap()
            .id();
        let raw: String = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT value FROM sensor_records WHERE id = ?1", [id], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(raw, "NaN");
        assert_eq!(db.record(id).unwrap().unwrap().value, Reading::Unreadable);
    }

    #[test]
    fn test_replay_updates_unless_modified() {
        let db = Database::open_in_memory().unwrap();
        let first = db
            .save_record(&new_record("boiler", t0(), Reading::Value(1.0)))
            .unwrap();

        let second = db
            .save_record(&new_record("boiler", t0(), Reading::Value(2.0)))
            .unwrap();
        assert_eq!(second, SaveOutcome::Updated(first.id()));
        assert_eq!(db.record(first.id()).unwrap().unwrap().value, Reading::Value(2.0));

        db.correct_value(first.id(), Reading::Value(3.0)).unwrap();
        let third = db
            .save_record(&new_record("boiler", t0(), Reading::Value(4.0)))
            .unwrap();
        assert_eq!(third, SaveOutcome::KeptModified(first.id()));

        let stored = db.record(first.id()).unwrap().unwrap();
        assert_eq!(stored.value, Reading::Value(3.0));
        assert!(stored.is_modified);
    }

    #[test]
    fn test_range_query() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.save_record(&new_record("boiler", t0() + Duration::minutes(i), Reading::Value(i as f64)))
                .unwrap();
        }
        db.save_record(&new_record("tank", t0(), Reading::Value(99.0)))
            .unwrap();

        let records = db
            .records_in_range("boiler", &(t0() + Duration::minutes(1)), &(t0() + Duration::minutes(3)))
            .unwrap();
        let values: Vec<Reading> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Reading::Value(1.0), Reading::Value(2.0), Reading::Value(3.0)]);
    }

    #[test]
    fn test_correct_missing_record_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.correct_value(42, Reading::Value(1.0)).is_err());
    }

    #[test]
    fn test_oldest_and_delete() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.oldest_record().unwrap().is_none());

        let a = db.save_record(&new_record("a", t0(), Reading::Value(1.0))).unwrap().id();
        let b = db
            .save_record(&new_record("b", t0() - Duration::hours(1), Reading::Value(2.0)))
            .unwrap()
            .id();

        // Oldest by insertion order, not by timestamp
        assert_eq!(db.oldest_record().unwrap().unwrap().id, a);
        db.delete_record(a).unwrap();
        assert_eq!(db.oldest_record().unwrap().unwrap().id, b);
    }

    #[test]
    fn test_count_records_with_raw_prefix() {
        let db = Database::open_in_memory().unwrap();
        db.save_record(&new_record("a", t0(), Reading::Value(1.0))).unwrap();
        db.save_record(&new_record("b", t0(), Reading::Value(1.0))).unwrap();
        db.save_record(&new_record("a", t0() + Duration::seconds(60), Reading::Value(1.0)))
            .unwrap();

        assert_eq!(
            db.count_records_with_raw_prefix("/data/images/PORT_1/20240501080000/").unwrap(),
            2
        );
    }
}
