//! Disk retention sweep.
//!
//! While the disk holding the data directory is fuller than the configured
//! percentage, the oldest record is deleted together with its region image
//! and, once no other record refers to it, its raw burst directory.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::Disks;

use super::{Database, SensorRecord};
use crate::config::RetentionConfig;
use crate::monitor::state::StopSignal;

/// Safety cap on deletions per sweep.
const MAX_DELETIONS_PER_SWEEP: usize = 1000;

/// Used space of the disk whose mount point is the longest prefix of `path`.
pub fn disk_usage_percent(path: &Path) -> Result<f64> {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .ok_or_else(|| anyhow!("no disk found for {}", path.display()))?;

    let total = disk.total_space();
    if total == 0 {
        return Err(anyhow!("disk {} reports zero size", disk.mount_point().display()));
    }
    let used = total.saturating_sub(disk.available_space());
    Ok(used as f64 * 100.0 / total as f64)
}

fn burst_dir_of(record: &SensorRecord) -> Option<PathBuf> {
    record
        .raw_image_path
        .as_deref()
        .and_then(|p| Path::new(p).parent())
        .map(Path::to_path_buf)
}

/// Deletes the burst directory `dir` unless a record still refers to a
/// frame inside it. Returns true when the directory was removed.
pub fn remove_burst_dir_if_unreferenced(db: &Database, dir: &Path) -> Result<bool> {
    let prefix = format!("{}{}", dir.display(), std::path::MAIN_SEPARATOR);
    if db.count_records_with_raw_prefix(&prefix)? > 0 {
        return Ok(false);
    }
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to delete burst directory {}", dir.display())),
    }
}

fn remove_files_of(db: &Database, record: &SensorRecord) {
    if let Some(region) = &record.region_image_path {
        if let Err(e) = std::fs::remove_file(region) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete region image {}: {}", region, e);
            }
        }
    }

    if let Some(dir) = burst_dir_of(record) {
        if let Err(e) = remove_burst_dir_if_unreferenced(db, &dir) {
            warn!("{:#}", e);
        }
    }
}

/// One sweep. `usage` reports the current disk usage in percent.
///
/// Returns the number of deleted records.
pub fn sweep_once(
    db: &Database,
    max_usage_percent: f64,
    mut usage: impl FnMut() -> Result<f64>,
) -> Result<usize> {
    let mut deleted = 0;
    while deleted < MAX_DELETIONS_PER_SWEEP && usage()? > max_usage_percent {
        let Some(oldest) = db.oldest_record()? else {
            warn!("Disk usage above {}% but no records left to delete", max_usage_percent);
            break;
        };
        db.delete_record(oldest.id)?;
        remove_files_of(db, &oldest);
        deleted += 1;
    }
    if deleted > 0 {
        info!("Retention sweep deleted {} record(s)", deleted);
    }
    Ok(deleted)
}

/// Runs sweeps every `sweep_interval_sec` until `stop` is signalled.
pub fn run_retention_loop(db: &Database, data_dir: &Path, config: &RetentionConfig, stop: &StopSignal) {
    info!(
        "Retention sweep started (max disk usage {}%)",
        config.max_disk_usage_percent
    );
    let interval = Duration::from_secs(config.sweep_interval_sec.max(1));

    while !stop.is_stopped() {
        if let Err(e) = sweep_once(db, config.max_disk_usage_percent, || disk_usage_percent(data_dir)) {
            warn!("Retention sweep failed: {:#}", e);
        }
        if stop.wait_timeout(interval) {
            break;
        }
    }
    info!("Retention sweep finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::Reading;
    use crate::store::records::tests::{new_record, t0};
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_sweep_deletes_until_below_limit() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();

        let mut bursts = Vec::new();
        for i in 0..3 {
            let at = t0() + ChronoDuration::minutes(i);
            let burst = dir.path().join(at.format("%Y%m%d%H%M%S").to_string());
            std::fs::create_dir_all(&burst).unwrap();
            std::fs::write(burst.join("0.jpg"), b"jpg").unwrap();
            let region = dir.path().join(format!("boiler_{}.png", i));
            std::fs::write(&region, b"png").unwrap();

            let mut rec = new_record("boiler", at, Reading::Value(1.0));
            rec.raw_image_path = Some(burst.join("0.jpg").display().to_string());
            rec.region_image_path = Some(region.display().to_string());
            db.save_record(&rec).unwrap();
            bursts.push((burst, region));
        }

        // Usage drops by 10 points per deletion
        let mut usage = 95.0;
        let deleted = sweep_once(&db, 80.0, || {
            let current = usage;
            usage -= 10.0;
            Ok(current)
        })
        .unwrap();

        assert_eq!(deleted, 2);
        assert!(!bursts[0].0.exists());
        assert!(!bursts[0].1.exists());
        assert!(!bursts[1].0.exists());
        assert!(bursts[2].0.exists());
        assert!(bursts[2].1.exists());
    }

    #[test]
    fn test_shared_burst_dir_kept_while_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let burst = dir.path().join("20240501080000");
        std::fs::create_dir_all(&burst).unwrap();
        std::fs::write(burst.join("0.jpg"), b"jpg").unwrap();

        for id in ["boiler", "tank"] {
            let mut rec = new_record(id, t0(), Reading::Value(1.0));
            rec.raw_image_path = Some(burst.join("0.jpg").display().to_string());
            db.save_record(&rec).unwrap();
        }

        let mut calls = 0;
        sweep_once(&db, 80.0, || {
            calls += 1;
            Ok(if calls == 1 { 90.0 } else { 50.0 })
        })
        .unwrap();
        assert!(burst.exists());

        sweep_once(&db, 80.0, || Ok(if db_is_empty(&db) { 50.0 } else { 90.0 })).unwrap();
        assert!(!burst.exists());
    }

    fn db_is_empty(db: &Database) -> bool {
        db.oldest_record().unwrap().is_none()
    }

    #[test]
    fn test_unreferenced_burst_dir_removed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let kept = dir.path().join("20240501080000");
        let empty = dir.path().join("20240501080100");
        std::fs::create_dir_all(&kept).unwrap();
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::write(kept.join("0.jpg"), b"jpg").unwrap();

        let mut rec = new_record("boiler", t0(), Reading::Value(1.0));
        rec.raw_image_path = Some(kept.join("0.jpg").display().to_string());
        db.save_record(&rec).unwrap();

        assert!(!remove_burst_dir_if_unreferenced(&db, &kept).unwrap());
        assert!(kept.exists());
        assert!(remove_burst_dir_if_unreferenced(&db, &empty).unwrap());
        assert!(!empty.exists());
        // Already gone
        assert!(!remove_burst_dir_if_unreferenced(&db, &empty).unwrap());
    }

    #[test]
    fn test_sweep_below_limit_is_noop() {
        let db = Database::open_in_memory().unwrap();
        db.save_record(&new_record("boiler", t0(), Reading::Value(1.0)))
            .unwrap();
        assert_eq!(sweep_once(&db, 90.0, || Ok(40.0)).unwrap(), 0);
        assert!(db.oldest_record().unwrap().is_some());
    }

    #[test]
    fn test_sweep_stops_when_nothing_left() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(sweep_once(&db, 90.0, || Ok(99.0)).unwrap(), 0);
    }
}
