//! Pipeline worker thread.
//!
//! Receives completed bursts from the work queue and runs one recognition
//! cycle per burst, in arrival order. Burst directories no stored record
//! refers to afterwards (no enabled display, no frame captured) are removed.

use log::{debug, error, info, warn};
use std::sync::mpsc::Receiver;

use super::pipeline::Pipeline;
use super::queue::BurstWorkItem;
use crate::store::retention::remove_burst_dir_if_unreferenced;

/// Runs the pipeline worker loop.
///
/// Processes items until the channel is closed (all capture loops gone).
/// A failed cycle is logged and the worker moves on to the next burst.
pub fn run_pipeline_worker(receiver: Receiver<BurstWorkItem>, pipeline: &Pipeline<'_>) {
    info!("Pipeline worker started");

    while let Ok(item) = receiver.recv() {
        info!(
            "Pipeline worker: burst {} from port {}",
            item.burst_dir.display(),
            item.port
        );
        match pipeline.process_burst(&item) {
            Ok(outcomes) => {
                for o in &outcomes {
                    info!("  {} = {} ({})", o.setting_id, o.reading, o.tier);
                }
                match remove_burst_dir_if_unreferenced(pipeline.db(), &item.burst_dir) {
                    Ok(true) => debug!("Removed unreferenced burst {}", item.burst_dir.display()),
                    Ok(false) => {}
                    Err(e) => warn!("{:#}", e),
                }
            }
            Err(e) => error!("Pipeline worker: burst {} failed: {:#}", item.burst_dir.display(), e),
        }
    }

    info!("Pipeline worker: channel closed, exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::monitor::queue::create_work_queue;
    use crate::ocr::engine::tests::ScriptedEngine;
    use crate::settings::tests::sample_setting;
    use crate::store::records::tests::t0;
    use crate::store::{Database, SettingsImport};
    use chrono::Duration;
    use std::thread;

    #[test]
    fn test_worker_exits_when_channel_closes() {
        let db = Database::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&db, Box::new(ScriptedEngine::new(&[""])), &AppConfig::default());
        let (sender, receiver) = create_work_queue();
        drop(sender);

        run_pipeline_worker(receiver, &pipeline);
    }

    #[test]
    fn test_worker_processes_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.import_settings(&SettingsImport {
            displays: vec![sample_setting()],
            ..SettingsImport::default()
        })
        .unwrap();
        let config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        let pipeline = Pipeline::new(&db, Box::new(ScriptedEngine::new(&[""])), &config);
        let (sender, receiver) = create_work_queue();

        thread::scope(|s| {
            s.spawn(|| run_pipeline_worker(receiver, &pipeline));
            for i in 0..3 {
                let at = t0() + Duration::seconds(60 * i);
                // Missing burst directories still produce unreadable records
                let burst = config.data_paths().burst_dir("1", at);
                sender.send(BurstWorkItem::new("1", burst, at)).unwrap();
            }
            drop(sender);
        });

        let records = db
            .records_in_range("boiler", &t0(), &(t0() + Duration::minutes(10)))
            .unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.value.is_unreadable()));
    }

    #[test]
    fn test_worker_removes_unreferenced_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.import_settings(&SettingsImport {
            displays: vec![sample_setting()],
            ..SettingsImport::default()
        })
        .unwrap();
        let config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        let paths = config.data_paths();
        let pipeline = Pipeline::new(&db, Box::new(ScriptedEngine::new(&[""])), &config);

        // Every sample missed on a watched camera
        let missed = paths.burst_dir("1", t0());
        // A camera nobody reads, with frames
        let unwatched = paths.burst_dir("7", t0());
        std::fs::create_dir_all(&missed).unwrap();
        std::fs::create_dir_all(&unwatched).unwrap();
        image::RgbImage::new(4, 4).save(unwatched.join("0.png")).unwrap();

        let (sender, receiver) = create_work_queue();
        sender.send(BurstWorkItem::new("1", missed.clone(), t0())).unwrap();
        sender.send(BurstWorkItem::new("7", unwatched.clone(), t0())).unwrap();
        drop(sender);
        run_pipeline_worker(receiver, &pipeline);

        assert!(!missed.exists());
        assert!(!unwatched.exists());
        let records = db.records_in_range("boiler", &t0(), &t0()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].raw_image_path.is_none());
    }
}
