//! Monitor runner - entry point of the `run` command.
//!
//! Spawns one capture loop per camera, the pipeline worker and the
//! retention sweep, then waits for a stop request.

use anyhow::{Context, Result};
use log::{info, warn};
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::pipeline::Pipeline;
use super::queue::create_work_queue;
use super::state::StopSignal;
use super::worker::run_pipeline_worker;
use crate::capture::{run_capture_loop, CommandCamera};
use crate::config::AppConfig;
use crate::notify::{HttpFeedPublisher, HttpMailRelay};
use crate::ocr::TesseractEngine;
use crate::store::retention::run_retention_loop;
use crate::store::Database;

/// Builds the recognition pipeline with the configured tesseract engine and
/// downstream channels.
pub fn build_pipeline<'a>(db: &'a Database, config: &AppConfig) -> Result<Pipeline<'a>> {
    let engine = TesseractEngine::new(&config.tesseract).context("tesseract is not usable")?;
    let mut pipeline = Pipeline::new(db, Box::new(engine), config);

    if let Some(feed) = &config.feed {
        info!("Live feed: {}", feed.endpoint);
        pipeline = pipeline.with_feed(Arc::new(HttpFeedPublisher::new(feed)?));
    }
    if let Some(mail) = &config.mail {
        info!("Mail relay: {}", mail.relay_endpoint);
        pipeline = pipeline.with_mail(Arc::new(HttpMailRelay::new(mail)?));
    }
    Ok(pipeline)
}

/// Stops `stop` when a line reading `q` arrives on stdin.
///
/// The reader thread is detached: a blocked stdin read must not keep the
/// process alive after shutdown.
fn watch_stdin(stop: StopSignal) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim().eq_ignore_ascii_case("q") => {
                    info!("Stop requested from stdin");
                    stop.stop();
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });
}

/// Runs the monitor until `q` is entered or `run_for` elapses.
pub fn run_monitor(config: &AppConfig, run_for: Option<Duration>) -> Result<()> {
    let paths = config.data_paths();
    paths
        .ensure_directories()
        .with_context(|| format!("failed to create data directories under {}", paths.root().display()))?;

    let db = Database::open(&paths.database_path())?;
    let pipeline = build_pipeline(&db, config)?;

    let cameras = config
        .cameras
        .iter()
        .map(|c| {
            CommandCamera::new(
                c,
                &config.capture.command,
                Duration::from_millis(config.capture.frame_timeout_ms),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    if cameras.is_empty() {
        warn!("No cameras configured; only the retention sweep will run");
    }

    let stop = StopSignal::new();
    watch_stdin(stop.clone());
    info!(
        "Monitoring {} camera(s); enter 'q' to stop{}",
        cameras.len(),
        run_for
            .map(|d| format!(" (stopping after {}s)", d.as_secs()))
            .unwrap_or_default()
    );

    let (sender, receiver) = create_work_queue();
    let (paths, stop_ref, db_ref, pipeline_ref) = (&paths, &stop, &db, &pipeline);

    thread::scope(|s| {
        for camera in &cameras {
            let sender = sender.clone();
            s.spawn(move || run_capture_loop(camera, paths, &config.capture, sender, stop_ref));
        }
        // The worker exits once every capture loop has dropped its sender
        drop(sender);

        s.spawn(move || run_pipeline_worker(receiver, pipeline_ref));
        s.spawn(move || run_retention_loop(db_ref, paths.root(), &config.retention, stop_ref));

        match run_for {
            Some(limit) => {
                stop_ref.wait_timeout(limit);
            }
            None => while !stop_ref.wait_timeout(Duration::from_secs(3600)) {},
        }
        stop_ref.stop();
        info!("Stopping workers...");
    });

    info!("Monitor stopped");
    Ok(())
}
