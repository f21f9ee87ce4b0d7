//! Recognition cycle of one capture burst.
//!
//! For every enabled display filmed by the burst's camera: read each frame,
//! vote, classify, run the dead-band policy, store the record and then
//! notify. Displays are processed in parallel; alert lines of the whole
//! cycle are mailed once at the end.

use anyhow::{Context, Result};
use image::RgbImage;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use super::event::{classify, EventTable, Tier};
use super::queue::BurstWorkItem;
use super::vote::majority_vote;
use crate::capture::load_burst;
use crate::config::AppConfig;
use crate::notify::mail::alert_message;
use crate::notify::{AlertPool, FeedMessage, FeedPublisher, MailDispatcher};
use crate::ocr::{CharacterEngine, DisplayReader, Reading, TransformError};
use crate::paths::DataPaths;
use crate::settings::{DisplaySetting, ThresholdSetting};
use crate::store::{format_timestamp, Database, NewRecord, SaveOutcome};

/// One decoded frame of a burst.
struct Sample {
    path: PathBuf,
    frame: RgbImage,
}

fn load_samples(frames: &[PathBuf]) -> Vec<Sample> {
    frames
        .iter()
        .filter_map(|path| match image::open(path) {
            Ok(img) => Some(Sample {
                path: path.clone(),
                frame: img.to_rgb8(),
            }),
            Err(e) => {
                warn!("Skipping unreadable frame {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// What happened to one display during a cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayOutcome {
    pub setting_id: String,
    pub reading: Reading,
    /// Stable tier after the dead-band policy
    pub tier: Tier,
    /// True when an alert line was queued for this display
    pub alerted: bool,
    /// `None` when persisting failed
    pub record_id: Option<i64>,
}

pub struct Pipeline<'a> {
    db: &'a Database,
    engine: Box<dyn CharacterEngine>,
    feed: Option<Arc<dyn FeedPublisher>>,
    mail: Option<Arc<dyn MailDispatcher>>,
    events: EventTable,
    alerts: AlertPool,
    paths: DataPaths,
    config: AppConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(db: &'a Database, engine: Box<dyn CharacterEngine>, config: &AppConfig) -> Self {
        Self {
            db,
            engine,
            feed: None,
            mail: None,
            events: EventTable::new(config.alert_dead_band_sec),
            alerts: AlertPool::new(),
            paths: config.data_paths(),
            config: config.clone(),
        }
    }

    pub fn with_feed(mut self, feed: Arc<dyn FeedPublisher>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailDispatcher>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn db(&self) -> &'a Database {
        self.db
    }

    fn camera_name(&self, port: &str) -> String {
        self.config
            .camera(port)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| format!("PORT_{}", port))
    }

    /// Runs one full cycle for `item`.
    ///
    /// Only failing to look up the camera's displays is an error; problems
    /// of a single display are logged and leave it out of the result.
    pub fn process_burst(&self, item: &BurstWorkItem) -> Result<Vec<DisplayOutcome>> {
        let displays: Vec<DisplaySetting> = self
            .db
            .display_settings_for_port(&item.port)
            .with_context(|| format!("failed to load displays of port {}", item.port))?
            .into_iter()
            .filter(|d| {
                if d.disabled {
                    debug!("Display {} is disabled, skipping", d.id);
                }
                !d.disabled
            })
            .collect();

        if displays.is_empty() {
            info!("No enabled displays on port {}, nothing to do", item.port);
            return Ok(Vec::new());
        }

        let frames = load_burst(&item.burst_dir).unwrap_or_else(|e| {
            warn!("Burst {} has no usable frames: {:#}", item.burst_dir.display(), e);
            Vec::new()
        });
        let samples = load_samples(&frames);
        info!(
            "Processing burst {} ({} frames, {} displays)",
            item.burst_dir.display(),
            samples.len(),
            displays.len()
        );

        let samples = &samples;
        let outcomes: Vec<DisplayOutcome> = thread::scope(|s| {
            let handles: Vec<_> = displays
                .iter()
                .map(|display| s.spawn(move || self.process_display(display, item, samples)))
                .collect();

            handles
                .into_iter()
                .zip(&displays)
                .filter_map(|(handle, display)| match handle.join() {
                    Ok(Ok(outcome)) => Some(outcome),
                    Ok(Err(e)) if e.downcast_ref::<TransformError>().is_some() => {
                        error!("Display {} skipped, check its corners: {:#}", display.id, e);
                        None
                    }
                    Ok(Err(e)) => {
                        error!("Display {} skipped: {:#}", display.id, e);
                        None
                    }
                    Err(_) => {
                        error!("Display {} panicked during recognition", display.id);
                        None
                    }
                })
                .collect()
        });

        self.dispatch_alerts();
        Ok(outcomes)
    }

    fn thresholds_of(&self, setting: &DisplaySetting) -> Result<ThresholdSetting> {
        Ok(match self.db.get_threshold_setting(&setting.id)? {
            Some(th) => th,
            None => {
                warn!("Display {} has no thresholds, using defaults", setting.id);
                ThresholdSetting::with_defaults(&setting.id)
            }
        })
    }

    fn process_display(
        &self,
        setting: &DisplaySetting,
        item: &BurstWorkItem,
        samples: &[Sample],
    ) -> Result<DisplayOutcome> {
        let thresholds = self.thresholds_of(setting)?;
        let reader = DisplayReader::new(setting, self.engine.as_ref());

        let mut readings = Vec::with_capacity(samples.len());
        let mut crops = Vec::with_capacity(samples.len());
        for sample in samples {
            let (reading, crop) = reader.read_frame(&sample.frame)?;
            readings.push(reading);
            crops.push(crop);
        }

        let vote = majority_vote(&readings);
        let reading = vote.map(|v| v.reading).unwrap_or(Reading::Unreadable);
        let winner = vote.map(|v| v.index);

        let decision = self
            .events
            .update(&setting.id, classify(reading, &thresholds), item.captured_at);
        let alerted = decision.alert && thresholds.is_alert;
        debug!(
            "Display {}: readings {:?} -> {} ({})",
            setting.id, readings, reading, decision.tier
        );

        let region_image_path = winner.and_then(|i| self.save_region_image(setting, item, &crops[i]));
        let record = NewRecord {
            timestamp: item.captured_at,
            setting_id: setting.id.clone(),
            value: reading,
            event: decision.tier,
            is_sent: alerted,
            raw_image_path: winner.map(|i| samples[i].path.display().to_string()),
            region_image_path,
        };

        let saved = match self.db.save_record(&record) {
            Ok(SaveOutcome::KeptModified(id)) => {
                // The corrected row stands; this replay has nothing new to report
                info!("Record {} of {} was corrected by hand, keeping it", id, setting.id);
                return Ok(self.kept_outcome(setting, id, reading, decision.tier));
            }
            Ok(outcome) => Some(outcome.id()),
            Err(e) => {
                error!("Failed to store reading of {}: {:#}", setting.id, e);
                None
            }
        };

        // Nothing durable to refer to
        if saved.is_some() {
            self.publish(setting, item, reading, decision.tier);
            if alerted {
                let name = if setting.name.is_empty() { &setting.id } else { &setting.name };
                self.alerts.push(alert_message(
                    &self.camera_name(&item.port),
                    name,
                    decision.tier,
                    reading,
                ));
            }
        }

        Ok(DisplayOutcome {
            setting_id: setting.id.clone(),
            reading,
            tier: decision.tier,
            alerted: alerted && saved.is_some(),
            record_id: saved,
        })
    }

    /// Outcome of a display whose stored record was corrected by hand.
    ///
    /// Reports the stored value and tier when the row can be read back.
    fn kept_outcome(
        &self,
        setting: &DisplaySetting,
        id: i64,
        reading: Reading,
        tier: Tier,
    ) -> DisplayOutcome {
        let (reading, tier) = match self.db.record(id) {
            Ok(Some(stored)) => (stored.value, stored.event),
            Ok(None) => (reading, tier),
            Err(e) => {
                warn!("Failed to read back record {}: {:#}", id, e);
                (reading, tier)
            }
        };
        DisplayOutcome {
            setting_id: setting.id.clone(),
            reading,
            tier,
            alerted: false,
            record_id: Some(id),
        }
    }

    fn save_region_image(
        &self,
        setting: &DisplaySetting,
        item: &BurstWorkItem,
        crop: &RgbImage,
    ) -> Option<String> {
        if !self.config.save_region_images {
            return None;
        }
        let path = self.paths.region_image_path(&setting.id, item.captured_at);
        let saved = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(anyhow::Error::from)
            .and_then(|_| crop.save(&path).map_err(anyhow::Error::from));
        match saved {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                warn!("Failed to save region image {}: {:#}", path.display(), e);
                None
            }
        }
    }

    fn publish(&self, setting: &DisplaySetting, item: &BurstWorkItem, reading: Reading, tier: Tier) {
        let Some(feed) = &self.feed else {
            return;
        };
        let message = FeedMessage {
            display_id: setting.id.clone(),
            value: reading,
            timestamp: format_timestamp(&item.captured_at),
            event_tier: tier,
        };
        if let Err(e) = feed.publish(&message) {
            warn!("Live feed publish for {} failed: {:#}", setting.id, e);
        }
    }

    /// Sends every alert line of the cycle as one mail.
    fn dispatch_alerts(&self) {
        let messages = self.alerts.drain();
        if messages.is_empty() {
            return;
        }
        let Some(mail) = &self.mail else {
            info!("{} alert(s) raised, no mail relay configured", messages.len());
            return;
        };

        let recipients = match self.db.enabled_recipients() {
            Ok(r) if !r.is_empty() => r,
            Ok(_) => {
                warn!("{} alert(s) raised but no mail recipients are enabled", messages.len());
                return;
            }
            Err(e) => {
                warn!("Failed to load mail recipients: {:#}", e);
                return;
            }
        };

        match mail.send(&messages.join("\n"), &recipients) {
            Ok(()) => info!(
                "Alert mail with {} line(s) sent to {} recipient(s)",
                messages.len(),
                recipients.len()
            ),
            Err(e) => warn!("Alert mail failed: {:#}", e),
        }
    }
}
