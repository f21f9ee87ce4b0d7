//! Configuration store: display settings, thresholds and mail recipients.
//!
//! The pipeline only reads from here. Writes come from `import-settings`,
//! which validates everything before touching the database.

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{conversion_error, Database};
use crate::settings::calibration::DisplayCalibration;
use crate::settings::{DisplaySetting, ThresholdSetting};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MailRecipient {
    pub address: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Contents of a settings file passed to `import-settings`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsImport {
    pub displays: Vec<DisplaySetting>,
    pub thresholds: Vec<ThresholdSetting>,
    pub mail_recipients: Vec<MailRecipient>,
    /// Clicked digit corners; turned into sampling points on load
    pub calibrations: Vec<DisplayCalibration>,
}

impl SettingsImport {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut import: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        import.apply_calibrations()?;
        Ok(import)
    }

    /// Derives segment points and decimal candidates from calibrations.
    pub fn apply_calibrations(&mut self) -> Result<()> {
        for calibration in &self.calibrations {
            let display = self
                .displays
                .iter_mut()
                .find(|d| d.id == calibration.setting_id)
                .with_context(|| format!("calibration for unknown display {}", calibration.setting_id))?;
            calibration.apply(display)?;
        }
        Ok(())
    }

    /// Validates every record; nothing is written when any of them is invalid.
    pub fn validate(&self) -> Result<()> {
        for display in &self.displays {
            display.validate()?;
        }
        for threshold in &self.thresholds {
            threshold.validate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub displays: usize,
    pub thresholds: usize,
    pub recipients: usize,
}

fn display_from_json(json: &str) -> rusqlite::Result<DisplaySetting> {
    serde_json::from_str(json)
        .context("invalid stored display setting")
        .map_err(conversion_error)
}

fn upsert_display(tx: &Transaction<'_>, display: &DisplaySetting) -> Result<()> {
    let json = serde_json::to_string(display).context("failed to serialize display setting")?;
    tx.execute(
        "INSERT INTO display_settings (id, camera_port, disabled, setting_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (id) DO UPDATE SET
            camera_port = excluded.camera_port,
            disabled = excluded.disabled,
            setting_json = excluded.setting_json,
            updated_at = excluded.updated_at",
        params![
            display.id,
            display.camera_port,
            display.disabled,
            json,
            Local::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn upsert_threshold(tx: &Transaction<'_>, th: &ThresholdSetting) -> Result<()> {
    tx.execute(
        "INSERT INTO threshold_settings (
            setting_id, is_alert, abnormal_low_th, alert_low_th, alert_high_th, abnormal_high_th
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (setting_id) DO UPDATE SET
            is_alert = excluded.is_alert,
            abnormal_low_th = excluded.abnormal_low_th,
            alert_low_th = excluded.alert_low_th,
            alert_high_th = excluded.alert_high_th,
            abnormal_high_th = excluded.abnormal_high_th",
        params![
            th.setting_id,
            th.is_alert,
            th.abnormal_low_th,
            th.alert_low_th,
            th.alert_high_th,
            th.abnormal_high_th,
        ],
    )
    .with_context(|| format!("failed to store thresholds of {}", th.setting_id))?;
    Ok(())
}

impl Database {
    /// Writes a validated settings file in one transaction.
    pub fn import_settings(&self, import: &SettingsImport) -> Result<ImportSummary> {
        import.validate()?;

        self.with_conn(|conn| {
            let tx = conn.transaction().context("failed to open import transaction")?;
            for display in &import.displays {
                upsert_display(&tx, display)?;
            }
            for th in &import.thresholds {
                upsert_threshold(&tx, th)?;
            }
            for recipient in &import.mail_recipients {
                tx.execute(
                    "INSERT INTO mail_recipients (address, enabled) VALUES (?1, ?2)
                     ON CONFLICT (address) DO UPDATE SET enabled = excluded.enabled",
                    params![recipient.address, recipient.enabled],
                )?;
            }
            tx.commit().context("failed to commit settings import")?;

            Ok(ImportSummary {
                displays: import.displays.len(),
                thresholds: import.thresholds.len(),
                recipients: import.mail_recipients.len(),
            })
        })
    }

    pub fn list_display_settings(&self) -> Result<Vec<DisplaySetting>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT setting_json FROM display_settings ORDER BY id")?;
            let rows = stmt.query_map([], |row| display_from_json(&row.get::<_, String>(0)?))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to read display settings")
        })
    }

    pub fn get_display_setting(&self, id: &str) -> Result<Option<DisplaySetting>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT setting_json FROM display_settings WHERE id = ?1",
                    params![id],
                    |row| display_from_json(&row.get::<_, String>(0)?),
                )
                .optional()?)
        })
    }

    /// Displays filmed by the camera on `port`, including disabled ones.
    pub fn display_settings_for_port(&self, port: &str) -> Result<Vec<DisplaySetting>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT setting_json FROM display_settings WHERE camera_port = ?1 ORDER BY id",
            )?;
            let rows =
                stmt.query_map(params![port], |row| display_from_json(&row.get::<_, String>(0)?))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("failed to read display settings of port {port}"))
        })
    }

    pub fn get_threshold_setting(&self, setting_id: &str) -> Result<Option<ThresholdSetting>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT setting_id, is_alert, abnormal_low_th, alert_low_th, alert_high_th,
                            abnormal_high_th
                     FROM threshold_settings WHERE setting_id = ?1",
                    params![setting_id],
                    |row| {
                        Ok(ThresholdSetting {
                            setting_id: row.get(0)?,
                            is_alert: row.get(1)?,
                            abnormal_low_th: row.get(2)?,
                            alert_low_th: row.get(3)?,
                            alert_high_th: row.get(4)?,
                            abnormal_high_th: row.get(5)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    pub fn enabled_recipients(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT address FROM mail_recipients WHERE enabled = 1 ORDER BY id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<String>>>()
                .context("failed to read mail recipients")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::tests::sample_setting;

    fn sample_import() -> SettingsImport {
        let mut tank = sample_setting();
        tank.id = "tank".to_string();
        tank.camera_port = "2".to_string();
        tank.disabled = true;

        SettingsImport {
            displays: vec![sample_setting(), tank],
            thresholds: vec![ThresholdSetting::with_defaults("boiler")],
            mail_recipients: vec![
                MailRecipient { address: "ops@example.com".to_string(), enabled: true },
                MailRecipient { address: "old@example.com".to_string(), enabled: false },
            ],
            calibrations: Vec::new(),
        }
    }

    #[test]
    fn test_import_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let summary = db.import_settings(&sample_import()).unwrap();
        assert_eq!(summary, ImportSummary { displays: 2, thresholds: 1, recipients: 2 });

        assert_eq!(db.list_display_settings().unwrap().len(), 2);
        assert_eq!(db.get_display_setting("boiler").unwrap().unwrap(), sample_setting());
        assert!(db.get_display_setting("missing").unwrap().is_none());

        let port2 = db.display_settings_for_port("2").unwrap();
        assert_eq!(port2.len(), 1);
        assert!(port2[0].disabled);

        let th = db.get_threshold_setting("boiler").unwrap().unwrap();
        assert_eq!(th, ThresholdSetting::with_defaults("boiler"));
        assert!(db.get_threshold_setting("tank").unwrap().is_none());

        assert_eq!(db.enabled_recipients().unwrap(), vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn test_reimport_updates_in_place() {
        let db = Database::open_in_memory().unwrap();
        db.import_settings(&sample_import()).unwrap();

        let mut import = sample_import();
        import.displays[0].name = "Renamed".to_string();
        import.thresholds[0].is_alert = false;
        import.mail_recipients[1].enabled = true;
        db.import_settings(&import).unwrap();

        assert_eq!(db.list_display_settings().unwrap().len(), 2);
        assert_eq!(db.get_display_setting("boiler").unwrap().unwrap().name, "Renamed");
        assert!(!db.get_threshold_setting("boiler").unwrap().unwrap().is_alert);
        assert_eq!(db.enabled_recipients().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_thresholds_rejected_before_writing() {
        let db = Database::open_in_memory().unwrap();
        let mut import = sample_import();
        import.thresholds[0].abnormal_high_th = 10.0;

        assert!(db.import_settings(&import).is_err());
        assert!(db.list_display_settings().unwrap().is_empty());
    }

    #[test]
    fn test_threshold_for_unknown_display_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let mut import = sample_import();
        import.thresholds.push(ThresholdSetting::with_defaults("ghost"));

        assert!(db.import_settings(&import).is_err());
        assert!(db.list_display_settings().unwrap().is_empty());
    }

    #[test]
    fn test_load_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, serde_json::to_string_pretty(&sample_import()).unwrap()).unwrap();

        let loaded = SettingsImport::load(&path).unwrap();
        assert_eq!(loaded.displays[0], sample_setting());
        assert_eq!(loaded.mail_recipients.len(), 2);
    }

    #[test]
    fn test_load_applies_calibrations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut display = serde_json::to_value(sample_setting()).unwrap();
        display.as_object_mut().unwrap().remove("segment_points");
        let file = serde_json::json!({
            "displays": [display],
            "calibrations": [{
                "setting_id": "boiler",
                "digit_corners": (0..3).map(|i| {
                    let left = 5 + 32 * i;
                    serde_json::json!({
                        "upper_left": {"x": left, "y": 5},
                        "upper_right": {"x": left + 29, "y": 5},
                        "lower_right": {"x": left + 29, "y": 51},
                        "lower_left": {"x": left, "y": 51}
                    })
                }).collect::<Vec<_>>()
            }]
        });
        std::fs::write(&path, file.to_string()).unwrap();

        let loaded = SettingsImport::load(&path).unwrap();
        assert_eq!(loaded.displays[0].segment_points.len(), 3);
        assert!(loaded.displays[0].decimal_points.is_empty());
        loaded.validate().unwrap();

        let bad = serde_json::json!({
            "calibrations": [{"setting_id": "ghost", "digit_corners": []}]
        });
        std::fs::write(&path, bad.to_string()).unwrap();
        assert!(SettingsImport::load(&path).is_err());
    }
}
