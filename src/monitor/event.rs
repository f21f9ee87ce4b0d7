//! Severity classification and the alert hysteresis policy.

use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::ocr::Reading;
use crate::settings::ThresholdSetting;

/// Severity of one reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Normal,
    Alert,
    Abnormal,
    OcrError,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Alert => "alert",
            Self::Abnormal => "abnormal",
            Self::OcrError => "ocr_error",
        }
    }

    /// Label used in alert mails.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Alert => "Alert",
            Self::Abnormal => "Abnormal",
            Self::OcrError => "OCR error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "alert" => Some(Self::Alert),
            "abnormal" => Some(Self::Abnormal),
            "ocr_error" => Some(Self::OcrError),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a reading onto a tier. The abnormal band is checked first.
pub fn classify(reading: Reading, th: &ThresholdSetting) -> Tier {
    let Some(v) = reading.value() else {
        return Tier::OcrError;
    };
    if v < th.abnormal_low_th || v > th.abnormal_high_th {
        Tier::Abnormal
    } else if v < th.alert_low_th || v > th.alert_high_th {
        Tier::Alert
    } else {
        Tier::Normal
    }
}

/// Hysteresis state of one display.
#[derive(Clone, Debug, PartialEq)]
pub struct EventState {
    /// Tier of the most recent observation
    pub raw: Tier,
    /// Tier that has held for longer than the dead band
    pub stable: Tier,
    /// Seconds spent continuously in `raw`
    pub dwell_sec: f64,
    pub last_event: NaiveDateTime,
}

/// Result of one policy update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventDecision {
    pub tier: Tier,
    /// True only when the stable tier changed on this update
    pub alert: bool,
}

/// Dead-band policy of one display.
#[derive(Debug)]
pub struct EventPolicy {
    dead_band_sec: f64,
    state: Option<EventState>,
}

impl EventPolicy {
    pub fn new(dead_band_sec: f64) -> Self {
        Self {
            dead_band_sec,
            state: None,
        }
    }

    pub fn state(&self) -> Option<&EventState> {
        self.state.as_ref()
    }

    /// Feeds one observation.
    ///
    /// The first observation becomes stable immediately and alerts unless
    /// it is normal. Afterwards the stable tier follows the raw tier only
    /// once the raw tier has been held for longer than the dead band; the
    /// gap since the previous observation counts toward the new tier.
    /// Timestamps going backwards count as zero elapsed time.
    pub fn update(&mut self, tier: Tier, at: NaiveDateTime) -> EventDecision {
        let Some(state) = self.state.as_mut() else {
            self.state = Some(EventState {
                raw: tier,
                stable: tier,
                dwell_sec: 0.0,
                last_event: at,
            });
            return EventDecision {
                tier,
                alert: tier != Tier::Normal,
            };
        };

        let mut elapsed = (at - state.last_event).num_milliseconds() as f64 / 1000.0;
        if elapsed < 0.0 {
            warn!(
                "Observation at {} precedes previous one at {}; counting as no elapsed time",
                at, state.last_event
            );
            elapsed = 0.0;
        }

        let previous = state.stable;
        if tier == state.raw {
            state.dwell_sec += elapsed;
        } else {
            state.raw = tier;
            state.dwell_sec = elapsed;
        }
        if state.dwell_sec > self.dead_band_sec {
            state.stable = state.raw;
        }
        state.last_event = at;

        EventDecision {
            tier: state.stable,
            alert: state.stable != previous,
        }
    }
}

/// Hysteresis policies of all displays, keyed by display id.
///
/// Updates are serialized by one lock, so a display's state is never
/// updated by two cycles at once.
pub struct EventTable {
    dead_band_sec: f64,
    policies: Mutex<HashMap<String, EventPolicy>>,
}

impl EventTable {
    pub fn new(dead_band_sec: f64) -> Self {
        Self {
            dead_band_sec,
            policies: Mutex::new(HashMap::new()),
        }
    }

    pub fn update(&self, display_id: &str, tier: Tier, at: NaiveDateTime) -> EventDecision {
        let mut policies = self
            .policies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        policies
            .entry(display_id.to_string())
            .or_insert_with(|| EventPolicy::new(self.dead_band_sec))
            .update(tier, at)
    }
}
