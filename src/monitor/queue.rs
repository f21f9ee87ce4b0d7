//! Queue between the capture loops and the pipeline worker.
//!
//! Each capture loop sends one item per completed burst; the pipeline
//! worker receives them in arrival order. Replaying a burst directory
//! through the same queue re-triggers processing.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};

/// A completed capture burst, ready for recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstWorkItem {
    /// Camera port the burst was taken with
    pub port: String,
    /// Directory holding the burst's frames
    pub burst_dir: PathBuf,
    /// Capture time of the burst (its directory name)
    pub captured_at: NaiveDateTime,
}

impl BurstWorkItem {
    pub fn new(port: &str, burst_dir: PathBuf, captured_at: NaiveDateTime) -> Self {
        Self {
            port: port.to_string(),
            burst_dir,
            captured_at,
        }
    }
}

/// Creates a new work queue.
///
/// The channel is unbounded: bursts queue up if recognition is slower than
/// capture.
pub fn create_work_queue() -> (Sender<BurstWorkItem>, Receiver<BurstWorkItem>) {
    channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, sec)
            .unwrap()
    }

    #[test]
    fn test_work_queue_keeps_order() {
        let (sender, receiver) = create_work_queue();

        for i in 0..3 {
            let item = BurstWorkItem::new("1", PathBuf::from(format!("burst_{}", i)), at(i));
            sender.send(item).expect("Failed to send");
        }

        for i in 0..3 {
            let received = receiver.recv().expect("Failed to receive");
            assert_eq!(received.burst_dir, PathBuf::from(format!("burst_{}", i)));
            assert_eq!(received.captured_at, at(i));
        }
    }

    #[test]
    fn test_channel_closes_when_senders_dropped() {
        let (sender, receiver) = create_work_queue();
        let second = sender.clone();

        sender
            .send(BurstWorkItem::new("1", PathBuf::from("a"), at(0)))
            .unwrap();
        drop(sender);
        drop(second);

        assert!(receiver.recv().is_ok());
        assert!(receiver.recv().is_err());
    }
}
