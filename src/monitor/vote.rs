//! Consensus over the readings of one capture burst.

use crate::ocr::Reading;

/// Winning reading and the index of its first occurrence in the burst.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vote {
    pub reading: Reading,
    pub index: usize,
}

/// Most frequent reading of a burst.
///
/// Ties go to the value seen first. When the unreadable sentinel wins but
/// some numeric value was also read, the runner-up is taken instead.
/// Returns `None` for an empty burst.
pub fn majority_vote(readings: &[Reading]) -> Option<Vote> {
    // (reading, count, first index) in first-occurrence order
    let mut counts: Vec<(Reading, usize, usize)> = Vec::new();
    for (i, reading) in readings.iter().enumerate() {
        match counts.iter_mut().find(|(r, _, _)| r == reading) {
            Some(entry) => entry.1 += 1,
            None => counts.push((*reading, 1, i)),
        }
    }

    // Stable sort keeps first-occurrence order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let winner = match counts.as_slice() {
        [] => return None,
        [top, runner_up, ..] if top.0.is_unreadable() => runner_up,
        [top, ..] => top,
    };

    Some(Vote {
        reading: winner.0,
        index: winner.2,
    })
}
