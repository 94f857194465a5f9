// SPDX-License-Identifier: GPL-3.0-or-later

//! Overlapping time windows over a recording.

use mixscribe_domain::Segment;

use crate::config::validate_window;
use crate::error::Result;

/// The window layout for one recording. Iterating it is restartable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    duration: f64,
    length: f64,
    step: f64,
}

impl SegmentPlan {
    pub fn new(duration: f64, length: f64, overlap: f64) -> Result<Self> {
        validate_window(length, overlap)?;
        Ok(Self {
            duration,
            length,
            step: length - overlap,
        })
    }

    pub fn iter(&self) -> Segments {
        Segments {
            plan: *self,
            next_index: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<Segment> {
        self.iter().collect()
    }

    /// Number of windows, computed without walking the plan.
    pub fn len(&self) -> usize {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return 0;
        }

        // The first index whose start reaches the duration, using the same
        // arithmetic as the iterator so rounding cannot disagree.
        let starts_before_end = |n: usize| (n as f64 * self.step) < self.duration;
        let mut n = (self.duration / self.step).ceil() as usize;
        while n > 0 && !starts_before_end(n - 1) {
            n -= 1;
        }
        while starts_before_end(n) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntoIterator for SegmentPlan {
    type Item = Segment;
    type IntoIter = Segments;

    fn into_iter(self) -> Segments {
        self.iter()
    }
}

/// Lazy iterator over a [`SegmentPlan`].
#[derive(Debug, Clone)]
pub struct Segments {
    plan: SegmentPlan,
    next_index: usize,
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let SegmentPlan {
            duration,
            length,
            step,
        } = self.plan;

        let start = self.next_index as f64 * step;
        if !duration.is_finite() || start >= duration {
            return None;
        }

        let segment = Segment::new(self.next_index, start, (start + length).min(duration));
        self.next_index += 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len().saturating_sub(self.next_index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Segments {}

impl std::iter::FusedIterator for Segments {}

/// Split `[0, duration]` into windows of `length` seconds, each starting
/// `length - overlap` seconds after the previous one. The last window may be
/// shorter than `length`.
pub fn segment(duration: f64, length: f64, overlap: f64) -> Result<Vec<Segment>> {
    Ok(SegmentPlan::new(duration, length, overlap)?.to_vec())
}
