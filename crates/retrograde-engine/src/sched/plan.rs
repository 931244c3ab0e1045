use serde::Serialize;

use crate::envelope::SegmentEnvelope;
use crate::PlaybackParameters;

/// One chunk the scheduler will emit, before it is placed on the output
/// clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlannedSegment {
    /// Right edge of the window (the cursor before this iteration).
    pub cursor: f64,
    pub segment_start: f64,
    pub actual_duration: f64,
    pub envelope: SegmentEnvelope,
    /// Cursor after this iteration.
    pub next_cursor: f64,
}

impl PlannedSegment {
    pub fn end(&self) -> f64 {
        self.segment_start + self.actual_duration
    }
}

/// The timing-free part of one loop iteration: window placement, fades and
/// cursor advance.
pub struct SegmentPlanner;

impl SegmentPlanner {
    /// Returns `None` for a degenerate window (nothing left to the left of
    /// the cursor); the caller still advances the cursor by `step`.
    pub fn plan(cursor: f64, params: &PlaybackParameters) -> Option<PlannedSegment> {
        let segment_start = (cursor - params.segment_duration).max(0.0);
        let actual_duration = cursor - segment_start;
        if actual_duration <= 0.0 {
            return None;
        }
        let envelope = SegmentEnvelope::compute(
            actual_duration,
            params.segment_duration,
            params.period,
            params.overlap,
        );
        Some(PlannedSegment {
            cursor,
            segment_start,
            actual_duration,
            envelope,
            next_cursor: cursor - params.step,
        })
    }

    /// Every segment a run starting at `cursor` would emit with fixed
    /// parameters.
    pub fn iter(cursor: f64, params: PlaybackParameters) -> SegmentPlan {
        SegmentPlan { cursor, params }
    }
}

/// Iterator produced by [`SegmentPlanner::iter`].
pub struct SegmentPlan {
    cursor: f64,
    params: PlaybackParameters,
}

impl Iterator for SegmentPlan {
    type Item = PlannedSegment;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor > 0.0 {
            match SegmentPlanner::plan(self.cursor, &self.params) {
                Some(planned) => {
                    self.cursor = planned.next_cursor;
                    return Some(planned);
                }
                None => self.cursor -= self.params.step,
            }
        }
        None
    }
}
