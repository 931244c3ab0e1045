mod curve;

use serde::Serialize;

pub use curve::{GainCurve, GainPoint, Ramp};

/// Fade timing for one extracted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentEnvelope {
    pub duration: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl SegmentEnvelope {
    /// Computes symmetric fades from the overlap policy.
    ///
    /// When no overlap is requested the envelope uses the overlap implied by
    /// the schedule (`segment_duration - period`). Any overlap is clamped to
    /// the actual chunk, so a request larger than the chunk degenerates into
    /// a full-length crossfade.
    pub fn compute(
        actual_duration: f64,
        segment_duration: f64,
        period: f64,
        requested_overlap: f64,
    ) -> Self {
        let actual_duration = actual_duration.max(0.0);
        let max_overlap = (segment_duration - period).max(0.0);
        let desired = if requested_overlap > 0.0 {
            requested_overlap
        } else {
            max_overlap
        };
        let applied = desired.min(actual_duration);
        let fade = (applied / 2.0).min(actual_duration / 2.0).max(0.0);
        Self {
            duration: actual_duration,
            fade_in: fade,
            fade_out: fade,
        }
    }

    pub fn overlap(&self) -> f64 {
        self.fade_in + self.fade_out
    }

    /// Gain automation relative to the segment start: ramp up over the
    /// fade-in, hold at unity, ramp down over the fade-out.
    pub fn gain_curve(&self) -> GainCurve {
        let mut curve = GainCurve::new();
        if self.fade_in > 0.0 {
            curve.set_value_at(0.0, 0.0);
            curve.linear_ramp_to(self.fade_in, 1.0);
        } else {
            curve.set_value_at(0.0, 1.0);
        }

        if self.fade_out > 0.0 {
            curve.set_value_at((self.duration - self.fade_out).max(0.0), 1.0);
            curve.linear_ramp_to(self.duration, 0.0);
        } else {
            curve.set_value_at(self.duration, 0.0);
        }
        curve
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_overlap_splits_into_fades() {
        let envelope = SegmentEnvelope::compute(1.25, 1.25, 1.0, 0.25);
        assert!((envelope.fade_in - 0.125).abs() < 1e-12);
        assert!((envelope.fade_out - 0.125).abs() < 1e-12);
    }

    #[test]
    fn zero_overlap_falls_back_to_schedule_overlap() {
        let envelope = SegmentEnvelope::compute(1.5, 2.0, 1.0, 0.0);
        assert!((envelope.fade_in - 0.5).abs() < 1e-12);
        let tight = SegmentEnvelope::compute(1.0, 1.0, 1.0, 0.0);
        assert_eq!(tight.fade_in, 0.0);
        assert_eq!(tight.fade_out, 0.0);
    }

    #[test]
    fn oversized_overlap_is_clamped_to_chunk() {
        let envelope = SegmentEnvelope::compute(0.5, 1.0, 0.5, 4.0);
        assert!((envelope.overlap() - 0.5).abs() < 1e-12);
        assert!(envelope.overlap() <= envelope.duration);
    }

    #[test]
    fn gain_curve_follows_fades() {
        let envelope = SegmentEnvelope::compute(1.0, 1.0, 0.5, 0.5);
        let curve = envelope.gain_curve();
        assert_eq!(curve.value_at(0.0), 0.0);
        assert!((curve.value_at(0.125) - 0.5).abs() < 1e-6);
        assert_eq!(curve.value_at(0.5), 1.0);
        assert!((curve.value_at(0.875) - 0.5).abs() < 1e-6);
        assert_eq!(curve.value_at(1.0), 0.0);
    }

    #[test]
    fn flat_curve_without_fades() {
        let curve = SegmentEnvelope::compute(1.0, 1.0, 1.0, 0.0).gain_curve();
        assert_eq!(curve.value_at(0.0), 1.0);
        assert_eq!(curve.value_at(0.999), 1.0);
        assert_eq!(curve.value_at(1.0), 0.0);
    }
}
