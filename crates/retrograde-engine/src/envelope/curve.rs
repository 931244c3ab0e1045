/// How a gain point is approached from the point before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ramp {
    /// Jump to the value at the point's time.
    Set,
    /// Interpolate linearly from the previous point.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainPoint {
    /// Seconds relative to the start of the segment.
    pub time: f64,
    pub value: f32,
    pub ramp: Ramp,
}

impl GainPoint {
    pub fn new(time: f64, value: f32, ramp: Ramp) -> Self {
        Self { time, value, ramp }
    }
}

/// Time-ordered gain automation for a single segment.
///
/// Points sharing a timestamp keep their insertion order, so a `Set`
/// following a ramp at the same instant takes effect after the ramp lands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainCurve {
    points: Vec<GainPoint>,
}

impl GainCurve {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[GainPoint] {
        &self.points
    }

    pub fn set_value_at(&mut self, time: f64, value: f32) {
        self.insert(GainPoint::new(time, value, Ramp::Set));
    }

    pub fn linear_ramp_to(&mut self, time: f64, value: f32) {
        self.insert(GainPoint::new(time, value, Ramp::Linear));
    }

    fn insert(&mut self, point: GainPoint) {
        let index = self.points.partition_point(|existing| existing.time <= point.time);
        self.points.insert(index, point);
    }

    /// Gain at `time` seconds after the segment start.
    pub fn value_at(&self, time: f64) -> f32 {
        let Some(first) = self.points.first() else {
            return 1.0;
        };
        let index = self.points.partition_point(|point| point.time <= time);
        if index == 0 {
            return match first.ramp {
                Ramp::Linear if first.time > 0.0 && time >= 0.0 => {
                    let t = (time / first.time).clamp(0.0, 1.0) as f32;
                    1.0 + (first.value - 1.0) * t
                }
                _ => 1.0,
            };
        }

        let prev = &self.points[index - 1];
        let Some(next) = self.points.get(index) else {
            return prev.value;
        };
        match next.ramp {
            Ramp::Set => prev.value,
            Ramp::Linear => {
                let span = next.time - prev.time;
                if span <= 0.0 {
                    return next.value;
                }
                let t = ((time - prev.time) / span).clamp(0.0, 1.0) as f32;
                prev.value + (next.value - prev.value) * t
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_points_sorted_and_stable() {
        let mut curve = GainCurve::new();
        curve.set_value_at(1.0, 0.0);
        curve.set_value_at(0.0, 1.0);
        curve.linear_ramp_to(0.5, 0.5);
        curve.set_value_at(0.5, 0.25);
        let times: Vec<_> = curve.points().iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.0, 0.5, 0.5, 1.0]);
        assert_eq!(curve.points()[1].ramp, Ramp::Linear);
        assert_eq!(curve.points()[2].value, 0.25);
    }

    #[test]
    fn linear_interpolation() {
        let mut curve = GainCurve::new();
        curve.set_value_at(0.0, 0.0);
        curve.linear_ramp_to(1.0, 1.0);
        assert!((curve.value_at(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(curve.value_at(1.0), 1.0);
        assert_eq!(curve.value_at(3.0), 1.0);
    }

    #[test]
    fn set_holds_until_next_point() {
        let mut curve = GainCurve::new();
        curve.set_value_at(0.0, 0.25);
        curve.set_value_at(1.0, 0.75);
        assert_eq!(curve.value_at(0.99), 0.25);
        assert_eq!(curve.value_at(1.0), 0.75);
    }

    #[test]
    fn empty_curve_is_unity() {
        assert_eq!(GainCurve::new().value_at(0.3), 1.0);
    }
}
