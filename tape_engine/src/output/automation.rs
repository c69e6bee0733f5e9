/// A scalar parameter automated with linear ramps between breakpoints.
///
/// Each ramp runs from the previous breakpoint to its own `(time, value)`.
#[derive(Debug, Clone)]
pub struct AutomationLane {
    points: Vec<(f64, f32)>,
}

impl AutomationLane {
    pub fn new(initial: f32) -> Self {
        Self::with_capacity(initial, 256)
    }

    pub fn with_capacity(initial: f32, capacity: usize) -> Self {
        let mut points = Vec::with_capacity(capacity.max(1));
        points.push((0.0, initial));
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value of the lane at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let idx = self.points.partition_point(|&(t, _)| t <= time);
        if idx == 0 {
            return self.points[0].1;
        }
        let (t0, v0) = self.points[idx - 1];
        match self.points.get(idx) {
            Some(&(t1, v1)) if t1 > t0 => {
                let frac = ((time - t0) / (t1 - t0)) as f32;
                v0 + (v1 - v0) * frac
            }
            _ => v0,
        }
    }

    /// Ramp linearly from the preceding breakpoint to `value` at `end_time`.
    pub fn ramp_to(&mut self, value: f32, end_time: f64) {
        let idx = self.points.partition_point(|&(t, _)| t <= end_time);
        self.points.insert(idx, (end_time, value));
    }

    /// Drop every breakpoint at or after `time`, holding the value the lane
    /// had at that moment.
    pub fn cancel_from(&mut self, time: f64) {
        let held = self.value_at(time);
        let keep = self.points.partition_point(|&(t, _)| t < time);
        self.points.truncate(keep.max(1));
        if self.points[0].0 >= time {
            self.points[0] = (time, held);
        } else {
            self.points.push((time, held));
        }
    }

    /// Forget breakpoints that can no longer affect values at or after `time`.
    pub fn prune_before(&mut self, time: f64) {
        let idx = self.points.partition_point(|&(t, _)| t <= time);
        if idx > 1 {
            self.points.drain(..idx - 1);
        }
    }

    pub fn breakpoints(&self) -> &[(f64, f32)] {
        &self.points
    }
}
