// limits.rs — policy layer: clamps orientation through verify hooks

use serde::{Deserialize, Serialize};

use crate::angle::{normalize_360, shortest_delta};
use crate::orientation::{Orientation, OrientationField};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationLimits {
    /// Allowed local pan range, walked clockwise from `min` to `max`.
    pub pan: Option<[f32; 2]>,
    pub tilt: [f32; 2],
    pub fov: [f32; 2],
}

impl Default for OrientationLimits {
    fn default() -> Self {
        Self {
            pan: None,
            tilt: [-90.0, 90.0],
            fov: [5.0, 180.0],
        }
    }
}

impl OrientationLimits {
    /// Narrows the fov range, e.g. to what a projection can display.
    pub fn with_fov_range(mut self, min: f32, max: f32) -> Self {
        self.fov = [self.fov[0].max(min), self.fov[1].min(max)];
        if self.fov[0] > self.fov[1] {
            self.fov = [min, max];
        }
        self
    }

    /// Name of the first range that is non-finite or reversed. Pan ranges
    /// may wrap, so only their finiteness is checked.
    pub fn invalid_range(&self) -> Option<&'static str> {
        let ordered = |[min, max]: [f32; 2]| min.is_finite() && max.is_finite() && min <= max;
        if self.pan.is_some_and(|pan| !pan.iter().all(|v| v.is_finite())) {
            Some("pan")
        } else if !ordered(self.tilt) {
            Some("tilt")
        } else if !ordered(self.fov) {
            Some("fov")
        } else {
            None
        }
    }

    pub fn clamp_tilt(&self, tilt: f32) -> f32 {
        clamp_to(tilt, self.tilt)
    }

    pub fn clamp_fov(&self, fov: f32) -> f32 {
        clamp_to(fov, self.fov)
    }

    /// Keeps `pan` inside the range, snapping to the nearer bound.
    pub fn clamp_pan(&self, pan: f32) -> f32 {
        let Some([min, max]) = self.pan else {
            return pan;
        };
        let span = normalize_360(max - min);
        let offset = normalize_360(pan - min);
        if offset <= span {
            return pan;
        }
        if shortest_delta(pan, min).abs() <= shortest_delta(pan, max).abs() {
            min
        } else {
            max
        }
    }

    /// Installs the limits as verify hooks and re-clamps the current values.
    pub fn install(&self, orientation: &mut Orientation) {
        let limits = *self;
        orientation.set_verify(OrientationField::Tilt, move |v| limits.clamp_tilt(v));
        orientation.set_verify(OrientationField::Fov, move |v| limits.clamp_fov(v));
        if self.pan.is_some() {
            orientation.set_verify(OrientationField::LocalPan, move |v| limits.clamp_pan(v));
        } else {
            orientation.clear_verify(OrientationField::LocalPan);
        }

        let (pan, tilt, fov) = (orientation.local_pan(), orientation.tilt(), orientation.fov());
        orientation.set_local_pan(self.clamp_pan(pan));
        orientation.set_tilt(self.clamp_tilt(tilt));
        orientation.set_fov(self.clamp_fov(fov));
    }
}

/// Clamps into the range whichever way round its bounds are given.
fn clamp_to(value: f32, [a, b]: [f32; 2]) -> f32 {
    let (lo, hi) = (a.min(b), a.max(b));
    if lo.is_nan() {
        return value;
    }
    value.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilt_and_fov_are_clamped_through_setters() {
        let mut o = Orientation::new(0.0, 0.0, 60.0);
        OrientationLimits { pan: None, tilt: [-45.0, 45.0], fov: [20.0, 90.0] }.install(&mut o);
        o.set_tilt(80.0);
        o.set_fov(5.0);
        assert_eq!(o.tilt(), 45.0);
        assert_eq!(o.fov(), 20.0);
    }

    #[test]
    fn install_reclamps_current_values() {
        let mut o = Orientation::new(0.0, 70.0, 150.0);
        OrientationLimits { pan: None, tilt: [-30.0, 30.0], fov: [10.0, 100.0] }.install(&mut o);
        assert_eq!(o.tilt(), 30.0);
        assert_eq!(o.fov(), 100.0);
    }

    #[test]
    fn pan_range_across_seam() {
        let limits = OrientationLimits { pan: Some([300.0, 60.0]), ..Default::default() };
        assert_eq!(limits.clamp_pan(10.0), 10.0);
        assert_eq!(limits.clamp_pan(330.0), 330.0);
        assert_eq!(limits.clamp_pan(80.0), 60.0);
        assert_eq!(limits.clamp_pan(280.0), 300.0);
    }

    #[test]
    fn reversed_ranges_clamp_without_panicking() {
        let limits = OrientationLimits { pan: None, tilt: [45.0, -45.0], fov: [100.0, 20.0] };
        assert_eq!(limits.invalid_range(), Some("tilt"));
        assert_eq!(limits.clamp_tilt(80.0), 45.0);
        assert_eq!(limits.clamp_tilt(-80.0), -45.0);
        assert_eq!(limits.clamp_fov(5.0), 20.0);

        let mut o = Orientation::new(0.0, 70.0, 150.0);
        limits.install(&mut o);
        assert_eq!((o.tilt(), o.fov()), (45.0, 100.0));

        let nan = OrientationLimits { fov: [f32::NAN, f32::NAN], ..Default::default() };
        assert_eq!(nan.invalid_range(), Some("fov"));
        assert_eq!(nan.clamp_fov(60.0), 60.0);
        assert_eq!(OrientationLimits::default().invalid_range(), None);
    }

    #[test]
    fn fov_range_is_intersected() {
        let limits = OrientationLimits::default().with_fov_range(10.0, 179.9);
        assert_eq!(limits.fov, [10.0, 179.9]);
    }
}
