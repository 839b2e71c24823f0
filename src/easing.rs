// easing.rs — curves mapping linear progress to curved progress

use serde::{Deserialize, Serialize};

use crate::angle::lerp;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    SmoothStep,
    /// Piecewise-linear `[time, value]` pairs, sorted by time.
    Keyframes(Vec<[f32; 2]>),
}

impl Curve {
    /// Curved progress for `t`, clamped to `[0, 1]` first.
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Curve::Linear => t,
            Curve::EaseIn => t * t,
            Curve::EaseOut => t * (2.0 - t),
            Curve::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Curve::SmoothStep => t * t * (3.0 - 2.0 * t),
            Curve::Keyframes(keys) => evaluate_keys(keys, t),
        }
    }
}

fn evaluate_keys(keys: &[[f32; 2]], t: f32) -> f32 {
    let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
        return t;
    };
    if t <= first[0] {
        return first[1];
    }
    if t >= last[0] {
        return last[1];
    }
    for pair in keys.windows(2) {
        let ([t0, v0], [t1, v1]) = (pair[0], pair[1]);
        if t >= t0 && t <= t1 {
            let span = t1 - t0;
            if span <= 0.0 {
                return v1;
            }
            return lerp(v0, v1, (t - t0) / span);
        }
    }
    last[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curves_hit_endpoints() {
        for curve in [Curve::Linear, Curve::EaseIn, Curve::EaseOut, Curve::EaseInOut, Curve::SmoothStep] {
            assert_eq!(curve.evaluate(0.0), 0.0, "{curve:?}");
            assert!((curve.evaluate(1.0) - 1.0).abs() < 1e-6, "{curve:?}");
        }
    }

    #[test]
    fn ease_in_starts_slow() {
        assert!(Curve::EaseIn.evaluate(0.25) < 0.25);
        assert!(Curve::EaseOut.evaluate(0.25) > 0.25);
        assert_eq!(Curve::EaseInOut.evaluate(0.5), 0.5);
    }

    #[test]
    fn out_of_range_input_is_clamped() {
        assert_eq!(Curve::Linear.evaluate(3.0), 1.0);
        assert_eq!(Curve::Linear.evaluate(-1.0), 0.0);
        assert_eq!(Curve::SmoothStep.evaluate(f32::NAN), 1.0);
    }

    #[test]
    fn keyframes_interpolate() {
        let curve = Curve::Keyframes(vec![[0.0, 0.0], [0.5, 0.8], [1.0, 1.0]]);
        assert!((curve.evaluate(0.25) - 0.4).abs() < 1e-6);
        assert!((curve.evaluate(0.75) - 0.9).abs() < 1e-6);
        assert_eq!(Curve::Keyframes(Vec::new()).evaluate(0.3), 0.3);
    }

    #[test]
    fn curve_names_in_json() {
        let curve: Curve = serde_json::from_str("\"ease_in_out\"").unwrap();
        assert_eq!(curve, Curve::EaseInOut);
    }
}
