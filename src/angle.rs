// angle.rs — longitude wraparound and angular point-in-polygon

/// Distance under which a query point is treated as lying on a polygon edge.
pub const EDGE_EPSILON: f32 = 1.0e-4;

/// Maps any angle in degrees to `[0, 360)`. Wraps, never clamps.
#[inline]
pub fn normalize_360(x: f32) -> f32 {
    let r = x.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Signed difference `b - a` remapped into `(-180, 180]`.
///
/// 359° and 1° are 2° apart, not 358°.
#[inline]
pub fn shortest_delta(a: f32, b: f32) -> f32 {
    let d = normalize_360(b - a);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Crossing-number test on an already unwrapped polygon (x = pan, y = tilt).
///
/// Edges use the half-open rule: an edge is counted when `y` lies in
/// `[y_min, y_max)` of that edge, so horizontal edges never count and shared
/// vertices are not counted twice. Points on an edge are inside.
pub fn point_in_polygon(polygon: &[[f32; 2]], x: f32, y: f32) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];

        if on_segment([xi, yi], [xj, yj], x, y) {
            return true;
        }

        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: [f32; 2], b: [f32; 2], x: f32, y: f32) -> bool {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return (x - a[0]).hypot(y - a[1]) <= EDGE_EPSILON;
    }
    let t = (((x - a[0]) * dx + (y - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    let (px, py) = (a[0] + t * dx, a[1] + t * dy);
    (x - px).hypot(y - py) <= EDGE_EPSILON
}

/// Linear interpolation of `t` in `[0, 1]`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
