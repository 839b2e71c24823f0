// projection.rs — screen <-> angle mapping for every supported projection
//
// Mirrors shader_equirect.wgsl. View space: +Z forward, +Y up, +X right.

use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::angle::{normalize_360, shortest_delta};

/// Renderer-side contract used by hit testing and screen-space effects.
/// Pans are local (mesh) pans, screen points are physical pixels from the
/// top-left corner.
pub trait Projector {
    /// `None` when the direction cannot be shown (e.g. behind a rectilinear camera).
    fn screen_position_for_angle(&self, pan: f32, tilt: f32) -> Option<Vec2>;
    /// `None` when the pixel does not map onto the sphere.
    fn angle_for_screen_position(&self, screen: Vec2) -> Option<(f32, f32)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionMode {
    /// Standard perspective, straight lines stay straight.
    #[default]
    Rectilinear,
    /// Equidistant fisheye.
    Equidistant,
    /// Little-planet look.
    Stereographic,
    /// Verticals straight, horizontal compression.
    Pannini,
    /// The source image laid out flat.
    Equirectangular,
    /// Rectilinear with a shifted lens instead of tilting.
    Architectural,
}

impl ProjectionMode {
    pub const ALL: [ProjectionMode; 6] = [
        ProjectionMode::Rectilinear,
        ProjectionMode::Equidistant,
        ProjectionMode::Stereographic,
        ProjectionMode::Pannini,
        ProjectionMode::Equirectangular,
        ProjectionMode::Architectural,
    ];

    /// Field of view range the projection can display.
    pub fn fov_range(self) -> (f32, f32) {
        let min = if self == ProjectionMode::Stereographic { 10.0 } else { 5.0 };
        let max = match self {
            ProjectionMode::Rectilinear | ProjectionMode::Pannini | ProjectionMode::Architectural => 179.9,
            _ => 180.0,
        };
        (min, max)
    }

    /// Mode index understood by the shader.
    pub fn shader_index(self) -> u32 {
        match self {
            ProjectionMode::Rectilinear => 0,
            ProjectionMode::Equidistant => 1,
            ProjectionMode::Stereographic => 2,
            ProjectionMode::Pannini => 3,
            ProjectionMode::Equirectangular => 4,
            ProjectionMode::Architectural => 5,
        }
    }

    /// Fov the shader can evaluate without hitting tan(90°).
    pub fn safe_fov(self, fov: f32) -> f32 {
        match self {
            ProjectionMode::Rectilinear | ProjectionMode::Pannini | ProjectionMode::Architectural => {
                fov.clamp(1.0, 179.9)
            }
            _ => fov.clamp(1.0, 180.0),
        }
    }
}

/// Rotation taking view space to panorama space.
pub fn view_rotation(local_pan: f32, tilt: f32) -> Quat {
    Quat::from_rotation_y(local_pan.to_radians()) * Quat::from_rotation_x(-tilt.to_radians())
}

pub fn direction_from_angles(pan: f32, tilt: f32) -> Vec3 {
    let (p, t) = (pan.to_radians(), tilt.to_radians());
    Vec3::new(p.sin() * t.cos(), t.sin(), p.cos() * t.cos())
}

/// Local pan in `[0, 360)` and tilt of a direction.
pub fn angles_from_direction(dir: Vec3) -> (f32, f32) {
    let dir = dir.normalize_or_zero();
    let pan = dir.x.atan2(dir.z).to_degrees();
    let tilt = dir.y.clamp(-1.0, 1.0).asin().to_degrees();
    (normalize_360(pan), tilt)
}

/// Snapshot of what the renderer shows this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub mode: ProjectionMode,
    pub local_pan: f32,
    pub tilt: f32,
    pub fov: f32,
    pub viewport: Vec2,
}

impl ViewProjection {
    fn aspect(&self) -> f32 {
        self.viewport.x / self.viewport.y
    }

    fn half_fov(&self) -> f32 {
        (self.mode.safe_fov(self.fov) * 0.5).to_radians()
    }

    fn safe_tilt(&self) -> f32 {
        self.tilt.clamp(-89.9, 89.9)
    }

    fn to_ndc(&self, screen: Vec2) -> Vec2 {
        Vec2::new(screen.x / self.viewport.x * 2.0 - 1.0, 1.0 - screen.y / self.viewport.y * 2.0)
    }

    fn to_screen(&self, ndc: Vec2) -> Vec2 {
        Vec2::new((ndc.x + 1.0) * 0.5 * self.viewport.x, (1.0 - ndc.y) * 0.5 * self.viewport.y)
    }

    fn has_viewport(&self) -> bool {
        self.viewport.x > 0.0 && self.viewport.y > 0.0
    }

    /// View-space direction for a point in normalized device coordinates.
    fn view_direction(&self, ndc: Vec2) -> Option<Vec3> {
        let aspect = self.aspect();
        let half = self.half_fov();
        let t = half.tan();
        let p = Vec2::new(ndc.x * aspect, ndc.y);

        let radial = |angle: f32| {
            let r = p.length();
            if r < 1e-6 {
                Vec3::Z
            } else {
                let s = angle.sin() / r;
                Vec3::new(p.x * s, p.y * s, angle.cos())
            }
        };

        let dir = match self.mode {
            ProjectionMode::Rectilinear => Vec3::new(p.x * t, p.y * t, 1.0),
            ProjectionMode::Equidistant => {
                let angle = p.length() * half;
                if angle > std::f32::consts::PI {
                    return None;
                }
                radial(angle)
            }
            ProjectionMode::Stereographic => radial(2.0 * (p.length() * (half * 0.5).tan()).atan()),
            ProjectionMode::Pannini => {
                let (x, y) = (p.x * t, p.y * t);
                let k = x * x * 0.25;
                let cos_phi = (1.0 - k) / (1.0 + k);
                let s = 2.0 / (1.0 + cos_phi);
                Vec3::new(x / s, y / s, cos_phi)
            }
            ProjectionMode::Architectural => {
                Vec3::new(p.x * t, p.y * t + self.safe_tilt().to_radians().tan(), 1.0)
            }
            ProjectionMode::Equirectangular => return None,
        };
        Some(dir.normalize())
    }

    fn ndc_for_view_direction(&self, v: Vec3) -> Option<Vec2> {
        let aspect = self.aspect();
        let half = self.half_fov();
        let t = half.tan();

        let radial = |r: f32| {
            let lxy = v.x.hypot(v.y);
            if lxy < 1e-6 {
                Vec2::ZERO
            } else {
                Vec2::new(v.x / lxy * r / aspect, v.y / lxy * r)
            }
        };

        let ndc = match self.mode {
            ProjectionMode::Rectilinear => {
                if v.z <= 1e-6 {
                    return None;
                }
                Vec2::new(v.x / v.z / (aspect * t), v.y / v.z / t)
            }
            ProjectionMode::Architectural => {
                if v.z <= 1e-6 {
                    return None;
                }
                let shift = self.safe_tilt().to_radians().tan();
                Vec2::new(v.x / v.z / (aspect * t), (v.y / v.z - shift) / t)
            }
            ProjectionMode::Equidistant => radial(v.z.clamp(-1.0, 1.0).acos() / half),
            ProjectionMode::Stereographic => {
                if v.z <= -1.0 + 1e-6 {
                    return None;
                }
                let angle = v.z.clamp(-1.0, 1.0).acos();
                radial((angle * 0.5).tan() / (half * 0.5).tan())
            }
            ProjectionMode::Pannini => {
                let phi = v.x.atan2(v.z);
                if phi.cos() <= -1.0 + 1e-4 {
                    return None;
                }
                let theta = v.y.atan2(v.x.hypot(v.z));
                let s = 2.0 / (1.0 + phi.cos());
                Vec2::new(s * phi.sin() / (aspect * t), s * theta.tan() / t)
            }
            ProjectionMode::Equirectangular => return None,
        };
        Some(ndc)
    }
}

impl Projector for ViewProjection {
    fn screen_position_for_angle(&self, pan: f32, tilt: f32) -> Option<Vec2> {
        if !self.has_viewport() {
            return None;
        }
        if self.mode == ProjectionMode::Equirectangular {
            let span = self.fov * 0.5;
            let ndc = Vec2::new(
                shortest_delta(self.local_pan, pan) / (self.aspect() * span),
                (tilt - self.tilt) / span,
            );
            return Some(self.to_screen(ndc));
        }

        let world = direction_from_angles(pan, tilt);
        let rotation = if self.mode == ProjectionMode::Architectural {
            view_rotation(self.local_pan, 0.0)
        } else {
            view_rotation(self.local_pan, self.tilt)
        };
        let view = rotation.inverse() * world;
        self.ndc_for_view_direction(view).map(|ndc| self.to_screen(ndc))
    }

    fn angle_for_screen_position(&self, screen: Vec2) -> Option<(f32, f32)> {
        if !self.has_viewport() {
            return None;
        }
        let ndc = self.to_ndc(screen);
        if self.mode == ProjectionMode::Equirectangular {
            let span = self.fov * 0.5;
            let pan = self.local_pan + ndc.x * self.aspect() * span;
            let tilt = self.tilt + ndc.y * span;
            if tilt.abs() > 90.0 {
                return None;
            }
            return Some((normalize_360(pan), tilt));
        }

        let view = self.view_direction(ndc)?;
        let rotation = if self.mode == ProjectionMode::Architectural {
            view_rotation(self.local_pan, 0.0)
        } else {
            view_rotation(self.local_pan, self.tilt)
        };
        Some(angles_from_direction(rotation * view))
    }
}
