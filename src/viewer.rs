// viewer.rs — host camera, rotatable panorama and viewer settings

use glam::{EulerRot, Quat, Vec2};

use panorama_tour::{Camera, ProjectionMode, Rotatable, ViewProjection};

/// Camera driven by the active panorama's orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCamera {
    pub rotation: Quat,
    pub fov: f32,
}

impl Default for ViewCamera {
    fn default() -> Self {
        Self { rotation: Quat::IDENTITY, fov: 60.0 }
    }
}

impl Camera for ViewCamera {
    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    fn set_field_of_view(&mut self, fov: f32) {
        self.fov = fov;
    }
}

/// The panorama sphere itself, rotated instead of the camera in
/// `rotate_object` mode.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PanoramaMesh {
    pub rotation: Quat,
}

impl Rotatable for PanoramaMesh {
    fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }
}

/// Local pan and tilt (degrees) the renderer should show for a camera
/// looking at a possibly rotated mesh.
pub fn view_angles(camera: &ViewCamera, mesh: &PanoramaMesh) -> (f32, f32) {
    let view = mesh.rotation.inverse() * camera.rotation;
    let (yaw, pitch, _) = view.to_euler(EulerRot::YXZ);
    (yaw.to_degrees().rem_euclid(360.0), -pitch.to_degrees())
}

pub struct ViewerSettings {
    pub sensitivity_scale: f32,
    pub projection_mode: ProjectionMode,
    pub is_fullscreen: bool,
    pub show_fps: bool,
    pub show_hot_areas: bool,
    pub vsync_enabled: bool,
}

impl ViewerSettings {
    pub fn new(projection_mode: ProjectionMode, sensitivity_scale: f32) -> Self {
        Self {
            sensitivity_scale,
            projection_mode,
            is_fullscreen: false,
            show_fps: false,
            show_hot_areas: true,
            vsync_enabled: true,
        }
    }

    pub fn projection(&self, local_pan: f32, tilt: f32, fov: f32, viewport: Vec2) -> ViewProjection {
        ViewProjection { mode: self.projection_mode, local_pan, tilt, fov, viewport }
    }

    /// Degrees per pixel of drag, from the horizontal and vertical fov.
    pub fn drag_scale(&self, fov: f32, viewport: Vec2) -> Option<Vec2> {
        if viewport.x <= 0.0 || viewport.y <= 0.0 {
            return None;
        }
        let v_f = fov.to_radians();
        let aspect = viewport.x / viewport.y;
        let h_f = 2.0 * ((v_f / 2.0).tan() * aspect).atan();
        Some(Vec2::new(
            (h_f / viewport.x).to_degrees() * self.sensitivity_scale,
            (v_f / viewport.y).to_degrees() * self.sensitivity_scale,
        ))
    }
}
