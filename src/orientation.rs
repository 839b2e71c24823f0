// orientation.rs — pan / tilt / fov / north offset with verify and change hooks

use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use glam::Quat;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::angle::normalize_360;
use crate::projection::view_rotation;

/// A camera the orientation can drive. Implemented by the host.
pub trait Camera {
    fn set_rotation(&mut self, rotation: Quat);
    fn set_field_of_view(&mut self, fov: f32);
    fn is_orthographic(&self) -> bool {
        false
    }
}

/// Any transform that can be rotated instead of the camera (e.g. the panorama mesh).
pub trait Rotatable {
    fn set_rotation(&mut self, rotation: Quat);
}

/// Which transform `update_rotation` drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[default]
    RotateCamera,
    /// Rotate a designated object by the inverse rotation, camera stays put.
    RotateObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrientationField {
    LocalPan,
    Tilt,
    Fov,
    NorthPan,
}

impl OrientationField {
    pub const ALL: [OrientationField; 4] = [
        OrientationField::LocalPan,
        OrientationField::Tilt,
        OrientationField::Fov,
        OrientationField::NorthPan,
    ];

    fn index(self) -> usize {
        match self {
            OrientationField::LocalPan => 0,
            OrientationField::Tilt => 1,
            OrientationField::Fov => 2,
            OrientationField::NorthPan => 3,
        }
    }

    fn wraps(self) -> bool {
        matches!(self, OrientationField::LocalPan | OrientationField::NorthPan)
    }

    fn affects_rotation(self) -> bool {
        !matches!(self, OrientationField::NorthPan)
    }
}

/// Receives the proposed raw value and returns the value to store.
pub type VerifyHook = Box<dyn FnMut(f32) -> f32>;
/// Receives the value that was stored.
pub type ChangedHook = Box<dyn FnMut(f32)>;

#[derive(Default)]
struct FieldHooks {
    verify: Option<VerifyHook>,
    changed: Option<ChangedHook>,
}

/// Viewing direction of one panorama.
///
/// `local_pan` and `north_pan` are stored in `[0, 360)`. The semantic
/// `pan()` is `local_pan - north_pan` and is not normalized.
pub struct Orientation {
    local_pan: f32,
    tilt: f32,
    fov: f32,
    north_pan: f32,

    hooks: [FieldHooks; 4],

    rotation_mode: RotationMode,
    camera: Option<Weak<RefCell<dyn Camera>>>,
    object: Option<Weak<RefCell<dyn Rotatable>>>,

    started: bool,
    suppress_rotation: bool,
    rotation_updates: u64,
}

impl fmt::Debug for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orientation")
            .field("local_pan", &self.local_pan)
            .field("tilt", &self.tilt)
            .field("fov", &self.fov)
            .field("north_pan", &self.north_pan)
            .field("rotation_mode", &self.rotation_mode)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::new(0.0, 0.0, 60.0)
    }
}

impl Orientation {
    pub fn new(local_pan: f32, tilt: f32, fov: f32) -> Self {
        Self {
            local_pan: normalize_360(local_pan),
            tilt,
            fov,
            north_pan: 0.0,
            hooks: Default::default(),
            rotation_mode: RotationMode::default(),
            camera: None,
            object: None,
            started: false,
            suppress_rotation: false,
            rotation_updates: 0,
        }
    }

    pub fn local_pan(&self) -> f32 {
        self.local_pan
    }

    pub fn tilt(&self) -> f32 {
        self.tilt
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn north_pan(&self) -> f32 {
        self.north_pan
    }

    /// North-relative pan. Not normalized.
    pub fn pan(&self) -> f32 {
        self.local_pan - self.north_pan
    }

    pub fn get(&self, field: OrientationField) -> f32 {
        match field {
            OrientationField::LocalPan => self.local_pan,
            OrientationField::Tilt => self.tilt,
            OrientationField::Fov => self.fov,
            OrientationField::NorthPan => self.north_pan,
        }
    }

    pub fn set_local_pan(&mut self, value: f32) -> bool {
        self.write(OrientationField::LocalPan, value)
    }

    pub fn set_tilt(&mut self, value: f32) -> bool {
        self.write(OrientationField::Tilt, value)
    }

    pub fn set_fov(&mut self, value: f32) -> bool {
        self.write(OrientationField::Fov, value)
    }

    pub fn set_north_pan(&mut self, value: f32) -> bool {
        self.write(OrientationField::NorthPan, value)
    }

    /// Writes the north-relative pan: `local_pan = value + north_pan`.
    pub fn set_pan(&mut self, value: f32) -> bool {
        self.set_local_pan(value + self.north_pan)
    }

    pub fn set(&mut self, field: OrientationField, value: f32) -> bool {
        self.write(field, value)
    }

    /// Sets pan and tilt together and applies the rotation once.
    pub fn look_at(&mut self, pan: f32, tilt: f32) {
        let was_suppressed = self.suppress_rotation;
        self.suppress_rotation = true;
        self.set_pan(pan);
        self.set_tilt(tilt);
        self.suppress_rotation = was_suppressed;
        self.update_rotation();
    }

    pub fn set_verify(&mut self, field: OrientationField, hook: impl FnMut(f32) -> f32 + 'static) {
        self.hooks[field.index()].verify = Some(Box::new(hook));
    }

    pub fn clear_verify(&mut self, field: OrientationField) {
        self.hooks[field.index()].verify = None;
    }

    pub fn set_on_changed(&mut self, field: OrientationField, hook: impl FnMut(f32) + 'static) {
        self.hooks[field.index()].changed = Some(Box::new(hook));
    }

    pub fn clear_on_changed(&mut self, field: OrientationField) {
        self.hooks[field.index()].changed = None;
    }

    fn write(&mut self, field: OrientationField, value: f32) -> bool {
        let current = self.get(field);
        if value == current {
            return false;
        }
        if !value.is_finite() {
            warn!("rejecting non-finite {field:?} value {value}");
            return false;
        }

        let mut next = value;
        if let Some(verify) = self.hooks[field.index()].verify.as_mut() {
            match catch_unwind(AssertUnwindSafe(|| verify(value))) {
                Ok(v) => next = v,
                Err(_) => {
                    error!("verify hook for {field:?} panicked, keeping {current}");
                    return false;
                }
            }
        }
        if field.wraps() {
            next = normalize_360(next);
        }
        if !next.is_finite() || next == current {
            return false;
        }

        match field {
            OrientationField::LocalPan => self.local_pan = next,
            OrientationField::Tilt => self.tilt = next,
            OrientationField::Fov => self.fov = next,
            OrientationField::NorthPan => self.north_pan = next,
        }

        if let Some(changed) = self.hooks[field.index()].changed.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| changed(next))).is_err() {
                error!("changed hook for {field:?} panicked");
            }
        }

        if field.affects_rotation() {
            self.update_rotation();
        }
        true
    }

    // ---- rotation application ----

    pub fn rotation_mode(&self) -> RotationMode {
        self.rotation_mode
    }

    pub fn set_rotation_mode(&mut self, mode: RotationMode) {
        if self.rotation_mode != mode {
            self.rotation_mode = mode;
            self.update_rotation();
        }
    }

    pub fn set_camera<C: Camera + 'static>(&mut self, camera: &Rc<RefCell<C>>) {
        let camera: Rc<RefCell<dyn Camera>> = camera.clone();
        self.camera = Some(Rc::downgrade(&camera));
        self.update_rotation();
    }

    pub fn set_object<R: Rotatable + 'static>(&mut self, object: &Rc<RefCell<R>>) {
        let object: Rc<RefCell<dyn Rotatable>> = object.clone();
        self.object = Some(Rc::downgrade(&object));
        self.update_rotation();
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Enables rotation application and applies the current state.
    pub fn start(&mut self) {
        self.started = true;
        self.update_rotation();
    }

    pub fn stop(&mut self) {
        self.started = false;
    }

    /// Camera-space rotation for the current local pan and tilt.
    pub fn rotation(&self) -> Quat {
        view_rotation(self.local_pan, self.tilt)
    }

    /// How many times a rotation actually reached a camera or object.
    pub fn rotation_updates(&self) -> u64 {
        self.rotation_updates
    }

    /// Pushes the orientation to the camera or object. Idempotent.
    ///
    /// Returns false when nothing was applied: not started, inside `look_at`,
    /// or the target is gone or busy. The next call retries.
    pub fn update_rotation(&mut self) -> bool {
        if !self.started || self.suppress_rotation {
            return false;
        }

        let rotation = self.rotation();
        let applied = match self.rotation_mode {
            RotationMode::RotateCamera => {
                let Some(camera) = self.camera.as_ref().and_then(Weak::upgrade) else {
                    debug!("no camera to rotate");
                    return false;
                };
                let Ok(mut camera) = camera.try_borrow_mut() else {
                    return false;
                };
                camera.set_rotation(rotation);
                if !camera.is_orthographic() {
                    camera.set_field_of_view(self.fov);
                }
                true
            }
            RotationMode::RotateObject => {
                let Some(object) = self.object.as_ref().and_then(Weak::upgrade) else {
                    debug!("no object to rotate");
                    return false;
                };
                let Ok(mut object) = object.try_borrow_mut() else {
                    return false;
                };
                object.set_rotation(rotation.inverse());
                true
            }
        };

        if applied {
            self.rotation_updates += 1;
        }
        applied
    }
}
