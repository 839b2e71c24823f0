// scene.rs — the explicit context: panoramas, overlays, active view, events

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use glam::Vec2;
use log::{debug, info};

use crate::events::{EventBus, PanoramaEvent};
use crate::hot_area::{HotAreaId, HotAreaIndex};
use crate::limits::OrientationLimits;
use crate::orientation::{Camera, Orientation, Rotatable};
use crate::projection::Projector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanoramaId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(pub u32);

/// Anything a transition can animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementRef {
    Panorama(PanoramaId),
    Overlay(OverlayId),
}

pub struct Panorama {
    pub name: String,
    pub image: PathBuf,
    pub orientation: Orientation,
    pub limits: OrientationLimits,
    pub hot_areas: HotAreaIndex,
    /// View the panorama opens with: north-relative pan, tilt, fov.
    pub home: [f32; 3],
}

impl Panorama {
    pub fn new(name: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            orientation: Orientation::default(),
            limits: OrientationLimits::default(),
            hot_areas: HotAreaIndex::new(),
            home: [0.0, 0.0, 60.0],
        }
    }

    /// Replaces the limits and installs them on the orientation.
    pub fn set_limits(&mut self, limits: OrientationLimits) {
        self.limits = limits;
        limits.install(&mut self.orientation);
    }
}

/// Full-screen colour wash driven by fade transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub color: [f32; 3],
    pub alpha: f32,
}

impl Overlay {
    pub fn new(color: [f32; 3]) -> Self {
        Self { color, alpha: 0.0 }
    }
}

#[derive(Default)]
pub struct Scene {
    panoramas: Vec<Panorama>,
    overlays: BTreeMap<OverlayId, Overlay>,
    next_overlay: u32,
    active: Option<PanoramaId>,
    hovered: Option<HotAreaId>,
    events: EventBus,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- panoramas ----

    pub fn add_panorama(&mut self, panorama: Panorama) -> PanoramaId {
        self.panoramas.push(panorama);
        PanoramaId(self.panoramas.len() - 1)
    }

    pub fn panorama(&self, id: PanoramaId) -> Option<&Panorama> {
        self.panoramas.get(id.0)
    }

    pub fn panorama_mut(&mut self, id: PanoramaId) -> Option<&mut Panorama> {
        self.panoramas.get_mut(id.0)
    }

    pub fn panoramas(&self) -> impl Iterator<Item = (PanoramaId, &Panorama)> {
        self.panoramas.iter().enumerate().map(|(i, p)| (PanoramaId(i), p))
    }

    pub fn find_panorama(&self, name: &str) -> Option<PanoramaId> {
        self.panoramas.iter().position(|p| p.name == name).map(PanoramaId)
    }

    pub fn orientation(&self, id: PanoramaId) -> Option<&Orientation> {
        self.panorama(id).map(|p| &p.orientation)
    }

    pub fn orientation_mut(&mut self, id: PanoramaId) -> Option<&mut Orientation> {
        self.panorama_mut(id).map(|p| &mut p.orientation)
    }

    /// Points every panorama at the same host camera.
    pub fn attach_camera<C: Camera + 'static>(&mut self, camera: &Rc<RefCell<C>>) {
        for panorama in &mut self.panoramas {
            panorama.orientation.set_camera(camera);
        }
    }

    /// Object rotated by panoramas in `RotateObject` mode.
    pub fn attach_object<R: Rotatable + 'static>(&mut self, object: &Rc<RefCell<R>>) {
        for panorama in &mut self.panoramas {
            panorama.orientation.set_object(object);
        }
    }

    // ---- active panorama ----

    pub fn active(&self) -> Option<PanoramaId> {
        self.active
    }

    pub fn active_panorama(&self) -> Option<&Panorama> {
        self.active.and_then(|id| self.panorama(id))
    }

    pub fn active_panorama_mut(&mut self) -> Option<&mut Panorama> {
        let id = self.active?;
        self.panorama_mut(id)
    }

    /// Switches the active panorama: stops the old orientation, starts the new one.
    pub fn activate(&mut self, id: PanoramaId) -> bool {
        if self.panorama(id).is_none() || self.active == Some(id) {
            return false;
        }
        // exit is reported against the panorama being left
        self.set_hovered(None);
        let from = self.active.replace(id);

        if let Some(previous) = from.and_then(|p| self.orientation_mut(p)) {
            previous.stop();
        }
        if let Some(panorama) = self.panorama_mut(id) {
            info!("activating panorama {:?}", panorama.name);
            panorama.orientation.start();
        }
        self.events.emit(PanoramaEvent::ActivePanoramaChanged { from, to: id });
        true
    }

    // ---- overlays ----

    pub fn add_overlay(&mut self, overlay: Overlay) -> OverlayId {
        let id = OverlayId(self.next_overlay);
        self.next_overlay += 1;
        self.overlays.insert(id, overlay);
        id
    }

    pub fn overlay(&self, id: OverlayId) -> Option<&Overlay> {
        self.overlays.get(&id)
    }

    pub fn overlay_mut(&mut self, id: OverlayId) -> Option<&mut Overlay> {
        self.overlays.get_mut(&id)
    }

    pub fn overlays(&self) -> impl Iterator<Item = (OverlayId, &Overlay)> {
        self.overlays.iter().map(|(id, o)| (*id, o))
    }

    pub fn release_overlay(&mut self, id: OverlayId) -> bool {
        if self.overlays.remove(&id).is_none() {
            return false;
        }
        debug!("overlay {id:?} released");
        self.events.emit(PanoramaEvent::OverlayReleased(id));
        true
    }

    pub fn contains(&self, element: ElementRef) -> bool {
        match element {
            ElementRef::Panorama(id) => self.panorama(id).is_some(),
            ElementRef::Overlay(id) => self.overlay(id).is_some(),
        }
    }

    // ---- input / hot areas ----

    pub fn hovered(&self) -> Option<HotAreaId> {
        self.hovered
    }

    /// Resolves this tick's pointer against the active panorama's hot areas.
    pub fn update_pointer(&mut self, pointer: Option<Vec2>, projector: &dyn Projector) -> Option<HotAreaId> {
        let hit = match (pointer, self.active_panorama()) {
            (Some(screen), Some(panorama)) => panorama
                .hot_areas
                .query_screen(screen, projector, panorama.orientation.north_pan())
                .map(|area| area.id),
            _ => None,
        };
        self.set_hovered(hit);
        hit
    }

    fn set_hovered(&mut self, hit: Option<HotAreaId>) {
        if hit == self.hovered {
            return;
        }
        let Some(panorama) = self.active else {
            self.hovered = None;
            return;
        };
        if let Some(area) = self.hovered.take() {
            self.events.emit(PanoramaEvent::HotAreaExited { panorama, area });
        }
        if let Some(area) = hit {
            self.events.emit(PanoramaEvent::HotAreaEntered { panorama, area });
        }
        self.hovered = hit;
    }

    /// Applies queued hot-area changes. Call between ticks.
    pub fn flush_hot_areas(&mut self) {
        for panorama in &mut self.panoramas {
            if panorama.hot_areas.has_pending() {
                panorama.hot_areas.flush();
            }
        }
    }

    // ---- events ----

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn emit(&mut self, event: PanoramaEvent) {
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hot_area::{AngularPolygon, HotAreaAction};
    use crate::projection::{ProjectionMode, ViewProjection};

    fn two_rooms() -> (Scene, PanoramaId, PanoramaId) {
        let mut scene = Scene::new();
        let a = scene.add_panorama(Panorama::new("a", "a.jpg"));
        let b = scene.add_panorama(Panorama::new("b", "b.jpg"));
        (scene, a, b)
    }

    #[test]
    fn activate_starts_new_and_stops_old() {
        let (mut scene, a, b) = two_rooms();
        assert!(scene.activate(a));
        assert!(!scene.activate(a));
        assert!(scene.activate(b));
        assert!(!scene.orientation(a).unwrap().is_started());
        assert!(scene.orientation(b).unwrap().is_started());
        assert_eq!(
            scene.events_mut().poll(),
            vec![
                PanoramaEvent::ActivePanoramaChanged { from: None, to: a },
                PanoramaEvent::ActivePanoramaChanged { from: Some(a), to: b },
            ]
        );
    }

    #[test]
    fn unknown_panorama_is_not_activated() {
        let (mut scene, _, _) = two_rooms();
        assert!(!scene.activate(PanoramaId(9)));
        assert_eq!(scene.active(), None);
    }

    #[test]
    fn released_overlay_is_announced() {
        let mut scene = Scene::new();
        let o = scene.add_overlay(Overlay::new([1.0, 1.0, 1.0]));
        assert!(scene.contains(ElementRef::Overlay(o)));
        assert!(scene.release_overlay(o));
        assert!(!scene.release_overlay(o));
        assert_eq!(scene.events_mut().poll(), vec![PanoramaEvent::OverlayReleased(o)]);
    }

    #[test]
    fn pointer_enters_and_leaves_hot_area() {
        let (mut scene, a, _) = two_rooms();
        let door = {
            let panorama = scene.panorama_mut(a).unwrap();
            panorama.orientation.set_north_pan(30.0);
            panorama.hot_areas.add(
                "door",
                AngularPolygon::new(vec![[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0]]),
                HotAreaAction::None,
            )
        };
        scene.flush_hot_areas();
        scene.activate(a);
        scene.events_mut().poll();

        // looking at local pan 30 == north-relative pan 0
        let view = ViewProjection {
            mode: ProjectionMode::Rectilinear,
            local_pan: 30.0,
            tilt: 0.0,
            fov: 90.0,
            viewport: Vec2::new(800.0, 800.0),
        };
        assert_eq!(scene.update_pointer(Some(Vec2::new(400.0, 400.0)), &view), Some(door));
        assert_eq!(scene.update_pointer(Some(Vec2::new(400.0, 400.0)), &view), Some(door));
        assert_eq!(scene.update_pointer(Some(Vec2::new(790.0, 400.0)), &view), None);
        assert_eq!(
            scene.events_mut().poll(),
            vec![
                PanoramaEvent::HotAreaEntered { panorama: a, area: door },
                PanoramaEvent::HotAreaExited { panorama: a, area: door },
            ]
        );
    }
}
