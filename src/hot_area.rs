// hot_area.rs — angular polygons and the hot-area index

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::angle::{normalize_360, point_in_polygon, shortest_delta};
use crate::projection::Projector;

/// Bounding rectangle in unwrapped pan space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngularBounds {
    pub min_pan: f32,
    pub max_pan: f32,
    pub min_tilt: f32,
    pub max_tilt: f32,
}

impl AngularBounds {
    pub fn center(&self) -> [f32; 2] {
        [
            (self.min_pan + self.max_pan) * 0.5,
            (self.min_tilt + self.max_tilt) * 0.5,
        ]
    }

    fn contains(&self, pan: f32, tilt: f32) -> bool {
        pan >= self.min_pan && pan <= self.max_pan && tilt >= self.min_tilt && tilt <= self.max_tilt
    }
}

/// A polygon in (pan, tilt) degrees.
///
/// Raw vertices are only reachable through methods that rebuild the derived
/// data, so `contains` never runs against stale geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AngularPolygon {
    vertices: Vec<[f32; 2]>,
    unwrapped: Vec<[f32; 2]>,
    bounds: AngularBounds,
}

impl AngularPolygon {
    pub fn new(vertices: Vec<[f32; 2]>) -> Self {
        let mut polygon = Self { vertices, ..Default::default() };
        polygon.reinit();
        polygon
    }

    pub fn vertices(&self) -> &[[f32; 2]] {
        &self.vertices
    }

    /// Vertices with each pan shifted by a multiple of 360 so consecutive
    /// steps are at most 180 degrees.
    pub fn unwrapped(&self) -> &[[f32; 2]] {
        &self.unwrapped
    }

    pub fn bounds(&self) -> AngularBounds {
        self.bounds
    }

    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= 3
    }

    /// Center of the bounding rectangle, pan normalized to `[0, 360)`.
    pub fn center(&self) -> [f32; 2] {
        let [pan, tilt] = self.bounds.center();
        [normalize_360(pan), tilt]
    }

    pub fn set_vertices(&mut self, vertices: Vec<[f32; 2]>) {
        self.vertices = vertices;
        self.reinit();
    }

    pub fn push_vertex(&mut self, pan: f32, tilt: f32) {
        self.vertices.push([pan, tilt]);
        self.reinit();
    }

    pub fn translate(&mut self, d_pan: f32, d_tilt: f32) {
        for v in &mut self.vertices {
            v[0] += d_pan;
            v[1] += d_tilt;
        }
        self.reinit();
    }

    /// Rebuilds the unwrapped sequence and the bounds from the raw vertices.
    pub fn reinit(&mut self) {
        self.unwrapped.clear();
        self.bounds = AngularBounds::default();
        if !self.is_valid() {
            return;
        }

        let [first_pan, first_tilt] = self.vertices[0];
        let mut bounds = AngularBounds {
            min_pan: first_pan,
            max_pan: first_pan,
            min_tilt: first_tilt,
            max_tilt: first_tilt,
        };
        let mut prev = first_pan;
        self.unwrapped.push([first_pan, first_tilt]);

        for &[pan, tilt] in &self.vertices[1..] {
            let pan = prev + shortest_delta(prev, pan);
            bounds.min_pan = bounds.min_pan.min(pan);
            bounds.max_pan = bounds.max_pan.max(pan);
            bounds.min_tilt = bounds.min_tilt.min(tilt);
            bounds.max_tilt = bounds.max_tilt.max(tilt);
            self.unwrapped.push([pan, tilt]);
            prev = pan;
        }
        self.bounds = bounds;
    }

    pub fn contains(&self, pan: f32, tilt: f32) -> bool {
        if !self.is_valid() {
            return false;
        }
        let center = self.bounds.center()[0];
        let pan = center + shortest_delta(center, pan);
        if !self.bounds.contains(pan, tilt) {
            return false;
        }
        point_in_polygon(&self.unwrapped, pan, tilt)
    }
}

/// Follow-up action attached to a hot area.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotAreaAction {
    #[default]
    None,
    LookAt {
        pan: f32,
        tilt: f32,
        #[serde(default)]
        fov: Option<f32>,
    },
    SwitchTo {
        panorama: String,
        #[serde(default)]
        look_at: Option<[f32; 2]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HotAreaId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct HotArea {
    pub id: HotAreaId,
    pub name: String,
    pub polygon: AngularPolygon,
    pub action: HotAreaAction,
}

enum PendingChange {
    Add(HotArea),
    Remove(HotAreaId),
}

/// Registered hot areas of one panorama, queried first-match-wins.
///
/// Additions and removals are queued and applied by `flush`, which the
/// host calls at tick boundaries.
#[derive(Default)]
pub struct HotAreaIndex {
    areas: Vec<HotArea>,
    pending: Vec<PendingChange>,
    next_id: u32,
}

impl HotAreaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a new area; it becomes visible to queries after `flush`.
    pub fn add(&mut self, name: impl Into<String>, polygon: AngularPolygon, action: HotAreaAction) -> HotAreaId {
        let id = HotAreaId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        if !polygon.is_valid() {
            warn!("hot area {name:?} has fewer than 3 vertices and will never match");
        }
        self.pending.push(PendingChange::Add(HotArea { id, name, polygon, action }));
        id
    }

    pub fn remove(&mut self, id: HotAreaId) {
        self.pending.push(PendingChange::Remove(id));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Applies queued changes in the order they were made.
    pub fn flush(&mut self) {
        for change in self.pending.drain(..) {
            match change {
                PendingChange::Add(area) => {
                    debug!("hot area {:?} registered as {:?}", area.name, area.id);
                    self.areas.push(area);
                }
                PendingChange::Remove(id) => self.areas.retain(|a| a.id != id),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HotArea> {
        self.areas.iter()
    }

    pub fn get(&self, id: HotAreaId) -> Option<&HotArea> {
        self.areas.iter().find(|a| a.id == id)
    }

    /// Edits an area's polygon in place; the polygon rebuilds itself.
    pub fn polygon_mut(&mut self, id: HotAreaId) -> Option<&mut AngularPolygon> {
        self.areas.iter_mut().find(|a| a.id == id).map(|a| &mut a.polygon)
    }

    /// First registered area containing the point.
    pub fn query(&self, pan: f32, tilt: f32) -> Option<&HotArea> {
        self.areas.iter().find(|a| a.polygon.contains(pan, tilt))
    }

    /// Resolves a screen point. `north_pan` converts the projector's local
    /// pan to the north-relative pan the areas are defined in.
    pub fn query_screen(&self, screen: glam::Vec2, projector: &dyn Projector, north_pan: f32) -> Option<&HotArea> {
        let (local_pan, tilt) = projector.angle_for_screen_position(screen)?;
        self.query(local_pan - north_pan, tilt)
    }
}
