// config.rs — tour file: panoramas, their hot areas and transition timing

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::hot_area::{AngularPolygon, HotAreaAction};
use crate::limits::OrientationLimits;
use crate::orientation::RotationMode;
use crate::scene::{Panorama, PanoramaId, Scene};
use crate::tour::TransitionSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourConfig {
    /// Panorama shown first; defaults to the first one listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default)]
    pub transition: TransitionSettings,
    pub panoramas: Vec<PanoramaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanoramaConfig {
    pub name: String,
    pub image: PathBuf,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub tilt: f32,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default)]
    pub north_pan: f32,
    #[serde(default)]
    pub rotation_mode: RotationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<OrientationLimits>,
    #[serde(default)]
    pub hot_areas: Vec<HotAreaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotAreaConfig {
    pub name: String,
    /// `[pan, tilt]` pairs, north-relative.
    pub vertices: Vec<[f32; 2]>,
    #[serde(default)]
    pub action: HotAreaAction,
}

fn default_fov() -> f32 {
    60.0
}

impl TourConfig {
    /// Reads and validates a tour; relative image paths resolve against
    /// the tour file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text)?;
        if let Some(base) = path.parent() {
            for panorama in &mut config.panoramas {
                if panorama.image.is_relative() {
                    panorama.image = base.join(&panorama.image);
                }
            }
        }
        info!("loaded tour {} ({} panoramas)", path.display(), config.panoramas.len());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// A one-panorama tour for a bare image.
    pub fn single_image(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "panorama".to_string());
        Self {
            start: None,
            transition: TransitionSettings::default(),
            panoramas: vec![PanoramaConfig {
                name,
                image: path.to_path_buf(),
                pan: 0.0,
                tilt: 0.0,
                fov: default_fov(),
                north_pan: 0.0,
                rotation_mode: RotationMode::default(),
                limits: None,
                hot_areas: Vec::new(),
            }],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panoramas.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut names = HashSet::new();
        for panorama in &self.panoramas {
            if !names.insert(panorama.name.as_str()) {
                return Err(ConfigError::DuplicatePanorama(panorama.name.clone()));
            }
            if let Some(field) = panorama.limits.as_ref().and_then(OrientationLimits::invalid_range) {
                return Err(ConfigError::InvalidLimits { panorama: panorama.name.clone(), field });
            }
        }

        let unknown = |name: &str, context: String| ConfigError::UnknownPanorama {
            name: name.to_string(),
            context,
        };
        if let Some(start) = &self.start {
            if !names.contains(start.as_str()) {
                return Err(unknown(start, "start".to_string()));
            }
        }
        for panorama in &self.panoramas {
            for area in &panorama.hot_areas {
                if let HotAreaAction::SwitchTo { panorama: target, .. } = &area.action {
                    if !names.contains(target.as_str()) {
                        return Err(unknown(target, format!("hot area {:?} of {:?}", area.name, panorama.name)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the scene and activates the start panorama.
    pub fn build_scene(&self) -> Result<Scene, ConfigError> {
        self.validate()?;
        let mut scene = Scene::new();
        for config in &self.panoramas {
            scene.add_panorama(config.build());
        }
        scene.flush_hot_areas();

        let start = match &self.start {
            Some(name) => scene.find_panorama(name).ok_or_else(|| ConfigError::UnknownPanorama {
                name: name.clone(),
                context: "start".to_string(),
            })?,
            None => PanoramaId(0),
        };
        scene.activate(start);
        Ok(scene)
    }
}

impl PanoramaConfig {
    fn build(&self) -> Panorama {
        let mut panorama = Panorama::new(self.name.clone(), self.image.clone());
        panorama.orientation.set_rotation_mode(self.rotation_mode);
        panorama.orientation.set_north_pan(self.north_pan);
        if let Some(limits) = self.limits {
            panorama.set_limits(limits);
        }
        panorama.orientation.look_at(self.pan, self.tilt);
        panorama.orientation.set_fov(self.fov);
        panorama.home = [self.pan, self.tilt, self.fov];

        for area in &self.hot_areas {
            panorama
                .hot_areas
                .add(area.name.clone(), AngularPolygon::new(area.vertices.clone()), area.action.clone());
        }
        panorama
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOUR: &str = r#"{
        "start": "garden",
        "transition": { "duration": 2.0, "curve": "smooth_step" },
        "panoramas": [
            {
                "name": "hall",
                "image": "hall.jpg",
                "pan": 30.0,
                "north_pan": 10.0,
                "limits": { "tilt": [-45.0, 45.0], "fov": [20.0, 100.0] },
                "hot_areas": [
                    {
                        "name": "door",
                        "vertices": [[-10.0, -5.0], [10.0, -5.0], [10.0, 5.0], [-10.0, 5.0]],
                        "action": { "switch_to": { "panorama": "garden" } }
                    },
                    { "name": "sign", "vertices": [[100.0, 0.0], [110.0, 0.0]] }
                ]
            },
            { "name": "garden", "image": "garden.jpg", "fov": 75.0, "rotation_mode": "rotate_object" }
        ]
    }"#;

    #[test]
    fn parses_defaults_and_actions() {
        let config = TourConfig::from_json(TOUR).unwrap();
        assert_eq!(config.transition.duration, 2.0);
        assert_eq!(config.transition.zoom_factor, 0.5);
        let hall = &config.panoramas[0];
        assert_eq!(hall.fov, 60.0);
        assert_eq!(hall.hot_areas[1].action, HotAreaAction::None);
        assert_eq!(
            hall.hot_areas[0].action,
            HotAreaAction::SwitchTo { panorama: "garden".into(), look_at: None }
        );
        assert_eq!(config.panoramas[1].rotation_mode, RotationMode::RotateObject);
    }

    #[test]
    fn builds_scene_with_start_and_north() {
        let scene = TourConfig::from_json(TOUR).unwrap().build_scene().unwrap();
        let hall = scene.find_panorama("hall").unwrap();
        let garden = scene.find_panorama("garden").unwrap();
        assert_eq!(scene.active(), Some(garden));

        let panorama = scene.panorama(hall).unwrap();
        assert_eq!(panorama.orientation.pan(), 30.0);
        assert_eq!(panorama.orientation.local_pan(), 40.0);
        assert_eq!(panorama.hot_areas.len(), 2);
        assert_eq!(panorama.hot_areas.query(0.0, 0.0).map(|a| a.name.as_str()), Some("door"));
        assert_eq!(scene.orientation(garden).unwrap().fov(), 75.0);
    }

    #[test]
    fn limits_are_installed() {
        let mut scene = TourConfig::from_json(TOUR).unwrap().build_scene().unwrap();
        let hall = scene.find_panorama("hall").unwrap();
        let orientation = scene.orientation_mut(hall).unwrap();
        orientation.set_tilt(80.0);
        orientation.set_fov(150.0);
        assert_eq!(orientation.tilt(), 45.0);
        assert_eq!(orientation.fov(), 100.0);
    }

    #[test]
    fn rejects_broken_tours() {
        assert!(matches!(TourConfig::from_json(r#"{"panoramas": []}"#), Err(ConfigError::Empty)));
        assert!(matches!(TourConfig::from_json("{"), Err(ConfigError::Parse(_))));

        let twice = r#"{"panoramas": [{"name": "a", "image": "a.jpg"}, {"name": "a", "image": "b.jpg"}]}"#;
        assert!(matches!(TourConfig::from_json(twice), Err(ConfigError::DuplicatePanorama(n)) if n == "a"));

        let dangling = r#"{"panoramas": [{"name": "a", "image": "a.jpg", "hot_areas": [
            {"name": "exit", "vertices": [[0,0],[1,0],[1,1]], "action": {"switch_to": {"panorama": "b"}}}
        ]}]}"#;
        assert!(matches!(
            TourConfig::from_json(dangling),
            Err(ConfigError::UnknownPanorama { name, .. }) if name == "b"
        ));

        let bad_start = r#"{"start": "z", "panoramas": [{"name": "a", "image": "a.jpg"}]}"#;
        assert!(matches!(TourConfig::from_json(bad_start), Err(ConfigError::UnknownPanorama { .. })));

        let upside_down = r#"{"panoramas": [{"name": "a", "image": "a.jpg",
            "limits": {"tilt": [45.0, -45.0], "fov": [20.0, 100.0]}}]}"#;
        assert!(matches!(
            TourConfig::from_json(upside_down),
            Err(ConfigError::InvalidLimits { panorama, field: "tilt" }) if panorama == "a"
        ));
    }

    #[test]
    fn vertices_survive_a_round_trip() {
        let config = TourConfig::from_json(TOUR).unwrap();
        let again = TourConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn single_image_tour_uses_file_stem() {
        let config = TourConfig::single_image(Path::new("/tmp/beach.jpg"));
        assert_eq!(config.panoramas[0].name, "beach");
        let scene = config.build_scene().unwrap();
        assert_eq!(scene.active(), Some(PanoramaId(0)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TourConfig::load(Path::new("/nonexistent/tour.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref path, .. } if path.ends_with("tour.json")));
    }
}
