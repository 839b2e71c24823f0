// tour.rs — turns hot-area actions into transition trees

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::easing::Curve;
use crate::error::{ActionError, ConfigError, TransitionError};
use crate::hot_area::{HotAreaAction, HotAreaId};
use crate::scene::{ElementRef, Overlay, PanoramaId, Scene};
use crate::scheduler::TransitionScheduler;
use crate::transition::{OverlayRelease, TimeBased, TransitionId, Tween};

/// Timing of planned transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    /// Seconds for a look-at; a switch spends half of it approaching and
    /// half of it on each fade.
    pub duration: f32,
    pub curve: Curve,
    /// Fov multiplier applied while approaching a switch hot area.
    pub zoom_factor: f32,
    pub fade_color: [f32; 3],
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            duration: 1.0,
            curve: Curve::EaseInOut,
            zoom_factor: 0.5,
            fade_color: [0.0, 0.0, 0.0],
        }
    }
}

impl TransitionSettings {
    fn leaf(&self, duration: f32, tween: Tween) -> TimeBased {
        TimeBased::new(duration, tween).with_curve(self.curve.clone())
    }
}

/// Builds the transition for a hot area of `panorama`.
///
/// Returns `None` for areas without an action. The returned root is not
/// running yet; hand it to [`TransitionScheduler::execute`] with the
/// panorama as causing element.
pub fn plan_action(
    scheduler: &mut TransitionScheduler,
    scene: &mut Scene,
    panorama: PanoramaId,
    area: HotAreaId,
    settings: &TransitionSettings,
) -> Result<Option<TransitionId>, ConfigError> {
    let Some(source) = scene.panorama(panorama) else {
        return Ok(None);
    };
    let Some(hot_area) = source.hot_areas.get(area) else {
        return Ok(None);
    };

    match hot_area.action.clone() {
        HotAreaAction::None => Ok(None),
        HotAreaAction::LookAt { pan, tilt, fov } => {
            let turn = scheduler.time_based(settings.leaf(settings.duration, Tween::Rotate { pan, tilt }));
            let zoom = fov.map(|fov| scheduler.time_based(settings.leaf(settings.duration, Tween::Zoom { fov })));
            debug!("planned look-at ({pan}, {tilt}) for {:?}", hot_area.name);
            Ok(Some(scheduler.simultaneous([Some(turn), zoom])))
        }
        HotAreaAction::SwitchTo { panorama: name, look_at } => {
            let destination = scene.find_panorama(&name).ok_or_else(|| ConfigError::UnknownPanorama {
                name: name.clone(),
                context: format!("hot area {:?}", hot_area.name),
            })?;
            let [center_pan, center_tilt] = hot_area.polygon.center();
            let source_fov = source.orientation.fov();
            let home = scene.panorama(destination).map(|p| p.home).unwrap_or([0.0, 0.0, 60.0]);
            let [dest_pan, dest_tilt] = look_at.unwrap_or([home[0], home[1]]);
            info!("planned switch from {:?} to {name:?}", source.name);

            let half = settings.duration * 0.5;
            let overlay = ElementRef::Overlay(scene.add_overlay(Overlay::new(settings.fade_color)));
            let here = ElementRef::Panorama(panorama);
            let there = ElementRef::Panorama(destination);

            let approach_turn =
                scheduler.time_based(settings.leaf(half, Tween::Rotate { pan: center_pan, tilt: center_tilt }));
            let approach_zoom = scheduler.time_based(settings.leaf(
                half,
                Tween::Zoom { fov: source_fov * settings.zoom_factor },
            ));
            let approach = scheduler.simultaneous([Some(approach_turn), Some(approach_zoom)]);

            let fade_in = scheduler.time_based(
                settings
                    .leaf(half, Tween::Fade { from: Some(0.0), to: 1.0, release: OverlayRelease::OnRootFinish })
                    .with_target(overlay),
            );
            let activate = scheduler.time_based(TimeBased::new(0.0, Tween::Activate).with_target(there));
            let place = scheduler.time_based(
                TimeBased::new(0.0, Tween::Rotate { pan: dest_pan, tilt: dest_tilt }).with_target(there),
            );
            let frame = scheduler.time_based(TimeBased::new(0.0, Tween::Zoom { fov: home[2] }).with_target(there));
            // the source keeps its pre-switch zoom for a later return
            let restore =
                scheduler.time_based(TimeBased::new(0.0, Tween::Zoom { fov: source_fov }).with_target(here));
            let fade_out = scheduler.time_based(
                settings
                    .leaf(half, Tween::Fade { from: Some(1.0), to: 0.0, release: OverlayRelease::OnRootFinish })
                    .with_target(overlay),
            );

            Ok(Some(scheduler.sequential([
                Some(approach),
                Some(fade_in),
                Some(activate),
                Some(place),
                Some(frame),
                Some(restore),
                Some(fade_out),
            ])))
        }
    }
}

/// Plans and executes the action of a hot area on the active panorama.
///
/// A new action is ignored while another transition is still running.
pub fn trigger(
    scheduler: &mut TransitionScheduler,
    scene: &mut Scene,
    area: HotAreaId,
    settings: &TransitionSettings,
) -> Result<Option<TransitionId>, ActionError> {
    let Some(panorama) = scene.active() else {
        return Ok(None);
    };
    if scheduler.active_count() > 0 {
        debug!("ignoring hot area {area:?}: a transition is running");
        return Ok(None);
    }
    let Some(root) = plan_action(scheduler, scene, panorama, area, settings)? else {
        return Ok(None);
    };
    execute_plan(scheduler, scene, root, Some(ElementRef::Panorama(panorama)))?;
    Ok(Some(root))
}

/// Executes a planned root. On failure the overlays the plan added are
/// released along with the tree.
fn execute_plan(
    scheduler: &mut TransitionScheduler,
    scene: &mut Scene,
    root: TransitionId,
    causing: Option<ElementRef>,
) -> Result<(), TransitionError> {
    let overlays = scheduler.arena().overlay_targets(root);
    if let Err(err) = scheduler.execute(root, scene, causing) {
        for overlay in overlays {
            scene.release_overlay(overlay);
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PanoramaEvent;
    use crate::hot_area::AngularPolygon;
    use crate::scene::Panorama;

    fn square(center: f32) -> AngularPolygon {
        AngularPolygon::new(vec![
            [center - 10.0, -10.0],
            [center + 10.0, -10.0],
            [center + 10.0, 10.0],
            [center - 10.0, 10.0],
        ])
    }

    fn tour() -> (Scene, PanoramaId, PanoramaId, HotAreaId, HotAreaId) {
        let mut scene = Scene::new();
        let hall = scene.add_panorama(Panorama::new("hall", "hall.jpg"));
        let mut garden = Panorama::new("garden", "garden.jpg");
        garden.home = [180.0, 0.0, 75.0];
        let garden = scene.add_panorama(garden);

        let hall_areas = &mut scene.panorama_mut(hall).unwrap().hot_areas;
        let window = hall_areas.add(
            "window",
            square(90.0),
            HotAreaAction::LookAt { pan: 90.0, tilt: 10.0, fov: Some(40.0) },
        );
        let door = hall_areas.add(
            "door",
            square(350.0),
            HotAreaAction::SwitchTo { panorama: "garden".into(), look_at: None },
        );
        scene.flush_hot_areas();
        scene.activate(hall);
        (scene, hall, garden, window, door)
    }

    fn linear() -> TransitionSettings {
        TransitionSettings { curve: Curve::Linear, ..TransitionSettings::default() }
    }

    #[test]
    fn look_at_turns_and_zooms_together() {
        let (mut scene, hall, _, window, _) = tour();
        let mut scheduler = TransitionScheduler::new();
        let root = trigger(&mut scheduler, &mut scene, window, &linear()).unwrap().unwrap();

        scheduler.tick(0.5, &mut scene);
        let o = scene.orientation(hall).unwrap();
        assert_eq!((o.pan(), o.tilt(), o.fov()), (45.0, 5.0, 50.0));

        scheduler.tick(0.5, &mut scene);
        assert!(!scheduler.is_active(root));
        let o = scene.orientation(hall).unwrap();
        assert_eq!((o.pan(), o.tilt(), o.fov()), (90.0, 10.0, 40.0));
    }

    #[test]
    fn switch_fades_through_to_destination() {
        let (mut scene, hall, garden, _, door) = tour();
        let mut scheduler = TransitionScheduler::new();
        let root = trigger(&mut scheduler, &mut scene, door, &linear()).unwrap().unwrap();
        let (overlay, _) = scene.overlays().next().map(|(id, o)| (id, *o)).unwrap();

        // approach: turn to the door centre (the short way, through 0) and zoom in
        scheduler.tick(0.5, &mut scene);
        let o = scene.orientation(hall).unwrap();
        assert!((o.pan().rem_euclid(360.0) - 350.0).abs() < 1e-3, "pan {}", o.pan());
        assert_eq!(o.fov(), 30.0);

        // fade in
        scheduler.tick(0.5, &mut scene);
        assert_eq!(scene.overlay(overlay).map(|o| o.alpha), Some(1.0));
        assert_eq!(scene.active(), Some(hall));

        // the zero-length steps take one tick each
        for _ in 0..4 {
            scheduler.tick(0.0, &mut scene);
        }
        assert_eq!(scene.active(), Some(garden));
        let g = scene.orientation(garden).unwrap();
        assert_eq!((g.pan(), g.fov()), (180.0, 75.0));
        assert_eq!(scene.orientation(hall).unwrap().fov(), 60.0);
        assert!(scene.overlay(overlay).is_some());

        // fade out, then the overlay goes away with the root
        scheduler.tick(0.5, &mut scene);
        assert!(!scheduler.is_active(root));
        assert!(scene.overlay(overlay).is_none());
        assert!(scene.events_mut().poll().contains(&PanoramaEvent::OverlayReleased(overlay)));
    }

    #[test]
    fn unknown_destination_is_a_config_error() {
        let (mut scene, hall, _, _, _) = tour();
        let lost = scene.panorama_mut(hall).unwrap().hot_areas.add(
            "lost",
            square(180.0),
            HotAreaAction::SwitchTo { panorama: "attic".into(), look_at: None },
        );
        scene.flush_hot_areas();
        let mut scheduler = TransitionScheduler::new();
        let err = plan_action(&mut scheduler, &mut scene, hall, lost, &linear()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPanorama { ref name, .. } if name == "attic"));
        assert_eq!(scene.overlays().count(), 0);
    }

    #[test]
    fn failed_switch_leaves_no_tree_or_overlay() {
        let (mut scene, hall, _, _, door) = tour();
        let mut scheduler = TransitionScheduler::new();
        let root = plan_action(&mut scheduler, &mut scene, hall, door, &linear()).unwrap().unwrap();
        assert_eq!(scene.overlays().count(), 1);
        scene.events_mut().poll();

        // the approach leaves have no target of their own
        let err = execute_plan(&mut scheduler, &mut scene, root, None).unwrap_err();
        assert!(matches!(err, TransitionError::MissingTarget(_)));
        assert_eq!(scene.overlays().count(), 0);
        assert!(scheduler.arena().is_empty());
        assert_eq!(scheduler.active_count(), 0);
        assert!(scene
            .events_mut()
            .poll()
            .iter()
            .any(|e| matches!(e, PanoramaEvent::OverlayReleased(_))));
    }

    #[test]
    fn busy_scheduler_ignores_new_actions() {
        let (mut scene, _, _, window, door) = tour();
        let mut scheduler = TransitionScheduler::new();
        assert!(trigger(&mut scheduler, &mut scene, window, &linear()).unwrap().is_some());
        assert!(trigger(&mut scheduler, &mut scene, door, &linear()).unwrap().is_none());
        assert_eq!(scheduler.active_count(), 1);
    }
}
