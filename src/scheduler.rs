// scheduler.rs — drives running root transitions once per host tick

use log::{debug, error, warn};

use crate::error::TransitionError;
use crate::events::PanoramaEvent;
use crate::scene::{ElementRef, Scene};
use crate::transition::{
    CancelPolicy, FinishContext, TimeBased, TransitionArena, TransitionId, TransitionKind, TransitionState,
};

/// Owns the transition arena and the list of running roots.
///
/// Roots are added by [`execute`](Self::execute) and removed after their
/// finish callbacks have run. Finished trees are released, so stale handles
/// read as `Finished`.
#[derive(Default)]
pub struct TransitionScheduler {
    arena: TransitionArena,
    active: Vec<TransitionId>,
}

impl TransitionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- building (delegates to the arena) ----

    pub fn time_based(&mut self, leaf: TimeBased) -> TransitionId {
        self.arena.time_based(leaf)
    }

    pub fn sequential(&mut self, children: impl IntoIterator<Item = Option<TransitionId>>) -> TransitionId {
        self.arena.sequential(children)
    }

    pub fn simultaneous(&mut self, children: impl IntoIterator<Item = Option<TransitionId>>) -> TransitionId {
        self.arena.simultaneous(children)
    }

    pub fn on_finish(
        &mut self,
        id: TransitionId,
        callback: impl FnMut(&mut FinishContext<'_>) + 'static,
    ) -> Result<(), TransitionError> {
        self.arena.on_finish(id, callback)
    }

    pub fn state(&self, id: TransitionId) -> Option<TransitionState> {
        self.arena.state(id)
    }

    pub fn progress(&self, id: TransitionId) -> Option<f32> {
        self.arena.progress(id)
    }

    pub fn kind(&self, id: TransitionId) -> Option<&TransitionKind> {
        self.arena.kind(id)
    }

    pub fn arena(&self) -> &TransitionArena {
        &self.arena
    }

    pub fn is_active(&self, id: TransitionId) -> bool {
        self.active.contains(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ---- running ----

    /// Init, start and one process call, so the first frame already shows
    /// the transition. Leaves without a target fall back to `causing`.
    pub fn execute(
        &mut self,
        id: TransitionId,
        scene: &mut Scene,
        causing: Option<ElementRef>,
    ) -> Result<(), TransitionError> {
        if self.arena.parent(id).is_some() {
            return Err(TransitionError::NotRoot(id));
        }
        self.arena.set_causing(id, causing)?;
        if let Err(err) = self.arena.init(id, scene) {
            self.arena.release_tree(id);
            return Err(err);
        }

        if let Err(err) = self.arena.start(id, scene) {
            let mut follow_ups = Vec::new();
            self.arena.cancel_tree(id, CancelPolicy::Hold, scene, &mut follow_ups);
            self.arena.release_tree(id);
            return Err(err);
        }
        self.arena.process(id, scene);

        self.active.push(id);
        debug!("transition {id:?} executing");
        scene.emit(PanoramaEvent::TransitionStarted(id));
        Ok(())
    }

    /// Advances every running root by `dt` seconds.
    ///
    /// A root whose tree hits a configuration error mid-run is cancelled in
    /// place and its error is returned; the other roots are unaffected.
    /// Transitions queued from finish callbacks start after the sweep.
    pub fn tick(&mut self, dt: f32, scene: &mut Scene) -> Vec<TransitionError> {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let mut errors = Vec::new();
        let mut follow_ups = Vec::new();

        for root in self.active.clone() {
            match self.arena.on_process(root, dt, scene, &mut follow_ups) {
                Ok(()) => {
                    if self.arena.state(root) == Some(TransitionState::Finished) {
                        self.arena.finish(root, scene, &mut follow_ups, false);
                        self.retire(root, scene, false);
                    }
                }
                Err(err) => {
                    error!("transition {root:?} aborted: {err}");
                    self.arena.cancel_tree(root, CancelPolicy::Hold, scene, &mut follow_ups);
                    self.retire(root, scene, true);
                    errors.push(err);
                }
            }
        }

        errors.extend(self.run_follow_ups(follow_ups, scene));
        errors
    }

    /// Stops a running root early. See [`CancelPolicy`].
    pub fn cancel(&mut self, id: TransitionId, policy: CancelPolicy, scene: &mut Scene) -> Result<(), TransitionError> {
        if !self.is_active(id) {
            return Err(if self.arena.parent(id).is_some() {
                TransitionError::NotRoot(id)
            } else if let Some(state) = self.arena.state(id).filter(|_| self.arena.contains(id)) {
                TransitionError::InvalidState { id, state, expected: TransitionState::Running }
            } else {
                TransitionError::UnknownTransition(id)
            });
        }

        debug!("cancelling transition {id:?} ({policy:?})");
        let mut follow_ups = Vec::new();
        self.arena.cancel_tree(id, policy, scene, &mut follow_ups);
        self.retire(id, scene, true);
        for err in self.run_follow_ups(follow_ups, scene) {
            warn!("follow-up of cancelled transition failed: {err}");
        }
        Ok(())
    }

    /// Cancels every running root.
    pub fn cancel_all(&mut self, policy: CancelPolicy, scene: &mut Scene) {
        for root in self.active.clone() {
            if let Err(err) = self.cancel(root, policy, scene) {
                warn!("cancel of {root:?} failed: {err}");
            }
        }
    }

    fn run_follow_ups(&mut self, follow_ups: Vec<TransitionId>, scene: &mut Scene) -> Vec<TransitionError> {
        follow_ups
            .into_iter()
            .filter_map(|id| match self.execute(id, scene, None) {
                Ok(()) => None,
                Err(err) => {
                    warn!("queued transition {id:?} could not start: {err}");
                    Some(err)
                }
            })
            .collect()
    }

    fn retire(&mut self, root: TransitionId, scene: &mut Scene, cancelled: bool) {
        self.active.retain(|&id| id != root);
        self.arena.release_tree(root);
        scene.emit(PanoramaEvent::TransitionFinished { id: root, cancelled });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Overlay, Panorama, PanoramaId};
    use crate::transition::{OverlayRelease, Tween};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn lobby() -> (Scene, PanoramaId) {
        let mut scene = Scene::new();
        let p = scene.add_panorama(Panorama::new("lobby", "lobby.jpg"));
        (scene, p)
    }

    fn fade_from_half(duration: f32, overlay: crate::scene::OverlayId) -> TimeBased {
        TimeBased::new(duration, Tween::Fade { from: Some(0.5), to: 1.0, release: OverlayRelease::Keep })
            .with_target(ElementRef::Overlay(overlay))
    }

    #[test]
    fn sequence_runs_children_back_to_back() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let first = scheduler.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 30.0 }));
        let second = scheduler.time_based(TimeBased::new(2.0, Tween::Zoom { fov: 90.0 }));
        let root = scheduler.sequential([Some(first), None, Some(second)]);
        scheduler.execute(root, &mut scene, Some(ElementRef::Panorama(p))).unwrap();

        scheduler.tick(1.0, &mut scene);
        assert_eq!(scheduler.state(first), Some(TransitionState::Finished));
        assert_eq!(scheduler.state(second), Some(TransitionState::Running));
        assert_eq!(scheduler.progress(second), Some(0.0));
        assert_eq!(scene.orientation(p).unwrap().fov(), 30.0);

        scheduler.tick(1.5, &mut scene);
        assert!(scheduler.is_active(root));
        assert_eq!(scene.orientation(p).unwrap().fov(), 75.0);

        scheduler.tick(0.5, &mut scene);
        assert!(!scheduler.is_active(root));
        assert_eq!(scheduler.state(root), Some(TransitionState::Finished));
        assert_eq!(scene.orientation(p).unwrap().fov(), 90.0);
    }

    #[test]
    fn simultaneous_children_start_together() {
        let mut scene = Scene::new();
        let a = scene.add_overlay(Overlay::new([0.0; 3]));
        let b = scene.add_overlay(Overlay::new([0.0; 3]));
        let mut scheduler = TransitionScheduler::new();
        let short = scheduler.time_based(fade_from_half(1.0, a));
        let long = scheduler.time_based(fade_from_half(2.0, b));
        let root = scheduler.simultaneous([Some(short), Some(long)]);

        scheduler.execute(root, &mut scene, None).unwrap();
        assert_eq!(scene.overlay(a).unwrap().alpha, 0.5);
        assert_eq!(scene.overlay(b).unwrap().alpha, 0.5);

        scheduler.tick(1.0, &mut scene);
        assert_eq!(scheduler.state(short), Some(TransitionState::Finished));
        assert!(scheduler.is_active(root));
        assert_eq!(scene.overlay(b).unwrap().alpha, 0.75);

        scheduler.tick(1.0, &mut scene);
        assert!(!scheduler.is_active(root));
        assert_eq!(scene.overlay(b).unwrap().alpha, 1.0);
    }

    #[test]
    fn zero_duration_root_finishes_on_first_tick() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let id = scheduler.time_based(TimeBased::new(0.0, Tween::Zoom { fov: 20.0 }));
        scheduler.execute(id, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        assert!(scheduler.tick(0.016, &mut scene).is_empty());

        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scene.orientation(p).unwrap().fov(), 20.0);
        let events = scene.events_mut().poll();
        assert_eq!(
            events,
            vec![
                PanoramaEvent::TransitionStarted(id),
                PanoramaEvent::TransitionFinished { id, cancelled: false },
            ]
        );
    }

    #[test]
    fn garbage_delta_does_not_poison_progress() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let id = scheduler.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 20.0 }));
        scheduler.execute(id, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        scheduler.tick(f32::NAN, &mut scene);
        scheduler.tick(-3.0, &mut scene);
        assert_eq!(scheduler.progress(id), Some(0.0));
        assert_eq!(scene.orientation(p).unwrap().fov(), 60.0);
    }

    #[test]
    fn execute_rejects_children_and_bad_targets() {
        let (mut scene, _) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let leaf = scheduler.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 20.0 }));
        let root = scheduler.sequential([Some(leaf)]);
        assert_eq!(scheduler.execute(leaf, &mut scene, None), Err(TransitionError::NotRoot(leaf)));
        assert_eq!(scheduler.execute(root, &mut scene, None), Err(TransitionError::MissingTarget(leaf)));
        assert_eq!(scheduler.active_count(), 0);
        // a tree that cannot start is dropped from the arena
        assert!(!scheduler.arena().contains(root));
        assert!(!scheduler.arena().contains(leaf));
        assert!(scheduler.arena().is_empty());
    }

    #[test]
    fn cancel_with_revert_restores_start_values() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let turn = scheduler.time_based(TimeBased::new(1.0, Tween::Rotate { pan: 90.0, tilt: 0.0 }));
        let zoom = scheduler.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 30.0 }));
        let root = scheduler.sequential([Some(turn), Some(zoom)]);
        let seen = Rc::new(RefCell::new(None));
        let s = seen.clone();
        scheduler.on_finish(root, move |ctx| *s.borrow_mut() = Some(ctx.cancelled)).unwrap();

        scheduler.execute(root, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        scheduler.tick(1.0, &mut scene);
        scheduler.tick(0.5, &mut scene);
        assert_eq!(scene.orientation(p).unwrap().pan(), 90.0);
        assert_eq!(scene.orientation(p).unwrap().fov(), 45.0);

        scheduler.cancel(root, CancelPolicy::Revert, &mut scene).unwrap();
        let o = scene.orientation(p).unwrap();
        assert_eq!((o.pan(), o.tilt(), o.fov()), (0.0, 0.0, 60.0));
        assert_eq!(*seen.borrow(), Some(true));
        assert!(!scheduler.is_active(root));
        assert!(scene
            .events_mut()
            .poll()
            .contains(&PanoramaEvent::TransitionFinished { id: root, cancelled: true }));
    }

    #[test]
    fn cancel_with_hold_keeps_partial_state() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let turn = scheduler.time_based(TimeBased::new(2.0, Tween::Rotate { pan: 90.0, tilt: 0.0 }));
        scheduler.execute(turn, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        scheduler.tick(1.0, &mut scene);
        scheduler.cancel(turn, CancelPolicy::Hold, &mut scene).unwrap();
        assert_eq!(scene.orientation(p).unwrap().pan(), 45.0);
        assert_eq!(
            scheduler.cancel(turn, CancelPolicy::Hold, &mut scene),
            Err(TransitionError::UnknownTransition(turn))
        );
    }

    #[test]
    fn finish_callback_can_start_the_next_transition() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let first = scheduler.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 30.0 }));
        let next = scheduler.time_based(
            TimeBased::new(1.0, Tween::Zoom { fov: 90.0 }).with_target(ElementRef::Panorama(p)),
        );
        scheduler.on_finish(first, move |ctx| ctx.execute(next)).unwrap();

        scheduler.execute(first, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        assert!(scheduler.tick(1.0, &mut scene).is_empty());
        assert!(!scheduler.is_active(first));
        assert!(scheduler.is_active(next));
        assert_eq!(scheduler.state(next), Some(TransitionState::Running));

        scheduler.tick(0.5, &mut scene);
        assert_eq!(scene.orientation(p).unwrap().fov(), 60.0);
    }

    #[test]
    fn panicking_finish_callback_is_isolated() {
        let (mut scene, p) = lobby();
        let mut scheduler = TransitionScheduler::new();
        let id = scheduler.time_based(TimeBased::new(0.5, Tween::Zoom { fov: 30.0 }));
        let ran = Rc::new(RefCell::new(false));
        let r = ran.clone();
        scheduler.on_finish(id, |_| panic!("listener bug")).unwrap();
        scheduler.on_finish(id, move |_| *r.borrow_mut() = true).unwrap();

        scheduler.execute(id, &mut scene, Some(ElementRef::Panorama(p))).unwrap();
        scheduler.tick(0.5, &mut scene);
        assert!(*ran.borrow());
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scene.orientation(p).unwrap().fov(), 30.0);
    }
}
