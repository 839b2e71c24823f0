// transition.rs — transition nodes and their lifecycle
//
// NotStarted --init--> Initialized --start--> Running --(done)--> Finished
//
// Nodes live in an arena and refer to each other by `TransitionId`. The
// child -> parent link is a plain id and never owns anything.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{debug, error, warn};

use crate::angle::{lerp, shortest_delta};
use crate::easing::Curve;
use crate::error::TransitionError;
use crate::scene::{ElementRef, OverlayId, PanoramaId, Scene};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    NotStarted,
    Initialized,
    Running,
    Finished,
}

/// When a fade leaf hands its overlay back to the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayRelease {
    #[default]
    Keep,
    OnFinish,
    /// When the outermost transition finishes, not the leaf itself.
    OnRootFinish,
}

/// What a time-based leaf animates.
#[derive(Debug, Clone, PartialEq)]
pub enum Tween {
    /// Turn a panorama to a north-relative pan and tilt along the shortest arc.
    Rotate { pan: f32, tilt: f32 },
    Zoom { fov: f32 },
    /// Overlay alpha. `from: None` starts at the current alpha.
    Fade { from: Option<f32>, to: f32, release: OverlayRelease },
    /// Make the target panorama the active one once progress reaches 1.
    Activate,
    Wait,
}

impl Tween {
    fn needs_target(&self) -> bool {
        !matches!(self, Tween::Wait)
    }

    fn accepts(&self, target: ElementRef) -> bool {
        match self {
            Tween::Rotate { .. } | Tween::Zoom { .. } | Tween::Activate => {
                matches!(target, ElementRef::Panorama(_))
            }
            Tween::Fade { .. } => matches!(target, ElementRef::Overlay(_)),
            Tween::Wait => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Captured {
    View { pan: f32, tilt: f32, fov: f32 },
    Alpha(f32),
    Active(Option<PanoramaId>),
}

/// Values a leaf saw at `init`, kept after finish so a cancel can revert.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    target: ElementRef,
    value: Captured,
    seq: u64,
}

/// Leaf transition interpolating over `duration` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBased {
    pub duration: f32,
    pub curve: Curve,
    pub tween: Tween,
    /// Falls back to the causing element of the root transition.
    pub target: Option<ElementRef>,
    progress: f32,
    resolved: Option<ElementRef>,
    snapshot: Option<Snapshot>,
}

impl TimeBased {
    pub fn new(duration: f32, tween: Tween) -> Self {
        Self {
            duration,
            curve: Curve::Linear,
            tween,
            target: None,
            progress: 0.0,
            resolved: None,
            snapshot: None,
        }
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    pub fn with_target(mut self, target: ElementRef) -> Self {
        self.target = Some(target);
        self
    }

    /// Linear progress in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Advances progress by `dt`; returns true once complete.
    fn advance(&mut self, dt: f32) -> bool {
        if self.duration > 0.0 && self.duration.is_finite() {
            self.progress += dt / self.duration;
        } else {
            self.progress = 1.0;
        }
        if !self.progress.is_finite() || self.progress >= 1.0 {
            self.progress = 1.0;
        }
        self.progress >= 1.0
    }

    fn apply(&self, scene: &mut Scene) {
        let (Some(target), Some(snapshot)) = (self.resolved, self.snapshot) else {
            return;
        };
        let t = self.curve.evaluate(self.progress);

        match (&self.tween, target, snapshot.value) {
            (Tween::Rotate { pan, tilt }, ElementRef::Panorama(p), Captured::View { pan: p0, tilt: t0, .. }) => {
                if let Some(o) = scene.orientation_mut(p) {
                    o.look_at(p0 + shortest_delta(p0, *pan) * t, lerp(t0, *tilt, t));
                }
            }
            (Tween::Zoom { fov }, ElementRef::Panorama(p), Captured::View { fov: f0, .. }) => {
                if let Some(o) = scene.orientation_mut(p) {
                    o.set_fov(lerp(f0, *fov, t));
                }
            }
            (Tween::Fade { from, to, .. }, ElementRef::Overlay(o), Captured::Alpha(a0)) => {
                if let Some(overlay) = scene.overlay_mut(o) {
                    overlay.alpha = lerp(from.unwrap_or(a0), *to, t);
                }
            }
            (Tween::Activate, ElementRef::Panorama(p), _) => {
                if self.progress >= 1.0 && scene.active() != Some(p) {
                    scene.activate(p);
                }
            }
            _ => {}
        }
    }

    fn revert(&self, scene: &mut Scene) {
        let Some(snapshot) = self.snapshot else {
            return;
        };
        match (snapshot.target, snapshot.value) {
            (ElementRef::Panorama(p), Captured::View { pan, tilt, fov }) => {
                if let Some(o) = scene.orientation_mut(p) {
                    match self.tween {
                        Tween::Zoom { .. } => {
                            o.set_fov(fov);
                        }
                        _ => o.look_at(pan, tilt),
                    }
                }
            }
            (ElementRef::Overlay(o), Captured::Alpha(alpha)) => {
                if let Some(overlay) = scene.overlay_mut(o) {
                    overlay.alpha = alpha;
                }
            }
            (_, Captured::Active(Some(previous))) => {
                if scene.active() != Some(previous) {
                    scene.activate(previous);
                }
            }
            _ => {}
        }
    }
}

/// Runs children one after another in slot order. Empty slots are skipped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequential {
    children: Vec<Option<TransitionId>>,
    cursor: usize,
    active: Option<TransitionId>,
}

/// Runs every child at once; done when all of them are.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Simultaneous {
    children: Vec<Option<TransitionId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionKind {
    TimeBased(TimeBased),
    Sequential(Sequential),
    Simultaneous(Simultaneous),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Leaf,
    Sequential,
    Simultaneous,
}

impl TransitionKind {
    fn shape(&self) -> Shape {
        match self {
            TransitionKind::TimeBased(_) => Shape::Leaf,
            TransitionKind::Sequential(_) => Shape::Sequential,
            TransitionKind::Simultaneous(_) => Shape::Simultaneous,
        }
    }

    fn children(&self) -> &[Option<TransitionId>] {
        match self {
            TransitionKind::TimeBased(_) => &[],
            TransitionKind::Sequential(s) => &s.children,
            TransitionKind::Simultaneous(s) => &s.children,
        }
    }
}

/// What to do with interpolated state when a running transition is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelPolicy {
    /// Restore every target to the value it had before the transition touched it.
    #[default]
    Revert,
    /// Leave targets where the last tick put them.
    Hold,
}

/// Handed to finish callbacks.
pub struct FinishContext<'a> {
    pub id: TransitionId,
    pub cancelled: bool,
    pub scene: &'a mut Scene,
    follow_ups: &'a mut Vec<TransitionId>,
}

impl FinishContext<'_> {
    /// Queues a root transition to be executed once the current tick is done.
    pub fn execute(&mut self, id: TransitionId) {
        self.follow_ups.push(id);
    }
}

pub type FinishCallback = Box<dyn FnMut(&mut FinishContext<'_>)>;

struct TransitionNode {
    kind: TransitionKind,
    state: TransitionState,
    parent: Option<TransitionId>,
    causing: Option<ElementRef>,
    on_finish: Vec<FinishCallback>,
    /// Overlays to release when this node, as a root, finishes.
    root_cleanup: Vec<OverlayId>,
    disposed: bool,
}

impl TransitionNode {
    fn new(kind: TransitionKind) -> Self {
        Self {
            kind,
            state: TransitionState::NotStarted,
            parent: None,
            causing: None,
            on_finish: Vec::new(),
            root_cleanup: Vec::new(),
            disposed: false,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<TransitionNode>,
}

/// Storage for every transition tree the scheduler knows about.
#[derive(Default)]
pub struct TransitionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    init_counter: u64,
}

impl TransitionArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, node: TransitionNode) -> TransitionId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return TransitionId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, node: Some(node) });
        TransitionId { index, generation: 0 }
    }

    fn node(&self, id: TransitionId) -> Result<&TransitionNode, TransitionError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(TransitionError::UnknownTransition(id))
    }

    fn node_mut(&mut self, id: TransitionId) -> Result<&mut TransitionNode, TransitionError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(TransitionError::UnknownTransition(id))
    }

    // ---- building ----

    pub fn time_based(&mut self, leaf: TimeBased) -> TransitionId {
        self.insert(TransitionNode::new(TransitionKind::TimeBased(leaf)))
    }

    pub fn sequential(&mut self, children: impl IntoIterator<Item = Option<TransitionId>>) -> TransitionId {
        let id = self.insert(TransitionNode::new(TransitionKind::Sequential(Sequential::default())));
        let children = self.adopt_all(id, children);
        if let Ok(TransitionNode { kind: TransitionKind::Sequential(seq), .. }) = self.node_mut(id) {
            seq.children = children;
        }
        id
    }

    pub fn simultaneous(&mut self, children: impl IntoIterator<Item = Option<TransitionId>>) -> TransitionId {
        let id = self.insert(TransitionNode::new(TransitionKind::Simultaneous(Simultaneous::default())));
        let children = self.adopt_all(id, children);
        if let Ok(TransitionNode { kind: TransitionKind::Simultaneous(sim), .. }) = self.node_mut(id) {
            sim.children = children;
        }
        id
    }

    fn adopt_all(
        &mut self,
        parent: TransitionId,
        children: impl IntoIterator<Item = Option<TransitionId>>,
    ) -> Vec<Option<TransitionId>> {
        children
            .into_iter()
            .map(|child| child.filter(|c| self.adopt(parent, *c)))
            .collect()
    }

    fn adopt(&mut self, parent: TransitionId, child: TransitionId) -> bool {
        match self.node_mut(child) {
            Ok(node) if node.parent.is_none() && node.state == TransitionState::NotStarted => {
                node.parent = Some(parent);
                true
            }
            Ok(_) => {
                warn!("transition {child:?} already has a parent or has started; slot left empty");
                false
            }
            Err(_) => {
                warn!("unknown transition {child:?}; slot left empty");
                false
            }
        }
    }

    /// Registers a callback fired once when the transition finishes or is cancelled.
    pub fn on_finish(
        &mut self,
        id: TransitionId,
        callback: impl FnMut(&mut FinishContext<'_>) + 'static,
    ) -> Result<(), TransitionError> {
        self.node_mut(id)?.on_finish.push(Box::new(callback));
        Ok(())
    }

    // ---- queries ----

    /// `Finished` for handles whose tree has already been released.
    pub fn state(&self, id: TransitionId) -> Option<TransitionState> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation == id.generation {
            slot.node.as_ref().map(|n| n.state)
        } else if slot.generation > id.generation {
            Some(TransitionState::Finished)
        } else {
            None
        }
    }

    /// Linear progress of a time-based leaf.
    pub fn progress(&self, id: TransitionId) -> Option<f32> {
        match &self.node(id).ok()?.kind {
            TransitionKind::TimeBased(leaf) => Some(leaf.progress),
            _ => None,
        }
    }

    pub fn kind(&self, id: TransitionId) -> Option<&TransitionKind> {
        self.node(id).ok().map(|n| &n.kind)
    }

    pub fn parent(&self, id: TransitionId) -> Option<TransitionId> {
        self.node(id).ok()?.parent
    }

    /// Outermost transition reachable through parent links.
    pub fn root(&self, id: TransitionId) -> TransitionId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    pub fn contains(&self, id: TransitionId) -> bool {
        self.node(id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shape(&self, id: TransitionId) -> Result<Shape, TransitionError> {
        Ok(self.node(id)?.kind.shape())
    }

    fn child_ids(&self, id: TransitionId) -> Result<Vec<TransitionId>, TransitionError> {
        Ok(self.node(id)?.kind.children().iter().flatten().copied().collect())
    }

    fn is_disposed(&self, id: TransitionId) -> bool {
        self.node(id).map(|n| n.disposed).unwrap_or(true)
    }

    /// The tree under `id`, parents before children.
    fn subtree(&self, id: TransitionId) -> Vec<TransitionId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Ok(node) = self.node(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.kind.children().iter().rev().flatten().copied());
        }
        out
    }

    /// Overlays named as explicit targets anywhere under `id`.
    pub(crate) fn overlay_targets(&self, id: TransitionId) -> Vec<OverlayId> {
        let mut out = Vec::new();
        for current in self.subtree(id) {
            let Ok(TransitionKind::TimeBased(leaf)) = self.node(current).map(|n| &n.kind) else {
                continue;
            };
            if let Some(ElementRef::Overlay(overlay)) = leaf.target {
                if !out.contains(&overlay) {
                    out.push(overlay);
                }
            }
        }
        out
    }

    pub(crate) fn set_causing(&mut self, id: TransitionId, causing: Option<ElementRef>) -> Result<(), TransitionError> {
        let node = self.node_mut(id)?;
        if causing.is_some() {
            node.causing = causing;
        }
        Ok(())
    }

    // ---- lifecycle ----

    fn expect_state(&self, id: TransitionId, expected: TransitionState) -> Result<(), TransitionError> {
        let state = self.node(id)?.state;
        if state != expected {
            return Err(TransitionError::InvalidState { id, state, expected });
        }
        Ok(())
    }

    fn resolve_target(
        &self,
        id: TransitionId,
        leaf: &TimeBased,
        scene: &Scene,
    ) -> Result<Option<ElementRef>, TransitionError> {
        if !leaf.tween.needs_target() {
            return Ok(None);
        }
        let inherited = || self.node(self.root(id)).ok().and_then(|root| root.causing);
        let target = leaf
            .target
            .or_else(inherited)
            .ok_or(TransitionError::MissingTarget(id))?;
        if !leaf.tween.accepts(target) {
            return Err(TransitionError::TargetMismatch { id, target });
        }
        if !scene.contains(target) {
            return Err(TransitionError::MissingTarget(id));
        }
        Ok(Some(target))
    }

    /// Checks every leaf under `id` can resolve its target, without touching
    /// state. Returns the overlays to release when the root finishes.
    fn validate(&self, id: TransitionId, scene: &Scene) -> Result<Vec<OverlayId>, TransitionError> {
        let mut root_overlays = Vec::new();
        for node_id in self.subtree(id) {
            if let TransitionKind::TimeBased(leaf) = &self.node(node_id)?.kind {
                let target = self.resolve_target(node_id, leaf, scene)?;
                if let (Tween::Fade { release: OverlayRelease::OnRootFinish, .. }, Some(ElementRef::Overlay(o))) =
                    (&leaf.tween, target)
                {
                    if !root_overlays.contains(&o) {
                        root_overlays.push(o);
                    }
                }
            }
        }
        Ok(root_overlays)
    }

    pub(crate) fn init(&mut self, id: TransitionId, scene: &Scene) -> Result<(), TransitionError> {
        self.expect_state(id, TransitionState::NotStarted)?;
        let root_overlays = self.validate(id, scene)?;
        // registered up front so a cancel before the fade starts still releases
        let node = self.node_mut(id)?;
        if node.parent.is_none() {
            node.root_cleanup = root_overlays;
        }

        match self.shape(id)? {
            Shape::Leaf => self.init_leaf(id, scene)?,
            // children are set up when the sequence reaches them
            Shape::Sequential => {}
            Shape::Simultaneous => {
                for child in self.child_ids(id)? {
                    self.init(child, scene)?;
                }
            }
        }
        self.node_mut(id)?.state = TransitionState::Initialized;
        debug!("transition {id:?} initialized");
        Ok(())
    }

    fn init_leaf(&mut self, id: TransitionId, scene: &Scene) -> Result<(), TransitionError> {
        let TransitionKind::TimeBased(leaf) = &self.node(id)?.kind else {
            return Ok(());
        };
        let target = self.resolve_target(id, leaf, scene)?;

        let value = match target {
            Some(ElementRef::Panorama(_)) if leaf.tween == Tween::Activate => Some(Captured::Active(scene.active())),
            Some(ElementRef::Panorama(p)) => scene.orientation(p).map(|o| Captured::View {
                pan: o.pan(),
                tilt: o.tilt(),
                fov: o.fov(),
            }),
            Some(ElementRef::Overlay(o)) => scene.overlay(o).map(|overlay| Captured::Alpha(overlay.alpha)),
            None => None,
        };

        self.init_counter += 1;
        let seq = self.init_counter;
        if let TransitionKind::TimeBased(leaf) = &mut self.node_mut(id)?.kind {
            leaf.resolved = target;
            leaf.progress = 0.0;
            leaf.snapshot = target.zip(value).map(|(target, value)| Snapshot { target, value, seq });
        }
        Ok(())
    }

    pub(crate) fn start(&mut self, id: TransitionId, scene: &mut Scene) -> Result<(), TransitionError> {
        self.expect_state(id, TransitionState::Initialized)?;
        self.node_mut(id)?.state = TransitionState::Running;

        match self.shape(id)? {
            Shape::Leaf => {
                if let TransitionKind::TimeBased(leaf) = &mut self.node_mut(id)?.kind {
                    leaf.progress = 0.0;
                }
            }
            Shape::Sequential => {
                if let TransitionKind::Sequential(seq) = &mut self.node_mut(id)?.kind {
                    seq.cursor = 0;
                    seq.active = None;
                }
                self.advance(id, scene)?;
            }
            Shape::Simultaneous => {
                let children = self.child_ids(id)?;
                for &child in &children {
                    self.start(child, scene)?;
                    self.process(child, scene);
                }
                if children.is_empty() {
                    self.node_mut(id)?.state = TransitionState::Finished;
                }
            }
        }
        Ok(())
    }

    /// Moves a sequence to its next non-empty slot, or finishes it.
    fn advance(&mut self, id: TransitionId, scene: &mut Scene) -> Result<(), TransitionError> {
        let next = match &mut self.node_mut(id)?.kind {
            TransitionKind::Sequential(seq) => {
                let mut next = None;
                while seq.cursor < seq.children.len() {
                    let slot = seq.children[seq.cursor];
                    seq.cursor += 1;
                    if slot.is_some() {
                        next = slot;
                        break;
                    }
                }
                seq.active = next;
                next
            }
            _ => return Ok(()),
        };

        match next {
            Some(child) => {
                self.init(child, scene)?;
                self.start(child, scene)?;
                self.process(child, scene);
            }
            None => self.node_mut(id)?.state = TransitionState::Finished,
        }
        Ok(())
    }

    /// Applies the current progress to the targets without advancing time.
    pub(crate) fn process(&self, id: TransitionId, scene: &mut Scene) {
        let Ok(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            TransitionKind::TimeBased(leaf) => leaf.apply(scene),
            TransitionKind::Sequential(seq) => {
                if let Some(child) = seq.active {
                    self.process(child, scene);
                }
            }
            TransitionKind::Simultaneous(sim) => {
                for &child in sim.children.iter().flatten() {
                    if self.state(child) == Some(TransitionState::Running) {
                        self.process(child, scene);
                    }
                }
            }
        }
    }

    /// One tick of `dt` seconds.
    pub(crate) fn on_process(
        &mut self,
        id: TransitionId,
        dt: f32,
        scene: &mut Scene,
        follow_ups: &mut Vec<TransitionId>,
    ) -> Result<(), TransitionError> {
        if self.node(id)?.state != TransitionState::Running {
            return Ok(());
        }

        match self.shape(id)? {
            Shape::Leaf => {
                let mut done = false;
                if let TransitionKind::TimeBased(leaf) = &mut self.node_mut(id)?.kind {
                    done = leaf.advance(dt);
                }
                if done {
                    self.node_mut(id)?.state = TransitionState::Finished;
                }
                self.process(id, scene);
            }
            Shape::Sequential => {
                if self.active_child(id).is_none() {
                    self.advance(id, scene)?;
                }
                if let Some(child) = self.active_child(id) {
                    self.on_process(child, dt, scene, follow_ups)?;
                    if self.state(child) == Some(TransitionState::Finished) {
                        self.finish(child, scene, follow_ups, false);
                        // the next child starts at progress 0 within this tick
                        self.advance(id, scene)?;
                    }
                }
            }
            Shape::Simultaneous => {
                let mut all_done = true;
                for child in self.child_ids(id)? {
                    self.on_process(child, dt, scene, follow_ups)?;
                    if self.state(child) == Some(TransitionState::Finished) {
                        self.finish(child, scene, follow_ups, false);
                    } else {
                        all_done = false;
                    }
                }
                if all_done {
                    self.node_mut(id)?.state = TransitionState::Finished;
                }
            }
        }
        Ok(())
    }

    fn active_child(&self, id: TransitionId) -> Option<TransitionId> {
        match &self.node(id).ok()?.kind {
            TransitionKind::Sequential(seq) => seq.active,
            _ => None,
        }
    }

    /// Teardown plus finish callbacks. Runs at most once per node.
    pub(crate) fn finish(
        &mut self,
        id: TransitionId,
        scene: &mut Scene,
        follow_ups: &mut Vec<TransitionId>,
        cancelled: bool,
    ) {
        let Ok(node) = self.node_mut(id) else {
            return;
        };
        if node.disposed {
            return;
        }
        node.disposed = true;
        node.state = TransitionState::Finished;

        let mut released = mem::take(&mut node.root_cleanup);
        if let TransitionKind::TimeBased(leaf) = &mut node.kind {
            if let (Tween::Fade { release: OverlayRelease::OnFinish, .. }, Some(ElementRef::Overlay(o))) =
                (&leaf.tween, leaf.resolved)
            {
                released.push(o);
            }
            leaf.resolved = None;
        }
        node.parent = None;
        let callbacks = mem::take(&mut node.on_finish);

        for overlay in released {
            scene.release_overlay(overlay);
        }

        debug!("transition {id:?} finished (cancelled: {cancelled})");
        let mut ctx = FinishContext { id, cancelled, scene, follow_ups };
        for mut callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&mut ctx))).is_err() {
                error!("finish callback of {id:?} panicked");
            }
        }
    }

    /// Ends a whole tree early. See [`CancelPolicy`].
    pub(crate) fn cancel_tree(
        &mut self,
        root: TransitionId,
        policy: CancelPolicy,
        scene: &mut Scene,
        follow_ups: &mut Vec<TransitionId>,
    ) {
        let nodes = self.subtree(root);

        if policy == CancelPolicy::Revert {
            let mut leaves: Vec<(u64, &TimeBased)> = nodes
                .iter()
                .filter_map(|&id| match &self.node(id).ok()?.kind {
                    TransitionKind::TimeBased(leaf) => leaf.snapshot.map(|s| (s.seq, leaf)),
                    _ => None,
                })
                .collect();
            // latest first, so the earliest snapshot is what remains
            leaves.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, leaf) in leaves {
                leaf.revert(scene);
            }
        }

        // children before parents
        for &id in nodes.iter().rev() {
            if !self.is_disposed(id) {
                self.finish(id, scene, follow_ups, true);
            }
        }
    }

    /// Frees every slot of the tree; old handles report `Finished`.
    pub(crate) fn release_tree(&mut self, root: TransitionId) {
        for id in self.subtree(root) {
            if let Some(slot) = self.slots.get_mut(id.index as usize) {
                slot.node = None;
                slot.generation += 1;
                self.free.push(id.index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Overlay, Panorama};

    fn scene() -> (Scene, PanoramaId) {
        let mut scene = Scene::new();
        let p = scene.add_panorama(Panorama::new("lobby", "lobby.jpg"));
        (scene, p)
    }

    fn run(arena: &mut TransitionArena, id: TransitionId, scene: &mut Scene) {
        arena.init(id, scene).unwrap();
        arena.start(id, scene).unwrap();
        arena.process(id, scene);
    }

    fn tick(arena: &mut TransitionArena, id: TransitionId, dt: f32, scene: &mut Scene) {
        let mut follow_ups = Vec::new();
        arena.on_process(id, dt, scene, &mut follow_ups).unwrap();
    }

    #[test]
    fn zero_duration_finishes_on_first_tick() {
        let (mut scene, p) = scene();
        let mut arena = TransitionArena::new();
        let id = arena.time_based(
            TimeBased::new(0.0, Tween::Zoom { fov: 30.0 }).with_target(ElementRef::Panorama(p)),
        );
        run(&mut arena, id, &mut scene);
        tick(&mut arena, id, 0.016, &mut scene);
        assert_eq!(arena.state(id), Some(TransitionState::Finished));
        assert_eq!(arena.progress(id), Some(1.0));
        assert_eq!(scene.orientation(p).unwrap().fov(), 30.0);
    }

    #[test]
    fn activate_fires_at_the_end_whatever_the_curve() {
        let (mut scene, a) = scene();
        let b = scene.add_panorama(Panorama::new("atrium", "atrium.jpg"));
        scene.activate(a);
        let mut arena = TransitionArena::new();
        let id = arena.time_based(
            TimeBased::new(1.0, Tween::Activate)
                .with_curve(Curve::Keyframes(vec![[0.0, 0.0], [1.0, 0.9]]))
                .with_target(ElementRef::Panorama(b)),
        );
        run(&mut arena, id, &mut scene);
        tick(&mut arena, id, 0.5, &mut scene);
        assert_eq!(scene.active(), Some(a));

        tick(&mut arena, id, 0.5, &mut scene);
        assert_eq!(arena.state(id), Some(TransitionState::Finished));
        assert_eq!(scene.active(), Some(b));
    }

    #[test]
    fn missing_target_fails_at_init() {
        let (scene, _) = scene();
        let mut arena = TransitionArena::new();
        let id = arena.time_based(TimeBased::new(1.0, Tween::Rotate { pan: 0.0, tilt: 0.0 }));
        assert_eq!(arena.init(id, &scene), Err(TransitionError::MissingTarget(id)));
        assert_eq!(arena.state(id), Some(TransitionState::NotStarted));
    }

    #[test]
    fn wrong_target_kind_is_rejected() {
        let (scene, p) = scene();
        let mut arena = TransitionArena::new();
        let target = ElementRef::Panorama(p);
        let id = arena.time_based(
            TimeBased::new(1.0, Tween::Fade { from: None, to: 1.0, release: OverlayRelease::Keep }).with_target(target),
        );
        assert_eq!(arena.init(id, &scene), Err(TransitionError::TargetMismatch { id, target }));
    }

    #[test]
    fn bad_leaf_deep_in_sequence_fails_before_anything_moves() {
        let (scene, p) = scene();
        let mut arena = TransitionArena::new();
        let ok = arena.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 20.0 }).with_target(ElementRef::Panorama(p)));
        let bad = arena.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 20.0 }));
        let seq = arena.sequential([Some(ok), Some(bad)]);
        assert_eq!(arena.init(seq, &scene), Err(TransitionError::MissingTarget(bad)));
        assert_eq!(arena.state(ok), Some(TransitionState::NotStarted));
    }

    #[test]
    fn leaf_inherits_causing_element_from_root() {
        let (mut scene, p) = scene();
        let mut arena = TransitionArena::new();
        let leaf = arena.time_based(TimeBased::new(1.0, Tween::Zoom { fov: 40.0 }));
        let root = arena.sequential([Some(leaf)]);
        arena.set_causing(root, Some(ElementRef::Panorama(p))).unwrap();
        run(&mut arena, root, &mut scene);
        tick(&mut arena, root, 1.0, &mut scene);
        assert_eq!(scene.orientation(p).unwrap().fov(), 40.0);
    }

    #[test]
    fn rotate_takes_the_short_way_round() {
        let (mut scene, p) = scene();
        scene.orientation_mut(p).unwrap().look_at(350.0, 0.0);
        let mut arena = TransitionArena::new();
        let id = arena.time_based(
            TimeBased::new(2.0, Tween::Rotate { pan: 10.0, tilt: 20.0 }).with_target(ElementRef::Panorama(p)),
        );
        run(&mut arena, id, &mut scene);
        tick(&mut arena, id, 1.0, &mut scene);
        let o = scene.orientation(p).unwrap();
        assert!(shortest_delta(o.pan(), 0.0).abs() < 1e-3, "pan {}", o.pan());
        assert!((o.tilt() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn fade_released_only_when_root_finishes() {
        let (mut scene, _) = scene();
        let overlay = scene.add_overlay(Overlay::new([0.0, 0.0, 0.0]));
        let mut arena = TransitionArena::new();
        let fade = arena.time_based(
            TimeBased::new(1.0, Tween::Fade { from: Some(0.0), to: 1.0, release: OverlayRelease::OnRootFinish })
                .with_target(ElementRef::Overlay(overlay)),
        );
        let wait = arena.time_based(TimeBased::new(1.0, Tween::Wait));
        let root = arena.sequential([Some(fade), Some(wait)]);
        let mut follow_ups = Vec::new();

        run(&mut arena, root, &mut scene);
        tick(&mut arena, root, 1.0, &mut scene);
        assert_eq!(arena.state(fade), Some(TransitionState::Finished));
        assert_eq!(scene.overlay(overlay).map(|o| o.alpha), Some(1.0));

        tick(&mut arena, root, 1.0, &mut scene);
        assert_eq!(arena.state(root), Some(TransitionState::Finished));
        assert!(scene.overlay(overlay).is_some());
        arena.finish(root, &mut scene, &mut follow_ups, false);
        assert!(scene.overlay(overlay).is_none());
    }

    #[test]
    fn root_walks_parent_links() {
        let mut arena = TransitionArena::new();
        let leaf = arena.time_based(TimeBased::new(1.0, Tween::Wait));
        let inner = arena.simultaneous([Some(leaf)]);
        let outer = arena.sequential([None, Some(inner)]);
        assert_eq!(arena.parent(leaf), Some(inner));
        assert_eq!(arena.root(leaf), outer);
        assert_eq!(arena.root(outer), outer);
    }

    #[test]
    fn child_cannot_have_two_parents() {
        let mut arena = TransitionArena::new();
        let leaf = arena.time_based(TimeBased::new(1.0, Tween::Wait));
        let first = arena.sequential([Some(leaf)]);
        let second = arena.simultaneous([Some(leaf)]);
        assert_eq!(arena.root(leaf), first);
        assert_eq!(arena.kind(second).map(|k| k.children().to_vec()), Some(vec![None]));
    }

    #[test]
    fn released_handles_read_as_finished() {
        let mut arena = TransitionArena::new();
        let leaf = arena.time_based(TimeBased::new(1.0, Tween::Wait));
        arena.release_tree(leaf);
        assert_eq!(arena.state(leaf), Some(TransitionState::Finished));
        let reused = arena.time_based(TimeBased::new(1.0, Tween::Wait));
        assert_ne!(reused, leaf);
        assert_eq!(arena.state(reused), Some(TransitionState::NotStarted));
        assert_eq!(arena.len(), 1);
    }
}
