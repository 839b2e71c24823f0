// events.rs — context-owned observer lists
//
// subscribe() callbacks run immediately inside emit(), FIFO. Every emitted
// event is also queued; the host drains it with poll() once per frame.
// Subscriptions live as long as the bus (and so the scene) that owns them.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::{error, warn};

use crate::hot_area::HotAreaId;
use crate::scene::{OverlayId, PanoramaId};
use crate::transition::TransitionId;

/// Maximum events in queue before the oldest are evicted.
const MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum PanoramaEvent {
    ActivePanoramaChanged {
        from: Option<PanoramaId>,
        to: PanoramaId,
    },
    HotAreaEntered {
        panorama: PanoramaId,
        area: HotAreaId,
    },
    HotAreaExited {
        panorama: PanoramaId,
        area: HotAreaId,
    },
    TransitionStarted(TransitionId),
    TransitionFinished {
        id: TransitionId,
        cancelled: bool,
    },
    /// The overlay is gone from the scene; drop whatever draws it.
    OverlayReleased(OverlayId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&PanoramaEvent)>;

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<(SubscriptionId, Callback)>,
    queue: VecDeque<PanoramaEvent>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&PanoramaEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Runs every subscriber, then queues the event for `poll()`.
    ///
    /// A panicking subscriber is logged and skipped; the rest still run.
    pub fn emit(&mut self, event: PanoramaEvent) {
        for (id, callback) in &mut self.subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!("event subscriber {id:?} panicked on {event:?}");
            }
        }

        if self.queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = self.queue.len() / 2;
            warn!("event queue full ({} events), evicting oldest {}", self.queue.len(), evict_count);
            self.queue.drain(..evict_count);
        }
        self.queue.push_back(event);
    }

    /// All events emitted since the last poll, oldest first.
    pub fn poll(&mut self) -> Vec<PanoramaEvent> {
        self.queue.drain(..).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.queue.clear();
    }
}
