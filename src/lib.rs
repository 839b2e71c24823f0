//! Headless core of the panorama tour viewer.
//!
//! - [`orientation`]: pan / tilt / fov / north with verify and change hooks
//! - [`hot_area`]: angular polygons and the per-panorama hit index
//! - [`transition`] and [`scheduler`]: time-based, sequential and
//!   simultaneous transitions driven by a per-tick delta
//! - [`scene`]: the context object owning panoramas, overlays and events
//! - [`config`] and [`tour`]: tour files and hot-area action planning
//!
//! Nothing in here touches a window or a GPU; the `panorama_tour` binary
//! supplies the camera, the projector and the frame tick.

pub mod angle;
pub mod config;
pub mod easing;
pub mod error;
pub mod events;
pub mod hot_area;
pub mod limits;
pub mod orientation;
pub mod projection;
pub mod scene;
pub mod scheduler;
pub mod tour;
pub mod transition;

pub use config::TourConfig;
pub use error::{ActionError, ConfigError, TransitionError};
pub use events::{EventBus, PanoramaEvent};
pub use hot_area::{AngularPolygon, HotArea, HotAreaAction, HotAreaId, HotAreaIndex};
pub use limits::OrientationLimits;
pub use orientation::{Camera, Orientation, OrientationField, Rotatable, RotationMode};
pub use projection::{Projector, ProjectionMode, ViewProjection};
pub use scene::{ElementRef, Overlay, OverlayId, Panorama, PanoramaId, Scene};
pub use scheduler::TransitionScheduler;
pub use tour::TransitionSettings;
pub use transition::{CancelPolicy, OverlayRelease, TimeBased, TransitionId, TransitionState, Tween};
