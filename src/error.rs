// error.rs — error taxonomy for the tour core

use std::path::PathBuf;

use thiserror::Error;

use crate::scene::ElementRef;
use crate::transition::{TransitionId, TransitionState};

/// Configuration errors raised while driving transitions.
///
/// Transient problems (a camera that is not there yet, a dropped target)
/// never show up here; those degrade to a no-op for the tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("transition {0:?} needs a target element but none was given")]
    MissingTarget(TransitionId),

    #[error("transition {id:?} cannot animate {target:?}")]
    TargetMismatch { id: TransitionId, target: ElementRef },

    #[error("transition {id:?} is {state:?}, expected {expected:?}")]
    InvalidState {
        id: TransitionId,
        state: TransitionState,
        expected: TransitionState,
    },

    #[error("transition {0:?} is a child of another transition")]
    NotRoot(TransitionId),

    #[error("unknown transition {0:?}")]
    UnknownTransition(TransitionId),
}

/// Errors raised while loading a tour file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tour: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tour has no panoramas")]
    Empty,

    #[error("panorama {0:?} is defined twice")]
    DuplicatePanorama(String),

    #[error("unknown panorama {name:?} referenced from {context}")]
    UnknownPanorama { name: String, context: String },

    #[error("panorama {panorama:?} has an invalid {field} range")]
    InvalidLimits { panorama: String, field: &'static str },
}

/// Errors raised while turning a hot-area action into a running transition.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
