//! Phase-oriented state machines driven by the frame scheduler.

mod cancel;
mod collab;
mod executor;
mod node;
mod pattern;
mod phase;
mod props;
mod scheduler;

use std::rc::Rc;

use thiserror::Error;

use crate::expr::EvalError;

pub use cancel::{CancelSource, CancelToken};
pub use collab::{CampaignLog, CampaignState, NullServices, PhaseClearCause, PhaseCompletion, PhaseServices};
pub use executor::{Executor, PhaseController};
pub use node::{start, Leaf, ParallelSM, SequentialSM, StateMachine};
pub use pattern::PatternSM;
pub use phase::PhaseSM;
pub use props::{BossConfig, PatternProps, PhaseProps, PhaseType};
pub use scheduler::{NextFrame, Scheduler};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SmError {
    /// Control flow: unwinds to the nearest phase boundary.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("{0} returned {1}, expected a {2}")]
    LeafType(&'static str, String, &'static str),
    #[error("phase declares more than one {0} block")]
    DuplicateBlock(&'static str),
    #[error("scheduler did not finish within {0} frames")]
    Stalled(u64),
}

impl SmError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SmError::Cancelled)
    }
}

/// Knobs the pattern loop reads; built from the runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmSettings {
    /// Frames waited before each phase so the previous phase's cleanup lands first. Zero disables.
    pub phase_buffer_frames: u64,
}

impl Default for SmSettings {
    fn default() -> Self {
        Self { phase_buffer_frames: 2 }
    }
}

/// Everything a running state machine needs, handed down the tree by value.
#[derive(Clone)]
pub struct SmContext {
    pub scheduler: Scheduler,
    pub executor: Rc<Executor>,
    pub campaign: Rc<dyn CampaignState>,
    pub services: Rc<dyn PhaseServices>,
    pub settings: SmSettings,
    pub token: CancelToken,
}

impl SmContext {
    pub fn new(
        scheduler: Scheduler,
        executor: Rc<Executor>,
        campaign: Rc<dyn CampaignState>,
        services: Rc<dyn PhaseServices>,
    ) -> Self {
        Self { scheduler, executor, campaign, services, settings: SmSettings::default(), token: CancelToken::none() }
    }

    pub fn with_settings(mut self, settings: SmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_token(&self, token: CancelToken) -> Self {
        Self { token, ..self.clone() }
    }
}
