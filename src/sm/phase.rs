use std::cell::Cell;
use std::rc::Rc;

use super::node::{self, StateMachine};
use super::{CancelSource, CancelToken, PhaseClearCause, PhaseCompletion, PhaseProps, SmContext, SmError};
use crate::events::SmEvent;

/// A unit of a pattern that runs its children until they finish, the phase times out, the
/// executor runs out of HP, or something cancels it.
pub struct PhaseSM {
    pub props: PhaseProps,
    children: Vec<Rc<StateMachine>>,
    end: Option<Rc<StateMachine>>,
    finish: Option<Rc<StateMachine>>,
}

impl PhaseSM {
    /// Pulls the `end` and `finish` blocks out of `children`. Each may appear at most once.
    pub fn new(children: Vec<StateMachine>, props: PhaseProps) -> Result<Self, SmError> {
        let mut end = None;
        let mut finish = None;
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                StateMachine::End(action) => {
                    if end.replace(Rc::new(StateMachine::End(action))).is_some() {
                        return Err(SmError::DuplicateBlock("end"));
                    }
                }
                StateMachine::Finish(inner) => {
                    if finish.replace(inner).is_some() {
                        return Err(SmError::DuplicateBlock("finish"));
                    }
                }
                other => kept.push(Rc::new(other)),
            }
        }
        Ok(Self { props, children: kept, end, finish })
    }

    pub fn children(&self) -> &[Rc<StateMachine>] {
        &self.children
    }

    pub fn has_end(&self) -> bool {
        self.end.is_some()
    }

    pub fn has_finish(&self) -> bool {
        self.finish.is_some()
    }
}

pub(crate) async fn run(phase: &PhaseSM, index: usize, ctx: &SmContext) -> Result<(), SmError> {
    ctx.token.check()?;
    let props = &phase.props;
    let exec = &ctx.executor;
    ctx.services.phase_enter(index, props);
    if props.cutin {
        ctx.services.cutin(props);
    }
    // A phase without an HP bar leaves the entity at zero, where damage cannot end it.
    exec.entity().set_hp(props.hp.max(0.0));
    if props.lenient {
        ctx.campaign.set_lenience(true);
    }
    exec.emit(SmEvent::PhaseStarted { index, title: props.title.clone() });
    tracing::debug!(index, title = props.title.as_deref().unwrap_or(""), "phase started");

    let local = CancelSource::new();
    let joint = CancelToken::linked(&[&ctx.token, &local.token()]);
    exec.set_phase_shifter(Some(local.clone()));
    let timed_out = Rc::new(Cell::new(false));
    if props.timeout > 0.0 {
        let (flag, source) = (Rc::clone(&timed_out), local.clone());
        ctx.scheduler.wait_then(props.timeout, joint.clone(), move || {
            flag.set(true);
            source.cancel();
        });
    }
    let started = ctx.scheduler.frame();
    let outcome = run_children(phase, &ctx.with_token(joint)).await;
    exec.set_phase_shifter(None);
    if props.lenient {
        ctx.campaign.set_lenience(false);
    }
    let cause = match &outcome {
        Ok(()) => PhaseClearCause::Cleared,
        Err(SmError::Cancelled) => {
            if exec.hp() <= 0.0 && props.hp > 0.0 {
                PhaseClearCause::Hp
            } else if timed_out.get() {
                PhaseClearCause::Timeout
            } else {
                PhaseClearCause::Cancelled
            }
        }
        Err(_) => {
            local.cancel();
            return outcome;
        }
    };
    // Retires the timeout task if it has not fired.
    local.cancel();
    if props.autocull {
        ctx.services.autocull(props);
    }
    if cause != PhaseClearCause::Cleared && exec.allow_finish_calls() {
        if let Some(finish) = &phase.finish {
            node::detach(Rc::clone(finish), ctx.clone(), "finish");
        }
    }
    let frames = ctx.scheduler.frame() - started;
    tracing::debug!(index, ?cause, frames, "phase ended");
    ctx.campaign.phase_end(PhaseCompletion {
        index,
        title: props.title.clone(),
        phase_type: props.phase_type,
        cause,
        frames,
    });
    exec.emit(SmEvent::PhaseEnded { index, cause });
    ctx.services.phase_exit(index);
    ctx.token.check()?;
    if let Some(end) = &phase.end {
        node::start(Rc::clone(end), ctx.clone()).await?;
    }
    Ok(())
}

async fn run_children(phase: &PhaseSM, ctx: &SmContext) -> Result<(), SmError> {
    for child in &phase.children {
        node::start(Rc::clone(child), ctx.clone()).await?;
    }
    if phase.props.hold {
        ctx.scheduler.wait_cancelled(&ctx.token).await?;
    }
    ctx.token.check()
}
