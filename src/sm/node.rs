use std::rc::Rc;

use futures::future::{try_join_all, FutureExt, LocalBoxFuture};

use super::{pattern, phase, PatternSM, PhaseSM, SmContext, SmError};
use crate::events::SmEvent;
use crate::expr::{Callable, Param, Value, ValueType};

/// Runs its children together after an optional delay. Non-blocking actions detach their
/// children onto the scheduler and return at once.
pub struct ParallelSM {
    pub children: Vec<Rc<StateMachine>>,
    pub wait: f64,
    pub blocking: bool,
}

/// Runs its children one after another after an optional delay.
pub struct SequentialSM {
    pub children: Vec<Rc<StateMachine>>,
    pub wait: f64,
}

impl ParallelSM {
    pub fn new(children: Vec<StateMachine>, wait: f64, blocking: bool) -> Self {
        Self { children: wrap(children), wait, blocking }
    }
}

impl SequentialSM {
    pub fn new(children: Vec<StateMachine>, wait: f64) -> Self {
        Self { children: wrap(children), wait }
    }
}

pub enum Leaf {
    /// Waits the number of seconds the expression yields.
    Wait(Callable),
    /// Checks the expression every frame until it holds.
    WaitUntil(Callable),
    Emit { label: String, value: Callable },
    ShiftPhase,
}

impl Leaf {
    /// Parameters every leaf expression is compiled against: scheduler seconds and executor HP.
    pub fn params() -> Vec<Param> {
        vec![Param::new("t", ValueType::Float), Param::new("hp", ValueType::Float)]
    }
}

pub enum StateMachine {
    Pattern(PatternSM),
    Phase(PhaseSM),
    Parallel(ParallelSM),
    Sequential(SequentialSM),
    /// Runs after a phase ends without its parent being cancelled.
    End(ParallelSM),
    /// Spawned on the parent token when a phase is cut short.
    Finish(Rc<StateMachine>),
    Leaf(Leaf),
}

impl StateMachine {
    pub fn action(children: Vec<StateMachine>) -> Self {
        StateMachine::Parallel(ParallelSM::new(children, 0.0, true))
    }

    pub fn saction(children: Vec<StateMachine>) -> Self {
        StateMachine::Sequential(SequentialSM::new(children, 0.0))
    }

    pub fn end(children: Vec<StateMachine>) -> Self {
        StateMachine::End(ParallelSM::new(children, 0.0, true))
    }

    pub fn finish(child: StateMachine) -> Self {
        StateMachine::Finish(Rc::new(child))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StateMachine::Pattern(_) => "pattern",
            StateMachine::Phase(_) => "phase",
            StateMachine::Parallel(_) => "action",
            StateMachine::Sequential(_) => "saction",
            StateMachine::End(_) => "end",
            StateMachine::Finish(_) => "finish",
            StateMachine::Leaf(_) => "leaf",
        }
    }
}

fn wrap(children: Vec<StateMachine>) -> Vec<Rc<StateMachine>> {
    children.into_iter().map(Rc::new).collect()
}

/// Starts `node` under `ctx`. Nothing runs until the returned future is polled by the scheduler.
pub fn start(node: Rc<StateMachine>, ctx: SmContext) -> LocalBoxFuture<'static, Result<(), SmError>> {
    async move {
        match &*node {
            StateMachine::Pattern(sm) => pattern::run(sm, &ctx).await,
            StateMachine::Phase(sm) => phase::run(sm, 0, &ctx).await,
            StateMachine::Parallel(action) | StateMachine::End(action) => run_parallel(action, &ctx).await,
            StateMachine::Sequential(action) => {
                ctx.scheduler.wait_seconds(action.wait, &ctx.token).await?;
                for child in &action.children {
                    start(Rc::clone(child), ctx.clone()).await?;
                }
                Ok(())
            }
            StateMachine::Finish(child) => start(Rc::clone(child), ctx.clone()).await,
            StateMachine::Leaf(leaf) => run_leaf(leaf, &ctx).await,
        }
    }
    .boxed_local()
}

/// Runs `node` as a detached scheduler task. Only real failures are logged.
pub(crate) fn detach(node: Rc<StateMachine>, ctx: SmContext, what: &'static str) {
    let task = start(node, ctx.clone());
    ctx.scheduler.spawn(async move {
        if let Err(err) = task.await {
            if !err.is_cancellation() {
                tracing::warn!(%err, what, "detached state machine failed");
            }
        }
    });
}

async fn run_parallel(action: &ParallelSM, ctx: &SmContext) -> Result<(), SmError> {
    ctx.scheduler.wait_seconds(action.wait, &ctx.token).await?;
    if action.blocking {
        try_join_all(action.children.iter().map(|child| start(Rc::clone(child), ctx.clone()))).await?;
    } else {
        for child in &action.children {
            detach(Rc::clone(child), ctx.clone(), "action");
        }
    }
    Ok(())
}

fn leaf_args(ctx: &SmContext) -> [Value; 2] {
    [Value::Float(ctx.scheduler.seconds()), Value::Float(ctx.executor.hp())]
}

async fn run_leaf(leaf: &Leaf, ctx: &SmContext) -> Result<(), SmError> {
    ctx.token.check()?;
    match leaf {
        Leaf::Wait(seconds) => {
            let value = seconds.invoke(&leaf_args(ctx))?;
            let seconds = value.as_float().ok_or_else(|| SmError::LeafType("wait", value.to_string(), "Float"))?;
            ctx.scheduler.wait_seconds(seconds, &ctx.token).await
        }
        Leaf::WaitUntil(condition) => {
            let check = || {
                let value = condition.invoke(&leaf_args(ctx))?;
                value.as_bool().ok_or_else(|| SmError::LeafType("wait_until", value.to_string(), "Bool"))
            };
            ctx.scheduler.wait_until(check, &ctx.token).await
        }
        Leaf::Emit { label, value } => {
            let value = value.invoke(&leaf_args(ctx))?;
            tracing::trace!(label = %label, value = %value, "emit");
            ctx.executor.emit(SmEvent::Emitted { label: label.clone(), value });
            Ok(())
        }
        Leaf::ShiftPhase => {
            ctx.executor.shift_phase();
            ctx.token.check()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::CookingContext;
    use crate::expr::compile_text;
    use crate::host::{EntityHandle, HostObjects};
    use crate::sm::{CampaignLog, Executor, NullServices, Scheduler};
    use glam::DVec2;

    fn leaf_fn(text: &str, returns: ValueType) -> Callable {
        compile_text(&mut CookingContext::direct(), &HostObjects::new(), text, &Leaf::params(), returns).expect("compile")
    }

    fn context() -> SmContext {
        let exec = Executor::new(EntityHandle::new("e", DVec2::ZERO));
        SmContext::new(Scheduler::new(0.1), exec, Rc::new(CampaignLog::default()), Rc::new(NullServices))
    }

    fn emit(label: &str, text: &str) -> StateMachine {
        StateMachine::Leaf(Leaf::Emit { label: label.into(), value: leaf_fn(text, ValueType::Float) })
    }

    fn wait(text: &str) -> StateMachine {
        StateMachine::Leaf(Leaf::Wait(leaf_fn(text, ValueType::Float)))
    }

    fn emitted_at(ctx: &SmContext) -> Vec<(String, Value)> {
        ctx.executor
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                SmEvent::Emitted { label, value } => Some((label, value)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sequential_children_wait_in_turn() {
        let ctx = context();
        let tree = Rc::new(StateMachine::saction(vec![wait("0.2"), emit("a", "t"), wait("0.3"), emit("b", "t")]));
        ctx.scheduler.run_until_complete(start(tree, ctx.clone()), 20).expect("finished").expect("ok");
        let events = emitted_at(&ctx);
        assert_eq!(events.len(), 2);
        assert!((events[0].1.as_float().expect("float") - 0.2).abs() < 1e-9);
        assert!((events[1].1.as_float().expect("float") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn parallel_children_share_frames() {
        let ctx = context();
        let tree = Rc::new(StateMachine::action(vec![
            StateMachine::saction(vec![wait("0.3"), emit("slow", "t")]),
            StateMachine::saction(vec![wait("0.1"), emit("fast", "t")]),
        ]));
        ctx.scheduler.run_until_complete(start(tree, ctx.clone()), 20).expect("finished").expect("ok");
        let labels: Vec<String> = emitted_at(&ctx).into_iter().map(|(label, _)| label).collect();
        assert_eq!(labels, vec!["fast".to_string(), "slow".to_string()]);
    }

    #[test]
    fn wait_until_polls_each_frame() {
        let ctx = context();
        let cond = StateMachine::Leaf(Leaf::WaitUntil(leaf_fn("t >= 0.25", ValueType::Bool)));
        let tree = Rc::new(StateMachine::saction(vec![cond, emit("done", "t")]));
        ctx.scheduler.run_until_complete(start(tree, ctx.clone()), 20).expect("finished").expect("ok");
        let events = emitted_at(&ctx);
        assert!((events[0].1.as_float().expect("float") - 0.3).abs() < 1e-9);
    }
}
