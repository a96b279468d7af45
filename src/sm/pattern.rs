use super::{phase, PatternProps, PhaseSM, SmContext, SmError};

/// An ordered list of phases, usually one boss fight.
pub struct PatternSM {
    pub props: PatternProps,
    phases: Vec<PhaseSM>,
}

impl PatternSM {
    pub fn new(mut phases: Vec<PhaseSM>, props: PatternProps) -> Self {
        for phase in &mut phases {
            phase.props.inherit(&props);
        }
        Self { props, phases }
    }

    pub fn phases(&self) -> &[PhaseSM] {
        &self.phases
    }

    /// Spell phases left from `from` on, shown as boss lives.
    pub fn remaining_lives(&self, from: usize) -> usize {
        self.phases.iter().skip(from).filter(|phase| phase.props.is_spell()).count()
    }
}

pub(crate) async fn run(pattern: &PatternSM, ctx: &SmContext) -> Result<(), SmError> {
    let boss = pattern.props.boss.as_ref();
    if let Some(boss) = boss {
        ctx.campaign.open_boss(boss);
    }
    let result = run_phases(pattern, ctx).await;
    if let Some(boss) = boss {
        ctx.services.set_boss_lives(0);
        ctx.campaign.close_boss(boss);
    }
    result
}

async fn run_phases(pattern: &PatternSM, ctx: &SmContext) -> Result<(), SmError> {
    let mut next = ctx.executor.controller().next_phase(None);
    while let Some(index) = next.filter(|index| *index < pattern.phases.len()) {
        let phase = &pattern.phases[index];
        if phase.props.skip {
            tracing::trace!(index, "skipping phase");
        } else {
            if ctx.settings.phase_buffer_frames > 0 {
                ctx.scheduler.wait_frames(ctx.settings.phase_buffer_frames, &ctx.token).await?;
            }
            ctx.token.check()?;
            if let Some(track) = pattern.props.bgms.get(index) {
                ctx.services.set_bgm(track);
            }
            if index > 0 && pattern.props.boss.is_some() {
                ctx.services.set_boss_lives(pattern.remaining_lives(index));
            }
            phase::run(phase, index, ctx).await?;
        }
        next = ctx.executor.controller().next_phase(Some(index));
    }
    Ok(())
}
