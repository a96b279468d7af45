use std::cell::{Cell, RefCell};

use super::{BossConfig, PhaseProps, PhaseType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseClearCause {
    Hp,
    Timeout,
    Cancelled,
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCompletion {
    pub index: usize,
    pub title: Option<String>,
    pub phase_type: Option<PhaseType>,
    pub cause: PhaseClearCause,
    pub frames: u64,
}

/// Campaign bookkeeping the phase engine reports into.
pub trait CampaignState {
    fn phase_end(&self, completion: PhaseCompletion);
    fn open_boss(&self, boss: &BossConfig);
    fn close_boss(&self, boss: &BossConfig);
    fn set_lenience(&self, lenient: bool);
}

/// Presentation hooks. Fire and forget; nothing waits on them.
pub trait PhaseServices {
    fn set_bgm(&self, _track: &str) {}
    fn set_boss_lives(&self, _lives: usize) {}
    fn cutin(&self, _props: &PhaseProps) {}
    fn autocull(&self, _props: &PhaseProps) {}
    fn phase_enter(&self, _index: usize, _props: &PhaseProps) {}
    fn phase_exit(&self, _index: usize) {}
}

pub struct NullServices;

impl PhaseServices for NullServices {}

/// Campaign that just remembers what it was told.
#[derive(Default)]
pub struct CampaignLog {
    completions: RefCell<Vec<PhaseCompletion>>,
    bosses: RefCell<Vec<String>>,
    closed: RefCell<Vec<String>>,
    lenient: Cell<bool>,
}

impl CampaignLog {
    pub fn completions(&self) -> Vec<PhaseCompletion> {
        self.completions.borrow().clone()
    }

    pub fn causes(&self) -> Vec<PhaseClearCause> {
        self.completions.borrow().iter().map(|c| c.cause).collect()
    }

    pub fn opened_bosses(&self) -> Vec<String> {
        self.bosses.borrow().clone()
    }

    pub fn closed_bosses(&self) -> Vec<String> {
        self.closed.borrow().clone()
    }

    pub fn is_lenient(&self) -> bool {
        self.lenient.get()
    }
}

impl CampaignState for CampaignLog {
    fn phase_end(&self, completion: PhaseCompletion) {
        self.completions.borrow_mut().push(completion);
    }

    fn open_boss(&self, boss: &BossConfig) {
        self.bosses.borrow_mut().push(boss.key.clone());
    }

    fn close_boss(&self, boss: &BossConfig) {
        self.closed.borrow_mut().push(boss.key.clone());
    }

    fn set_lenience(&self, lenient: bool) {
        self.lenient.set(lenient);
    }
}
