use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use super::CancelSource;
use crate::events::{EventBus, SmEvent};
use crate::host::EntityHandle;

/// Decides which phase runs next. Defaults to walking phases in order.
#[derive(Debug, Default)]
pub struct PhaseController {
    forced: Option<usize>,
    stopped: bool,
}

impl PhaseController {
    /// The next phase after `current` (`None` before the first). `None` stops the pattern.
    pub fn next_phase(&mut self, current: Option<usize>) -> Option<usize> {
        if self.stopped {
            return None;
        }
        if let Some(forced) = self.forced.take() {
            return Some(forced);
        }
        Some(current.map_or(0, |index| index + 1))
    }

    /// Makes the next lookup return `index` once.
    pub fn force_next(&mut self, index: usize) {
        self.forced = Some(index);
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }
}

/// The entity a pattern runs on, with the hooks phases install on it.
pub struct Executor {
    entity: EntityHandle,
    controller: RefCell<PhaseController>,
    phase_shifter: RefCell<Option<CancelSource>>,
    allow_finish_calls: Cell<bool>,
    events: RefCell<EventBus>,
}

impl Executor {
    pub fn new(entity: EntityHandle) -> Rc<Self> {
        Rc::new(Self {
            entity,
            controller: RefCell::new(PhaseController::default()),
            phase_shifter: RefCell::new(None),
            allow_finish_calls: Cell::new(true),
            events: RefCell::new(EventBus::default()),
        })
    }

    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    pub fn hp(&self) -> f64 {
        self.entity.hp()
    }

    /// Damages the entity. Dropping to zero HP ends the running phase; damage taken while the
    /// entity already has none (a phase without an HP bar) does not.
    pub fn apply_damage(&self, amount: f64) -> f64 {
        let before = self.entity.hp();
        let hp = self.entity.apply_damage(amount);
        if before > 0.0 && hp <= 0.0 {
            if let Some(shifter) = self.phase_shifter.borrow().as_ref() {
                shifter.cancel();
            }
        }
        hp
    }

    /// Ends the running phase early. Returns false when no phase is running.
    pub fn shift_phase(&self) -> bool {
        let shifter = self.phase_shifter.borrow().clone();
        match shifter {
            Some(shifter) => {
                shifter.cancel();
                self.emit(SmEvent::PhaseShifted);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_phase_shifter(&self, shifter: Option<CancelSource>) {
        *self.phase_shifter.borrow_mut() = shifter;
    }

    pub fn controller(&self) -> RefMut<'_, PhaseController> {
        self.controller.borrow_mut()
    }

    pub fn allow_finish_calls(&self) -> bool {
        self.allow_finish_calls.get()
    }

    pub fn set_allow_finish_calls(&self, allow: bool) {
        self.allow_finish_calls.set(allow);
    }

    pub fn emit(&self, event: SmEvent) {
        self.events.borrow_mut().push(event);
    }

    pub fn drain_events(&self) -> Vec<SmEvent> {
        self.events.borrow_mut().drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    #[test]
    fn controller_walks_then_obeys_forced_jumps() {
        let mut controller = PhaseController::default();
        assert_eq!(controller.next_phase(None), Some(0));
        assert_eq!(controller.next_phase(Some(0)), Some(1));
        controller.force_next(4);
        assert_eq!(controller.next_phase(Some(1)), Some(4));
        assert_eq!(controller.next_phase(Some(4)), Some(5));
        controller.stop();
        assert_eq!(controller.next_phase(Some(5)), None);
    }

    #[test]
    fn lethal_damage_cancels_the_phase() {
        let exec = Executor::new(EntityHandle::new("boss", DVec2::ZERO));
        exec.entity().set_hp(10.0);
        let shifter = CancelSource::new();
        exec.set_phase_shifter(Some(shifter.clone()));
        assert_eq!(exec.apply_damage(4.0), 6.0);
        assert!(!shifter.is_cancelled());
        assert_eq!(exec.apply_damage(20.0), 0.0);
        assert!(shifter.is_cancelled());
    }

    #[test]
    fn damage_at_zero_hp_leaves_the_phase_running() {
        let exec = Executor::new(EntityHandle::new("boss", DVec2::ZERO));
        let shifter = CancelSource::new();
        exec.set_phase_shifter(Some(shifter.clone()));
        assert_eq!(exec.apply_damage(1.0), 0.0);
        assert!(!shifter.is_cancelled());
    }

    #[test]
    fn shift_without_phase_is_a_no_op() {
        let exec = Executor::new(EntityHandle::new("boss", DVec2::ZERO));
        assert!(!exec.shift_phase());
        assert!(exec.drain_events().is_empty());
    }
}
