use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use glam::DVec2;

/// Named game timer. Lookups by name always hand back the same underlying timer.
#[derive(Clone)]
pub struct TimerHandle(Rc<TimerState>);

struct TimerState {
    name: String,
    elapsed: Cell<f64>,
    paused: Cell<bool>,
}

impl TimerHandle {
    fn new(name: &str) -> Self {
        Self(Rc::new(TimerState { name: name.to_string(), elapsed: Cell::new(0.0), paused: Cell::new(false) }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn elapsed(&self) -> f64 {
        self.0.elapsed.get()
    }

    pub fn restart(&self) {
        self.0.elapsed.set(0.0);
        self.0.paused.set(false);
    }

    pub fn pause(&self) {
        self.0.paused.set(true);
    }

    fn advance(&self, dt: f64) {
        if !self.0.paused.get() {
            self.0.elapsed.set(self.0.elapsed.get() + dt);
        }
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timer({}, {:.3}s)", self.0.name, self.elapsed())
    }
}

/// Tracked entity that scripts may reference by id.
#[derive(Clone)]
pub struct EntityHandle(Rc<EntityState>);

struct EntityState {
    id: String,
    hp: Cell<f64>,
    position: Cell<DVec2>,
}

impl EntityHandle {
    pub fn new(id: impl Into<String>, position: DVec2) -> Self {
        Self(Rc::new(EntityState {
            id: id.into(),
            hp: Cell::new(0.0),
            position: Cell::new(position),
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn hp(&self) -> f64 {
        self.0.hp.get()
    }

    pub fn set_hp(&self, hp: f64) {
        self.0.hp.set(hp);
    }

    /// Subtracts `amount` and returns the remaining HP, floored at zero.
    pub fn apply_damage(&self, amount: f64) -> f64 {
        let hp = (self.0.hp.get() - amount).max(0.0);
        self.0.hp.set(hp);
        hp
    }

    pub fn position(&self) -> DVec2 {
        self.0.position.get()
    }
}

impl PartialEq for EntityHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}, hp={})", self.0.id, self.hp())
    }
}

/// Registry of runtime objects that expressions can capture. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct HostObjects {
    timers: Rc<RefCell<BTreeMap<String, TimerHandle>>>,
    entities: Rc<RefCell<BTreeMap<String, EntityHandle>>>,
}

impl HostObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the timer registered under `name`, creating it on first use.
    pub fn timer(&self, name: &str) -> TimerHandle {
        self.timers.borrow_mut().entry(name.to_string()).or_insert_with(|| TimerHandle::new(name)).clone()
    }

    pub fn register_entity(&self, entity: EntityHandle) {
        self.entities.borrow_mut().insert(entity.id().to_string(), entity);
    }

    pub fn entity(&self, id: &str) -> Option<EntityHandle> {
        self.entities.borrow().get(id).cloned()
    }

    pub fn advance_timers(&self, dt: f64) {
        for timer in self.timers.borrow().values() {
            timer.advance(dt);
        }
    }

    /// Zeroes and unpauses every timer.
    pub fn restart_timers(&self) {
        for timer in self.timers.borrow().values() {
            timer.restart();
        }
    }
}
