use std::fmt;

use crate::expr::Value;
use crate::sm::PhaseClearCause;

#[derive(Debug, Clone, PartialEq)]
pub enum SmEvent {
    PhaseStarted { index: usize, title: Option<String> },
    PhaseEnded { index: usize, cause: PhaseClearCause },
    PhaseShifted,
    Emitted { label: String, value: Value },
}

impl fmt::Display for SmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmEvent::PhaseStarted { index, title } => {
                write!(f, "PhaseStarted index={} title={}", index, title.as_deref().unwrap_or("-"))
            }
            SmEvent::PhaseEnded { index, cause } => write!(f, "PhaseEnded index={index} cause={cause:?}"),
            SmEvent::PhaseShifted => f.write_str("PhaseShifted"),
            SmEvent::Emitted { label, value } => write!(f, "Emitted {label}={value}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<SmEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: SmEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<SmEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
