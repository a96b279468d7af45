use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::SmError;

/// Owner side of a cancellation flag.
#[derive(Clone, Default)]
pub struct CancelSource {
    flag: Rc<Cell<bool>>,
}

impl CancelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken { flags: Rc::new(vec![Rc::clone(&self.flag)]) }
    }
}

/// Observer side. A linked token is cancelled as soon as any of its sources is.
#[derive(Clone, Default)]
pub struct CancelToken {
    flags: Rc<Vec<Rc<Cell<bool>>>>,
}

impl CancelToken {
    /// A token nothing can cancel.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn linked(tokens: &[&CancelToken]) -> Self {
        let mut flags: Vec<Rc<Cell<bool>>> = Vec::new();
        for token in tokens {
            for flag in token.flags.iter() {
                if !flags.iter().any(|known| Rc::ptr_eq(known, flag)) {
                    flags.push(Rc::clone(flag));
                }
            }
        }
        Self { flags: Rc::new(flags) }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|flag| flag.get())
    }

    pub fn check(&self) -> Result<(), SmError> {
        if self.is_cancelled() {
            Err(SmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelToken(sources={}, cancelled={})", self.flags.len(), self.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linked_tokens_follow_every_source() {
        let parent = CancelSource::new();
        let local = CancelSource::new();
        let joint = CancelToken::linked(&[&parent.token(), &local.token()]);
        assert!(!joint.is_cancelled());
        local.cancel();
        assert!(joint.is_cancelled());
        assert!(!parent.token().is_cancelled());
        assert_eq!(joint.check(), Err(SmError::Cancelled));
    }

    #[test]
    fn nested_links_reach_the_root() {
        let root = CancelSource::new();
        let mid = CancelToken::linked(&[&root.token(), &CancelSource::new().token()]);
        let leaf = CancelToken::linked(&[&mid, &CancelToken::none()]);
        root.cancel();
        assert!(leaf.is_cancelled());
        assert!(!CancelToken::none().is_cancelled());
    }
}
