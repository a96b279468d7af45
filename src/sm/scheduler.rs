use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::noop_waker_ref;

use super::{CancelToken, SmError};
use crate::time::FrameClock;

/// Single-threaded frame scheduler. Every live task is polled once per tick; tasks spawned during
/// a tick get their first poll in the same tick.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

struct Inner {
    clock: RefCell<FrameClock>,
    tasks: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    spawned: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
}

impl Scheduler {
    pub fn new(frame_time: f64) -> Self {
        Self {
            inner: Rc::new(Inner {
                clock: RefCell::new(FrameClock::new(frame_time)),
                tasks: RefCell::new(Vec::new()),
                spawned: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn frame(&self) -> u64 {
        self.inner.clock.borrow().frame()
    }

    pub fn frame_time(&self) -> f64 {
        self.inner.clock.borrow().frame_time()
    }

    pub fn seconds(&self) -> f64 {
        self.inner.clock.borrow().elapsed_seconds()
    }

    pub fn frames_for(&self, seconds: f64) -> u64 {
        self.inner.clock.borrow().frames_for(seconds)
    }

    pub fn pending(&self) -> usize {
        self.inner.tasks.borrow().len() + self.inner.spawned.borrow().len()
    }

    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        self.inner.spawned.borrow_mut().push(task.boxed_local());
    }

    pub fn tick(&self) {
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut live = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        live.retain_mut(|task| task.as_mut().poll(&mut cx).is_pending());
        loop {
            let mut fresh = std::mem::take(&mut *self.inner.spawned.borrow_mut());
            if fresh.is_empty() {
                break;
            }
            fresh.retain_mut(|task| task.as_mut().poll(&mut cx).is_pending());
            live.append(&mut fresh);
        }
        self.inner.tasks.borrow_mut().append(&mut live);
        self.inner.clock.borrow_mut().tick();
    }

    /// Spawns `future` and ticks until it resolves or `max_frames` have passed.
    pub fn run_until_complete<T: 'static>(
        &self,
        future: impl Future<Output = T> + 'static,
        max_frames: u64,
    ) -> Result<T, SmError> {
        let slot = Rc::new(RefCell::new(None));
        let out = Rc::clone(&slot);
        self.spawn(async move {
            let value = future.await;
            *out.borrow_mut() = Some(value);
        });
        for _ in 0..max_frames {
            self.tick();
            if let Some(value) = slot.borrow_mut().take() {
                return Ok(value);
            }
        }
        Err(SmError::Stalled(max_frames))
    }

    /// Resolves on the first poll after the current frame ends.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame { scheduler: self.clone(), started: self.frame() }
    }

    /// Waits `frames` frames, checking `token` on every resumption.
    pub async fn wait_frames(&self, frames: u64, token: &CancelToken) -> Result<(), SmError> {
        token.check()?;
        for _ in 0..frames {
            self.next_frame().await;
            token.check()?;
        }
        Ok(())
    }

    pub async fn wait_seconds(&self, seconds: f64, token: &CancelToken) -> Result<(), SmError> {
        self.wait_frames(self.frames_for(seconds), token).await
    }

    /// Checks `condition` once per frame until it holds.
    pub async fn wait_until(
        &self,
        mut condition: impl FnMut() -> Result<bool, SmError>,
        token: &CancelToken,
    ) -> Result<(), SmError> {
        loop {
            token.check()?;
            if condition()? {
                return Ok(());
            }
            self.next_frame().await;
        }
    }

    /// Waits until `token` is cancelled, then reports the cancellation.
    pub async fn wait_cancelled(&self, token: &CancelToken) -> Result<(), SmError> {
        loop {
            token.check()?;
            self.next_frame().await;
        }
    }

    /// Runs `callback` after `seconds` unless `token` is cancelled first.
    pub fn wait_then(&self, seconds: f64, token: CancelToken, callback: impl FnOnce() + 'static) {
        let scheduler = self.clone();
        self.spawn(async move {
            if scheduler.wait_seconds(seconds, &token).await.is_ok() {
                callback();
            }
        });
    }
}

pub struct NextFrame {
    scheduler: Scheduler,
    started: u64,
}

impl Future for NextFrame {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.scheduler.frame() > self.started {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sm::CancelSource;
    use std::cell::Cell;

    #[test]
    fn waits_resolve_on_the_expected_frame() {
        let scheduler = Scheduler::new(0.1);
        let done_at = Rc::new(Cell::new(None));
        let (s, d) = (scheduler.clone(), Rc::clone(&done_at));
        scheduler.spawn(async move {
            s.wait_seconds(0.3, &CancelToken::none()).await.expect("not cancelled");
            d.set(Some(s.frame()));
        });
        for _ in 0..5 {
            scheduler.tick();
        }
        assert_eq!(done_at.get(), Some(3));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn cancellation_unwinds_waits() {
        let scheduler = Scheduler::new(0.1);
        let source = CancelSource::new();
        let token = source.token();
        let s = scheduler.clone();
        let result = Rc::new(RefCell::new(None));
        let r = Rc::clone(&result);
        scheduler.spawn(async move {
            *r.borrow_mut() = Some(s.wait_seconds(10.0, &token).await);
        });
        scheduler.tick();
        source.cancel();
        scheduler.tick();
        assert_eq!(*result.borrow(), Some(Err(SmError::Cancelled)));
    }

    #[test]
    fn run_until_complete_reports_stalls() {
        let scheduler = Scheduler::new(0.1);
        let s = scheduler.clone();
        let value = scheduler.run_until_complete(async move { s.wait_frames(2, &CancelToken::none()).await.map(|_| 7) }, 10);
        assert_eq!(value, Ok(Ok(7)));
        let s = scheduler.clone();
        let stuck = scheduler.run_until_complete(async move { s.wait_cancelled(&CancelToken::none()).await }, 3);
        assert_eq!(stuck, Err(SmError::Stalled(3)));
    }
}
