//! Periodic session re-validation shared by all mounted protected views
//!
//! One timer serves every view: it starts when the first view attaches and is
//! torn down when the last [`PollingHandle`] is dropped. A tick that arrives
//! while the previous check is still running is skipped, never queued.

use crate::runtime;
use futures::future::{AbortHandle, LocalBoxFuture, abortable};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};

type CheckFn = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// Tick counters, mostly useful for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollingStats {
    pub checks_started: u64,
    pub checks_finished: u64,
    pub ticks_skipped: u64,
}

#[derive(Default)]
struct State {
    subscribers: usize,
    timer: Option<AbortHandle>,
}

/// Reference-counted polling timer
#[derive(Clone)]
pub struct PollingScheduler {
    interval: Duration,
    check: CheckFn,
    state: Rc<RefCell<State>>,
    busy: Rc<Cell<bool>>,
    stats: Rc<Cell<PollingStats>>,
}

impl PollingScheduler {
    /// Create a scheduler that runs `check` every `interval` while attached.
    pub fn new<F>(interval: Duration, check: F) -> Self
    where
        F: Fn() -> LocalBoxFuture<'static, ()> + 'static,
    {
        Self {
            interval,
            check: Rc::new(check),
            state: Rc::new(RefCell::new(State::default())),
            busy: Rc::new(Cell::new(false)),
            stats: Rc::new(Cell::new(PollingStats::default())),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register a view. The timer starts with the first registration.
    pub fn attach(&self) -> PollingHandle {
        let mut state = self.state.borrow_mut();
        state.subscribers += 1;

        if state.timer.is_none() {
            debug!(interval_secs = self.interval.as_secs(), "Starting session polling");
            let (ticker, handle) = abortable(tick_loop(
                self.interval,
                Rc::clone(&self.check),
                Rc::clone(&self.busy),
                Rc::clone(&self.stats),
            ));
            runtime::spawn_local(async move {
                let _ = ticker.await;
            });
            state.timer = Some(handle);
        }

        PollingHandle {
            scheduler: self.clone(),
        }
    }

    /// Whether the timer is currently running
    pub fn is_running(&self) -> bool {
        self.state.borrow().timer.is_some()
    }

    /// Number of attached views
    pub fn subscribers(&self) -> usize {
        self.state.borrow().subscribers
    }

    pub fn stats(&self) -> PollingStats {
        self.stats.get()
    }

    fn detach(&self) {
        let mut state = self.state.borrow_mut();
        state.subscribers = state.subscribers.saturating_sub(1);

        if state.subscribers == 0 {
            if let Some(timer) = state.timer.take() {
                debug!("Last protected view detached; stopping session polling");
                timer.abort();
            }
        }
    }
}

/// A view's registration with the scheduler. Dropping it detaches the view.
pub struct PollingHandle {
    scheduler: PollingScheduler,
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.scheduler.detach();
    }
}

async fn tick_loop(
    interval: Duration,
    check: CheckFn,
    busy: Rc<Cell<bool>>,
    stats: Rc<Cell<PollingStats>>,
) {
    loop {
        runtime::sleep(interval).await;

        if busy.get() {
            debug!("Previous session check still running; skipping tick");
            update(&stats, |s| s.ticks_skipped += 1);
            continue;
        }

        trace!("Session polling tick");
        busy.set(true);
        update(&stats, |s| s.checks_started += 1);

        // Runs detached: stopping the timer never aborts a check in progress.
        let run = check();
        let busy = Rc::clone(&busy);
        let stats = Rc::clone(&stats);
        runtime::spawn_local(async move {
            let _done = BusyGuard(busy);
            run.await;
            update(&stats, |s| s.checks_finished += 1);
        });
    }
}

fn update(stats: &Cell<PollingStats>, f: impl FnOnce(&mut PollingStats)) {
    let mut current = stats.get();
    f(&mut current);
    stats.set(current);
}

struct BusyGuard(Rc<Cell<bool>>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
