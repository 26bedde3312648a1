use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use log::debug;

/// Handle returned by a [`Scheduler`] for a pending timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub i32);

pub type TimerCallback = Box<dyn FnOnce()>;

/// Clock and timer primitives of the page's event loop.
pub trait Scheduler {
    fn now_ms(&self) -> f64;

    /// Returns `None` when the host refused to schedule the callback.
    fn set_timeout(&self, delay_ms: u32, callback: TimerCallback) -> Option<TimerId>;

    fn clear_timeout(&self, id: TimerId);
}

struct SlotState {
    generation: Cell<u64>,
    pending: Cell<Option<TimerId>>,
}

/// A named one-shot timeout. Scheduling it again cancels the previous
/// deadline, so at most one instance is ever live.
pub struct TimeoutSlot {
    name: &'static str,
    state: Rc<SlotState>,
}

impl TimeoutSlot {
    pub fn new(name: &'static str) -> TimeoutSlot {
        TimeoutSlot {
            name,
            state: Rc::new(SlotState {
                generation: Cell::new(0),
                pending: Cell::new(None),
            }),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.state.pending.get().is_some()
    }

    pub fn cancel(&self, scheduler: &dyn Scheduler) {
        if self.clear(scheduler) {
            debug!("{} cancelled", self.name);
        }
    }

    /// Invalidates the pending deadline. True if one was pending.
    fn clear(&self, scheduler: &dyn Scheduler) -> bool {
        self.state.generation.set(self.state.generation.get() + 1);
        match self.state.pending.take() {
            Some(id) => {
                scheduler.clear_timeout(id);
                true
            }
            None => false,
        }
    }

    pub fn schedule(
        &self,
        scheduler: &dyn Scheduler,
        delay_ms: u32,
        callback: impl FnOnce() + 'static,
    ) {
        self.clear(scheduler);

        let name = self.name;
        let state = Rc::clone(&self.state);
        let generation = state.generation.get();
        let id = scheduler.set_timeout(
            delay_ms,
            Box::new(move || {
                // A stale firing from a cancelled generation must not run.
                if state.generation.get() != generation {
                    return;
                }
                state.pending.set(None);
                debug!("{} fired", name);
                callback();
            }),
        );
        self.state.pending.set(id);
    }
}

type StepFn = Rc<RefCell<dyn FnMut() -> Option<u32>>>;

struct TaskState {
    cancelled: Cell<bool>,
    pending: Cell<Option<TimerId>>,
}

/// A cancellable self-rescheduling timer. The step closure returns the delay
/// until its next run, or `None` to finish.
///
/// Dropping the handle does not cancel the task; call [`RepeatingTask::cancel`].
pub struct RepeatingTask {
    state: Rc<TaskState>,
}

impl RepeatingTask {
    pub fn start(
        scheduler: &Rc<dyn Scheduler>,
        first_delay_ms: u32,
        step: impl FnMut() -> Option<u32> + 'static,
    ) -> RepeatingTask {
        let state = Rc::new(TaskState {
            cancelled: Cell::new(false),
            pending: Cell::new(None),
        });
        let step: StepFn = Rc::new(RefCell::new(step));
        schedule_step(Rc::clone(scheduler), Rc::clone(&state), step, first_delay_ms);
        RepeatingTask { state }
    }

    /// True while a next run is pending.
    pub fn is_live(&self) -> bool {
        !self.state.cancelled.get() && self.state.pending.get().is_some()
    }

    pub fn cancel(&self, scheduler: &dyn Scheduler) {
        self.state.cancelled.set(true);
        if let Some(id) = self.state.pending.take() {
            scheduler.clear_timeout(id);
        }
    }
}

fn schedule_step(scheduler: Rc<dyn Scheduler>, state: Rc<TaskState>, step: StepFn, delay_ms: u32) {
    let next_scheduler = Rc::clone(&scheduler);
    let next_state = Rc::clone(&state);
    let id = scheduler.set_timeout(
        delay_ms,
        Box::new(move || {
            next_state.pending.set(None);
            if next_state.cancelled.get() {
                return;
            }
            let next_delay = (&mut *step.borrow_mut())();
            // The step itself may have cancelled the task.
            if next_state.cancelled.get() {
                return;
            }
            if let Some(next_delay) = next_delay {
                schedule_step(next_scheduler, next_state, step, next_delay);
            }
        }),
    );
    state.pending.set(id);
}
