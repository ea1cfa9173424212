//! # Scheduler
//!
//! Fixed-priority preemptive scheduler with round-robin among equal
//! priorities.
//!
//! ## Scheduling Algorithm
//!
//! At every decision point (after a task step returns, and after each tick):
//! 1. **Reap**: tasks with a pending cancellation run their cancel hook and
//!    become Terminated
//! 2. **Wake**: Blocked tasks whose delay expired, whose token wait can
//!    complete, or whose token deadline passed become Ready
//! 3. **Select**: the Ready task with the numerically highest priority.
//!    Ties go to the first candidate after the last dispatched task, which
//!    rotates equal priorities round-robin
//! 4. **Step**: the selected task runs until its next suspension point and
//!    is Blocked again
//!
//! Because wakes are re-evaluated before every selection, a token released
//! by a low-priority task resumes a higher-priority waiter before the
//! releasing task (or anyone of lower priority) runs again, within the same
//! tick.

use core::fmt;

use log::{debug, trace};

use crate::config::MAX_TASKS;
use crate::task::{Context, Task, TaskConfig, TaskControlBlock, TaskHandle, TaskState};

/// Why a task could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// All `MAX_TASKS` slots are in use.
    TableFull,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::TableFull => write!(f, "task table full ({} tasks)", MAX_TASKS),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. Holds all task control blocks and the tick
/// counter.
///
/// Task bodies are borrowed for `'t`. Once the scheduler is no longer used
/// the borrows end and the caller can inspect the tasks again.
pub struct Scheduler<'t> {
    /// Fixed-size array of TCBs.
    tasks: [TaskControlBlock<'t>; MAX_TASKS],

    /// Index of the most recently dispatched task.
    current_task: usize,

    /// Number of allocated slots.
    task_count: usize,

    /// Monotonic tick counter.
    tick_count: u64,

    /// Dispatches that switched to a different task than the previous one.
    context_switches: u32,
}

impl<'t> Scheduler<'t> {
    /// Create an empty scheduler at tick 0.
    pub fn new() -> Self {
        Self {
            tasks: core::array::from_fn(|_| TaskControlBlock::EMPTY),
            current_task: 0,
            task_count: 0,
            tick_count: 0,
            context_switches: 0,
        }
    }

    /// Register a new task. It is Ready immediately.
    pub fn spawn(
        &mut self,
        config: TaskConfig,
        body: &'t mut dyn Task,
    ) -> Result<TaskHandle, SpawnError> {
        if self.task_count >= MAX_TASKS {
            return Err(SpawnError::TableFull);
        }

        let id = self.task_count;
        self.tasks[id].init(id, config, body);
        self.task_count += 1;

        debug!("spawned {} (id {}, priority {})", config.name, id, config.priority);
        Ok(TaskHandle(id))
    }

    /// Current tick.
    pub fn now(&self) -> u64 {
        self.tick_count
    }

    /// Number of registered tasks, including terminated ones.
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Dispatches that changed the running task.
    pub fn context_switches(&self) -> u32 {
        self.context_switches
    }

    /// The control block behind a handle.
    pub fn task(&self, handle: TaskHandle) -> &TaskControlBlock<'t> {
        &self.tasks[handle.0]
    }

    /// Advance time by one tick.
    pub fn tick(&mut self) {
        self.advance(1);
    }

    /// Advance time by `ticks` at once and wake every task that came due.
    ///
    /// Wake conditions are `>=` comparisons, so a batch of ticks wakes the
    /// same tasks as the same number of single ticks.
    pub fn advance(&mut self, ticks: u32) {
        self.tick_count += u64::from(ticks);
        self.wake_due();
    }

    fn wake_due(&mut self) {
        let now = self.tick_count;
        for tcb in self.tasks[..self.task_count].iter_mut() {
            tcb.wake_if_due(now);
        }
    }

    fn reap_cancelled(&mut self) {
        for tcb in self.tasks[..self.task_count].iter_mut() {
            if tcb.cancel_requested {
                debug!("cancelled {}", tcb.config.name);
                tcb.terminate();
            }
        }
    }

    /// Select the next task to run.
    ///
    /// Picks the highest-priority Ready task, rotating among equal
    /// priorities starting after the last dispatched task.
    ///
    /// # Returns
    /// Index of the next task, or `None` if nothing is Ready.
    pub fn schedule(&mut self) -> Option<usize> {
        self.reap_cancelled();
        self.wake_due();

        let count = self.task_count;
        let mut best: Option<usize> = None;

        for offset in 1..=count {
            let i = (self.current_task + offset) % count;
            if !self.tasks[i].is_runnable() {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => self.tasks[i].config.priority > self.tasks[b].config.priority,
            };
            if better {
                best = Some(i);
            }
        }

        best
    }

    /// Select and step one task.
    ///
    /// Returns false if no task was Ready at the current tick.
    pub fn dispatch(&mut self) -> bool {
        let next = match self.schedule() {
            Some(next) => next,
            None => return false,
        };

        if next != self.current_task {
            self.context_switches = self.context_switches.wrapping_add(1);
        }
        self.current_task = next;

        let now = self.tick_count;
        let cx = Context::new(now, TaskHandle(next));
        let tcb = &mut self.tasks[next];
        tcb.state = TaskState::Running;
        if let Some(suspend) = tcb.step(&cx) {
            trace!("{} @{} -> {:?}", tcb.config.name, now, suspend);
            tcb.block(suspend, now);
        }
        true
    }

    /// Dispatch until no task is Ready at the current tick.
    ///
    /// Returns the number of steps run.
    pub fn run_ready(&mut self) -> u32 {
        let mut steps = 0;
        while self.dispatch() {
            steps += 1;
        }
        steps
    }

    /// Run the timeline up to and including tick `end`.
    pub fn run_until(&mut self, end: u64) {
        loop {
            self.run_ready();
            if self.tick_count >= end {
                break;
            }
            self.tick();
        }
    }

    /// Request cancellation. The task is retired at the next decision point.
    pub fn cancel(&mut self, handle: TaskHandle) {
        let tcb = &mut self.tasks[handle.0];
        if matches!(tcb.state, TaskState::Empty | TaskState::Terminated) {
            return;
        }
        tcb.cancel_requested = true;
    }

    /// Cancel and retire every task now.
    pub fn shutdown(&mut self) {
        for tcb in self.tasks[..self.task_count].iter_mut() {
            if tcb.state != TaskState::Terminated {
                tcb.terminate();
            }
        }
        debug!("scheduler shut down at tick {}", self.tick_count);
    }
}

impl Default for Scheduler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
