//! # Task Control Block
//!
//! Defines the task model. A task is a run-to-completion state machine: the
//! scheduler calls [`Task::step`] whenever the task is dispatched, and the
//! step returns a [`Suspend`] describing how the task gives up the CPU.
//! Timed waits and token waits are both true suspensions, the task is not
//! dispatched again until its wait condition holds.

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     schedule()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲                                │
///        │        Delay / Pend / Yield    │
///        │                                ▼
///        │       wait condition     ┌──────────┐
///        └───────────────────────── │ Blocked  │
///                                   └──────────┘
///
///   any state ── cancel() ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is ready to run.
    Ready,
    /// Task is being stepped.
    Running,
    /// Task is waiting for a tick or for the token.
    Blocked,
    /// Slot holds no task.
    Empty,
    /// Task was cancelled and will not be scheduled again.
    Terminated,
}

// ---------------------------------------------------------------------------
// Suspension points
// ---------------------------------------------------------------------------

/// How a task gives up the CPU at the end of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suspend {
    /// End of time slice. Ready again at the next tick, behind
    /// equal-priority peers.
    Yield,
    /// Timed wait of the given number of ticks. `Delay(0)` is a `Yield`.
    Delay(u32),
    /// Blocked on the token until [`Task::wake_condition`] holds or the
    /// deadline tick arrives, whichever comes first.
    Pend { deadline: u64 },
}

/// What a blocked task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    None,
    /// Wake at this tick.
    Until(u64),
    /// Wake when the task's wake condition holds, or at the deadline.
    Pend { deadline: u64 },
}

impl Wait {
    fn from_suspend(suspend: Suspend, now: u64) -> Self {
        match suspend {
            Suspend::Yield | Suspend::Delay(0) => Wait::Until(now + 1),
            Suspend::Delay(ticks) => Wait::Until(now + u64::from(ticks)),
            // A deadline already reached would wake the task on the
            // same tick it blocked.
            Suspend::Pend { deadline } => Wait::Pend {
                deadline: deadline.max(now + 1),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Task interface
// ---------------------------------------------------------------------------

/// Identifies a spawned task. Used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle(pub(crate) usize);

impl TaskHandle {
    /// Index of the task in the scheduler table.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// What a task sees while it is being stepped.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    now: u64,
    task: TaskHandle,
}

impl Context {
    pub(crate) fn new(now: u64, task: TaskHandle) -> Self {
        Self { now, task }
    }

    /// Current tick.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// The task being stepped.
    pub fn task(&self) -> TaskHandle {
        self.task
    }
}

/// A unit of periodic work driven by the scheduler.
pub trait Task {
    /// Run until the next suspension point.
    fn step(&mut self, cx: &Context) -> Suspend;

    /// Whether a task suspended with [`Suspend::Pend`] can make progress.
    fn wake_condition(&self) -> bool {
        false
    }

    /// Called once when the task is cancelled. Held resources must be
    /// dropped here.
    fn on_cancel(&mut self) {}
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static configuration for a task, set at creation time.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Name used in log lines.
    pub name: &'static str,

    /// Fixed priority (higher = more important). Range: 0–255.
    pub priority: u8,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB): scheduling state plus a borrow of the task body.
///
/// TCBs are stored in a fixed array in the scheduler, no heap allocation.
/// The body is borrowed for the scheduler's lifetime `'t`, so the caller
/// can inspect the task again once the scheduler is gone.
pub struct TaskControlBlock<'t> {
    /// Index in the scheduler's task array.
    pub id: usize,

    /// Current execution state.
    pub state: TaskState,

    /// Static configuration.
    pub config: TaskConfig,

    /// Wake condition while Blocked.
    pub wait: Wait,

    /// Set by `Scheduler::cancel`, honoured at the next decision point.
    pub cancel_requested: bool,

    /// Number of times the task has been stepped.
    pub dispatches: u32,

    body: Option<&'t mut dyn Task>,
}

impl<'t> TaskControlBlock<'t> {
    /// An unallocated slot. Used to initialize the scheduler's array.
    pub const EMPTY: Self = Self {
        id: 0,
        state: TaskState::Empty,
        config: TaskConfig {
            name: "",
            priority: 0,
        },
        wait: Wait::None,
        cancel_requested: false,
        dispatches: 0,
        body: None,
    };

    /// Initialize a slot for a new task. The task starts Ready.
    pub fn init(&mut self, id: usize, config: TaskConfig, body: &'t mut dyn Task) {
        self.id = id;
        self.state = TaskState::Ready;
        self.config = config;
        self.wait = Wait::None;
        self.cancel_requested = false;
        self.dispatches = 0;
        self.body = Some(body);
    }

    /// Check if this task can be dispatched.
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.body.is_some() && self.state == TaskState::Ready
    }

    /// Step the task body once. Returns `None` for an empty slot.
    pub fn step(&mut self, cx: &Context) -> Option<Suspend> {
        let body = self.body.as_deref_mut()?;
        self.dispatches = self.dispatches.wrapping_add(1);
        Some(body.step(cx))
    }

    /// Park the task until the condition described by `suspend` holds.
    pub fn block(&mut self, suspend: Suspend, now: u64) {
        self.wait = Wait::from_suspend(suspend, now);
        self.state = TaskState::Blocked;
    }

    /// Move a Blocked task back to Ready if its wait is over.
    ///
    /// Returns true if the task was woken.
    pub fn wake_if_due(&mut self, now: u64) -> bool {
        if self.state != TaskState::Blocked {
            return false;
        }
        let due = match self.wait {
            Wait::None => true,
            Wait::Until(tick) => now >= tick,
            Wait::Pend { deadline } => {
                now >= deadline || self.body.as_deref().map_or(false, |b| b.wake_condition())
            }
        };
        if due {
            self.wait = Wait::None;
            self.state = TaskState::Ready;
        }
        due
    }

    /// Run the body's cancellation hook and retire the slot.
    pub fn terminate(&mut self) {
        if let Some(body) = self.body.take() {
            body.on_cancel();
        }
        self.wait = Wait::None;
        self.cancel_requested = false;
        self.state = TaskState::Terminated;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
