//! # Application Tasks
//!
//! The three periodic tasks of the demo:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | drive-high (A) | 1 | takes the token, drives the line high, holds 500 ticks |
//! | drive-low (B) | 2 | takes the token, drives the line low, holds 1000 ticks |
//! | status (C) | 3 | logs a status line every 1000 ticks, never touches the token |
//!
//! A and B share one state machine, [`DriveTask`]:
//!
//! ```text
//!            ┌────────────────────────────────────────────────┐
//!            ▼                                                │
//!   ┌────────────────┐ permit  ┌─────────┐ hold elapsed       │
//!   │ AttemptAcquire │ ──────► │ Holding │ ── drop(permit) ─┐ │
//!   └────────────────┘         └─────────┘                  ▼ │
//!            │ timeout: warn                          ┌──────────┐
//!            └──────────────────────────────────────► │ Cooldown │
//!                                                     └──────────┘
//! ```
//!
//! The cooldown is the same 100 ticks on both branches.

use core::mem;
use core::task::Poll;

use log::{debug, info, warn};

use crate::config::{
    COOLDOWN_TICKS, DRIVE_HIGH_HOLD_TICKS, DRIVE_LOW_HOLD_TICKS, STATUS_PERIOD_TICKS,
    TOKEN_WAIT_TICKS,
};
use crate::line::{Level, OutputLine};
use crate::sync::{Acquire, Permit, Semaphore};
use crate::task::{Context, Suspend, Task};

// ---------------------------------------------------------------------------
// Drive tasks (A and B)
// ---------------------------------------------------------------------------

/// Counters kept by a drive task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveStats {
    /// Successful acquisitions of the token.
    pub acquisitions: u32,
    /// Attempts that gave up after `TOKEN_WAIT_TICKS`.
    pub timeouts: u32,
    /// Tick at which the most recent attempt started.
    pub last_attempt_at: Option<u64>,
    /// Tick at which the most recent attempt timed out.
    pub last_timeout_at: Option<u64>,
}

enum Phase<'a> {
    /// Next step starts a fresh attempt. Entered after the cooldown.
    Cooldown,
    AttemptAcquire(Acquire<'a>),
    Holding(Permit<'a>),
}

/// Takes the token, drives the line to `level`, holds for `hold_ticks`,
/// releases, cools down, repeats.
pub struct DriveTask<'a> {
    name: &'static str,
    level: Level,
    hold_ticks: u32,
    token: &'a Semaphore,
    line: &'a dyn OutputLine,
    phase: Phase<'a>,
    stats: DriveStats,
}

impl<'a> DriveTask<'a> {
    pub fn new(
        name: &'static str,
        level: Level,
        hold_ticks: u32,
        token: &'a Semaphore,
        line: &'a dyn OutputLine,
    ) -> Self {
        Self {
            name,
            level,
            hold_ticks,
            token,
            line,
            phase: Phase::Cooldown,
            stats: DriveStats::default(),
        }
    }

    /// Task A.
    pub fn drive_high(token: &'a Semaphore, line: &'a dyn OutputLine) -> Self {
        Self::new("drive-high", Level::High, DRIVE_HIGH_HOLD_TICKS, token, line)
    }

    /// Task B.
    pub fn drive_low(token: &'a Semaphore, line: &'a dyn OutputLine) -> Self {
        Self::new("drive-low", Level::Low, DRIVE_LOW_HOLD_TICKS, token, line)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> DriveStats {
        self.stats
    }

    /// Whether the task currently holds the token.
    pub fn is_holding(&self) -> bool {
        matches!(self.phase, Phase::Holding(_))
    }

    fn poll_acquire(&mut self, acquire: Acquire<'a>, now: u64) -> Suspend {
        match acquire.poll(now) {
            Poll::Ready(Ok(permit)) => {
                self.line.set_level(self.level);
                self.stats.acquisitions += 1;
                self.phase = Phase::Holding(permit);
                Suspend::Delay(self.hold_ticks)
            }
            Poll::Ready(Err(_)) => {
                warn!(target: self.name, "Semaphore not available");
                self.stats.timeouts += 1;
                self.stats.last_timeout_at = Some(now);
                Suspend::Delay(COOLDOWN_TICKS)
            }
            Poll::Pending => {
                let deadline = acquire.deadline();
                self.phase = Phase::AttemptAcquire(acquire);
                Suspend::Pend { deadline }
            }
        }
    }
}

impl Task for DriveTask<'_> {
    fn step(&mut self, cx: &Context) -> Suspend {
        let now = cx.now();
        match mem::replace(&mut self.phase, Phase::Cooldown) {
            Phase::Cooldown => {
                self.stats.last_attempt_at = Some(now);
                let acquire = self.token.acquire(now, TOKEN_WAIT_TICKS);
                self.poll_acquire(acquire, now)
            }
            Phase::AttemptAcquire(acquire) => self.poll_acquire(acquire, now),
            Phase::Holding(permit) => {
                drop(permit);
                debug!(target: self.name, "released token at {}", now);
                Suspend::Delay(COOLDOWN_TICKS)
            }
        }
    }

    fn wake_condition(&self) -> bool {
        match &self.phase {
            Phase::AttemptAcquire(acquire) => acquire.can_complete(),
            _ => false,
        }
    }

    fn on_cancel(&mut self) {
        // Dropping a held permit releases the token.
        self.phase = Phase::Cooldown;
    }
}

// ---------------------------------------------------------------------------
// Status task (C)
// ---------------------------------------------------------------------------

/// Logs a status line every `STATUS_PERIOD_TICKS`.
#[derive(Debug, Default)]
pub struct StatusTask {
    reports: u32,
    last_report_at: Option<u64>,
}

impl StatusTask {
    pub const fn new() -> Self {
        Self {
            reports: 0,
            last_report_at: None,
        }
    }

    /// Status lines emitted so far.
    pub fn reports(&self) -> u32 {
        self.reports
    }

    pub fn last_report_at(&self) -> Option<u64> {
        self.last_report_at
    }
}

impl Task for StatusTask {
    fn step(&mut self, cx: &Context) -> Suspend {
        info!(target: "status", "Task 3: Status message");
        self.reports += 1;
        self.last_report_at = Some(cx.now());
        Suspend::Delay(STATUS_PERIOD_TICKS)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use core::cell::RefCell;
    use std::vec::Vec;

    use super::*;
    use crate::scheduler::Scheduler;
    use crate::task::TaskConfig;

    /// Output line that remembers every level it was driven to.
    #[derive(Default)]
    pub(crate) struct RecordingLine {
        pub(crate) history: RefCell<Vec<Level>>,
    }

    impl OutputLine for RecordingLine {
        fn set_level(&self, level: Level) {
            self.history.borrow_mut().push(level);
        }
    }

    fn config(name: &'static str, priority: u8) -> TaskConfig {
        TaskConfig { name, priority }
    }

    #[test]
    fn test_drive_high_holds_then_cools_down() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let mut high = DriveTask::drive_high(&token, &line);

        let mut sched = Scheduler::new();
        sched.spawn(config("drive-high", 1), &mut high).unwrap();

        sched.run_until(499);
        assert_eq!(token.outstanding(), 1);
        sched.run_until(500);
        assert_eq!(token.outstanding(), 0);
        // Hold 500 + cooldown 100 per cycle: attempts at 0, 600, 1200.
        sched.run_until(1200);

        let stats = high.stats();
        assert_eq!(stats.acquisitions, 3);
        assert_eq!(stats.timeouts, 0);
        assert_eq!(stats.last_attempt_at, Some(1200));
        assert!(high.is_holding());
        assert_eq!(*line.history.borrow(), [Level::High; 3].to_vec());
    }

    #[test]
    fn test_timeout_retries_after_cooldown() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let _held = token.try_acquire().unwrap();
        let mut high = DriveTask::drive_high(&token, &line);

        let mut sched = Scheduler::new();
        sched.spawn(config("drive-high", 1), &mut high).unwrap();

        sched.run_until(250);
        let stats = high.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.last_timeout_at, Some(100));
        // Next attempt exactly one cooldown after the timeout.
        assert_eq!(stats.last_attempt_at, Some(200));

        let mut high = DriveTask::drive_high(&token, &line);
        let mut sched = Scheduler::new();
        sched.spawn(config("drive-high", 1), &mut high).unwrap();
        sched.run_until(1000);
        let stats = high.stats();
        assert_eq!(stats.timeouts, 5);
        assert_eq!(stats.last_timeout_at, Some(900));
        assert_eq!(stats.last_attempt_at, Some(1000));
        assert_eq!(stats.acquisitions, 0);
        assert!(line.history.borrow().is_empty());
    }

    #[test]
    fn test_priority_race_favours_drive_low() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let held = token.try_acquire().unwrap();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);

        let mut sched = Scheduler::new();
        // Spawn order puts drive-high first so only priority can favour B.
        sched.spawn(config("drive-high", 1), &mut high).unwrap();
        sched.spawn(config("drive-low", 2), &mut low).unwrap();
        sched.run_until(50);

        // Both are pending on the token; free it.
        drop(held);
        sched.run_ready();

        assert_eq!(token.outstanding(), 1);
        assert!(low.is_holding());
        assert!(!high.is_holding());
        assert_eq!(low.stats().acquisitions, 1);
        assert_eq!(high.stats().acquisitions, 0);
        assert_eq!(*line.history.borrow(), [Level::Low].to_vec());
    }

    #[test]
    fn test_release_wakes_waiter_in_same_tick() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);

        let mut sched = Scheduler::new();
        sched.spawn(config("drive-high", 1), &mut high).unwrap();
        sched.spawn(config("drive-low", 2), &mut low).unwrap();

        // B holds 0..1000, then A takes it at 1000 as B cools down.
        sched.run_until(1000);
        // B retries 1100, 1300; A releases at 1500 and B, pending since
        // 1500, takes it on the same tick.
        sched.run_until(1500);

        assert_eq!(low.stats().acquisitions, 2);
        assert_eq!(low.stats().timeouts, 2);
        assert_eq!(high.stats().acquisitions, 1);
        assert!(low.is_holding());
        assert_eq!(
            *line.history.borrow(),
            [Level::Low, Level::High, Level::Low].to_vec()
        );
    }

    #[test]
    fn test_cancel_releases_held_token() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let mut low = DriveTask::drive_low(&token, &line);

        let mut sched = Scheduler::new();
        let handle = sched.spawn(config("drive-low", 2), &mut low).unwrap();
        sched.run_until(10);
        assert_eq!(token.outstanding(), 1);

        sched.cancel(handle);
        sched.run_ready();
        assert_eq!(token.outstanding(), 0);
        assert_eq!(token.available(), 1);
        assert!(!low.is_holding());
    }

    #[test]
    fn test_status_reports_every_period() {
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        sched.spawn(config("status", 3), &mut status).unwrap();
        sched.run_until(10_000);

        assert_eq!(status.reports(), 11);
        assert_eq!(status.last_report_at(), Some(10_000));
    }
}
