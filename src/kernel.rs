//! # Kernel
//!
//! Boot sequence and the firmware run loop.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► stm32f4::init()        ← output pin + serial channel
//!         ├─► serial::init()         ← install the logger
//!         ├─► kernel::surplus_release() on the Free token
//!         ├─► kernel::spawn_tasks()  ← A (1), B (2), C (3)
//!         └─► kernel::run()          ← never returns
//!               ├─► consume SysTick ticks
//!               ├─► dispatch one ready task
//!               ├─► send queued log bytes, poll serial RX
//!               └─► sleep until the next interrupt when idle
//! ```
//!
//! On a hosted target the same sequence runs against a simulated clock, see
//! [`Scheduler::run_until`].

use log::{debug, info};

use crate::app::{DriveTask, StatusTask};
use crate::config::{DRIVE_HIGH_PRIORITY, DRIVE_LOW_PRIORITY, STATUS_PRIORITY};
use crate::scheduler::{Scheduler, SpawnError};
use crate::sync::{GiveError, Semaphore};
use crate::task::{TaskConfig, TaskHandle};

/// Handles of the three application tasks.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandles {
    pub drive_high: TaskHandle,
    pub drive_low: TaskHandle,
    pub status: TaskHandle,
}

/// Release the freshly created token once more.
///
/// The token already starts Free, so whether this adds a second credit
/// depends on its semantics: a binary token refuses it, a counting token
/// accepts it and both drive tasks can then hold the token at once.
pub fn surplus_release(token: &Semaphore) -> Result<(), GiveError> {
    let result = token.give();
    match result {
        Ok(()) => debug!("surplus release accepted, {} credits", token.available()),
        Err(err) => debug!("surplus release ignored: {}", err),
    }
    result
}

/// Register the three application tasks with their fixed priorities.
pub fn spawn_tasks<'t, 'a: 't>(
    sched: &mut Scheduler<'t>,
    drive_high: &'t mut DriveTask<'a>,
    drive_low: &'t mut DriveTask<'a>,
    status: &'t mut StatusTask,
) -> Result<TaskHandles, SpawnError> {
    let drive_high = sched.spawn(
        TaskConfig {
            name: drive_high.name(),
            priority: DRIVE_HIGH_PRIORITY,
        },
        drive_high,
    )?;
    let drive_low = sched.spawn(
        TaskConfig {
            name: drive_low.name(),
            priority: DRIVE_LOW_PRIORITY,
        },
        drive_low,
    )?;
    let status = sched.spawn(
        TaskConfig {
            name: "status",
            priority: STATUS_PRIORITY,
        },
        status,
    )?;

    info!("{} tasks started", sched.task_count());
    Ok(TaskHandles {
        drive_high,
        drive_low,
        status,
    })
}

/// One pass of the run loop: apply `elapsed` ticks, step at most one task,
/// then give `service` a turn.
///
/// `service` moves queued log output to the UART and drains received
/// bytes. It must not wait on the hardware, and returns true if it made
/// progress. Between two passes time advances by however long the pass
/// took, so a due higher-priority task is picked at the next pass.
///
/// Returns false when there was nothing to do and the core may sleep until
/// the next tick.
pub fn run_once(
    sched: &mut Scheduler<'_>,
    elapsed: u32,
    service: &mut impl FnMut() -> bool,
) -> bool {
    if elapsed > 0 {
        sched.advance(elapsed);
    }
    let dispatched = sched.dispatch();
    let serviced = service();
    dispatched || serviced
}

/// Run the scheduler forever on the SysTick clock. **Does not return.**
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn run(sched: &mut Scheduler<'_>, mut service: impl FnMut() -> bool) -> ! {
    use crate::arch::cortex_m4;

    loop {
        let elapsed = cortex_m4::take_pending_ticks();
        if !run_once(sched, elapsed, &mut service) {
            cortex_m4::wait_for_tick();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    extern crate std;

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use log::{Level, LevelFilter, Log, Record};

    use super::*;
    use crate::app::tests::RecordingLine;
    use crate::line::Level as LineLevel;
    use crate::serial::{SerialChannel, SerialLogger, SerialPort};
    use crate::sync::TokenSemantics;
    use crate::task::{Context, Suspend, Task, TaskState};

    #[test]
    fn test_binary_token_preserves_mutual_exclusion() {
        let token = Semaphore::for_semantics(TokenSemantics::Binary);
        assert_eq!(surplus_release(&token), Err(GiveError::Full));
        assert_eq!(token.available(), 1);

        let line = RecordingLine::default();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        spawn_tasks(&mut sched, &mut high, &mut low, &mut status).unwrap();
        sched.run_until(60_000);

        assert_eq!(token.peak_outstanding(), 1);
        assert!(high.stats().acquisitions > 10);
        assert!(low.stats().acquisitions > 10);
        // Each acquisition drives the line exactly once.
        let history = line.history.borrow();
        assert_eq!(
            history.len() as u32,
            high.stats().acquisitions + low.stats().acquisitions
        );
        assert_eq!(history[0], LineLevel::Low);
    }

    #[test]
    fn test_counting_token_lets_both_hold_on_first_run() {
        let token = Semaphore::for_semantics(TokenSemantics::Counting);
        assert_eq!(surplus_release(&token), Ok(()));
        assert_eq!(token.available(), 2);

        let line = RecordingLine::default();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        spawn_tasks(&mut sched, &mut high, &mut low, &mut status).unwrap();
        sched.run_ready();

        assert_eq!(token.outstanding(), 2);
        assert_eq!(token.peak_outstanding(), 2);
        assert!(high.is_holding() && low.is_holding());
        assert_eq!(*line.history.borrow(), [LineLevel::Low, LineLevel::High].to_vec());
    }

    #[test]
    fn test_status_independent_of_contention() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        // Token never becomes available to the drive tasks.
        let _held = token.try_acquire().unwrap();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        spawn_tasks(&mut sched, &mut high, &mut low, &mut status).unwrap();
        sched.run_until(10_000);

        assert_eq!(status.reports(), 11);
        assert_eq!(status.last_report_at(), Some(10_000));
        assert!(high.stats().timeouts > 0 && low.stats().timeouts > 0);
    }

    #[test]
    fn test_no_leak_after_long_run_and_shutdown() {
        let token = Semaphore::binary();
        let line = RecordingLine::default();
        let mut high = DriveTask::drive_high(&token, &line);
        let mut low = DriveTask::drive_low(&token, &line);
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        let handles = spawn_tasks(&mut sched, &mut high, &mut low, &mut status).unwrap();
        // Stop mid-hold.
        sched.run_until(100_250);
        assert_eq!(token.outstanding(), 1);

        sched.shutdown();
        for handle in [handles.drive_high, handles.drive_low, handles.status] {
            assert_eq!(sched.task(handle).state, TaskState::Terminated);
        }
        assert_eq!(token.outstanding(), 0);
        assert_eq!(token.available(), 1);
        assert!(token.try_acquire().is_some());
    }

    /// UART at one byte per tick: a written byte occupies the transmitter
    /// until the clock moves on.
    struct ClockedPort {
        clock: Arc<AtomicU64>,
        busy_until: u64,
        sent: usize,
    }

    impl SerialPort for ClockedPort {
        fn write_byte(&mut self, _byte: u8) {
            self.busy_until = self.clock.load(Ordering::SeqCst) + 1;
            self.sent += 1;
        }

        fn read_byte(&mut self) -> Option<u8> {
            None
        }

        fn tx_ready(&mut self) -> bool {
            self.clock.load(Ordering::SeqCst) >= self.busy_until
        }
    }

    /// Logs the timeout warning every 50 ticks.
    struct Warner<'a> {
        logger: &'a SerialLogger<ClockedPort>,
    }

    impl Task for Warner<'_> {
        fn step(&mut self, _cx: &Context) -> Suspend {
            self.logger.log(
                &Record::builder()
                    .args(format_args!("Semaphore not available"))
                    .level(Level::Warn)
                    .target("drive-high")
                    .build(),
            );
            Suspend::Delay(50)
        }
    }

    #[test]
    fn test_status_on_time_while_low_priority_task_logs() {
        const LINE: usize = "[ WARN drive-high] Semaphore not available\r\n".len();

        let clock = Arc::new(AtomicU64::new(0));
        let logger = SerialLogger::new(LevelFilter::Info);
        logger.attach(SerialChannel::new(ClockedPort {
            clock: Arc::clone(&clock),
            busy_until: 0,
            sent: 0,
        }));
        let mut warner = Warner { logger: &logger };
        let mut status = StatusTask::new();

        let mut sched = Scheduler::new();
        sched
            .spawn(
                TaskConfig {
                    name: "drive-high",
                    priority: DRIVE_HIGH_PRIORITY,
                },
                &mut warner,
            )
            .unwrap();
        sched
            .spawn(
                TaskConfig {
                    name: "status",
                    priority: STATUS_PRIORITY,
                },
                &mut status,
            )
            .unwrap();

        let mut service = || logger.pump() > 0;
        loop {
            let elapsed = (clock.load(Ordering::SeqCst) - sched.now()) as u32;
            assert!(elapsed <= 1, "a pass took {} ticks", elapsed);
            if !run_once(&mut sched, elapsed, &mut service) {
                // Sleep until the next tick.
                clock.fetch_add(1, Ordering::SeqCst);
            }
            if sched.now() >= 3000 {
                break;
            }
        }

        assert_eq!(status.reports(), 4);
        assert_eq!(status.last_report_at(), Some(3000));
        // Warnings at 0, 50, ..., 2950 all made it out.
        assert_eq!(logger.dropped_lines(), 0);
        assert_eq!(logger.queued(), 0);
        let sent = logger.with_channel(|channel| channel.port().sent).unwrap();
        assert_eq!(sent, 60 * LINE);
    }
}
